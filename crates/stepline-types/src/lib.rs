//! Shared domain types for Stepline.
//!
//! This crate contains the domain types used across the Stepline workspace:
//! workflow instances and their checkpoints, the user entity consumed by
//! compute steps, global configuration, and the associated error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod error;
pub mod user;
pub mod workflow;
