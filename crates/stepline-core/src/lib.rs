//! Workflow engine and repository trait definitions for Stepline.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, the request validator, and the durable step engine with
//! its dispatcher and status service. It depends only on `stepline-types` --
//! never on `stepline-infra` or any database/IO crate.

pub mod repository;
pub mod validation;
pub mod workflow;
