//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (stepline-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod instance;
pub mod memory;
pub mod user;
