//! Workflow engine core: definitions, durable execution and status.
//!
//! - `definition` -- step/definition builder and the type-name registry
//! - `context` -- `StepContext` and the services bundle handed to steps
//! - `checkpoint` -- durable checkpoint manager for crash recovery
//! - `retry` -- opt-in retry policy evaluation
//! - `timer` -- wake-up queue for sleeping instances
//! - `engine` -- the durable step engine
//! - `dispatcher` -- creates and admits new instances
//! - `status` -- read-only status queries
//! - `example` -- the bundled `ExampleWorkflow`

pub mod checkpoint;
pub mod context;
pub mod definition;
pub mod dispatcher;
pub mod engine;
pub mod example;
pub mod retry;
pub mod status;
pub mod timer;
