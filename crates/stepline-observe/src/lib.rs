//! Observability setup for Stepline: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
