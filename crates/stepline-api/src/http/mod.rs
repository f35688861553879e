//! HTTP/REST API layer for Stepline.
//!
//! Axum-based routes for triggering workflows and polling their status,
//! with optional API key authentication and a `{ success, ... }` envelope.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
