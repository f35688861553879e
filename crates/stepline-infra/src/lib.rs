//! Infrastructure layer for Stepline.
//!
//! Contains implementations of the repository traits defined in `stepline-core`
//! (SQLite storage with WAL mode and split read/write pools), the global
//! configuration loader and data directory resolution.

pub mod config;
pub mod sqlite;
