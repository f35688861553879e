//! SQLite store behind the workflow engine and the user directory.
//!
//! Every checkpoint write (instance creation, step records, sleep and terminal
//! transitions) goes through `DatabasePool::writer`, which holds exactly one
//! connection. Writes for all instances are therefore applied one at a time, in
//! the order the engine awaits them, and a step record can never land after the
//! terminal write that follows it. Status queries and `stepline instances` read
//! through `reader` and see the last committed checkpoint thanks to WAL mode.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Concurrent status and listing queries.
const READER_CONNECTIONS: u32 = 8;
/// Checkpoint writes are serialized on a single connection.
const WRITER_CONNECTIONS: u32 = 1;
/// How long a reader waits on a checkpoint that holds the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Reader/writer pair over one `stepline.db` file.
#[derive(Clone)]
pub struct DatabasePool {
    /// Read-only connections for status queries.
    pub reader: SqlitePool,
    /// The single connection all checkpoint and user writes go through.
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Connect to `database_url`, creating the file if needed, and bring the
    /// schema up to date before any reader is opened.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = connect_options(database_url)?;

        let writer = SqlitePoolOptions::new()
            .max_connections(WRITER_CONNECTIONS)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(database_url, "database pool ready");
        Ok(Self { reader, writer })
    }

    /// Open (or create) `stepline.db` inside `data_dir`.
    pub async fn open_in(data_dir: &Path) -> Result<Self, sqlx::Error> {
        Self::new(&database_url_for(data_dir)).await
    }
}

fn connect_options(database_url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
        .create_if_missing(true))
}

/// SQLite URL of the database file inside `data_dir`.
pub fn database_url_for(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("stepline.db").display())
}

/// Returns the default database URL based on `STEPLINE_DATA_DIR` env var,
/// falling back to `~/.stepline/stepline.db`.
pub fn default_database_url() -> String {
    database_url_for(&crate::config::resolve_data_dir())
}
