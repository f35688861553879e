//! SQLite workflow instance repository implementation.
//!
//! Implements `InstanceRepository` from `stepline-core` using sqlx with split
//! read/write pools. Params, checkpoints and results are stored as JSON text.
//! Every transition is a conditional UPDATE that only matches live
//! (non-terminal) rows; step completion runs in a single transaction.

use chrono::{DateTime, Utc};
use sqlx::Row;
use stepline_core::repository::instance::{InstanceFilter, InstanceRepository};
use stepline_types::error::RepositoryError;
use stepline_types::workflow::{Checkpoint, InstanceStatus, StepRecord, WorkflowInstance};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, query_error};

const INSTANCE_COLUMNS: &str = "id, definition_type, params, status, checkpoint, wake_at, \
     result, error, created_at, updated_at, completed_at";

/// Matches rows that may still change.
const LIVE: &str = "status NOT IN ('completed', 'failed')";

/// SQLite-backed implementation of `InstanceRepository`.
#[derive(Clone)]
pub struct SqliteInstanceRepository {
    pool: DatabasePool,
}

impl SqliteInstanceRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Explain why a conditional UPDATE matched no row.
    async fn rejected_write(&self, id: &str) -> RepositoryError {
        let status: Result<Option<(String,)>, sqlx::Error> =
            sqlx::query_as("SELECT status FROM workflow_instances WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool.writer)
                .await;

        match status {
            Ok(Some((status,))) => {
                RepositoryError::Conflict(format!("instance {id} is {status}"))
            }
            Ok(None) => RepositoryError::NotFound,
            Err(e) => query_error(e),
        }
    }

    /// Run a single-row conditional UPDATE against a live instance.
    async fn update_live(
        &self,
        id: &str,
        set_clause: &str,
        binds: Vec<Option<String>>,
    ) -> Result<(), RepositoryError> {
        let sql = format!(
            "UPDATE workflow_instances SET {set_clause}, updated_at = ? WHERE id = ? AND {LIVE}"
        );
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let result = query
            .bind(format_datetime(&Utc::now()))
            .bind(id)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_write(id).await);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct InstanceRow {
    id: String,
    definition_type: String,
    params: String,
    status: String,
    checkpoint: Option<String>,
    wake_at: Option<String>,
    result: Option<String>,
    error: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl InstanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            definition_type: row.try_get("definition_type")?,
            params: row.try_get("params")?,
            status: row.try_get("status")?,
            checkpoint: row.try_get("checkpoint")?,
            wake_at: row.try_get("wake_at")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_instance(self) -> Result<WorkflowInstance, RepositoryError> {
        let status: InstanceStatus =
            serde_json::from_value(serde_json::Value::String(self.status.clone())).map_err(
                |_| RepositoryError::Query(format!("invalid instance status: {}", self.status)),
            )?;

        let params = serde_json::from_str(&self.params)
            .map_err(|e| RepositoryError::Query(format!("invalid params JSON: {e}")))?;

        let checkpoint: Option<Checkpoint> = self
            .checkpoint
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid checkpoint JSON: {e}")))
            })
            .transpose()?;

        let result = self
            .result
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid result JSON: {e}")))
            })
            .transpose()?;

        Ok(WorkflowInstance {
            id: self.id,
            definition_type: self.definition_type,
            params,
            status,
            checkpoint,
            wake_at: self.wake_at.as_deref().map(parse_datetime).transpose()?,
            result,
            error: self.error,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct StepRecordRow {
    step_index: i64,
    step_name: String,
    result: String,
    attempts: i64,
    completed_at: String,
}

impl StepRecordRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            step_index: row.try_get("step_index")?,
            step_name: row.try_get("step_name")?,
            result: row.try_get("result")?,
            attempts: row.try_get("attempts")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_record(self) -> Result<StepRecord, RepositoryError> {
        Ok(StepRecord {
            step_index: self.step_index as u32,
            step_name: self.step_name,
            result: serde_json::from_str(&self.result)
                .map_err(|e| RepositoryError::Query(format!("invalid step result JSON: {e}")))?,
            attempts: self.attempts as u32,
            completed_at: parse_datetime(&self.completed_at)?,
        })
    }
}

fn to_json(value: &impl serde::Serialize) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn rows_to_instances(
    rows: Vec<sqlx::sqlite::SqliteRow>,
) -> Result<Vec<WorkflowInstance>, RepositoryError> {
    rows.iter()
        .map(|row| {
            InstanceRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?
                .into_instance()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// InstanceRepository implementation
// ---------------------------------------------------------------------------

impl InstanceRepository for SqliteInstanceRepository {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        let checkpoint = instance.checkpoint.as_ref().map(to_json).transpose()?;
        let result = instance.result.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"INSERT INTO workflow_instances
               (id, definition_type, params, status, checkpoint, wake_at, result, error,
                created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&instance.id)
        .bind(&instance.definition_type)
        .bind(to_json(&instance.params)?)
        .bind(instance.status.as_str())
        .bind(&checkpoint)
        .bind(instance.wake_at.as_ref().map(format_datetime))
        .bind(&result)
        .bind(&instance.error)
        .bind(format_datetime(&instance.created_at))
        .bind(format_datetime(&instance.updated_at))
        .bind(instance.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn get_instance(&self, id: &str) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let sql = format!("SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = InstanceRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_instance()?))
            }
            None => Ok(None),
        }
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let sql = format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instances \
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR definition_type = ?2) \
             ORDER BY created_at DESC, id DESC LIMIT ?3"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.definition_type.as_deref())
            .bind(filter.limit as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows_to_instances(rows)
    }

    async fn list_unfinished(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let sql = format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE {LIVE} \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows_to_instances(rows)
    }

    async fn mark_running(&self, id: &str) -> Result<(), RepositoryError> {
        self.update_live(id, "status = 'running', wake_at = NULL", Vec::new())
            .await
    }

    async fn record_step(&self, id: &str, record: &StepRecord) -> Result<(), RepositoryError> {
        let checkpoint = to_json(&record.to_checkpoint())?;
        let result = to_json(&record.result)?;
        let now = format_datetime(&Utc::now());

        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let updated = sqlx::query(&format!(
            "UPDATE workflow_instances SET status = 'running', checkpoint = ?, wake_at = NULL, \
             updated_at = ? WHERE id = ? AND {LIVE}"
        ))
        .bind(&checkpoint)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(query_error)?;
            return Err(self.rejected_write(id).await);
        }

        let inserted = sqlx::query(
            r#"INSERT INTO workflow_step_records
               (instance_id, step_name, step_index, result, attempts, completed_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(id)
        .bind(&record.step_name)
        .bind(record.step_index as i64)
        .bind(&result)
        .bind(record.attempts as i64)
        .bind(format_datetime(&record.completed_at))
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            tx.rollback().await.map_err(query_error)?;
            return Err(match query_error(e) {
                RepositoryError::Conflict(_) => RepositoryError::Conflict(format!(
                    "step '{}' already recorded for instance {id}",
                    record.step_name
                )),
                other => other,
            });
        }

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn mark_sleeping(&self, id: &str, wake_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.update_live(
            id,
            "status = 'sleeping', wake_at = ?",
            vec![Some(format_datetime(&wake_at))],
        )
        .await
    }

    async fn complete_instance(
        &self,
        id: &str,
        result: &serde_json::Value,
    ) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        self.update_live(
            id,
            "status = 'completed', result = ?, wake_at = NULL, completed_at = ?",
            vec![Some(to_json(result)?), Some(now)],
        )
        .await
    }

    async fn fail_instance(&self, id: &str, error: &str) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        self.update_live(
            id,
            "status = 'failed', error = ?, wake_at = NULL, completed_at = ?",
            vec![Some(error.to_string()), Some(now)],
        )
        .await
    }

    async fn list_step_records(&self, id: &str) -> Result<Vec<StepRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT step_index, step_name, result, attempts, completed_at \
             FROM workflow_step_records WHERE instance_id = ? ORDER BY step_index ASC",
        )
        .bind(id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                StepRecordRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_record()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
