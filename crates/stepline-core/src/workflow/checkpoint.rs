//! Durable checkpoint manager for workflow instances.
//!
//! Wraps `InstanceRepository` to provide a higher-level API for the engine's
//! state transitions. Every transition is persisted and awaited before the
//! engine moves forward, so a crashed instance resumes from its last
//! completed step.

use chrono::{DateTime, Utc};
use serde_json::Value;
use stepline_types::error::RepositoryError;
use stepline_types::workflow::{StepRecord, WorkflowInstance};

use crate::repository::instance::InstanceRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Manages durable execution checkpoints for workflow instances.
///
/// Generic over `R: InstanceRepository` so it works with any storage backend
/// (SQLite, in-memory, etc.).
pub struct CheckpointManager<R: InstanceRepository> {
    repo: R,
}

impl<R: InstanceRepository> CheckpointManager<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Instance-level checkpoints
    // -----------------------------------------------------------------------

    /// Persist a freshly created instance.
    pub async fn create(&self, instance: &WorkflowInstance) -> Result<(), CheckpointError> {
        self.repo
            .create_instance(instance)
            .await
            .map_err(CheckpointError::from)?;

        tracing::debug!(
            instance_id = %instance.id,
            workflow = instance.definition_type.as_str(),
            "checkpointed instance creation"
        );
        Ok(())
    }

    /// Queued -> Running.
    pub async fn begin(&self, instance_id: &str) -> Result<(), CheckpointError> {
        self.repo
            .mark_running(instance_id)
            .await
            .map_err(CheckpointError::from)?;

        tracing::debug!(instance_id, "checkpointed instance start");
        Ok(())
    }

    /// Record a completed step as the new checkpoint.
    pub async fn checkpoint_step(
        &self,
        instance_id: &str,
        step_index: usize,
        step_name: &str,
        result: &Value,
        attempts: u32,
    ) -> Result<StepRecord, CheckpointError> {
        let record = StepRecord {
            step_index: step_index as u32,
            step_name: step_name.to_string(),
            result: result.clone(),
            attempts,
            completed_at: Utc::now(),
        };

        self.repo
            .record_step(instance_id, &record)
            .await
            .map_err(CheckpointError::from)?;

        tracing::debug!(
            instance_id,
            step = step_name,
            step_index,
            attempts,
            "checkpointed step complete"
        );
        Ok(record)
    }

    /// Suspend the instance until `wake_at`.
    pub async fn checkpoint_sleep(
        &self,
        instance_id: &str,
        step_name: &str,
        wake_at: DateTime<Utc>,
    ) -> Result<(), CheckpointError> {
        self.repo
            .mark_sleeping(instance_id, wake_at)
            .await
            .map_err(CheckpointError::from)?;

        tracing::debug!(
            instance_id,
            step = step_name,
            wake_at = %wake_at,
            "checkpointed durable sleep"
        );
        Ok(())
    }

    /// Terminal success.
    pub async fn checkpoint_complete(
        &self,
        instance_id: &str,
        result: &Value,
    ) -> Result<(), CheckpointError> {
        self.repo
            .complete_instance(instance_id, result)
            .await
            .map_err(CheckpointError::from)?;

        tracing::debug!(instance_id, "checkpointed instance complete");
        Ok(())
    }

    /// Terminal failure.
    pub async fn checkpoint_failed(
        &self,
        instance_id: &str,
        error: &str,
    ) -> Result<(), CheckpointError> {
        self.repo
            .fail_instance(instance_id, error)
            .await
            .map_err(CheckpointError::from)?;

        tracing::debug!(instance_id, error, "checkpointed instance failed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Recovery helpers
    // -----------------------------------------------------------------------

    /// Load an instance together with its step records.
    pub async fn load(
        &self,
        instance_id: &str,
    ) -> Result<(WorkflowInstance, Vec<StepRecord>), CheckpointError> {
        let instance = self
            .repo
            .get_instance(instance_id)
            .await
            .map_err(CheckpointError::from)?
            .ok_or_else(|| CheckpointError::InstanceNotFound(instance_id.to_string()))?;

        let records = self
            .repo
            .list_step_records(instance_id)
            .await
            .map_err(CheckpointError::from)?;

        Ok((instance, records))
    }

    /// Every non-terminal instance, oldest first.
    pub async fn unfinished(&self) -> Result<Vec<WorkflowInstance>, CheckpointError> {
        self.repo
            .list_unfinished()
            .await
            .map_err(CheckpointError::from)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    /// The write was rejected (terminal instance, duplicate step or ID).
    #[error("checkpoint conflict: {0}")]
    Conflict(String),

    #[error("workflow instance not found: {0}")]
    InstanceNotFound(String),
}

impl CheckpointError {
    /// Storage was unreachable or a query failed; the same write may succeed
    /// later. Conflicts and missing instances never will.
    pub fn is_transient(&self) -> bool {
        matches!(self, CheckpointError::Repository(_))
    }
}

impl From<RepositoryError> for CheckpointError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(msg) => CheckpointError::Conflict(msg),
            other => CheckpointError::Repository(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryInstanceRepository;
    use serde_json::json;
    use stepline_types::workflow::InstanceStatus;

    #[test]
    fn checkpoint_error_display() {
        let err = CheckpointError::Repository("connection lost".to_string());
        assert!(err.to_string().contains("connection lost"));

        let err = CheckpointError::InstanceNotFound("wf-1".to_string());
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn conflict_maps_to_conflict() {
        let err: CheckpointError = RepositoryError::Conflict("terminal".into()).into();
        assert!(matches!(err, CheckpointError::Conflict(msg) if msg == "terminal"));

        let err: CheckpointError = RepositoryError::NotFound.into();
        assert!(matches!(err, CheckpointError::Repository(_)));
    }

    #[test]
    fn only_repository_errors_are_transient() {
        let err: CheckpointError = RepositoryError::Connection.into();
        assert!(err.is_transient());
        assert!(!CheckpointError::Conflict("terminal".into()).is_transient());
        assert!(!CheckpointError::InstanceNotFound("wf-1".into()).is_transient());
    }

    #[tokio::test]
    async fn load_returns_instance_and_records() {
        let manager = CheckpointManager::new(InMemoryInstanceRepository::new());
        let instance = WorkflowInstance::queued("wf-1".into(), "Test", json!({}));
        manager.create(&instance).await.unwrap();
        manager.begin("wf-1").await.unwrap();
        let record = manager
            .checkpoint_step("wf-1", 0, "first", &json!({"n": 1}), 1)
            .await
            .unwrap();
        assert_eq!(record.step_index, 0);

        let (loaded, records) = manager.load("wf-1").await.unwrap();
        assert_eq!(loaded.status, InstanceStatus::Running);
        assert_eq!(loaded.checkpoint.unwrap().step_name, "first");
        assert_eq!(records, vec![record]);
    }

    #[tokio::test]
    async fn load_missing_instance() {
        let manager = CheckpointManager::new(InMemoryInstanceRepository::new());
        let err = manager.load("nope").await.unwrap_err();
        assert!(matches!(err, CheckpointError::InstanceNotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn terminal_writes_are_conflicts() {
        let manager = CheckpointManager::new(InMemoryInstanceRepository::new());
        manager
            .create(&WorkflowInstance::queued("wf-1".into(), "Test", json!({})))
            .await
            .unwrap();
        manager.checkpoint_failed("wf-1", "boom").await.unwrap();

        let err = manager
            .checkpoint_complete("wf-1", &json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Conflict(_)));
        assert!(manager.unfinished().await.unwrap().is_empty());
    }
}
