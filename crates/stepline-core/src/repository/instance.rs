//! Workflow instance repository trait definition.
//!
//! Defines the storage interface for workflow instances and their step
//! records. The instance store is the single source of truth for the engine
//! and the status service; the infrastructure layer (stepline-infra)
//! implements it with SQLite persistence.

use chrono::{DateTime, Utc};
use stepline_types::error::RepositoryError;
use stepline_types::workflow::{InstanceStatus, StepRecord, WorkflowInstance};

/// Filter for operator listings of instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceFilter {
    /// Only instances in this status.
    pub status: Option<InstanceStatus>,
    /// Only instances of this definition type.
    pub definition_type: Option<String>,
    /// Maximum number of rows, newest first.
    pub limit: u32,
}

impl Default for InstanceFilter {
    fn default() -> Self {
        Self {
            status: None,
            definition_type: None,
            limit: 50,
        }
    }
}

/// Repository trait for workflow instance persistence.
///
/// All mutating operations other than `create_instance` reject instances in
/// a terminal state with `RepositoryError::Conflict`, and unknown IDs with
/// `RepositoryError::NotFound`.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait InstanceRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Insert a new instance. Fails with `Conflict` if the ID exists.
    fn create_instance(
        &self,
        instance: &WorkflowInstance,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an instance by ID.
    fn get_instance(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInstance>, RepositoryError>> + Send;

    /// List instances matching the filter, ordered by created_at DESC.
    fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// List every instance in a non-terminal state (crash recovery),
    /// ordered by created_at ASC.
    fn list_unfinished(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Move a queued or sleeping instance to `Running`.
    fn mark_running(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Persist a completed step.
    ///
    /// Atomically inserts the step record, sets it as the instance's
    /// checkpoint, sets status `Running` and clears `wake_at`. A second record
    /// for the same step name is a `Conflict`.
    fn record_step(
        &self,
        id: &str,
        record: &StepRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Suspend the instance until `wake_at`.
    fn mark_sleeping(
        &self,
        id: &str,
        wake_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Terminal success with the final result.
    fn complete_instance(
        &self,
        id: &str,
        result: &serde_json::Value,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Terminal failure with an error message.
    fn fail_instance(
        &self,
        id: &str,
        error: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step records
    // -----------------------------------------------------------------------

    /// All step records of an instance, ordered by step_index ASC.
    fn list_step_records(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<StepRecord>, RepositoryError>> + Send;
}
