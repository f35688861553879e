//! Workflow domain types for Stepline.
//!
//! Execution tracking types (`WorkflowInstance`, `Checkpoint`, `StepRecord`),
//! the validated request payloads accepted by the trigger and status paths,
//! and the read-only `InstanceView` returned by status queries.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Instance status
// ---------------------------------------------------------------------------

/// Lifecycle state of a workflow instance.
///
/// `Queued`, `Running` and `Sleeping` are non-terminal. `Completed` and
/// `Failed` are terminal and never change once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Queued,
    Running,
    Sleeping,
    Completed,
    Failed,
}

impl InstanceStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [InstanceStatus; 5] = [
        InstanceStatus::Queued,
        InstanceStatus::Running,
        InstanceStatus::Sleeping,
        InstanceStatus::Completed,
        InstanceStatus::Failed,
    ];

    /// Whether the status is terminal (`Completed` or `Failed`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Failed)
    }

    /// Wire/storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Queued => "queued",
            InstanceStatus::Running => "running",
            InstanceStatus::Sleeping => "sleeping",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstanceStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("invalid instance status: '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Workflow instance (persisted record)
// ---------------------------------------------------------------------------

/// Marker of the last successfully completed step of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Position of the step in its definition (0-based).
    pub step_index: u32,
    /// Step name. This is the resume key.
    pub step_name: String,
    /// Result captured when the step completed.
    pub result: serde_json::Value,
    /// When the step completed.
    pub completed_at: DateTime<Utc>,
}

/// One execution of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Opaque, globally unique instance ID (UUIDv7 text).
    pub id: String,
    /// Type name of the definition that produced this instance.
    pub definition_type: String,
    /// Validated trigger payload. Immutable after creation.
    pub params: serde_json::Value,
    /// Current lifecycle state.
    pub status: InstanceStatus,
    /// Last completed step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    /// Wall-clock wake time while `Sleeping`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_at: Option<DateTime<Utc>>,
    /// Final result (only when `Completed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Execution error (only when `Failed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the instance reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Build a freshly queued instance.
    pub fn queued(id: String, definition_type: &str, params: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            definition_type: definition_type.to_string(),
            params,
            status: InstanceStatus::Queued,
            checkpoint: None,
            wake_at: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Durable log entry for a completed step.
///
/// Unique per `(instance, step_name)`: a step is recorded at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_index: u32,
    pub step_name: String,
    pub result: serde_json::Value,
    /// Number of attempts it took (1 = first try).
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

impl StepRecord {
    /// The checkpoint this record establishes.
    pub fn to_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            step_index: self.step_index,
            step_name: self.step_name.clone(),
            result: self.result.clone(),
            completed_at: self.completed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Backoff between retry attempts of a compute step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles after each failed attempt.
    Exponential,
}

/// Retry policy a step author may attach to a compute step.
///
/// The engine never retries on its own: without a policy a failing step
/// fails the instance on the first error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff")]
    pub backoff: Backoff,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> Backoff {
    Backoff::Exponential
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Validated trigger payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub email: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Validated status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub instance_id: String,
}

// ---------------------------------------------------------------------------
// Status view
// ---------------------------------------------------------------------------

/// Public view of the last completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointView {
    pub step_index: u32,
    pub step_name: String,
    pub completed_at: DateTime<Utc>,
}

/// Read-only projection of a persisted instance returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    pub instance_id: String,
    pub definition_type: String,
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&WorkflowInstance> for InstanceView {
    fn from(instance: &WorkflowInstance) -> Self {
        // result/error are only exposed for the matching terminal state
        let result = match instance.status {
            InstanceStatus::Completed => instance.result.clone(),
            _ => None,
        };
        let error = match instance.status {
            InstanceStatus::Failed => instance.error.clone(),
            _ => None,
        };

        Self {
            instance_id: instance.id.clone(),
            definition_type: instance.definition_type.clone(),
            status: instance.status,
            result,
            error,
            checkpoint: instance.checkpoint.as_ref().map(|c| CheckpointView {
                step_index: c.step_index,
                step_name: c.step_name.clone(),
                completed_at: c.completed_at,
            }),
            wake_at: instance.wake_at,
            created_at: instance.created_at,
            updated_at: instance.updated_at,
            completed_at: instance.completed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
