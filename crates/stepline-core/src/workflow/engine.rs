//! Durable step engine: drives workflow instances through their steps.
//!
//! The `DurableEngine` owns no instance state of its own beyond bookkeeping:
//! the instance store is the single source of truth and every step
//! transition is checkpointed before the next step starts.
//!
//! # Execution flow
//!
//! 1. `admit` persists a queued instance and spawns a driver task.
//! 2. The driver loads the instance and its step records, resumes after the
//!    checkpointed step, and restores earlier results into the `StepContext`.
//! 3. Compute steps run under a worker permit, the step timeout and the
//!    step's retry policy; each success is checkpointed atomically.
//! 4. Sleep steps persist `wake_at`, register with the `TimerQueue` and
//!    release the driver. The timer loop re-drives the instance when due.
//! 5. After the last step the instance completes with the last result.
//!
//! A storage error during a drive puts the instance back on the timer queue
//! with a doubling delay instead of failing it.
//!
//! `recover` re-attaches to every non-terminal instance after a restart.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use futures_util::FutureExt;
use serde_json::{Value, json};
use stepline_types::config::EngineSettings;
use stepline_types::workflow::{InstanceStatus, WorkflowInstance};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::repository::instance::InstanceRepository;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::{StepContext, StepError, StepServices};
use super::definition::{ComputeFn, Step, StepKind, WorkflowRegistry};
use super::retry::RetryHandler;
use super::timer::TimerQueue;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// First delay before re-driving an instance after a storage error.
const STORAGE_RETRY_BASE: Duration = Duration::from_millis(250);
/// Ceiling for the doubling storage retry delay.
const STORAGE_RETRY_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Admission limit on non-terminal instances.
    pub max_in_flight: usize,
    /// Worker permits shared by all compute steps.
    pub max_concurrent_steps: usize,
    /// Timeout for compute steps without their own.
    pub default_step_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            max_in_flight: settings.max_in_flight.max(1),
            max_concurrent_steps: settings.max_concurrent_steps.max(1),
            default_step_timeout: Duration::from_secs(settings.step_timeout_secs.max(1)),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How one drive of an instance ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveOutcome {
    Completed,
    Failed,
    /// Suspended until the given wall-clock time.
    Sleeping(DateTime<Utc>),
    /// Stopped by shutdown; the instance stays non-terminal.
    Stopped,
    /// Nothing to do.
    AlreadyTerminal,
}

/// Result of re-attaching to persisted instances at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Queued/running instances re-driven immediately.
    pub resumed: usize,
    /// Sleeping instances re-registered with the timer queue.
    pub sleeping: usize,
}

// ---------------------------------------------------------------------------
// DurableEngine
// ---------------------------------------------------------------------------

struct EngineInner<R: InstanceRepository> {
    checkpoint: CheckpointManager<R>,
    registry: Arc<WorkflowRegistry>,
    services: StepServices,
    timers: TimerQueue,
    /// Non-terminal instances known to this engine.
    in_flight: DashSet<String>,
    /// Serializes the capacity check with the slot reservation.
    admission: Mutex<()>,
    /// Instances with a live driver task.
    active: DashSet<String>,
    /// Consecutive storage failures per instance, reset on any clean drive.
    storage_retries: DashMap<String, u32>,
    permits: Arc<Semaphore>,
    config: EngineConfig,
    shutdown: CancellationToken,
}

/// Durable step engine.
///
/// Cheap to clone; clones share the same state. Generic over
/// `R: InstanceRepository` for storage flexibility.
pub struct DurableEngine<R: InstanceRepository> {
    inner: Arc<EngineInner<R>>,
}

impl<R: InstanceRepository> Clone for DurableEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: InstanceRepository + 'static> DurableEngine<R> {
    pub fn new(
        repo: R,
        registry: Arc<WorkflowRegistry>,
        services: StepServices,
        config: EngineConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_steps.max(1)));
        Self {
            inner: Arc::new(EngineInner {
                checkpoint: CheckpointManager::new(repo),
                registry,
                services,
                timers: TimerQueue::new(),
                in_flight: DashSet::new(),
                admission: Mutex::new(()),
                active: DashSet::new(),
                storage_retries: DashMap::new(),
                permits,
                config,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        self.inner.checkpoint.repo()
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.inner.registry
    }

    /// Number of admitted, non-terminal instances.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Number of pending timer wake-ups.
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the timer loop that re-drives sleeping instances.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let shutdown = engine.inner.shutdown.clone();
            engine
                .inner
                .timers
                .run(shutdown, |instance_id| engine.spawn_drive(instance_id))
                .await;
        })
    }

    /// Re-attach to every non-terminal instance in storage.
    pub async fn recover(&self) -> Result<RecoveryReport, EngineError> {
        let unfinished = self.inner.checkpoint.unfinished().await?;
        let mut report = RecoveryReport::default();

        for instance in unfinished {
            self.inner.in_flight.insert(instance.id.clone());
            match (instance.status, instance.wake_at) {
                (InstanceStatus::Sleeping, Some(wake_at)) => {
                    self.inner.timers.schedule(&instance.id, wake_at);
                    report.sleeping += 1;
                }
                _ => {
                    self.spawn_drive(instance.id);
                    report.resumed += 1;
                }
            }
        }

        tracing::info!(
            resumed = report.resumed,
            sleeping = report.sleeping,
            "recovered unfinished workflow instances"
        );
        Ok(report)
    }

    /// Stop the timer loop and stop drivers before their next step.
    ///
    /// In-flight instances stay non-terminal and are picked up by `recover`
    /// on the next start.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.permits.close();
        tracing::info!(in_flight = self.in_flight(), "workflow engine shutting down");
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Persist a queued instance and start driving it.
    pub async fn admit(&self, instance: WorkflowInstance) -> Result<(), EngineError> {
        if self.is_shutting_down() {
            return Err(EngineError::ShuttingDown);
        }
        if !self.inner.registry.contains(&instance.definition_type) {
            return Err(EngineError::UnknownWorkflow(instance.definition_type));
        }

        // The slot is reserved before the insert is awaited, so concurrent
        // admissions count each other.
        let limit = self.inner.config.max_in_flight;
        {
            let _admission = self.inner.admission.lock().unwrap_or_else(|e| e.into_inner());
            if self.inner.in_flight.len() >= limit {
                return Err(EngineError::CapacityExceeded { limit });
            }
            if !self.inner.in_flight.insert(instance.id.clone()) {
                let message = format!("instance {} already admitted", instance.id);
                return Err(CheckpointError::Conflict(message).into());
            }
        }

        if let Err(e) = self.inner.checkpoint.create(&instance).await {
            self.inner.in_flight.remove(&instance.id);
            return Err(e.into());
        }
        self.spawn_drive(instance.id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// Spawn a driver task unless one is already running for the instance.
    fn spawn_drive(&self, instance_id: String) {
        if self.is_shutting_down() {
            return;
        }
        if !self.inner.active.insert(instance_id.clone()) {
            tracing::debug!(instance_id = %instance_id, "instance already being driven");
            return;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let outcome = engine.drive(&instance_id).await;
            // Release the slot before scheduling so an immediate wake-up can re-drive.
            engine.inner.active.remove(&instance_id);
            engine.settle(&instance_id, outcome).await;
        });
    }

    /// Book-keep the end of one drive.
    ///
    /// Storage errors never fail an instance: it goes back on the timer
    /// queue and resumes from its last checkpoint once storage recovers.
    async fn settle(&self, instance_id: &str, outcome: Result<DriveOutcome, EngineError>) {
        if outcome.is_ok() {
            self.inner.storage_retries.remove(instance_id);
        }

        match outcome {
            Ok(DriveOutcome::Sleeping(wake_at)) => {
                self.inner.timers.schedule(instance_id, wake_at);
            }
            Ok(DriveOutcome::Completed)
            | Ok(DriveOutcome::Failed)
            | Ok(DriveOutcome::AlreadyTerminal) => {
                self.inner.in_flight.remove(instance_id);
            }
            Ok(DriveOutcome::Stopped) => {
                tracing::debug!(instance_id, "driver stopped by shutdown");
            }
            Err(e) if e.is_transient() => self.retry_later(instance_id, &e),
            Err(e) => {
                tracing::error!(instance_id, error = %e, "workflow driver failed");
                let message = format!("engine error: {e}");
                match self.inner.checkpoint.checkpoint_failed(instance_id, &message).await {
                    Ok(()) => {
                        self.inner.in_flight.remove(instance_id);
                    }
                    Err(err) if err.is_transient() => {
                        self.retry_later(instance_id, &EngineError::from(err));
                    }
                    Err(err) => {
                        // Already terminal, or no longer in storage.
                        tracing::warn!(
                            instance_id,
                            error = %err,
                            "could not record driver failure"
                        );
                        self.inner.in_flight.remove(instance_id);
                        self.inner.storage_retries.remove(instance_id);
                    }
                }
            }
        }
    }

    /// Re-drive the instance after a doubling delay.
    fn retry_later(&self, instance_id: &str, error: &EngineError) {
        let failures = {
            let mut count = self
                .inner
                .storage_retries
                .entry(instance_id.to_string())
                .or_insert(0);
            *count += 1;
            *count
        };
        let delay = storage_backoff(failures);
        let retry_at = wake_time(Utc::now(), delay).unwrap_or_else(Utc::now);

        tracing::warn!(
            instance_id,
            failures,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "storage error while driving instance, retrying later"
        );
        self.inner.timers.schedule(instance_id, retry_at);
    }

    /// Run the instance from its checkpoint until it sleeps or finishes.
    async fn drive(&self, instance_id: &str) -> Result<DriveOutcome, EngineError> {
        let (instance, records) = self.inner.checkpoint.load(instance_id).await?;
        if instance.status.is_terminal() {
            return Ok(DriveOutcome::AlreadyTerminal);
        }

        let Some(definition) = self.inner.registry.get(&instance.definition_type) else {
            let error = format!("unknown workflow type '{}'", instance.definition_type);
            return self.fail(instance_id, &error).await;
        };

        let start = match &instance.checkpoint {
            None => 0,
            Some(checkpoint) => match definition.step_index(&checkpoint.step_name) {
                Some(index) => index + 1,
                None => {
                    let error = format!(
                        "checkpointed step '{}' no longer exists in workflow '{}'",
                        checkpoint.step_name, instance.definition_type
                    );
                    return self.fail(instance_id, &error).await;
                }
            },
        };

        let mut results: HashMap<String, Value> = records
            .into_iter()
            .map(|record| (record.step_name, record.result))
            .collect();
        let mut last_result = instance
            .checkpoint
            .as_ref()
            .map(|c| c.result.clone())
            .unwrap_or(Value::Null);

        if instance.status == InstanceStatus::Queued {
            self.inner.checkpoint.begin(instance_id).await?;
        }

        tracing::info!(
            instance_id,
            workflow = instance.definition_type.as_str(),
            from_step = start,
            "driving workflow instance"
        );

        for (index, step) in definition.steps().iter().enumerate().skip(start) {
            if self.is_shutting_down() {
                return Ok(DriveOutcome::Stopped);
            }

            let result = match &step.kind {
                StepKind::Sleep(duration) => {
                    // A persisted wake time belongs to the first pending step.
                    let persisted = if index == start { instance.wake_at } else { None };
                    let wake_at = match persisted {
                        Some(wake_at) => wake_at,
                        None => {
                            let Some(wake_at) = wake_time(Utc::now(), *duration) else {
                                let error =
                                    format!("sleep step '{}' duration is out of range", step.name);
                                return self.fail(instance_id, &error).await;
                            };
                            self.inner
                                .checkpoint
                                .checkpoint_sleep(instance_id, &step.name, wake_at)
                                .await?;
                            tracing::info!(
                                instance_id,
                                step = step.name.as_str(),
                                wake_at = %wake_at,
                                "instance sleeping"
                            );
                            return Ok(DriveOutcome::Sleeping(wake_at));
                        }
                    };

                    let now = Utc::now();
                    if now < wake_at {
                        return Ok(DriveOutcome::Sleeping(wake_at));
                    }
                    json!({ "scheduledWakeAt": wake_at, "wokeAt": now })
                }
                StepKind::Compute(body) => {
                    let _permit = match self.inner.permits.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return Ok(DriveOutcome::Stopped),
                    };
                    if self.is_shutting_down() {
                        return Ok(DriveOutcome::Stopped);
                    }

                    match self.run_compute(&instance, step, body, &results).await {
                        Ok((value, attempts)) => {
                            self.inner
                                .checkpoint
                                .checkpoint_step(instance_id, index, &step.name, &value, attempts)
                                .await?;
                            results.insert(step.name.clone(), value.clone());
                            last_result = value;
                            continue;
                        }
                        Err(err) => {
                            let error = format!("step '{}' failed: {err}", step.name);
                            return self.fail(instance_id, &error).await;
                        }
                    }
                }
            };

            self.inner
                .checkpoint
                .checkpoint_step(instance_id, index, &step.name, &result, 1)
                .await?;
            results.insert(step.name.clone(), result.clone());
            last_result = result;
        }

        self.inner
            .checkpoint
            .checkpoint_complete(instance_id, &last_result)
            .await?;
        tracing::info!(
            instance_id,
            workflow = instance.definition_type.as_str(),
            "workflow instance completed"
        );
        Ok(DriveOutcome::Completed)
    }

    /// Run a compute step with its timeout and retry policy.
    ///
    /// Returns the result and the number of attempts it took.
    async fn run_compute(
        &self,
        instance: &WorkflowInstance,
        step: &Step,
        body: &ComputeFn,
        results: &HashMap<String, Value>,
    ) -> Result<(Value, u32), StepError> {
        let timeout = step.timeout.unwrap_or(self.inner.config.default_step_timeout);
        let mut attempt = 1;

        loop {
            let ctx = StepContext {
                instance_id: instance.id.clone(),
                definition_type: instance.definition_type.clone(),
                params: instance.params.clone(),
                results: results.clone(),
                attempt,
                services: self.inner.services.clone(),
            };

            let guarded = AssertUnwindSafe(body(ctx)).catch_unwind();
            let outcome = match tokio::time::timeout(timeout, guarded).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(StepError::Failed("step panicked".to_string())),
                Err(_) => Err(StepError::Timeout(timeout)),
            };

            let err = match outcome {
                Ok(value) => return Ok((value, attempt)),
                Err(err) => err,
            };

            match &step.retry {
                Some(policy) if RetryHandler::should_retry(policy, attempt) => {
                    let delay = RetryHandler::delay_for(policy, attempt);
                    tracing::warn!(
                        instance_id = %instance.id,
                        step = step.name.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "step failed, retrying"
                    );
                    tokio::select! {
                        _ = self.inner.shutdown.cancelled() => return Err(err),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                _ => return Err(err),
            }
        }
    }

    async fn fail(&self, instance_id: &str, error: &str) -> Result<DriveOutcome, EngineError> {
        tracing::warn!(instance_id, error, "workflow instance failed");
        self.inner
            .checkpoint
            .checkpoint_failed(instance_id, error)
            .await?;
        Ok(DriveOutcome::Failed)
    }
}

fn wake_time(now: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(duration).ok()?;
    now.checked_add_signed(delta)
}

fn storage_backoff(failures: u32) -> Duration {
    let doublings = failures.saturating_sub(1).min(16);
    STORAGE_RETRY_BASE
        .saturating_mul(1 << doublings)
        .min(STORAGE_RETRY_MAX)
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors from the durable engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("unknown workflow type '{0}'")]
    UnknownWorkflow(String),

    #[error("engine at capacity ({limit} instances in flight)")]
    CapacityExceeded { limit: usize },

    #[error("engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    /// A storage error that may clear up on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Checkpoint(e) if e.is_transient())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
