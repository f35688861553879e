//! Workflow definitions: ordered, named steps built in code.
//!
//! A `WorkflowDefinition` is immutable once built. Step names are the
//! checkpoint keys, so the builder rejects empty and duplicate names.
//! Definitions are looked up by type name through a `WorkflowRegistry`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use stepline_types::workflow::RetryPolicy;

use super::context::{StepContext, StepError};

/// Boxed future returned by compute steps.
pub type StepFuture = BoxFuture<'static, Result<Value, StepError>>;

/// Compute step body.
pub type ComputeFn = Arc<dyn Fn(StepContext) -> StepFuture + Send + Sync>;

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// What a step does when it runs.
#[derive(Clone)]
pub enum StepKind {
    /// Run a side-effecting function producing a JSON result.
    Compute(ComputeFn),
    /// Suspend the instance durably for the given wall-clock duration.
    Sleep(Duration),
}

impl std::fmt::Debug for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Compute(_) => f.write_str("Compute(..)"),
            StepKind::Sleep(d) => f.debug_tuple("Sleep").field(d).finish(),
        }
    }
}

/// Per-step options a step author may attach to a compute step.
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    pub retry: Option<RetryPolicy>,
    /// Overrides the engine's default step timeout.
    pub timeout: Option<Duration>,
}

/// A named unit of work within a definition.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub kind: StepKind,
    pub retry: Option<RetryPolicy>,
    pub timeout: Option<Duration>,
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// An ordered sequence of named steps, identified by a type name.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    workflow_type: String,
    steps: Vec<Step>,
}

impl WorkflowDefinition {
    /// Start building a definition for `workflow_type`.
    pub fn builder(workflow_type: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder {
            workflow_type: workflow_type.into(),
            steps: Vec::new(),
        }
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Position of the step named `name`.
    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }
}

/// Builder for [`WorkflowDefinition`].
pub struct WorkflowBuilder {
    workflow_type: String,
    steps: Vec<Step>,
}

impl WorkflowBuilder {
    /// Append a compute step with default options.
    pub fn compute<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        self.compute_with(name, StepOptions::default(), f)
    }

    /// Append a compute step with a retry policy and/or timeout.
    pub fn compute_with<F, Fut>(mut self, name: impl Into<String>, options: StepOptions, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        let body: ComputeFn = Arc::new(move |ctx: StepContext| -> StepFuture { Box::pin(f(ctx)) });
        self.steps.push(Step {
            name: name.into(),
            kind: StepKind::Compute(body),
            retry: options.retry,
            timeout: options.timeout,
        });
        self
    }

    /// Append a durable sleep step.
    pub fn sleep(mut self, name: impl Into<String>, duration: Duration) -> Self {
        self.steps.push(Step {
            name: name.into(),
            kind: StepKind::Sleep(duration),
            retry: None,
            timeout: None,
        });
        self
    }

    /// Validate and freeze the definition.
    pub fn build(self) -> Result<WorkflowDefinition, DefinitionError> {
        if self.workflow_type.trim().is_empty() {
            return Err(DefinitionError::EmptyType);
        }
        if self.steps.is_empty() {
            return Err(DefinitionError::NoSteps(self.workflow_type));
        }

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(DefinitionError::EmptyStepName(self.workflow_type));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(DefinitionError::DuplicateStep {
                    workflow: self.workflow_type.clone(),
                    step: step.name.clone(),
                });
            }
        }

        Ok(WorkflowDefinition {
            workflow_type: self.workflow_type,
            steps: self.steps,
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowRegistry
// ---------------------------------------------------------------------------

/// Definitions available to the engine, keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    definitions: HashMap<String, Arc<WorkflowDefinition>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. A type name can be registered once.
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<(), DefinitionError> {
        let key = definition.workflow_type.clone();
        if self.definitions.contains_key(&key) {
            return Err(DefinitionError::AlreadyRegistered(key));
        }
        self.definitions.insert(key, Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, workflow_type: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(workflow_type).cloned()
    }

    pub fn contains(&self, workflow_type: &str) -> bool {
        self.definitions.contains_key(workflow_type)
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while building or registering definitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("workflow type name must not be empty")]
    EmptyType,

    #[error("workflow '{0}' has no steps")]
    NoSteps(String),

    #[error("workflow '{0}' has a step with an empty name")]
    EmptyStepName(String),

    #[error("workflow '{workflow}' has duplicate step '{step}'")]
    DuplicateStep { workflow: String, step: String },

    #[error("workflow '{0}' is already registered")]
    AlreadyRegistered(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
