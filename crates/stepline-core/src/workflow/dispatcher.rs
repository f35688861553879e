//! Workflow dispatcher: turns a validated payload into an admitted instance.
//!
//! Dispatch never retries internally. If the engine cannot admit the
//! instance the error goes straight back to the caller, who may retry.

use serde::Serialize;
use serde_json::Value;
use stepline_types::workflow::WorkflowInstance;
use uuid::Uuid;

use crate::repository::instance::InstanceRepository;

use super::engine::{DurableEngine, EngineError};

pub struct WorkflowDispatcher<R: InstanceRepository> {
    engine: DurableEngine<R>,
}

impl<R: InstanceRepository + 'static> WorkflowDispatcher<R> {
    pub fn new(engine: DurableEngine<R>) -> Self {
        Self { engine }
    }

    /// Create a queued instance of `definition_type` and hand it to the
    /// engine. Returns the new instance ID as soon as it is persisted.
    pub async fn trigger(
        &self,
        definition_type: &str,
        params: Value,
    ) -> Result<String, DispatchError> {
        let instance_id = Uuid::now_v7().to_string();
        let instance = WorkflowInstance::queued(instance_id.clone(), definition_type, params);

        self.engine.admit(instance).await.map_err(|e| {
            tracing::warn!(workflow = definition_type, error = %e, "workflow dispatch rejected");
            DispatchError::from(e)
        })?;

        tracing::info!(
            instance_id = %instance_id,
            workflow = definition_type,
            "workflow dispatched"
        );
        Ok(instance_id)
    }

    /// Serialize a typed payload and trigger with it.
    pub async fn trigger_with<P: Serialize>(
        &self,
        definition_type: &str,
        params: &P,
    ) -> Result<String, DispatchError> {
        let params = serde_json::to_value(params)
            .map_err(|e| DispatchError::Unavailable(format!("invalid params: {e}")))?;
        self.trigger(definition_type, params).await
    }
}

/// Why an instance could not be created. Safe for the caller to retry.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown workflow type '{0}'")]
    UnknownWorkflow(String),

    #[error("workflow engine at capacity ({limit} instances in flight)")]
    Capacity { limit: usize },

    #[error("workflow engine unavailable: {0}")]
    Unavailable(String),
}

impl From<EngineError> for DispatchError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnknownWorkflow(t) => DispatchError::UnknownWorkflow(t),
            EngineError::CapacityExceeded { limit } => DispatchError::Capacity { limit },
            other => DispatchError::Unavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use stepline_types::workflow::{InstanceStatus, TriggerRequest};

    use crate::repository::memory::{InMemoryInstanceRepository, InMemoryUserRepository};
    use crate::repository::user::BoxUserRepository;
    use crate::workflow::context::StepServices;
    use crate::workflow::definition::{WorkflowDefinition, WorkflowRegistry};
    use crate::workflow::engine::EngineConfig;

    fn dispatcher(repo: InMemoryInstanceRepository) -> WorkflowDispatcher<InMemoryInstanceRepository> {
        let mut registry = WorkflowRegistry::new();
        registry
            .register(
                WorkflowDefinition::builder("Napper")
                    .sleep("nap", Duration::from_secs(60))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let engine = DurableEngine::new(
            repo,
            Arc::new(registry),
            StepServices::new(BoxUserRepository::new(InMemoryUserRepository::new())),
            EngineConfig::default(),
        );
        WorkflowDispatcher::new(engine)
    }

    #[tokio::test]
    async fn trigger_returns_visible_instance() {
        let repo = InMemoryInstanceRepository::new();
        let dispatcher = dispatcher(repo.clone());

        let id = dispatcher
            .trigger("Napper", json!({"email": "user@example.com"}))
            .await
            .unwrap();
        assert!(!id.is_empty());
        assert!(Uuid::parse_str(&id).is_ok());

        let instance = repo.get_instance(&id).await.unwrap().unwrap();
        assert!(!instance.status.is_terminal());
        assert_eq!(instance.params, json!({"email": "user@example.com"}));
    }

    #[tokio::test]
    async fn trigger_ids_are_unique() {
        let repo = InMemoryInstanceRepository::new();
        let dispatcher = dispatcher(repo.clone());
        let a = dispatcher.trigger("Napper", json!({})).await.unwrap();
        let b = dispatcher.trigger("Napper", json!({})).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn trigger_with_typed_payload() {
        let repo = InMemoryInstanceRepository::new();
        let dispatcher = dispatcher(repo.clone());
        let request = TriggerRequest {
            email: "user@example.com".into(),
            metadata: Default::default(),
        };

        let id = dispatcher.trigger_with("Napper", &request).await.unwrap();
        let instance = repo.get_instance(&id).await.unwrap().unwrap();
        assert_eq!(instance.params["email"], "user@example.com");
        assert_eq!(instance.params["metadata"], json!({}));
    }

    #[tokio::test]
    async fn unknown_workflow_creates_nothing() {
        let repo = InMemoryInstanceRepository::new();
        let dispatcher = dispatcher(repo.clone());
        let err = dispatcher.trigger("Nope", json!({})).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownWorkflow(t) if t == "Nope"));
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn storage_failure_is_unavailable() {
        let repo = InMemoryInstanceRepository::new();
        let dispatcher = dispatcher(repo.clone());
        repo.set_unavailable(true);
        let err = dispatcher.trigger("Napper", json!({})).await.unwrap_err();
        assert!(matches!(err, DispatchError::Unavailable(_)));
    }

    #[tokio::test]
    async fn status_right_after_trigger_is_not_terminal() {
        let repo = InMemoryInstanceRepository::new();
        let dispatcher = dispatcher(repo.clone());
        let id = dispatcher.trigger("Napper", json!({})).await.unwrap();
        let status = repo.get_instance(&id).await.unwrap().unwrap().status;
        assert!(matches!(
            status,
            InstanceStatus::Queued | InstanceStatus::Running | InstanceStatus::Sleeping
        ));
    }
}
