//! Status query service.
//!
//! Reads the persisted instance on every call. No caching: the instance
//! store is written by the engine and may be read from another process.

use stepline_types::workflow::InstanceView;

use crate::repository::instance::{InstanceFilter, InstanceRepository};

pub struct StatusService<R: InstanceRepository> {
    repo: R,
}

impl<R: InstanceRepository> StatusService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Current view of an instance.
    pub async fn status(&self, instance_id: &str) -> Result<InstanceView, StatusError> {
        let instance = self
            .repo
            .get_instance(instance_id)
            .await
            .map_err(|e| StatusError::Repository(e.to_string()))?
            .ok_or_else(|| StatusError::NotFound(instance_id.to_string()))?;

        Ok(InstanceView::from(&instance))
    }

    /// Like [`status`](Self::status), but an instance of another definition
    /// type is reported as not found.
    pub async fn status_for(
        &self,
        definition_type: &str,
        instance_id: &str,
    ) -> Result<InstanceView, StatusError> {
        let view = self.status(instance_id).await?;
        if view.definition_type != definition_type {
            tracing::debug!(
                instance_id,
                expected = definition_type,
                actual = view.definition_type.as_str(),
                "status query for instance of another workflow"
            );
            return Err(StatusError::NotFound(instance_id.to_string()));
        }
        Ok(view)
    }

    /// Operator listing, newest first.
    pub async fn list(&self, filter: &InstanceFilter) -> Result<Vec<InstanceView>, StatusError> {
        let instances = self
            .repo
            .list_instances(filter)
            .await
            .map_err(|e| StatusError::Repository(e.to_string()))?;
        Ok(instances.iter().map(InstanceView::from).collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("workflow instance not found: {0}")]
    NotFound(String),

    #[error("status repository error: {0}")]
    Repository(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryInstanceRepository;
    use serde_json::json;
    use stepline_types::workflow::{InstanceStatus, WorkflowInstance};

    async fn seeded() -> InMemoryInstanceRepository {
        let repo = InMemoryInstanceRepository::new();
        repo.create_instance(&WorkflowInstance::queued("wf-1".into(), "ExampleWorkflow", json!({})))
            .await
            .unwrap();
        repo.create_instance(&WorkflowInstance::queued("wf-2".into(), "Other", json!({})))
            .await
            .unwrap();
        repo
    }

    #[tokio::test]
    async fn never_dispatched_id_is_not_found() {
        let service = StatusService::new(seeded().await);
        let err = service.status("missing").await.unwrap_err();
        assert!(matches!(err, StatusError::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn status_reads_through_to_storage() {
        let repo = seeded().await;
        let service = StatusService::new(repo.clone());
        assert_eq!(service.status("wf-1").await.unwrap().status, InstanceStatus::Queued);

        repo.complete_instance("wf-1", &json!({"success": true}))
            .await
            .unwrap();
        let view = service.status("wf-1").await.unwrap();
        assert_eq!(view.status, InstanceStatus::Completed);
        assert_eq!(view.result, Some(json!({"success": true})));
        assert!(view.error.is_none());
    }

    #[tokio::test]
    async fn failed_instance_exposes_error() {
        let repo = seeded().await;
        repo.fail_instance("wf-1", "step 'x' failed: boom").await.unwrap();
        let view = StatusService::new(repo).status("wf-1").await.unwrap();
        assert_eq!(view.status, InstanceStatus::Failed);
        assert_eq!(view.error.as_deref(), Some("step 'x' failed: boom"));
        assert!(view.result.is_none());
    }

    #[tokio::test]
    async fn status_for_other_type_is_not_found() {
        let service = StatusService::new(seeded().await);
        assert!(service.status_for("ExampleWorkflow", "wf-1").await.is_ok());
        let err = service.status_for("ExampleWorkflow", "wf-2").await.unwrap_err();
        assert!(matches!(err, StatusError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let repo = seeded().await;
        repo.fail_instance("wf-2", "boom").await.unwrap();
        let service = StatusService::new(repo);

        let all = service.list(&InstanceFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let queued = service
            .list(&InstanceFilter {
                status: Some(InstanceStatus::Queued),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].instance_id, "wf-1");
    }

    #[tokio::test]
    async fn repository_failure_is_reported() {
        let repo = seeded().await;
        repo.set_unavailable(true);
        let err = StatusService::new(repo).status("wf-1").await.unwrap_err();
        assert!(matches!(err, StatusError::Repository(_)));
    }
}
