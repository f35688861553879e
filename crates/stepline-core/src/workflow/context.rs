//! Step execution context.
//!
//! Every compute step receives an owned `StepContext`: the instance's
//! identity and validated params, the results of every step completed so far
//! (restored from step records on resume), and the `StepServices` bundle of
//! collaborators wired at startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use stepline_types::error::RepositoryError;

use crate::repository::user::BoxUserRepository;

// ---------------------------------------------------------------------------
// StepServices
// ---------------------------------------------------------------------------

/// Collaborators available to compute steps.
#[derive(Debug, Clone)]
pub struct StepServices {
    pub users: Arc<BoxUserRepository>,
}

impl StepServices {
    pub fn new(users: BoxUserRepository) -> Self {
        Self {
            users: Arc::new(users),
        }
    }
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StepContext {
    pub instance_id: String,
    pub definition_type: String,
    pub params: Value,
    /// Results of completed steps keyed by step name.
    pub results: HashMap<String, Value>,
    /// 1-based attempt number of the current run of this step.
    pub attempt: u32,
    pub services: StepServices,
}

impl StepContext {
    /// Result of an earlier step.
    pub fn result(&self, step_name: &str) -> Option<&Value> {
        self.results.get(step_name)
    }

    /// Deserialize the instance params into a typed payload.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| StepError::Failed(format!("invalid params: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors returned by compute steps.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("repository error: {0}")]
    Repository(String),

    #[error("step timed out after {0:?}")]
    Timeout(Duration),
}

impl From<RepositoryError> for StepError {
    fn from(err: RepositoryError) -> Self {
        StepError::Repository(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryUserRepository;
    use serde_json::json;
    use stepline_types::workflow::TriggerRequest;

    fn context(params: Value) -> StepContext {
        StepContext {
            instance_id: "wf-1".to_string(),
            definition_type: "Test".to_string(),
            params,
            results: HashMap::from([("first".to_string(), json!(1))]),
            attempt: 1,
            services: StepServices::new(BoxUserRepository::new(InMemoryUserRepository::new())),
        }
    }

    #[test]
    fn params_as_typed_payload() {
        let ctx = context(json!({"email": "user@example.com", "metadata": {"a": "b"}}));
        let req: TriggerRequest = ctx.params_as().unwrap();
        assert_eq!(req.email, "user@example.com");
        assert_eq!(ctx.result("first"), Some(&json!(1)));
        assert!(ctx.result("second").is_none());
    }

    #[test]
    fn params_as_reports_mismatch() {
        let ctx = context(json!({"metadata": {}}));
        let err = ctx.params_as::<TriggerRequest>().unwrap_err();
        assert!(err.to_string().starts_with("invalid params"));
    }

    #[test]
    fn step_error_display() {
        let err = StepError::NotFound {
            entity: "user",
            id: "7".into(),
        };
        assert_eq!(err.to_string(), "user 7 not found");

        let err: StepError = RepositoryError::Connection.into();
        assert_eq!(err.to_string(), "repository error: database connection error");
    }
}
