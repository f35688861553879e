//! The bundled `ExampleWorkflow`: a durable sleep, then a user lookup.

use std::time::Duration;

use serde_json::json;
use stepline_types::workflow::TriggerRequest;

use super::context::StepError;
use super::definition::{DefinitionError, WorkflowDefinition};

pub const EXAMPLE_WORKFLOW_TYPE: &str = "ExampleWorkflow";
pub const SLEEP_STEP: &str = "sleep for a bit";
pub const LOAD_USER_STEP: &str = "load user";

/// Build the example definition.
///
/// The final result is `{ success, message, user }`; `user` is null when
/// `user_id` does not exist.
pub fn example_workflow(sleep: Duration, user_id: i64) -> Result<WorkflowDefinition, DefinitionError> {
    WorkflowDefinition::builder(EXAMPLE_WORKFLOW_TYPE)
        .sleep(SLEEP_STEP, sleep)
        .compute(LOAD_USER_STEP, move |ctx| async move {
            let request: TriggerRequest = ctx.params_as()?;
            let user = ctx
                .services
                .users
                .get_user(user_id)
                .await
                .map_err(StepError::from)?;

            tracing::info!(
                instance_id = %ctx.instance_id,
                email = request.email.as_str(),
                user_found = user.is_some(),
                "Workflow finished"
            );

            Ok::<_, StepError>(json!({
                "success": true,
                "message": "Workflow finished",
                "user": user,
            }))
        })
        .build()
}
