//! Envelope response format for workflow endpoints.
//!
//! Every response carries a top-level `success` flag:
//! ```json
//! { "success": true, "instanceId": "...", "message": "..." }
//! { "success": false, "error": "Validation error", "details": [{ "path": "email", "message": "..." }] }
//! ```

use serde::Serialize;
use stepline_core::validation::FieldError;

/// Success envelope; the payload's fields are flattened next to `success`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Failure envelope.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

impl ApiErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Payload of an accepted trigger.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerAccepted {
    pub instance_id: String,
    pub message: &'static str,
}
