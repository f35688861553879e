//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use stepline_core::validation::ValidationError;
use stepline_core::workflow::dispatcher::DispatchError;
use stepline_core::workflow::status::StatusError;

use crate::http::response::ApiErrorBody;

const INTERNAL_ERROR: &str = "Internal server error";

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Request rejected before any instance was created.
    Validation(ValidationError),
    /// The engine could not admit a new instance.
    Dispatch(DispatchError),
    /// Status lookup failed.
    Status(StatusError),
    /// Authentication failure.
    Unauthorized(String),
    /// Generic internal error. Never shown to the client.
    Internal(String),
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::Validation(e)
    }
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        AppError::Dispatch(e)
    }
}

impl From<StatusError> for AppError {
    fn from(e: StatusError) -> Self {
        AppError::Status(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Validation(e) => {
                let body = ApiErrorBody::new(e.to_string());
                let body = match e {
                    ValidationError::Fields(details) => body.with_details(details),
                    _ => body,
                };
                (StatusCode::BAD_REQUEST, body)
            }
            AppError::Dispatch(e) => {
                tracing::error!(error = %e, "workflow dispatch failed");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiErrorBody::new(e.to_string()))
            }
            AppError::Status(StatusError::NotFound(_)) => (
                StatusCode::NOT_FOUND,
                ApiErrorBody::new("Workflow instance not found"),
            ),
            AppError::Status(e) => {
                tracing::error!(error = %e, "workflow status query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiErrorBody::new(INTERNAL_ERROR))
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, ApiErrorBody::new(msg)),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiErrorBody::new(INTERNAL_ERROR))
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use stepline_core::validation::FieldError;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn field_errors_carry_details() {
        let (status, body) = render(AppError::Validation(ValidationError::Fields(vec![
            FieldError {
                path: "email".to_string(),
                message: "Invalid email format".to_string(),
            },
        ])))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation error");
        assert_eq!(body["details"][0]["path"], "email");
    }

    #[tokio::test]
    async fn not_found_is_404() {
        let (status, body) =
            render(AppError::Status(StatusError::NotFound("wf-x".to_string()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Workflow instance not found");
    }

    #[tokio::test]
    async fn internal_details_are_hidden() {
        let (status, body) = render(AppError::Status(StatusError::Repository(
            "database is locked".to_string(),
        )))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Internal server error");
    }

    #[tokio::test]
    async fn dispatch_failure_reports_reason() {
        let (status, body) =
            render(AppError::Dispatch(DispatchError::Capacity { limit: 2 })).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("capacity"));
    }
}
