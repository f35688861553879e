//! Workflow trigger and status handlers for the REST API.
//!
//! Both paths validate before touching the engine: an invalid trigger never
//! creates an instance, and an invalid status query never hits storage.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};

use stepline_core::validation::{parse_json_body, validate_status_query, validate_trigger};
use stepline_core::workflow::example::EXAMPLE_WORKFLOW_TYPE;
use stepline_types::workflow::{InstanceStatus, InstanceView};

use crate::http::error::AppError;
use crate::http::extractors::auth::CurrentPrincipal;
use crate::http::response::{ApiResponse, TriggerAccepted};
use crate::state::AppState;

/// Body of a successful status query.
#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: InstanceStatus,
    pub instance: InstanceView,
}

/// Build the workflow sub-router.
pub fn workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/workflows/trigger", post(trigger_workflow))
        .route("/workflows/status", get(status_by_query))
        .route("/workflows/status/{instance_id}", get(status_by_path))
}

/// POST /workflows/trigger - Validate `{ email, metadata? }` and start an
/// `ExampleWorkflow` instance.
pub async fn trigger_workflow(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<TriggerAccepted>>, AppError> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let payload = parse_json_body(content_type, &body)?;
    let request = validate_trigger(&payload)?;

    let instance_id = state
        .dispatcher
        .trigger_with(EXAMPLE_WORKFLOW_TYPE, &request)
        .await?;

    tracing::info!(
        instance_id = %instance_id,
        principal = principal.display_name(),
        "workflow triggered"
    );

    Ok(Json(ApiResponse::success(TriggerAccepted {
        instance_id,
        message: "Workflow triggered successfully",
    })))
}

/// GET /workflows/status/{instance_id}
pub async fn status_by_path(
    State(state): State<AppState>,
    _principal: CurrentPrincipal,
    Path(instance_id): Path<String>,
) -> Result<Json<ApiResponse<StatusBody>>, AppError> {
    lookup(&state, &json!({ "instanceId": instance_id })).await
}

/// GET /workflows/status?instanceId=...
pub async fn status_by_query(
    State(state): State<AppState>,
    _principal: CurrentPrincipal,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ApiResponse<StatusBody>>, AppError> {
    let query: serde_json::Map<String, Value> = params
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    lookup(&state, &Value::Object(query)).await
}

async fn lookup(state: &AppState, query: &Value) -> Result<Json<ApiResponse<StatusBody>>, AppError> {
    let query = validate_status_query(query)?;
    let instance = state
        .status_service
        .status_for(EXAMPLE_WORKFLOW_TYPE, &query.instance_id)
        .await?;

    Ok(Json(ApiResponse::success(StatusBody {
        status: instance.status,
        instance,
    })))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use stepline_core::repository::instance::InstanceFilter;
    use stepline_core::repository::user::UserRepository;
    use stepline_infra::sqlite::pool::DatabasePool;
    use stepline_types::config::GlobalConfig;
    use stepline_types::user::NewUser;
    use tower::ServiceExt;

    use super::*;
    use crate::http::extractors::auth::ensure_api_key;
    use crate::http::router::build_router;

    async fn test_state(sleep_secs: u64, require_auth: bool) -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let data_dir = PathBuf::from(dir.path());
        std::mem::forget(dir);

        let pool = DatabasePool::new(&url).await.unwrap();
        let mut config = GlobalConfig::default();
        config.example.sleep_secs = sleep_secs;
        config.server.require_auth = require_auth;
        AppState::from_pool(pool, config, data_dir).unwrap()
    }

    fn trigger_request(content_type: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/workflows/trigger");
        if let Some(ct) = content_type {
            builder = builder.header("content-type", ct);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn instance_count(state: &AppState) -> usize {
        state
            .status_service
            .list(&InstanceFilter::default())
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn trigger_returns_instance_id() {
        let state = test_state(60, false).await;
        let (status, body) = send(
            &state,
            trigger_request(
                Some("application/json"),
                r#"{"email":"user@example.com","metadata":{}}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Workflow triggered successfully");
        let instance_id = body["instanceId"].as_str().unwrap().to_string();
        assert!(!instance_id.is_empty());

        let (status, body) = send(&state, get(&format!("/workflows/status/{instance_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let current = body["status"].as_str().unwrap();
        assert!(
            ["queued", "running", "sleeping"].contains(&current),
            "unexpected status {current}"
        );
        assert_eq!(body["instance"]["instanceId"], instance_id.as_str());
        assert_eq!(body["instance"]["definitionType"], "ExampleWorkflow");
    }

    #[tokio::test]
    async fn invalid_email_is_rejected_without_instance() {
        let state = test_state(60, false).await;
        let (status, body) = send(
            &state,
            trigger_request(Some("application/json"), r#"{"email":"not-an-email"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Validation error");
        assert_eq!(
            body["details"],
            json!([{"path": "email", "message": "Invalid email format"}])
        );
        assert_eq!(instance_count(&state).await, 0);
    }

    #[tokio::test]
    async fn body_level_errors() {
        let state = test_state(60, false).await;

        let (status, body) = send(
            &state,
            trigger_request(Some("text/plain"), r#"{"email":"user@example.com"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Content-Type must be application/json");
        assert!(body.get("details").is_none());

        let (_, body) = send(&state, trigger_request(Some("application/json"), "  ")).await;
        assert_eq!(body["error"], "Request body is required");

        let (_, body) = send(&state, trigger_request(Some("application/json"), "{email:")).await;
        assert_eq!(body["error"], "Invalid JSON in request body");

        let (_, body) = send(&state, trigger_request(None, "{}")).await;
        assert_eq!(body["error"], "Content-Type must be application/json");

        assert_eq!(instance_count(&state).await, 0);
    }

    #[tokio::test]
    async fn unknown_instance_is_404() {
        let state = test_state(60, false).await;
        let (status, body) = send(&state, get("/workflows/status/does-not-exist")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Workflow instance not found");
    }

    #[tokio::test]
    async fn status_query_requires_instance_id() {
        let state = test_state(60, false).await;

        let (status, body) = send(&state, get("/workflows/status")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["details"],
            json!([{"path": "instanceId", "message": "instanceId is required"}])
        );

        let (status, _) = send(&state, get("/workflows/status?instanceId=")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&state, get("/workflows/status?instanceId=nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn workflow_completes_after_sleep() {
        let state = test_state(0, false).await;
        state
            .user_repo
            .create_user(&NewUser {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                email_verified: true,
                role: None,
            })
            .await
            .unwrap();
        let timers = state.engine.start();

        let (_, body) = send(
            &state,
            trigger_request(
                Some("application/json; charset=utf-8"),
                r#"{"email":"user@example.com","metadata":{"source":"test"}}"#,
            ),
        )
        .await;
        let instance_id = body["instanceId"].as_str().unwrap().to_string();
        let uri = format!("/workflows/status?instanceId={instance_id}");

        let mut last = Value::Null;
        for _ in 0..100 {
            let (_, body) = send(&state, get(&uri)).await;
            if body["status"] == "completed" {
                last = body;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert_eq!(last["status"], "completed", "instance never completed");
        let result = &last["instance"]["result"];
        assert_eq!(result["success"], true);
        assert_eq!(result["message"], "Workflow finished");
        assert_eq!(result["user"]["email"], "ada@example.com");
        assert_eq!(last["instance"]["checkpoint"]["stepName"], "load user");

        state.engine.shutdown();
        timers.await.unwrap();
    }

    #[tokio::test]
    async fn require_auth_rejects_anonymous_callers() {
        let state = test_state(60, true).await;
        let body = r#"{"email":"user@example.com"}"#;

        let (status, response) =
            send(&state, trigger_request(Some("application/json"), body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(response["success"], false);

        let key = ensure_api_key(&state).await.unwrap().unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/workflows/trigger")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {key}"))
            .body(Body::from(body))
            .unwrap();
        let (status, response) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], true);

        // Health stays open.
        let (status, response) = send(&state, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["status"], "ok");
    }

    #[tokio::test]
    async fn unknown_key_is_rejected_even_without_require_auth() {
        let state = test_state(60, false).await;
        let request = Request::builder()
            .uri("/workflows/status/anything")
            .header("x-api-key", "stp_bogus")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
