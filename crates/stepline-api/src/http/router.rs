//! Axum router configuration with middleware.
//!
//! Middleware: CORS, request tracing.

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health::health))
        .merge(handlers::workflow::workflow_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
