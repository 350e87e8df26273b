use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Health and session status routes.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/sessions", get(api::list_sessions))
        .route("/sessions/{call_id}", get(api::get_session))
        .layer(TraceLayer::new_for_http())
}
