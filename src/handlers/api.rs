//! Health and status endpoints.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

use crate::core::pool::PoolStats;
use crate::core::relay::SessionSnapshot;
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// `GET /`
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub active: usize,
    pub sessions: Vec<SessionSnapshot>,
    pub pool: PoolStats,
}

/// `GET /sessions`: live relays plus pool occupancy.
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    let sessions = state.registry.snapshot();
    Json(SessionsResponse {
        active: sessions.len(),
        sessions,
        pool: state.pool.stats(),
    })
}

/// `GET /sessions/{call_id}`
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> AppResult<Json<SessionSnapshot>> {
    state
        .registry
        .get(&call_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no active session for call {call_id}")))
}
