//! Telephony provider routes
//!
//! - `POST /incoming-call` - call-connect markup pointing at the media stream
//! - `POST /call-status` - call outcome callback
//! - `GET /media-stream` - WebSocket carrying the call audio
//!
//! The media-stream route is wrapped in the connection limit middleware in
//! `main.rs`, where the state is available.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::core::telephony::twiml::MEDIA_STREAM_PATH;
use crate::handlers::{media_stream_handler, voice};
use crate::state::AppState;
use std::sync::Arc;

pub fn create_webhook_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/incoming-call", post(voice::incoming_call))
        .route("/call-status", post(voice::call_status))
        .layer(TraceLayer::new_for_http())
}

pub fn create_media_stream_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(MEDIA_STREAM_PATH, get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
