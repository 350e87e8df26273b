//! Telephony provider webhooks.

use std::sync::Arc;

use axum::{
    Form,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::core::reminder::spawn_status_update;
use crate::core::telephony::{CallStatus, twiml};
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

/// Fields of the incoming-call webhook the gateway reads.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IncomingCallForm {
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// `POST /incoming-call`: answer with markup that connects the call to the
/// media-stream socket.
pub async fn incoming_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<IncomingCallForm>,
) -> AppResult<Response> {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    if state.config.public_url.is_none() && host.is_empty() {
        return Err(AppError::BadRequest(
            "missing Host header and no public URL configured".to_string(),
        ));
    }

    let stream_url = twiml::media_stream_url(state.config.public_url.as_deref(), host);
    let caller = form.from.as_deref().filter(|f| !f.is_empty());
    info!(
        call_sid = ?form.call_sid,
        caller = ?caller,
        to = ?form.to,
        stream_url = %stream_url,
        "Incoming call"
    );

    let body = twiml::connect_stream(&stream_url, caller);
    Ok(([(header::CONTENT_TYPE, "application/xml")], body).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallStatusForm {
    pub call_sid: String,
    pub call_status: String,
}

/// `POST /call-status`: forward terminal outcomes to the reminder backend.
/// Always acknowledged once the form parses.
pub async fn call_status(
    State(state): State<Arc<AppState>>,
    Form(form): Form<CallStatusForm>,
) -> StatusCode {
    let status = CallStatus::parse(&form.call_status);
    info!(call_sid = %form.call_sid, status = %form.call_status, "Call status update");

    if status.is_terminal() && state.registry.cancel(&form.call_sid) {
        info!(call_sid = %form.call_sid, "Ending relay for finished call");
    }

    match status.reminder_status() {
        Some(outcome) => {
            spawn_status_update(state.backend.clone(), form.call_sid, outcome);
        }
        None => debug!(status = %form.call_status, "Status not reported to reminder service"),
    }

    StatusCode::OK
}
