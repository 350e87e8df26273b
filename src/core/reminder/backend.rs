//! Delivery of reminder directives and call outcomes to the reminder service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::hook::Directive;

/// Errors talking to the reminder service.
#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("Reminder service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Reminder service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Call outcome reported to the reminder service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderCallStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for ReminderCallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderCallStatus::Completed => write!(f, "completed"),
            ReminderCallStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The call a directive was heard on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallContext {
    pub call_id: String,
    pub caller: Option<String>,
}

/// Sink for reminder directives and call outcomes.
#[async_trait]
pub trait ReminderBackend: Send + Sync {
    /// Hand a directive to the reminder store or transport.
    async fn dispatch(&self, call: &CallContext, directive: &Directive)
    -> Result<(), ReminderError>;

    /// Record the final status of an outbound reminder call.
    async fn update_call_status(
        &self,
        call_sid: &str,
        status: ReminderCallStatus,
    ) -> Result<(), ReminderError>;
}

/// Run [`ReminderBackend::dispatch`] on its own task, logging failures.
pub fn spawn_dispatch(backend: Arc<dyn ReminderBackend>, call: CallContext, directive: Directive) {
    tokio::spawn(async move {
        if let Err(e) = backend.dispatch(&call, &directive).await {
            warn!(
                call_id = %call.call_id,
                action = %directive.action,
                error = %e,
                "Reminder dispatch failed"
            );
        }
    });
}

/// Run [`ReminderBackend::update_call_status`] on its own task, logging failures.
pub fn spawn_status_update(
    backend: Arc<dyn ReminderBackend>,
    call_sid: String,
    status: ReminderCallStatus,
) {
    tokio::spawn(async move {
        if let Err(e) = backend.update_call_status(&call_sid, status).await {
            warn!(call_sid = %call_sid, %status, error = %e, "Call status update failed");
        }
    });
}

// =============================================================================
// HTTP backend
// =============================================================================

#[derive(Serialize)]
struct DirectiveRequest<'a> {
    call_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caller: Option<&'a str>,
    action: &'a str,
    fields: &'a serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct CallStatusRequest<'a> {
    call_sid: &'a str,
    status: ReminderCallStatus,
}

/// Posts JSON to an external reminder service.
///
/// - `POST {base}/directives` with the call context and directive
/// - `POST {base}/call-status` with `{call_sid, status}`
pub struct HttpReminderBackend {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpReminderBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), ReminderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ReminderError::Status { status, body });
        }

        debug!(url = %url, "Reminder service accepted request");
        Ok(())
    }
}

#[async_trait]
impl ReminderBackend for HttpReminderBackend {
    async fn dispatch(
        &self,
        call: &CallContext,
        directive: &Directive,
    ) -> Result<(), ReminderError> {
        let body = DirectiveRequest {
            call_id: &call.call_id,
            caller: call.caller.as_deref(),
            action: &directive.action,
            fields: &directive.fields,
        };
        self.post("/directives", &body).await
    }

    async fn update_call_status(
        &self,
        call_sid: &str,
        status: ReminderCallStatus,
    ) -> Result<(), ReminderError> {
        self.post("/call-status", &CallStatusRequest { call_sid, status })
            .await
    }
}

// =============================================================================
// Logging backend
// =============================================================================

/// Used when no reminder service is configured: directives are only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReminderBackend;

#[async_trait]
impl ReminderBackend for LoggingReminderBackend {
    async fn dispatch(
        &self,
        call: &CallContext,
        directive: &Directive,
    ) -> Result<(), ReminderError> {
        info!(
            call_id = %call.call_id,
            caller = ?call.caller,
            action = %directive.action,
            fields = %serde_json::Value::Object(directive.fields.clone()),
            "Reminder directive (no reminder service configured)"
        );
        Ok(())
    }

    async fn update_call_status(
        &self,
        call_sid: &str,
        status: ReminderCallStatus,
    ) -> Result<(), ReminderError> {
        info!(call_sid = %call_sid, %status, "Reminder call status (no reminder service configured)");
        Ok(())
    }
}
