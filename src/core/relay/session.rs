//! Per-call relay state and event translation.
//!
//! A [`RelaySession`] owns one telephony link and one upstream session for the
//! lifetime of a call. It is driven by [`super::engine::run_relay`], which
//! feeds it one event at a time, so none of its state needs a lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::RelayState;
use super::registry::{SessionHandle, SessionRegistry};
use crate::core::pool::UpstreamPool;
use crate::core::realtime::openai::{
    ConversationItem, G711_BYTES_PER_MS, session_config,
};
use crate::core::realtime::{
    ClientEvent, RealtimeConfig, RealtimeError, ServerEvent, UpstreamSession,
};
use crate::core::reminder::{CallContext, ReminderBackend, ReminderHook, spawn_dispatch};
use crate::core::telephony::{StartMetadata, TelephonyError, TelephonyEvent, TelephonyLink, TelephonyOutgoing};

/// Base prompt used when none is configured.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly phone assistant that helps callers \
create, review and cancel reminders. Keep answers short and conversational. Confirm the \
reminder text, date and time before you schedule anything. Once the caller confirms, end that \
reply with one reminder marker in exactly this form: \
[[reminder: {\"action\": \"create\", \"text\": \"take my medication\", \"at\": \"2024-06-01T08:00:00Z\"}]] \
where text is what to remind about and at is the RFC 3339 time. Use the action \"cancel\" \
with the same fields to cancel a reminder. Emit at most one marker per reply.";

/// Opening prompt used when none is configured.
pub const DEFAULT_GREETING: &str =
    "Greet the caller briefly and ask what you can remind them about.";

/// Prefix of mark names sent after each assistant audio chunk.
pub const MARK_PREFIX: &str = "response-";

/// Why a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Provider sent `stop`
    TelephonyStopped,
    /// Media-stream socket went away
    TelephonyClosed,
    /// Upstream socket closed or failed
    UpstreamClosed,
    /// Status callback or shutdown
    Cancelled,
}

impl CloseReason {
    /// Whether the upstream session is still usable afterwards.
    pub fn upstream_reusable(&self) -> bool {
        !matches!(self, CloseReason::UpstreamClosed)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::TelephonyStopped => write!(f, "telephony_stopped"),
            CloseReason::TelephonyClosed => write!(f, "telephony_closed"),
            CloseReason::UpstreamClosed => write!(f, "upstream_closed"),
            CloseReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors while handling one relay event.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Telephony(#[from] TelephonyError),

    #[error(transparent)]
    Upstream(#[from] RealtimeError),
}

impl RelayError {
    pub fn close_reason(&self) -> CloseReason {
        match self {
            RelayError::Telephony(_) => CloseReason::TelephonyClosed,
            RelayError::Upstream(_) => CloseReason::UpstreamClosed,
        }
    }
}

/// Result of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close(CloseReason),
}

/// Shared collaborators every relay needs.
#[derive(Clone)]
pub struct RelayContext {
    pub pool: UpstreamPool,
    pub registry: SessionRegistry,
    pub realtime: Arc<RealtimeConfig>,
    pub hook: Arc<dyn ReminderHook>,
    pub backend: Arc<dyn ReminderBackend>,
}

/// Per-call counters, logged when the relay closes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelayStats {
    pub caller_frames: u64,
    pub assistant_audio_ms: u64,
    pub marks_sent: u64,
    pub barge_ins: u64,
    pub directives: u64,
}

/// State of one call being relayed.
pub struct RelaySession {
    relay_id: String,
    call_id: Option<String>,
    stream_sid: Option<String>,
    caller: Option<String>,

    latest_media_timestamp_ms: u64,
    response_start_timestamp_ms: Option<u64>,
    last_assistant_item_id: Option<String>,
    mark_queue: VecDeque<String>,
    mark_counter: u64,

    session_initialized: bool,
    awaiting_session_ack: bool,
    /// A model response may still be streaming on the upstream session
    response_active: bool,

    state: watch::Sender<RelayState>,
    cancel: CancellationToken,
    stats: RelayStats,

    pub(super) telephony: TelephonyLink,
    pub(super) upstream: Option<UpstreamSession>,
    ctx: RelayContext,
}

impl RelaySession {
    pub fn new(telephony: TelephonyLink, upstream: UpstreamSession, ctx: RelayContext) -> Self {
        let (state, _) = watch::channel(RelayState::Connecting);
        Self {
            relay_id: uuid::Uuid::new_v4().to_string(),
            call_id: None,
            stream_sid: None,
            caller: None,
            latest_media_timestamp_ms: 0,
            response_start_timestamp_ms: None,
            last_assistant_item_id: None,
            mark_queue: VecDeque::new(),
            mark_counter: 0,
            session_initialized: false,
            awaiting_session_ack: false,
            response_active: false,
            state,
            cancel: CancellationToken::new(),
            stats: RelayStats::default(),
            telephony,
            upstream: Some(upstream),
            ctx,
        }
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    /// Token that ends the relay when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    pub fn latest_media_timestamp_ms(&self) -> u64 {
        self.latest_media_timestamp_ms
    }

    pub fn response_start_timestamp_ms(&self) -> Option<u64> {
        self.response_start_timestamp_ms
    }

    pub fn last_assistant_item_id(&self) -> Option<&str> {
        self.last_assistant_item_id.as_deref()
    }

    pub fn pending_marks(&self) -> usize {
        self.mark_queue.len()
    }

    pub fn session_initialized(&self) -> bool {
        self.session_initialized
    }

    /// Whether the model may still be producing a reply.
    pub fn response_active(&self) -> bool {
        self.response_active
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    fn set_state(&self, next: RelayState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(call_id = ?self.call_id, from = %previous, to = %next, "Relay state change");
        }
    }

    fn upstream(&self) -> Result<&UpstreamSession, RelayError> {
        self.upstream
            .as_ref()
            .ok_or(RelayError::Upstream(RealtimeError::NotConnected))
    }

    async fn send_upstream(&self, event: ClientEvent) -> Result<(), RelayError> {
        self.upstream()?.send(event).await?;
        Ok(())
    }

    // =========================================================================
    // Telephony -> upstream
    // =========================================================================

    /// Handle one frame from the media stream.
    pub async fn handle_telephony(&mut self, event: TelephonyEvent) -> Result<Flow, RelayError> {
        match event {
            TelephonyEvent::Connected { protocol, .. } => {
                debug!(?protocol, "Media stream connected");
            }
            TelephonyEvent::Start { stream_sid, start } => {
                self.on_start(stream_sid, start).await?;
            }
            TelephonyEvent::Media { media, .. } => {
                self.latest_media_timestamp_ms = media.timestamp;
                self.stats.caller_frames += 1;
                self.send_upstream(ClientEvent::audio_append(media.payload))
                    .await?;
            }
            TelephonyEvent::Mark { mark, .. } => {
                // Acknowledgments arrive in send order; an ack with nothing
                // pending is ignored.
                if self.mark_queue.pop_front().is_none() {
                    debug!(name = %mark.name, "Mark acknowledged with empty queue");
                }
            }
            TelephonyEvent::Stop { .. } => {
                info!(call_id = ?self.call_id, "Media stream stopped");
                return Ok(Flow::Close(CloseReason::TelephonyStopped));
            }
            TelephonyEvent::Unknown => {}
        }
        Ok(Flow::Continue)
    }

    async fn on_start(&mut self, stream_sid: String, start: StartMetadata) -> Result<(), RelayError> {
        match &self.call_id {
            None => self.call_id = Some(start.call_sid.clone()),
            Some(existing) if *existing != start.call_sid => {
                warn!(call_id = %existing, new_call_id = %start.call_sid, "Ignoring call id change on repeated start");
            }
            Some(_) => {}
        }
        if self.caller.is_none() {
            self.caller = start.caller().map(str::to_string);
        }
        self.stream_sid = Some(stream_sid);

        self.latest_media_timestamp_ms = 0;
        self.response_start_timestamp_ms = None;
        self.last_assistant_item_id = None;
        self.mark_queue.clear();

        info!(
            call_id = ?self.call_id,
            stream_sid = ?self.stream_sid,
            caller = ?self.caller,
            "Media stream started"
        );

        self.register();

        if !self.session_initialized && !self.awaiting_session_ack {
            let instructions = build_instructions(
                self.ctx.realtime.instructions.as_deref(),
                self.caller.as_deref(),
                OffsetDateTime::now_utc(),
            );
            let session = session_config(&self.ctx.realtime, instructions);
            self.send_upstream(ClientEvent::SessionUpdate { session })
                .await?;
            self.awaiting_session_ack = true;
            if let Some(upstream) = self.upstream.as_mut() {
                upstream.mark_configured();
            }
        }
        Ok(())
    }

    fn register(&self) {
        let (Some(call_id), Some(stream_sid)) = (&self.call_id, &self.stream_sid) else {
            return;
        };
        if self.ctx.registry.is_registered(call_id, &self.relay_id) {
            return;
        }
        self.ctx.registry.register(SessionHandle {
            relay_id: self.relay_id.clone(),
            call_id: call_id.clone(),
            stream_sid: stream_sid.clone(),
            caller: self.caller.clone(),
            upstream_session_id: self
                .upstream
                .as_ref()
                .map(|u| u.id().to_string())
                .unwrap_or_default(),
            started_at: SystemTime::now(),
            started: Instant::now(),
            state: self.state.subscribe(),
            cancel: self.cancel.clone(),
        });
    }

    // =========================================================================
    // Upstream -> telephony
    // =========================================================================

    /// Handle one event from the upstream model session.
    pub async fn handle_upstream(&mut self, event: ServerEvent) -> Result<Flow, RelayError> {
        match event {
            ServerEvent::SessionCreated { session } => {
                debug!(upstream_session = %session.id, "Upstream session created");
            }
            ServerEvent::SessionUpdated { .. } => {
                self.on_session_updated().await?;
            }
            ServerEvent::AudioDelta { item_id, delta, .. } => {
                self.on_audio_delta(item_id, delta).await?;
            }
            ServerEvent::SpeechStarted { .. } => {
                self.on_speech_started().await?;
            }
            ServerEvent::SpeechStopped { audio_end_ms } => {
                debug!(audio_end_ms, "Caller speech stopped");
            }
            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                info!(call_id = ?self.call_id, transcript = %transcript, "Caller said");
            }
            ServerEvent::AudioTranscriptDelta { .. } => {}
            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                self.on_transcript_done(&transcript);
            }
            ServerEvent::ResponseCreated { response } => {
                debug!(response_id = %response.id, "Response started");
                self.response_active = true;
            }
            ServerEvent::ResponseDone { response } => {
                debug!(response_id = %response.id, status = %response.status, "Response done");
                self.response_active = false;
            }
            ServerEvent::Error { error } => {
                warn!(
                    call_id = ?self.call_id,
                    error_type = %error.error_type,
                    code = ?error.code,
                    "Upstream error: {}",
                    error.message
                );
            }
            ServerEvent::Unknown => {}
        }
        Ok(Flow::Continue)
    }

    async fn on_session_updated(&mut self) -> Result<(), RelayError> {
        if self.session_initialized || !self.awaiting_session_ack {
            debug!("Session update acknowledged");
            return Ok(());
        }

        let greeting = self
            .ctx
            .realtime
            .greeting
            .clone()
            .unwrap_or_else(|| DEFAULT_GREETING.to_string());
        self.send_upstream(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(greeting),
        })
        .await?;
        self.send_upstream(ClientEvent::ResponseCreate).await?;
        self.response_active = true;

        self.session_initialized = true;
        self.awaiting_session_ack = false;
        self.set_state(RelayState::Streaming);
        info!(call_id = ?self.call_id, "Conversation opened");
        Ok(())
    }

    async fn on_audio_delta(&mut self, item_id: Option<String>, delta: String) -> Result<(), RelayError> {
        // Audio ahead of this call's own opening belongs to an earlier reply
        if !self.session_initialized {
            debug!(?item_id, "Dropping assistant audio received before the conversation opened");
            return Ok(());
        }
        let Some(stream_sid) = self.stream_sid.clone() else {
            debug!("Dropping assistant audio received before stream start");
            return Ok(());
        };
        self.response_active = true;

        self.stats.assistant_audio_ms +=
            (ServerEvent::audio_delta_len(&delta) / G711_BYTES_PER_MS) as u64;

        self.telephony
            .send(TelephonyOutgoing::media(&stream_sid, delta))
            .await?;

        if self.response_start_timestamp_ms.is_none() {
            self.response_start_timestamp_ms = Some(self.latest_media_timestamp_ms);
        }
        if let Some(item_id) = item_id {
            self.last_assistant_item_id = Some(item_id);
        }

        // One mark per audio chunk
        self.mark_counter += 1;
        let name = format!("{MARK_PREFIX}{}", self.mark_counter);
        self.mark_queue.push_back(name.clone());
        self.telephony
            .send(TelephonyOutgoing::mark(&stream_sid, name))
            .await?;
        self.stats.marks_sent += 1;
        Ok(())
    }

    /// Barge-in: cut the assistant's audio at the point the caller heard.
    async fn on_speech_started(&mut self) -> Result<(), RelayError> {
        if self.mark_queue.is_empty() {
            return Ok(());
        }
        let Some(start) = self.response_start_timestamp_ms else {
            return Ok(());
        };

        let elapsed = self.latest_media_timestamp_ms.saturating_sub(start);
        if self.latest_media_timestamp_ms < start {
            warn!(
                latest = self.latest_media_timestamp_ms,
                start, "Media clock behind response start, truncating at 0"
            );
        }

        if let Some(item_id) = self.last_assistant_item_id.clone() {
            debug!(item_id = %item_id, audio_end_ms = elapsed, "Truncating assistant audio");
            self.send_upstream(ClientEvent::ConversationItemTruncate {
                item_id,
                content_index: 0,
                audio_end_ms: elapsed,
            })
            .await?;
        }

        if let Some(stream_sid) = self.stream_sid.as_deref() {
            self.telephony
                .send(TelephonyOutgoing::clear(stream_sid))
                .await?;
        }

        self.mark_queue.clear();
        self.last_assistant_item_id = None;
        self.response_start_timestamp_ms = None;
        self.stats.barge_ins += 1;
        Ok(())
    }

    fn on_transcript_done(&mut self, transcript: &str) {
        info!(call_id = ?self.call_id, transcript = %transcript, "Assistant said");

        let Some(directive) = self.ctx.hook.extract(transcript) else {
            return;
        };
        info!(call_id = ?self.call_id, action = %directive.action, "Reminder directive recognized");
        self.stats.directives += 1;

        let call = CallContext {
            call_id: self.call_id.clone().unwrap_or_default(),
            caller: self.caller.clone(),
        };
        spawn_dispatch(self.ctx.backend.clone(), call, directive);
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Closing -> release or discard upstream -> Closed -> unregister.
    ///
    /// An upstream session that may still be streaming a reply is cancelled
    /// and discarded, never pooled.
    pub async fn close(&mut self, reason: CloseReason) {
        if self.state() == RelayState::Closed {
            return;
        }
        self.set_state(RelayState::Closing);

        self.telephony.close().await;

        if let Some(upstream) = self.upstream.take() {
            if !reason.upstream_reusable() {
                self.ctx.pool.discard(upstream);
            } else if self.response_active {
                debug!(call_id = ?self.call_id, "Cancelling in-flight response before discarding upstream");
                if let Err(e) = upstream.send(ClientEvent::ResponseCancel).await {
                    debug!(error = %e, "Response cancel not delivered");
                }
                self.ctx.pool.discard(upstream);
            } else {
                self.ctx.pool.release(upstream);
            }
        }

        self.set_state(RelayState::Closed);
        if let Some(call_id) = &self.call_id {
            self.ctx.registry.unregister(call_id, &self.relay_id);
        }

        let stats = self.stats;
        info!(
            call_id = ?self.call_id,
            %reason,
            caller_frames = stats.caller_frames,
            assistant_audio_ms = stats.assistant_audio_ms,
            marks_sent = stats.marks_sent,
            barge_ins = stats.barge_ins,
            directives = stats.directives,
            "Relay closed"
        );
    }
}

/// Render the per-call prompt: base prompt plus caller number and current time.
pub fn build_instructions(base: Option<&str>, caller: Option<&str>, now: OffsetDateTime) -> String {
    let base = base
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(DEFAULT_INSTRUCTIONS);
    let now = now.format(&Rfc3339).unwrap_or_else(|_| now.to_string());

    let mut instructions = String::from(base);
    instructions.push_str("\n\n");
    match caller {
        Some(caller) => {
            instructions.push_str(&format!("The caller's phone number is {caller}. "));
        }
        None => instructions.push_str("The caller's phone number is unknown. "),
    }
    instructions.push_str(&format!("The current date and time is {now} (UTC)."));
    instructions
}
