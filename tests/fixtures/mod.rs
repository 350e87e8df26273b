//! Test Fixtures Module
//!
//! In-memory collaborators for driving the gateway without network peers:
//! - `FakeConnector` hands out paired upstream sessions and keeps the peers
//! - `RecordingBackend` captures reminder traffic
//! - telephony frame builders

// Not every test binary uses every fixture
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use voice_relay_gateway::ServerConfig;
use voice_relay_gateway::core::realtime::{
    RealtimeError, RealtimeResult, UpstreamConnector, UpstreamPeer, UpstreamSession,
};
use voice_relay_gateway::core::reminder::{
    CallContext, Directive, ReminderBackend, ReminderCallStatus, ReminderError,
};
use voice_relay_gateway::core::telephony::{
    MarkPayload, MediaPayload, StartMetadata, TelephonyEvent,
};

/// Connector producing in-memory upstream sessions.
#[derive(Default)]
pub struct FakeConnector {
    pub connects: AtomicUsize,
    pub refuse: bool,
    pub delay: Option<Duration>,
    pub peers: Mutex<Vec<UpstreamPeer>>,
}

impl FakeConnector {
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Remove the peer for a session id.
    pub fn take_peer(&self, session_id: &str) -> Option<UpstreamPeer> {
        let mut peers = self.peers.lock();
        let index = peers.iter().position(|p| p.session_id == session_id)?;
        Some(peers.remove(index))
    }
}

#[async_trait]
impl UpstreamConnector for FakeConnector {
    async fn connect(&self) -> RealtimeResult<UpstreamSession> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.refuse {
            return Err(RealtimeError::ConnectionFailed("refused".to_string()));
        }
        let (session, peer) = UpstreamSession::pair(format!("fake-{n}"));
        self.peers.lock().push(peer);
        Ok(session)
    }
}

/// Reminder backend that records every call.
#[derive(Default)]
pub struct RecordingBackend {
    pub directives: Mutex<Vec<(CallContext, Directive)>>,
    pub statuses: Mutex<Vec<(String, ReminderCallStatus)>>,
}

#[async_trait]
impl ReminderBackend for RecordingBackend {
    async fn dispatch(&self, call: &CallContext, directive: &Directive) -> Result<(), ReminderError> {
        self.directives.lock().push((call.clone(), directive.clone()));
        Ok(())
    }

    async fn update_call_status(
        &self,
        call_sid: &str,
        status: ReminderCallStatus,
    ) -> Result<(), ReminderError> {
        self.statuses.lock().push((call_sid.to_string(), status));
        Ok(())
    }
}

pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.openai_api_key = Some("sk-test".to_string());
    config.pool_size = 0;
    config.pool_handshake_timeout_ms = 500;
    config
}

pub fn start(call_sid: &str, stream_sid: &str, caller: Option<&str>) -> TelephonyEvent {
    let mut start = StartMetadata {
        call_sid: call_sid.to_string(),
        ..Default::default()
    };
    if let Some(caller) = caller {
        start
            .custom_parameters
            .insert("caller".to_string(), caller.to_string());
    }
    TelephonyEvent::Start {
        stream_sid: stream_sid.to_string(),
        start,
    }
}

pub fn media(timestamp: u64) -> TelephonyEvent {
    TelephonyEvent::Media {
        stream_sid: None,
        media: MediaPayload {
            timestamp,
            payload: "//8=".to_string(),
            track: Some("inbound".to_string()),
        },
    }
}

pub fn mark(name: &str) -> TelephonyEvent {
    TelephonyEvent::Mark {
        stream_sid: None,
        mark: MarkPayload {
            name: name.to_string(),
        },
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}
