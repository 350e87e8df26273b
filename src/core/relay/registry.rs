//! Registry of live relays, keyed by call id.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::RelayState;

/// What the registry keeps for one live relay.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Unique per relay; guards against a stale relay unregistering a newer one
    pub relay_id: String,
    pub call_id: String,
    pub stream_sid: String,
    pub caller: Option<String>,
    pub upstream_session_id: String,
    pub started_at: SystemTime,
    pub started: Instant,
    pub state: watch::Receiver<RelayState>,
    pub cancel: CancellationToken,
}

/// Serializable view of a [`SessionHandle`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub call_id: String,
    pub stream_sid: String,
    pub caller: Option<String>,
    pub upstream_session_id: String,
    pub state: RelayState,
    pub started_at_unix_ms: u64,
    pub duration_ms: u64,
}

impl From<&SessionHandle> for SessionSnapshot {
    fn from(handle: &SessionHandle) -> Self {
        SessionSnapshot {
            call_id: handle.call_id.clone(),
            stream_sid: handle.stream_sid.clone(),
            caller: handle.caller.clone(),
            upstream_session_id: handle.upstream_session_id.clone(),
            state: *handle.state.borrow(),
            started_at_unix_ms: handle
                .started_at
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            duration_ms: handle.started.elapsed().as_millis() as u64,
        }
    }
}

/// Concurrent map of live relays. Cloning shares the same map.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a relay. A relay already registered under the same call id is
    /// cancelled and replaced.
    pub fn register(&self, handle: SessionHandle) {
        let call_id = handle.call_id.clone();
        if let Some(previous) = self.sessions.insert(call_id.clone(), handle) {
            warn!(call_id = %call_id, "Call id registered twice, cancelling previous relay");
            previous.cancel.cancel();
        }
        debug!(call_id = %call_id, active = self.sessions.len(), "Relay registered");
    }

    /// Remove the relay with this call id if it is still the one identified
    /// by `relay_id`.
    pub fn unregister(&self, call_id: &str, relay_id: &str) -> bool {
        let removed = self
            .sessions
            .remove_if(call_id, |_, handle| handle.relay_id == relay_id)
            .is_some();
        if removed {
            debug!(call_id = %call_id, active = self.sessions.len(), "Relay unregistered");
        }
        removed
    }

    /// Cancel the relay for a call. Returns whether one was registered.
    pub fn cancel(&self, call_id: &str) -> bool {
        match self.sessions.get(call_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every live relay.
    pub fn cancel_all(&self) {
        for entry in self.sessions.iter() {
            entry.cancel.cancel();
        }
    }

    pub fn get(&self, call_id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(call_id).map(|h| SessionSnapshot::from(&*h))
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.sessions.contains_key(call_id)
    }

    /// Whether `relay_id` is the relay currently registered for `call_id`.
    pub fn is_registered(&self, call_id: &str, relay_id: &str) -> bool {
        self.sessions
            .get(call_id)
            .is_some_and(|handle| handle.relay_id == relay_id)
    }

    /// Snapshot of all live relays, oldest first.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<SessionSnapshot> = self
            .sessions
            .iter()
            .map(|entry| SessionSnapshot::from(entry.value()))
            .collect();
        all.sort_by_key(|s| s.started_at_unix_ms);
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(call_id: &str, relay_id: &str) -> (SessionHandle, watch::Sender<RelayState>) {
        let (state_tx, state_rx) = watch::channel(RelayState::Streaming);
        let handle = SessionHandle {
            relay_id: relay_id.to_string(),
            call_id: call_id.to_string(),
            stream_sid: "MZ1".to_string(),
            caller: Some("+15550001111".to_string()),
            upstream_session_id: "up-1".to_string(),
            started_at: SystemTime::now(),
            started: Instant::now(),
            state: state_rx,
            cancel: CancellationToken::new(),
        };
        (handle, state_tx)
    }

    #[test]
    fn test_register_and_snapshot() {
        let registry = SessionRegistry::new();
        let (h, state_tx) = handle("CA1", "r1");
        registry.register(h);

        let snapshot = registry.get("CA1").unwrap();
        assert_eq!(snapshot.state, RelayState::Streaming);
        assert_eq!(snapshot.caller.as_deref(), Some("+15550001111"));

        state_tx.send_replace(RelayState::Closing);
        assert_eq!(registry.get("CA1").unwrap().state, RelayState::Closing);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_unregister_requires_matching_relay() {
        let registry = SessionRegistry::new();
        let (h, _tx) = handle("CA1", "r1");
        registry.register(h);

        assert!(!registry.unregister("CA1", "other"));
        assert!(registry.contains("CA1"));
        assert!(registry.unregister("CA1", "r1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_call_id_cancels_previous() {
        let registry = SessionRegistry::new();
        let (first, _tx1) = handle("CA1", "r1");
        let first_cancel = first.cancel.clone();
        registry.register(first);

        let (second, _tx2) = handle("CA1", "r2");
        registry.register(second);

        assert!(first_cancel.is_cancelled());
        assert_eq!(registry.len(), 1);
        assert!(registry.is_registered("CA1", "r2"));
        assert!(!registry.is_registered("CA1", "r1"));
        // The stale relay cannot remove its replacement
        assert!(!registry.unregister("CA1", "r1"));
    }

    #[test]
    fn test_cancel() {
        let registry = SessionRegistry::new();
        let (h, _tx) = handle("CA1", "r1");
        let token = h.cancel.clone();
        registry.register(h);

        assert!(!registry.cancel("CA2"));
        assert!(registry.cancel("CA1"));
        assert!(token.is_cancelled());
    }
}
