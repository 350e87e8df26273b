//! Handle to one upstream realtime connection.
//!
//! The socket itself is owned by a pump task spawned by the connector.
//! An [`UpstreamSession`] holds the channel ends of that pump: an outbound
//! sender for client events, an inbound receiver for server events and a
//! watch on the connection's [`ReadyState`]. Dropping the session drops the
//! outbound sender, which makes the pump close the socket.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use super::base::{ReadyState, RealtimeError, RealtimeResult};
use super::openai::{ClientEvent, ServerEvent};

/// Capacity of the per-session event channels.
pub const SESSION_CHANNEL_CAPACITY: usize = 256;

/// One authenticated upstream model session.
#[derive(Debug)]
pub struct UpstreamSession {
    id: String,
    outbound: mpsc::Sender<ClientEvent>,
    inbound: mpsc::Receiver<ServerEvent>,
    ready: watch::Receiver<ReadyState>,
    configured: bool,
    opened_at: Instant,
}

/// The far side of an [`UpstreamSession`]'s channels.
///
/// Connectors hand this to their socket pump; tests drive it directly to play
/// the part of the model.
#[derive(Debug)]
pub struct UpstreamPeer {
    /// Id of the paired session
    pub session_id: String,
    /// Events the session will receive
    pub events: mpsc::Sender<ServerEvent>,
    /// Events the session sent
    pub commands: mpsc::Receiver<ClientEvent>,
    /// Publishes the connection's ready state
    pub ready: watch::Sender<ReadyState>,
}

impl UpstreamPeer {
    /// Mark the connection closed and stop delivering events.
    pub fn close(self) {
        self.ready.send_replace(ReadyState::Closed);
    }
}

impl UpstreamSession {
    /// Create a session and its peer, already in the `Open` state.
    pub fn pair(id: impl Into<String>) -> (UpstreamSession, UpstreamPeer) {
        let (outbound_tx, outbound_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Open);

        let id = id.into();
        let peer = UpstreamPeer {
            session_id: id.clone(),
            events: inbound_tx,
            commands: outbound_rx,
            ready: ready_tx,
        };
        let session = UpstreamSession {
            id,
            outbound: outbound_tx,
            inbound: inbound_rx,
            ready: ready_rx,
            configured: false,
            opened_at: Instant::now(),
        };
        (session, peer)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current ready state of the underlying connection.
    pub fn ready_state(&self) -> ReadyState {
        *self.ready.borrow()
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open && !self.outbound.is_closed()
    }

    /// A watch on the ready state, for observers that do not own the session.
    pub fn ready_watch(&self) -> watch::Receiver<ReadyState> {
        self.ready.clone()
    }

    /// Whether the behavior parameters for the current call were sent.
    pub fn configured(&self) -> bool {
        self.configured
    }

    pub fn mark_configured(&mut self) {
        self.configured = true;
    }

    /// Clear call-bound flags before the session goes back to the idle set.
    pub fn reset_for_reuse(&mut self) {
        self.configured = false;
    }

    /// How long ago the handshake completed.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Queue a client event for the upstream socket.
    pub async fn send(&self, event: ClientEvent) -> RealtimeResult<()> {
        if self.ready_state() == ReadyState::Closed {
            return Err(RealtimeError::NotConnected);
        }
        self.outbound
            .send(event)
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }

    /// Next server event. `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.inbound.recv().await
    }

    /// Discard server events buffered while the session sat idle.
    pub fn drain_pending(&mut self) -> usize {
        let mut drained = 0;
        while self.inbound.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}
