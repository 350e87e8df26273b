//! Call relay between a telephony media stream and an upstream model session.

mod engine;
mod registry;
mod session;

use serde::Serialize;

pub use engine::{run_relay, serve_media_stream};
pub use registry::{SessionHandle, SessionRegistry, SessionSnapshot};
pub use session::{
    CloseReason, DEFAULT_GREETING, DEFAULT_INSTRUCTIONS, Flow, MARK_PREFIX, RelayContext,
    RelayError, RelaySession, RelayStats, build_instructions,
};

/// Lifecycle of one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    /// Waiting for the upstream session to acknowledge configuration
    #[default]
    Connecting,
    /// Audio flowing both ways
    Streaming,
    /// Teardown in progress
    Closing,
    Closed,
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayState::Connecting => write!(f, "connecting"),
            RelayState::Streaming => write!(f, "streaming"),
            RelayState::Closing => write!(f, "closing"),
            RelayState::Closed => write!(f, "closed"),
        }
    }
}
