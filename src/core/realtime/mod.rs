//! Upstream realtime model sessions.
//!
//! [`UpstreamConnector`] opens sessions, [`UpstreamSession`] is the handle a
//! relay owns while a call is bound to it, and [`openai`] implements the
//! connector for the OpenAI Realtime API.

mod base;
pub mod openai;
mod session;

pub use base::{
    BackoffConfig, InputTranscriptionConfig, ReadyState, RealtimeConfig, RealtimeError,
    RealtimeResult, TurnDetectionConfig, UpstreamConnector,
};
pub use openai::{ClientEvent, OpenAIConnector, ServerEvent};
pub use session::{SESSION_CHANNEL_CAPACITY, UpstreamPeer, UpstreamSession};
