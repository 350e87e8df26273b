//! OpenAI Realtime API module.
//!
//! Upstream sessions for the relay are opened against OpenAI's Realtime API.
//!
//! # Audio Format
//!
//! Both legs use G.711 u-law at 8kHz, the format telephony media streams
//! carry, so caller audio is forwarded without transcoding.
//!
//! # Example
//!
//! ```rust,ignore
//! use voice_relay_gateway::core::realtime::{OpenAIConnector, RealtimeConfig, UpstreamConnector};
//!
//! let config = RealtimeConfig {
//!     api_key: "sk-...".to_string(),
//!     model: "gpt-4o-realtime-preview".to_string(),
//!     ..Default::default()
//! };
//!
//! let connector = OpenAIConnector::new(&config)?;
//! let session = connector.connect().await?;
//! ```

mod client;
mod config;
mod messages;

pub use client::OpenAIConnector;
pub use config::{
    DEFAULT_REALTIME_MODEL, DEFAULT_TRANSCRIPTION_MODEL, G711_BYTES_PER_MS, OPENAI_REALTIME_URL,
    OpenAIRealtimeAudioFormat, OpenAIRealtimeVoice, realtime_url, session_config,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, InputAudioTranscription, Response,
    ServerEvent, Session, SessionConfig, TurnDetection,
};
