//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and live session status
//! - `voice` - Telephony webhooks (call connect, call status)
//! - `media_stream` - Telephony media-stream WebSocket

pub mod api;
pub mod media_stream;
pub mod voice;

pub use media_stream::media_stream_handler;
