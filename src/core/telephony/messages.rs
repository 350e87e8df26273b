//! Media-stream WebSocket message types.
//!
//! The telephony provider sends JSON text frames discriminated by an `event`
//! field. Audio is base64 G.711 u-law at 8kHz and is passed through untouched.
//!
//! Inbound (provider -> gateway): `connected`, `start`, `media`, `mark`, `stop`.
//! Outbound (gateway -> provider): `media`, `mark`, `clear`, each carrying the
//! `streamSid` received in `start`.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Custom parameter carrying the caller's number, set in the connect markup.
pub const CALLER_PARAMETER: &str = "caller";

// =============================================================================
// Incoming Messages (Provider -> Gateway)
// =============================================================================

/// Frames received on the media-stream socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    /// First frame after the socket opens
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },

    /// Stream metadata; sent once per stream
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMetadata,
    },

    /// One chunk of caller audio
    Media {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        media: MediaPayload,
    },

    /// Playback of a previously sent mark finished
    Mark {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        mark: MarkPayload,
    },

    /// The call ended
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },

    /// Frames the relay does not act on (dtmf, ...)
    #[serde(other)]
    Unknown,
}

impl TelephonyEvent {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The `event` tag, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            TelephonyEvent::Connected { .. } => "connected",
            TelephonyEvent::Start { .. } => "start",
            TelephonyEvent::Media { .. } => "media",
            TelephonyEvent::Mark { .. } => "mark",
            TelephonyEvent::Stop { .. } => "stop",
            TelephonyEvent::Unknown => "unknown",
        }
    }
}

/// Payload of the `start` frame.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    #[serde(default)]
    pub call_sid: String,
    #[serde(default)]
    pub account_sid: Option<String>,
    /// `<Parameter>` values from the connect markup
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

impl StartMetadata {
    /// Caller number passed through the connect markup, if any.
    pub fn caller(&self) -> Option<&str> {
        self.custom_parameters
            .get(CALLER_PARAMETER)
            .map(String::as_str)
            .filter(|c| !c.is_empty())
    }
}

/// Audio encoding announced in `start`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub channels: u32,
}

/// Payload of a `media` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    /// Milliseconds since the stream started. Sent as a string.
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: u64,
    /// Base64 audio
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
}

/// Payload of a `mark` frame, in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Accept the timestamp as either a JSON string or number.
fn de_timestamp<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// =============================================================================
// Outgoing Messages (Gateway -> Provider)
// =============================================================================

/// Frames sent on the media-stream socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutgoing {
    /// Assistant audio for playback
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutgoingMedia,
    },

    /// Ask the provider to echo a mark once playback reaches this point
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },

    /// Drop all buffered audio not yet played
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

/// Outbound audio payload.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMedia {
    pub payload: String,
}

impl TelephonyOutgoing {
    pub fn media(stream_sid: &str, payload: impl Into<String>) -> Self {
        TelephonyOutgoing::Media {
            stream_sid: stream_sid.to_string(),
            media: OutgoingMedia {
                payload: payload.into(),
            },
        }
    }

    pub fn mark(stream_sid: &str, name: impl Into<String>) -> Self {
        TelephonyOutgoing::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload { name: name.into() },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        TelephonyOutgoing::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}
