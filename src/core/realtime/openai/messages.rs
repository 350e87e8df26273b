//! OpenAI Realtime API WebSocket message types.
//!
//! This module defines the client and server event types the relay exchanges
//! with the OpenAI Realtime API. All events are JSON-encoded text frames
//! discriminated by their `type` field.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Configure voice, instructions, audio formats, VAD
//! - input_audio_buffer.append - Forward caller audio
//! - conversation.item.create - Add the conversation-opening item
//! - conversation.item.truncate - Cut assistant audio the caller never heard
//! - response.create - Ask the model to speak
//! - response.cancel - Cancel the current response
//!
//! Server events (received from server):
//! - session.created / session.updated
//! - input_audio_buffer.speech_started / speech_stopped
//! - conversation.item.input_audio_transcription.completed
//! - response.audio.delta
//! - response.audio_transcript.delta / done
//! - response.created / response.done
//! - error
//!
//! Every other event type decodes to [`ServerEvent::Unknown`] and is ignored.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent with `session.update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Temperature for response generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio prefix padding in ms
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration in ms
        #[serde(default, skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
    /// Semantic VAD
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eagerness: Option<String>,
    },
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type
    #[serde(rename = "type", default)]
    pub item_type: String,
    /// Item role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
}

impl ConversationItem {
    /// A user text message, used to open the conversation.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.into()),
                transcript: None,
            }]),
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Transcript of audio content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the OpenAI Realtime API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Truncate a conversation item
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        /// Item ID
        item_id: String,
        /// Content index
        content_index: u32,
        /// Audio end in ms
        audio_end_ms: u64,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate,

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Forward an already base64-encoded audio payload.
    pub fn audio_append(payload: impl Into<String>) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: payload.into(),
        }
    }

    /// The event's wire `type`, for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ConversationItemTruncate { .. } => "conversation.item.truncate",
            ClientEvent::ResponseCreate => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the OpenAI Realtime API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        #[serde(default)]
        session: Session,
    },

    /// Session updated; acknowledges `session.update`
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session information
        #[serde(default)]
        session: Session,
    },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start timestamp in ms
        #[serde(default)]
        audio_start_ms: u64,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end timestamp in ms
        #[serde(default)]
        audio_end_ms: u64,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Transcript text
        #[serde(default)]
        transcript: String,
    },

    /// Audio delta (audio data chunk)
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Response ID
        #[serde(default)]
        response_id: Option<String>,
        /// Item ID of the assistant message being spoken
        #[serde(default)]
        item_id: Option<String>,
        /// Base64-encoded audio delta
        delta: String,
    },

    /// Audio transcript delta
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Transcript delta
        #[serde(default)]
        delta: String,
    },

    /// Audio transcript done
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Full transcript
        #[serde(default)]
        transcript: String,
    },

    /// Response started; audio for it follows
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Response information
        #[serde(default)]
        response: Response,
    },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        #[serde(default)]
        response: Response,
    },

    /// Any event type the relay does not act on
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Number of bytes carried by a base64 audio delta.
    pub fn audio_delta_len(delta: &str) -> usize {
        BASE64_STANDARD.decode(delta).map(|d| d.len()).unwrap_or(0)
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
    /// Event ID that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Session information.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Session {
    /// Session ID
    #[serde(default)]
    pub id: String,
    /// Model used
    #[serde(default)]
    pub model: String,
    /// Voice
    #[serde(default)]
    pub voice: Option<String>,
    /// Input audio format
    #[serde(default)]
    pub input_audio_format: Option<String>,
    /// Output audio format
    #[serde(default)]
    pub output_audio_format: Option<String>,
}

/// Response information.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Response {
    /// Response ID
    #[serde(default)]
    pub id: String,
    /// Response status
    #[serde(default)]
    pub status: String,
    /// Status details
    #[serde(default)]
    pub status_details: Option<serde_json::Value>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_append_passes_payload_through() {
        let event = ClientEvent::audio_append("AAEC");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], "AAEC");
    }

    #[test]
    fn test_truncate_serialization() {
        let event = ClientEvent::ConversationItemTruncate {
            item_id: "item_1".to_string(),
            content_index: 0,
            audio_end_ms: 800,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conversation.item.truncate");
        assert_eq!(json["item_id"], "item_1");
        assert_eq!(json["content_index"], 0);
        assert_eq!(json["audio_end_ms"], 800);
    }

    #[test]
    fn test_session_update_serialization() {
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig {
                voice: Some("alloy".to_string()),
                input_audio_format: Some("g711_ulaw".to_string()),
                turn_detection: Some(TurnDetection::ServerVad {
                    threshold: None,
                    prefix_padding_ms: None,
                    silence_duration_ms: None,
                }),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["voice"], "alloy");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
        assert!(json["session"].get("instructions").is_none());
    }

    #[test]
    fn test_response_create_is_bare() {
        let json = serde_json::to_string(&ClientEvent::ResponseCreate).unwrap();
        assert_eq!(json, r#"{"type":"response.create"}"#);
    }

    #[test]
    fn test_opening_item() {
        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text("Greet the caller"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["item"]["type"], "message");
        assert_eq!(json["item"]["role"], "user");
        assert_eq!(json["item"]["content"][0]["type"], "input_text");
        assert_eq!(json["item"]["content"][0]["text"], "Greet the caller");
    }

    #[test]
    fn test_server_error_deserialization() {
        let json = r#"{
            "type": "error",
            "error": {
                "type": "invalid_request_error",
                "message": "Test error"
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::Error { error } => {
                assert_eq!(error.message, "Test error");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_audio_delta_deserialization() {
        let json = r#"{"type":"response.audio.delta","event_id":"e1","response_id":"r1",
            "item_id":"item_9","output_index":0,"content_index":0,"delta":"AAEC"}"#;
        match serde_json::from_str::<ServerEvent>(json).unwrap() {
            ServerEvent::AudioDelta { item_id, delta, .. } => {
                assert_eq!(item_id.as_deref(), Some("item_9"));
                assert_eq!(delta, "AAEC");
            }
            other => panic!("Wrong event type: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let json = r#"{"type":"rate_limits.updated","rate_limits":[]}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }

    #[test]
    fn test_session_updated_minimal() {
        let json = r#"{"type":"session.updated","session":{"id":"sess_1"}}"#;
        match serde_json::from_str::<ServerEvent>(json).unwrap() {
            ServerEvent::SessionUpdated { session } => assert_eq!(session.id, "sess_1"),
            other => panic!("Wrong event type: {other:?}"),
        }
    }

    #[test]
    fn test_response_lifecycle_events() {
        let json = r#"{"type":"response.created","response":{"id":"resp_1","status":"in_progress"}}"#;
        match serde_json::from_str::<ServerEvent>(json).unwrap() {
            ServerEvent::ResponseCreated { response } => assert_eq!(response.id, "resp_1"),
            other => panic!("Wrong event type: {other:?}"),
        }
        let json = r#"{"type":"response.done","response":{"id":"resp_1","status":"cancelled"}}"#;
        match serde_json::from_str::<ServerEvent>(json).unwrap() {
            ServerEvent::ResponseDone { response } => assert_eq!(response.status, "cancelled"),
            other => panic!("Wrong event type: {other:?}"),
        }
    }

    #[test]
    fn test_audio_delta_len() {
        let encoded = BASE64_STANDARD.encode([0u8; 160]);
        assert_eq!(ServerEvent::audio_delta_len(&encoded), 160);
        assert_eq!(ServerEvent::audio_delta_len("not base64!"), 0);
    }
}
