//! OpenAI Realtime API configuration types.
//!
//! Model and voice selection plus the mapping from the gateway's
//! [`RealtimeConfig`] to the `session.update` payload sent when a call binds
//! to an upstream session.

use serde::{Deserialize, Serialize};

use super::messages::{InputAudioTranscription, SessionConfig, TurnDetection};
use crate::core::realtime::base::{RealtimeConfig, TurnDetectionConfig};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default model when none is configured.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

/// Default transcription model for caller audio.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Bytes of G.711 audio per millisecond (8kHz, 8-bit).
pub const G711_BYTES_PER_MS: usize = 8;

// =============================================================================
// Voices
// =============================================================================

/// Available voices for OpenAI Realtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    /// Alloy voice (default)
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl OpenAIRealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse a voice name, case-insensitively. Returns `None` for unknown voices.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
    }

    /// Get all available voices.
    pub fn all() -> &'static [OpenAIRealtimeVoice] {
        &[
            Self::Alloy,
            Self::Ash,
            Self::Ballad,
            Self::Coral,
            Self::Echo,
            Self::Sage,
            Self::Shimmer,
            Self::Verse,
        ]
    }
}

impl std::fmt::Display for OpenAIRealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Audio Formats
// =============================================================================

/// Audio formats the relay can negotiate with the model.
///
/// Telephony media streams carry 8kHz G.711 u-law, so that is the default on
/// both legs and audio is forwarded without transcoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAIRealtimeAudioFormat {
    /// G.711 u-law (8-bit, 8kHz)
    #[default]
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    /// G.711 a-law (8-bit, 8kHz)
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

impl OpenAIRealtimeAudioFormat {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::G711Ulaw => "g711_ulaw",
            Self::G711Alaw => "g711_alaw",
        }
    }

    /// Parse from string, with fallback to u-law.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "g711_alaw" | "alaw" => Self::G711Alaw,
            _ => Self::G711Ulaw,
        }
    }
}

// =============================================================================
// Session Payload
// =============================================================================

/// Build the `session.update` payload for one call.
///
/// `instructions` is the fully rendered prompt (base prompt plus call context).
pub fn session_config(config: &RealtimeConfig, instructions: String) -> SessionConfig {
    let format = config
        .audio_format
        .as_deref()
        .map(OpenAIRealtimeAudioFormat::from_str_or_default)
        .unwrap_or_default()
        .as_str()
        .to_string();

    let voice = config
        .voice
        .as_deref()
        .and_then(OpenAIRealtimeVoice::parse)
        .unwrap_or_default();

    let transcription_model = config
        .input_audio_transcription
        .as_ref()
        .map(|t| t.model.clone())
        .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string());

    let turn_detection = match config.turn_detection.clone().unwrap_or_default() {
        TurnDetectionConfig::ServerVad {
            threshold,
            prefix_padding_ms,
            silence_duration_ms,
        } => TurnDetection::ServerVad {
            threshold,
            prefix_padding_ms,
            silence_duration_ms,
        },
        TurnDetectionConfig::SemanticVad { eagerness } => TurnDetection::SemanticVad { eagerness },
    };

    SessionConfig {
        modalities: Some(vec!["text".to_string(), "audio".to_string()]),
        instructions: Some(instructions),
        voice: Some(voice.as_str().to_string()),
        input_audio_format: Some(format.clone()),
        output_audio_format: Some(format),
        input_audio_transcription: Some(InputAudioTranscription {
            model: transcription_model,
        }),
        turn_detection: Some(turn_detection),
        temperature: config.temperature,
    }
}

/// Build the upstream WebSocket URL with the model query parameter.
pub fn realtime_url(config: &RealtimeConfig) -> String {
    let base = config.url.as_deref().unwrap_or(OPENAI_REALTIME_URL);
    let model = if config.model.is_empty() {
        DEFAULT_REALTIME_MODEL
    } else {
        config.model.as_str()
    };
    if base.contains('?') {
        format!("{base}&model={model}")
    } else {
        format!("{base}?model={model}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::base::InputTranscriptionConfig;

    #[test]
    fn test_voice_parse() {
        assert_eq!(OpenAIRealtimeVoice::parse("alloy"), Some(OpenAIRealtimeVoice::Alloy));
        assert_eq!(OpenAIRealtimeVoice::parse("SHIMMER"), Some(OpenAIRealtimeVoice::Shimmer));
        assert_eq!(OpenAIRealtimeVoice::parse("nova"), None);
        assert_eq!(OpenAIRealtimeVoice::all().len(), 8);
    }

    #[test]
    fn test_audio_format_from_str() {
        assert_eq!(
            OpenAIRealtimeAudioFormat::from_str_or_default("alaw"),
            OpenAIRealtimeAudioFormat::G711Alaw
        );
        assert_eq!(
            OpenAIRealtimeAudioFormat::from_str_or_default("pcm16"),
            OpenAIRealtimeAudioFormat::G711Ulaw
        );
    }

    #[test]
    fn test_session_config_defaults() {
        let config = RealtimeConfig::default();
        let session = session_config(&config, "Be brief.".to_string());

        assert_eq!(session.input_audio_format.as_deref(), Some("g711_ulaw"));
        assert_eq!(session.output_audio_format.as_deref(), Some("g711_ulaw"));
        assert_eq!(session.voice.as_deref(), Some("alloy"));
        assert_eq!(session.instructions.as_deref(), Some("Be brief."));
        assert_eq!(
            session.input_audio_transcription.map(|t| t.model).as_deref(),
            Some("whisper-1")
        );
        assert!(matches!(
            session.turn_detection,
            Some(TurnDetection::ServerVad { .. })
        ));
    }

    #[test]
    fn test_session_config_overrides() {
        let config = RealtimeConfig {
            voice: Some("Coral".to_string()),
            temperature: Some(0.7),
            input_audio_transcription: Some(InputTranscriptionConfig {
                model: "gpt-4o-transcribe".to_string(),
            }),
            ..Default::default()
        };
        let session = session_config(&config, String::new());
        assert_eq!(session.voice.as_deref(), Some("coral"));
        assert_eq!(session.temperature, Some(0.7));
        assert_eq!(
            session.input_audio_transcription.map(|t| t.model).as_deref(),
            Some("gpt-4o-transcribe")
        );
    }

    #[test]
    fn test_realtime_url() {
        let config = RealtimeConfig::default();
        assert_eq!(
            realtime_url(&config),
            format!("{OPENAI_REALTIME_URL}?model={DEFAULT_REALTIME_MODEL}")
        );

        let config = RealtimeConfig {
            url: Some("ws://127.0.0.1:9000/v1/realtime".to_string()),
            model: "gpt-4o-mini-realtime-preview".to_string(),
            ..Default::default()
        };
        assert_eq!(
            realtime_url(&config),
            "ws://127.0.0.1:9000/v1/realtime?model=gpt-4o-mini-realtime-preview"
        );
    }
}
