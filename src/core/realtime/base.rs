//! Base traits and types for upstream realtime model sessions.
//!
//! This module defines the foundational abstractions shared by every
//! upstream realtime provider: the error type, the session configuration,
//! the handshake backoff policy and the [`UpstreamConnector`] seam the
//! connection pool opens sessions through.
//!
//! # Audio Format
//!
//! The relay speaks G.711 u-law at 8kHz on both legs so telephony audio can be
//! forwarded without transcoding.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::session::UpstreamSession;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while talking to an upstream realtime session.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Provider-specific error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Handshake did not complete in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Session is not open
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Backoff
// =============================================================================

/// Retry policy for failed upstream handshakes.
///
/// Used by the connection pool when a pre-warm open fails: the replacement
/// attempt is scheduled after [`BackoffConfig::calculate_delay`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Maximum number of attempts before a warm slot is abandoned.
    /// Set to 0 for unlimited attempts.
    /// Default: 0
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds).
    /// Default: 500ms
    pub initial_delay_ms: u64,

    /// Upper bound for the delay between attempts (milliseconds).
    /// Default: 30000ms
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Default: 2.0
    pub backoff_multiplier: f32,

    /// Whether to add jitter to the delay so many pools do not retry in lockstep.
    /// Default: true
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 500,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// A fixed delay between attempts with no growth and no jitter.
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff_multiplier: 1.0,
            jitter: false,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number using exponential backoff.
    /// Returns the delay in milliseconds.
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;

        // base_delay * multiplier^(attempt-1)
        let delay = base_delay * multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = delay.min(self.max_delay_ms as f64);

        if self.jitter {
            // Up to 25% either way
            let jitter_range = delay * 0.25;
            let jitter = rand_jitter(jitter_range);
            (delay + jitter).max(0.0) as u64
        } else {
            delay as u64
        }
    }

    /// Check if another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }
}

/// Generate a pseudo-random jitter value using a simple LCG.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    (normalized - 0.5) * 2.0 * range
}

// =============================================================================
// Configuration Types
// =============================================================================

/// Behavior parameters sent to an upstream session when a call binds to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,

    /// WebSocket endpoint (defaults to the provider's public endpoint)
    #[serde(default)]
    pub url: Option<String>,

    /// Model to use (e.g., "gpt-4o-realtime-preview")
    #[serde(default)]
    pub model: String,

    /// Voice ID for audio output
    #[serde(default)]
    pub voice: Option<String>,

    /// Base system instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    /// Prompt used for the conversation-opening item
    #[serde(default)]
    pub greeting: Option<String>,

    /// Temperature for response generation
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Audio format used on both legs
    #[serde(default)]
    pub audio_format: Option<String>,

    /// Enable input audio transcription
    #[serde(default)]
    pub input_audio_transcription: Option<InputTranscriptionConfig>,

    /// Turn detection configuration
    #[serde(default)]
    pub turn_detection: Option<TurnDetectionConfig>,
}

/// Configuration for input audio transcription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputTranscriptionConfig {
    /// Model to use for transcription (e.g., "whisper-1")
    pub model: String,
}

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default)]
        threshold: Option<f32>,
        /// Amount of audio to include before voice detection (ms)
        #[serde(default)]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn (ms)
        #[serde(default)]
        silence_duration_ms: Option<u32>,
    },
    /// Semantic-aware turn detection
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level (low, medium, high, auto)
        #[serde(default)]
        eagerness: Option<String>,
    },
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
        }
    }
}

// =============================================================================
// Ready State
// =============================================================================

/// Lifecycle of one upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    /// Handshake in progress
    #[default]
    Connecting,
    /// Handshake complete, frames flow both ways
    Open,
    /// Socket closed or errored; terminal
    Closed,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyState::Connecting => write!(f, "connecting"),
            ReadyState::Open => write!(f, "open"),
            ReadyState::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens authenticated upstream sessions.
///
/// The pool never talks to a socket directly; it goes through this trait so
/// the provider (and, in tests, an in-memory fake) can be swapped.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open one session and complete its handshake.
    ///
    /// Implementations must not bound the call themselves; the pool applies
    /// the handshake timeout.
    async fn connect(&self) -> RealtimeResult<UpstreamSession>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_state_display() {
        assert_eq!(ReadyState::Open.to_string(), "open");
        assert_eq!(ReadyState::Closed.to_string(), "closed");
        assert_eq!(ReadyState::default(), ReadyState::Connecting);
    }

    #[test]
    fn test_default_turn_detection() {
        match TurnDetectionConfig::default() {
            TurnDetectionConfig::ServerVad { threshold, .. } => {
                assert_eq!(threshold, Some(0.5));
            }
            _ => panic!("Expected ServerVad default"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::Timeout("handshake".to_string());
        assert!(err.to_string().contains("timed out"));
        assert_eq!(RealtimeError::NotConnected.to_string(), "Not connected");
    }

    #[test]
    fn test_backoff_unlimited_by_default() {
        let config = BackoffConfig::default();
        assert!(config.should_retry(0));
        assert!(config.should_retry(u32::MAX));
    }

    #[test]
    fn test_backoff_bounded_attempts() {
        let config = BackoffConfig {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
    }

    #[test]
    fn test_backoff_calculate_delay_no_jitter() {
        let config = BackoffConfig {
            initial_delay_ms: 500,
            max_delay_ms: 3000,
            backoff_multiplier: 2.0,
            jitter: false,
            ..Default::default()
        };

        assert_eq!(config.calculate_delay(1), 500);
        assert_eq!(config.calculate_delay(2), 1000);
        assert_eq!(config.calculate_delay(3), 2000);
        // capped
        assert_eq!(config.calculate_delay(4), 3000);
    }

    #[test]
    fn test_backoff_fixed() {
        let config = BackoffConfig::fixed(250);
        assert_eq!(config.calculate_delay(1), 250);
        assert_eq!(config.calculate_delay(7), 250);
    }

    #[test]
    fn test_backoff_jitter_within_range() {
        let config = BackoffConfig {
            initial_delay_ms: 1000,
            jitter: true,
            ..Default::default()
        };
        let delay = config.calculate_delay(1);
        assert!((750..=1250).contains(&delay), "Delay {delay} out of range");
    }
}
