use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// This structure represents the full configuration that can be loaded from a YAML file.
/// All fields are optional to allow partial configuration. Values here override
/// environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   public_url: "https://voice.example.com"
///
/// realtime:
///   api_key: "sk-..."
///   model: "gpt-4o-realtime-preview-2024-10-01"
///   voice: "alloy"
///   instructions: "You are a helpful reminder assistant."
///   greeting: "Say hello to the caller."
///   temperature: 0.8
///   transcription_model: "whisper-1"
///
/// pool:
///   size: 2
///   handshake_timeout_ms: 10000
///   idle_ttl_seconds: 600
///
/// reminders:
///   service_url: "http://localhost:8080"
///   timeout_seconds: 5
///
/// security:
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_websocket_connections: 200
///   max_connections_per_ip: 20
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub pool: Option<PoolYaml>,
    pub reminders: Option<RemindersYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Externally reachable base URL used in call-connect markup
    pub public_url: Option<String>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Upstream realtime model settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub greeting: Option<String>,
    pub temperature: Option<f32>,
    pub transcription_model: Option<String>,
}

/// Upstream pool settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PoolYaml {
    pub size: Option<usize>,
    pub handshake_timeout_ms: Option<u64>,
    pub idle_ttl_seconds: Option<u64>,
}

/// Reminder service settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RemindersYaml {
    pub service_url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// Maximum requests per second per IP address
    pub rate_limit_requests_per_second: Option<u32>,
    /// Maximum burst size for rate limiting
    pub rate_limit_burst_size: Option<u32>,
    /// Maximum concurrent media-stream connections
    pub max_websocket_connections: Option<usize>,
    /// Maximum media-stream connections per IP address
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
