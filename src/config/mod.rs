//! Configuration module for the voice relay gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use voice_relay_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::core::pool::PoolConfig;
use crate::core::realtime::openai::{DEFAULT_REALTIME_MODEL, DEFAULT_TRANSCRIPTION_MODEL};
use crate::core::realtime::{
    BackoffConfig, InputTranscriptionConfig, RealtimeConfig, TurnDetectionConfig,
};

mod env;
mod merge;
mod validation;
mod yaml;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains all configuration needed to run the gateway:
/// - Server settings (host, port, TLS, public URL)
/// - Upstream realtime model settings
/// - Upstream pool sizing
/// - Reminder service endpoint
/// - Security settings (rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    /// Externally reachable base URL; when unset the request `Host` header is used
    pub public_url: Option<String>,

    // Upstream realtime model
    pub openai_api_key: Option<String>,
    /// Override for the realtime WebSocket endpoint
    pub realtime_url: Option<String>,
    pub realtime_model: String,
    pub realtime_voice: Option<String>,
    /// Base system prompt; caller number and current time are appended per call
    pub realtime_instructions: Option<String>,
    /// Prompt for the conversation-opening item
    pub realtime_greeting: Option<String>,
    pub realtime_temperature: Option<f32>,
    pub transcription_model: String,

    // Upstream pool
    /// Number of sessions kept warm
    /// Default: 1
    pub pool_size: usize,
    /// Default: 10000
    pub pool_handshake_timeout_ms: u64,
    /// Idle sessions older than this are discarded at acquire time
    pub pool_idle_ttl_seconds: Option<u64>,

    // Reminder service
    /// When unset, directives and call outcomes are only logged
    pub reminder_service_url: Option<String>,
    pub reminder_timeout_seconds: u64,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent media-stream connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum media-stream connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

/// Defaults with no API key; `from_env`/`from_file` are the validated entry points.
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: env::DEFAULT_HOST.to_string(),
            port: env::DEFAULT_PORT,
            tls: None,
            public_url: None,
            openai_api_key: None,
            realtime_url: None,
            realtime_model: DEFAULT_REALTIME_MODEL.to_string(),
            realtime_voice: None,
            realtime_instructions: None,
            realtime_greeting: None,
            realtime_temperature: None,
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            pool_size: env::DEFAULT_POOL_SIZE,
            pool_handshake_timeout_ms: env::DEFAULT_HANDSHAKE_TIMEOUT_MS,
            pool_idle_ttl_seconds: None,
            reminder_service_url: None,
            reminder_timeout_seconds: env::DEFAULT_REMINDER_TIMEOUT_SECONDS,
            rate_limit_requests_per_second: env::DEFAULT_RATE_LIMIT_RPS,
            rate_limit_burst_size: env::DEFAULT_RATE_LIMIT_BURST,
            max_websocket_connections: None,
            max_connections_per_ip: env::DEFAULT_MAX_CONNECTIONS_PER_IP,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables and defaults.
    ///
    /// The `.env` file is loaded in `main.rs`, so its values are visible here as
    /// environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        validation::validate_api_key(&self.openai_api_key)?;
        validation::validate_voice(&self.realtime_voice)?;
        validation::validate_temperature(self.realtime_temperature)?;
        validation::validate_realtime_url(&self.realtime_url)?;
        validation::validate_pool(self.pool_size, self.pool_handshake_timeout_ms)?;
        validation::validate_http_url("public URL", &self.public_url)?;
        validation::validate_http_url("reminder service URL", &self.reminder_service_url)?;
        validation::validate_rate_limit(
            self.rate_limit_requests_per_second,
            self.rate_limit_burst_size,
        )?;
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Behavior parameters for upstream sessions.
    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            api_key: self.openai_api_key.clone().unwrap_or_default(),
            url: self.realtime_url.clone(),
            model: self.realtime_model.clone(),
            voice: self.realtime_voice.clone(),
            instructions: self.realtime_instructions.clone(),
            greeting: self.realtime_greeting.clone(),
            temperature: self.realtime_temperature,
            audio_format: None,
            input_audio_transcription: Some(InputTranscriptionConfig {
                model: self.transcription_model.clone(),
            }),
            turn_detection: Some(TurnDetectionConfig::default()),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            target_size: self.pool_size,
            handshake_timeout: Duration::from_millis(self.pool_handshake_timeout_ms),
            idle_ttl: self.pool_idle_ttl_seconds.map(Duration::from_secs),
            backoff: BackoffConfig::default(),
        }
    }

    pub fn reminder_timeout(&self) -> Duration {
        Duration::from_secs(self.reminder_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "HOST",
        "PORT",
        "TLS_ENABLED",
        "TLS_CERT_PATH",
        "TLS_KEY_PATH",
        "PUBLIC_URL",
        "OPENAI_API_KEY",
        "OPENAI_REALTIME_URL",
        "OPENAI_REALTIME_MODEL",
        "OPENAI_REALTIME_VOICE",
        "SYSTEM_INSTRUCTIONS",
        "GREETING_PROMPT",
        "OPENAI_TEMPERATURE",
        "TRANSCRIPTION_MODEL",
        "POOL_SIZE",
        "POOL_HANDSHAKE_TIMEOUT_MS",
        "POOL_IDLE_TTL_SECONDS",
        "REMINDER_SERVICE_URL",
        "REMINDER_TIMEOUT_SECONDS",
        "RATE_LIMIT_REQUESTS_PER_SECOND",
        "RATE_LIMIT_BURST_SIZE",
        "MAX_WEBSOCKET_CONNECTIONS",
        "MAX_CONNECTIONS_PER_IP",
    ];

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            for name in ENV_VARS {
                env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3001);
        assert!(!config.is_tls_enabled());
        assert_eq!(config.realtime_model, "gpt-4o-realtime-preview-2024-10-01");
        assert_eq!(config.transcription_model, "whisper-1");
        assert_eq!(config.pool_size, 1);
        assert_eq!(config.pool_handshake_timeout_ms, 10_000);
        assert!(config.reminder_service_url.is_none());
        assert_eq!(config.rate_limit_requests_per_second, 60);
        assert_eq!(config.max_connections_per_ip, 100);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_requires_api_key() {
        cleanup_env_vars();
        let err = ServerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("POOL_SIZE", "many");
        }
        let err = ServerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("POOL_SIZE"));
        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_tls_requires_paths() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("TLS_ENABLED", "true");
            env::set_var("TLS_CERT_PATH", "/tmp/cert.pem");
        }
        let err = ServerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("TLS_KEY_PATH"));
        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        let yaml_content = r#"
server:
  host: "127.0.0.1"
  port: 8080
realtime:
  api_key: "sk-yaml"
  voice: "verse"
pool:
  size: 4
  idle_ttl_seconds: 300
reminders:
  service_url: "http://reminders.local:9000"
"#;
        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("HOST", "0.0.0.0");
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("PUBLIC_URL", "https://voice.example.com");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-yaml"));
        // ENV value kept where YAML is silent
        assert_eq!(config.public_url.as_deref(), Some("https://voice.example.com"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.pool_size, 4);

        let pool = config.pool_config();
        assert_eq!(pool.target_size, 4);
        assert_eq!(pool.idle_ttl, Some(Duration::from_secs(300)));

        let realtime = config.realtime_config();
        assert_eq!(realtime.api_key, "sk-yaml");
        assert_eq!(realtime.voice.as_deref(), Some("verse"));
        assert_eq!(
            realtime.input_audio_transcription.map(|t| t.model).as_deref(),
            Some("whisper-1")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_unknown_voice() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            "realtime:\n  api_key: \"sk\"\n  voice: \"robot\"\n",
        )
        .unwrap();

        let err = ServerConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("robot"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let config_path = PathBuf::from("/nonexistent/config.yaml");
        let result = ServerConfig::from_file(&config_path);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    #[serial]
    fn test_from_file_tls() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        let yaml_content = r#"
server:
  tls:
    enabled: true
    cert_path: "/etc/tls/cert.pem"
    key_path: "/etc/tls/key.pem"
realtime:
  api_key: "sk"
"#;
        fs::write(&config_path, yaml_content).unwrap();

        let config = ServerConfig::from_file(&config_path).unwrap();
        assert!(config.is_tls_enabled());
        assert_eq!(
            config.tls.as_ref().unwrap().cert_path,
            PathBuf::from("/etc/tls/cert.pem")
        );
    }
}
