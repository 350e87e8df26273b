//! Environment variable loading.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{ServerConfig, TlsConfig};
use crate::core::realtime::openai::{DEFAULT_REALTIME_MODEL, DEFAULT_TRANSCRIPTION_MODEL};

pub(super) const DEFAULT_HOST: &str = "0.0.0.0";
pub(super) const DEFAULT_PORT: u16 = 3001;
pub(super) const DEFAULT_POOL_SIZE: usize = 1;
pub(super) const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub(super) const DEFAULT_REMINDER_TIMEOUT_SECONDS: u64 = 5;
pub(super) const DEFAULT_RATE_LIMIT_RPS: u32 = 60;
pub(super) const DEFAULT_RATE_LIMIT_BURST: u32 = 10;
pub(super) const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;

/// Read a variable, treating empty or whitespace-only values as unset.
pub(super) fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse a variable.
pub(super) fn parse_var<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name} ('{raw}'): {e}")),
        None => Ok(None),
    }
}

pub(super) fn parse_bool(name: &str) -> Result<Option<bool>, String> {
    match var(name) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(format!("Invalid boolean for {name}: '{raw}'")),
        },
        None => Ok(None),
    }
}

/// Build a configuration from environment variables and defaults.
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let tls = match parse_bool("TLS_ENABLED")? {
        Some(true) => {
            let cert_path = var("TLS_CERT_PATH")
                .ok_or("TLS_ENABLED is set but TLS_CERT_PATH is missing")?;
            let key_path =
                var("TLS_KEY_PATH").ok_or("TLS_ENABLED is set but TLS_KEY_PATH is missing")?;
            Some(TlsConfig {
                cert_path: PathBuf::from(cert_path),
                key_path: PathBuf::from(key_path),
            })
        }
        _ => None,
    };

    Ok(ServerConfig {
        host: var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: parse_var("PORT")?.unwrap_or(DEFAULT_PORT),
        tls,
        public_url: var("PUBLIC_URL"),

        openai_api_key: var("OPENAI_API_KEY"),
        realtime_url: var("OPENAI_REALTIME_URL"),
        realtime_model: var("OPENAI_REALTIME_MODEL")
            .unwrap_or_else(|| DEFAULT_REALTIME_MODEL.to_string()),
        realtime_voice: var("OPENAI_REALTIME_VOICE"),
        realtime_instructions: var("SYSTEM_INSTRUCTIONS"),
        realtime_greeting: var("GREETING_PROMPT"),
        realtime_temperature: parse_var("OPENAI_TEMPERATURE")?,
        transcription_model: var("TRANSCRIPTION_MODEL")
            .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string()),

        pool_size: parse_var("POOL_SIZE")?.unwrap_or(DEFAULT_POOL_SIZE),
        pool_handshake_timeout_ms: parse_var("POOL_HANDSHAKE_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_MS),
        pool_idle_ttl_seconds: parse_var("POOL_IDLE_TTL_SECONDS")?,

        reminder_service_url: var("REMINDER_SERVICE_URL"),
        reminder_timeout_seconds: parse_var("REMINDER_TIMEOUT_SECONDS")?
            .unwrap_or(DEFAULT_REMINDER_TIMEOUT_SECONDS),

        rate_limit_requests_per_second: parse_var("RATE_LIMIT_REQUESTS_PER_SECOND")?
            .unwrap_or(DEFAULT_RATE_LIMIT_RPS),
        rate_limit_burst_size: parse_var("RATE_LIMIT_BURST_SIZE")?
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST),
        max_websocket_connections: parse_var("MAX_WEBSOCKET_CONNECTIONS")?,
        max_connections_per_ip: parse_var("MAX_CONNECTIONS_PER_IP")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_IP),
    })
}
