//! Merging YAML overrides onto the environment-derived configuration.

use std::path::PathBuf;

use super::yaml::YamlConfig;
use super::{ServerConfig, TlsConfig, env};

/// Environment (with defaults) as the base, YAML values on top.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = env::load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if server.public_url.is_some() {
            config.public_url = server.public_url;
        }
        if let Some(tls) = server.tls {
            match tls.enabled {
                Some(false) => config.tls = None,
                Some(true) => {
                    let cert_path = tls
                        .cert_path
                        .ok_or("server.tls.enabled is true but cert_path is missing")?;
                    let key_path = tls
                        .key_path
                        .ok_or("server.tls.enabled is true but key_path is missing")?;
                    config.tls = Some(TlsConfig {
                        cert_path: PathBuf::from(cert_path),
                        key_path: PathBuf::from(key_path),
                    });
                }
                None => {}
            }
        }
    }

    if let Some(realtime) = yaml.realtime {
        if realtime.api_key.is_some() {
            config.openai_api_key = realtime.api_key;
        }
        if realtime.url.is_some() {
            config.realtime_url = realtime.url;
        }
        if let Some(model) = realtime.model {
            config.realtime_model = model;
        }
        if realtime.voice.is_some() {
            config.realtime_voice = realtime.voice;
        }
        if realtime.instructions.is_some() {
            config.realtime_instructions = realtime.instructions;
        }
        if realtime.greeting.is_some() {
            config.realtime_greeting = realtime.greeting;
        }
        if realtime.temperature.is_some() {
            config.realtime_temperature = realtime.temperature;
        }
        if let Some(model) = realtime.transcription_model {
            config.transcription_model = model;
        }
    }

    if let Some(pool) = yaml.pool {
        if let Some(size) = pool.size {
            config.pool_size = size;
        }
        if let Some(timeout) = pool.handshake_timeout_ms {
            config.pool_handshake_timeout_ms = timeout;
        }
        if pool.idle_ttl_seconds.is_some() {
            config.pool_idle_ttl_seconds = pool.idle_ttl_seconds;
        }
    }

    if let Some(reminders) = yaml.reminders {
        if reminders.service_url.is_some() {
            config.reminder_service_url = reminders.service_url;
        }
        if let Some(timeout) = reminders.timeout_seconds {
            config.reminder_timeout_seconds = timeout;
        }
    }

    if let Some(security) = yaml.security {
        if let Some(rps) = security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = security.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }
        if security.max_websocket_connections.is_some() {
            config.max_websocket_connections = security.max_websocket_connections;
        }
        if let Some(per_ip) = security.max_connections_per_ip {
            config.max_connections_per_ip = per_ip;
        }
    }

    Ok(config)
}
