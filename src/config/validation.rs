//! Configuration validation.

use url::Url;

use crate::core::realtime::openai::OpenAIRealtimeVoice;

/// Upper bound on pre-warmed upstream sessions.
pub(super) const MAX_POOL_SIZE: usize = 32;

pub(super) fn validate_api_key(key: &Option<String>) -> Result<(), String> {
    match key {
        Some(k) if !k.trim().is_empty() => Ok(()),
        _ => Err(
            "OPENAI_API_KEY is required (set it in the environment or realtime.api_key in YAML)"
                .to_string(),
        ),
    }
}

pub(super) fn validate_voice(voice: &Option<String>) -> Result<(), String> {
    match voice {
        Some(v) if OpenAIRealtimeVoice::parse(v).is_none() => {
            let known: Vec<&str> = OpenAIRealtimeVoice::all().iter().map(|v| v.as_str()).collect();
            Err(format!(
                "Unknown realtime voice '{v}'. Supported voices: {}",
                known.join(", ")
            ))
        }
        _ => Ok(()),
    }
}

/// The realtime API accepts temperatures in [0.6, 1.2].
pub(super) fn validate_temperature(temperature: Option<f32>) -> Result<(), String> {
    match temperature {
        Some(t) if !(0.6..=1.2).contains(&t) => Err(format!(
            "Realtime temperature must be between 0.6 and 1.2, got {t}"
        )),
        _ => Ok(()),
    }
}

pub(super) fn validate_pool(size: usize, handshake_timeout_ms: u64) -> Result<(), String> {
    if size > MAX_POOL_SIZE {
        return Err(format!(
            "Pool size {size} exceeds the maximum of {MAX_POOL_SIZE}"
        ));
    }
    if handshake_timeout_ms == 0 {
        return Err("Pool handshake timeout must be greater than zero".to_string());
    }
    Ok(())
}

/// `name` must be an absolute http(s) URL when present.
pub(super) fn validate_http_url(name: &str, value: &Option<String>) -> Result<(), String> {
    let Some(raw) = value else {
        return Ok(());
    };
    let url = Url::parse(raw).map_err(|e| format!("Invalid {name} '{raw}': {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!(
            "Invalid {name} '{raw}': scheme must be http or https, got {other}"
        )),
    }
}

pub(super) fn validate_realtime_url(value: &Option<String>) -> Result<(), String> {
    let Some(raw) = value else {
        return Ok(());
    };
    let url = Url::parse(raw).map_err(|e| format!("Invalid realtime URL '{raw}': {e}"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(format!(
            "Invalid realtime URL '{raw}': scheme must be ws or wss, got {other}"
        )),
    }
}

pub(super) fn validate_rate_limit(rps: u32, burst: u32) -> Result<(), String> {
    if rps == 0 || burst == 0 {
        return Err("Rate limit values must be greater than zero".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_api_key() {
        assert!(validate_api_key(&Some("sk-1".to_string())).is_ok());
        assert!(validate_api_key(&Some("  ".to_string())).is_err());
        assert!(validate_api_key(&None).is_err());
    }

    #[test]
    fn test_validate_voice() {
        assert!(validate_voice(&None).is_ok());
        assert!(validate_voice(&Some("alloy".to_string())).is_ok());
        let err = validate_voice(&Some("robot".to_string())).unwrap_err();
        assert!(err.contains("robot"));
        assert!(err.contains("alloy"));
    }

    #[test]
    fn test_validate_temperature() {
        assert!(validate_temperature(None).is_ok());
        assert!(validate_temperature(Some(0.8)).is_ok());
        assert!(validate_temperature(Some(0.1)).is_err());
        assert!(validate_temperature(Some(1.5)).is_err());
    }

    #[test]
    fn test_validate_pool() {
        assert!(validate_pool(0, 1000).is_ok());
        assert!(validate_pool(MAX_POOL_SIZE + 1, 1000).is_err());
        assert!(validate_pool(1, 0).is_err());
    }

    #[test]
    fn test_validate_urls() {
        assert!(validate_http_url("PUBLIC_URL", &None).is_ok());
        assert!(validate_http_url("PUBLIC_URL", &Some("https://a.example".to_string())).is_ok());
        assert!(validate_http_url("PUBLIC_URL", &Some("ftp://a.example".to_string())).is_err());
        assert!(validate_http_url("PUBLIC_URL", &Some("not a url".to_string())).is_err());

        assert!(validate_realtime_url(&Some("wss://api.example/v1".to_string())).is_ok());
        assert!(validate_realtime_url(&Some("https://api.example/v1".to_string())).is_err());
    }
}
