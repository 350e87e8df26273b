//! Call-connect markup returned to the telephony provider.

use super::messages::CALLER_PARAMETER;

/// Path of the media-stream WebSocket route.
pub const MEDIA_STREAM_PATH: &str = "/media-stream";

/// WebSocket URL the provider should stream call audio to.
///
/// `public_url` wins when configured (scheme is normalized to `wss`); otherwise
/// the request's `Host` header is used.
pub fn media_stream_url(public_url: Option<&str>, host: &str) -> String {
    let authority = match public_url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => {
            let without_scheme = url
                .split_once("://")
                .map(|(_, rest)| rest)
                .unwrap_or(url);
            without_scheme.trim_end_matches('/').to_string()
        }
        None => host.to_string(),
    };
    format!("wss://{authority}{MEDIA_STREAM_PATH}")
}

/// `<Connect><Stream>` markup that opens a media stream and passes the
/// caller's number as a custom parameter.
pub fn connect_stream(stream_url: &str, caller: Option<&str>) -> String {
    let parameter = caller
        .map(|c| {
            format!(
                r#"<Parameter name="{}" value="{}"/>"#,
                CALLER_PARAMETER,
                escape_xml(c)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Connect><Stream url="{}">{}</Stream></Connect></Response>"#,
        escape_xml(stream_url),
        parameter
    )
}

/// Escape a value for use inside an XML attribute.
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
