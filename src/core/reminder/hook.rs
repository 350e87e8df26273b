//! Reminder intent extraction from assistant transcripts.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A reminder request recognized in a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    /// What to do, e.g. `create`, `cancel`, `list`
    pub action: String,
    /// Action-specific fields (message, time, recipient, ...)
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Turns a completed assistant transcript into at most one directive.
///
/// Called on the relay task for every `response.audio_transcript.done`, so
/// implementations must not block.
pub trait ReminderHook: Send + Sync {
    fn extract(&self, transcript: &str) -> Option<Directive>;
}

static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[\[reminder:\s*(\{.*?\})\s*\]\]").unwrap());

/// Recognizes a `[[reminder:{...}]]` sidecar marker the assistant is
/// instructed to emit alongside its spoken reply.
///
/// The JSON object must carry an `action` string; every other key becomes a
/// directive field. The first well-formed marker wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerReminderHook;

impl ReminderHook for MarkerReminderHook {
    fn extract(&self, transcript: &str) -> Option<Directive> {
        MARKER.captures_iter(transcript).find_map(|caps| {
            let mut object = match serde_json::from_str::<Value>(&caps[1]) {
                Ok(Value::Object(object)) => object,
                _ => return None,
            };
            let action = match object.remove("action") {
                Some(Value::String(action)) if !action.trim().is_empty() => action,
                _ => return None,
            };
            Some(Directive {
                action,
                fields: object,
            })
        })
    }
}

/// Never yields a directive.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReminderHook;

impl ReminderHook for NoopReminderHook {
    fn extract(&self, _transcript: &str) -> Option<Directive> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_transcript_has_no_directive() {
        let hook = MarkerReminderHook;
        assert_eq!(hook.extract("Sure, what time works for you?"), None);
        assert_eq!(hook.extract(""), None);
    }

    #[test]
    fn test_marker_is_extracted() {
        let hook = MarkerReminderHook;
        let transcript = r#"Okay, I'll remind you tomorrow at nine. [[reminder:{"action":"create","message":"Take pills","time":"2024-06-01T09:00:00Z"}]]"#;

        let directive = hook.extract(transcript).unwrap();
        assert_eq!(directive.action, "create");
        assert_eq!(directive.fields["message"], "Take pills");
        assert_eq!(directive.fields["time"], "2024-06-01T09:00:00Z");
        assert!(!directive.fields.contains_key("action"));
    }

    #[test]
    fn test_marker_with_nested_object() {
        let hook = MarkerReminderHook;
        let transcript =
            r#"[[reminder:{"action":"create","recipient":{"name":"Ana","phone":"+1555"}}]]"#;
        let directive = hook.extract(transcript).unwrap();
        assert_eq!(directive.fields["recipient"]["name"], "Ana");
    }

    #[test]
    fn test_invalid_markers_are_ignored() {
        let hook = MarkerReminderHook;
        assert_eq!(hook.extract(r#"[[reminder:{"message":"no action"}]]"#), None);
        assert_eq!(hook.extract(r#"[[reminder:{"action":""}]]"#), None);
        assert_eq!(hook.extract(r#"[[reminder:{"action":7}]]"#), None);
        assert_eq!(hook.extract("[[reminder:{not json}]]"), None);
    }

    #[test]
    fn test_first_valid_marker_wins() {
        let hook = MarkerReminderHook;
        let transcript = r#"[[reminder:{bad}]] then [[reminder:{"action":"cancel","id":"r1"}]] and [[reminder:{"action":"list"}]]"#;
        let directive = hook.extract(transcript).unwrap();
        assert_eq!(directive.action, "cancel");
        assert_eq!(directive.fields["id"], "r1");
    }

    #[test]
    fn test_noop_hook() {
        assert_eq!(
            NoopReminderHook.extract(r#"[[reminder:{"action":"create"}]]"#),
            None
        );
    }
}
