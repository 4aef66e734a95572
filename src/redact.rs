//! Log redaction
//!
//! Masks credentials before they reach a log line.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static URI_CREDENTIALS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(://[^/\s:@]+:)([^@\s]+)(@)").ok());

static OPAQUE_TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_-]{24,}").ok());

static SENSITIVE_KEY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)(pass(word)?|token|secret|key|authorization|auth|pwd)").ok()
});

/// Mask URI passwords (`scheme://user:***@`) and long opaque tokens
pub fn scrub(text: &str) -> String {
    let masked = match &*URI_CREDENTIALS {
        Some(re) => re.replace_all(text, "${1}***${3}").into_owned(),
        None => text.to_string(),
    };
    match &*OPAQUE_TOKEN {
        Some(re) => re.replace_all(&masked, "***").into_owned(),
        None => masked,
    }
}

/// Whether a field name looks like it holds a credential
pub fn is_sensitive_key(name: &str) -> bool {
    match &*SENSITIVE_KEY {
        Some(re) => re.is_match(name),
        None => false,
    }
}

/// Copy of `value` safe to log
///
/// Object fields with sensitive names become `"***"`; other strings are
/// scrubbed. Nested objects and arrays are walked.
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_sensitive_key(k) {
                        Value::String("***".to_string())
                    } else {
                        redact_json(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        Value::String(s) => Value::String(scrub(s)),
        other => other.clone(),
    }
}
