//! Tool server result envelopes
//!
//! Success is `{"ok": true, ...data}`; failure is
//! `{"ok": false, "error": {"message", "code"}, ...extra}`.

use serde_json::{Map, Value, json};

/// Failure codes reported by the tool server
pub mod code {
    pub const INPUT_ERROR: &str = "INPUT_ERROR";
    pub const SSH_ERROR: &str = "SSH_ERROR";
    pub const MONGO_ERROR: &str = "MONGO_ERROR";
    pub const ORACLE_ERROR: &str = "ORACLE_ERROR";
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    pub const VALIDATE_FAILED: &str = "VALIDATE_FAILED";
    pub const SERVICE_CHECK_FAILED: &str = "SERVICE_CHECK_FAILED";
    pub const VM_VALIDATE_FAILED: &str = "VM_VALIDATE_FAILED";
    pub const SAFETY_VIOLATION: &str = "SAFETY_VIOLATION";
    pub const UNKNOWN_TOOL: &str = "UNKNOWN_TOOL";
}

/// Success envelope merging the fields of `data` (an object) at top level
pub fn ok(data: Value) -> Value {
    let mut body = Map::new();
    body.insert("ok".to_string(), Value::Bool(true));
    merge(&mut body, data);
    Value::Object(body)
}

/// Failure envelope with extra top-level fields merged from `extra`
pub fn err(message: impl Into<String>, code: &str, extra: Value) -> Value {
    let mut body = Map::new();
    body.insert("ok".to_string(), Value::Bool(false));
    body.insert(
        "error".to_string(),
        json!({ "message": message.into(), "code": code }),
    );
    merge(&mut body, extra);
    Value::Object(body)
}

/// Whether an envelope reports success
pub fn is_ok(envelope: &Value) -> bool {
    envelope.get("ok").and_then(Value::as_bool).unwrap_or(false)
}

fn merge(body: &mut Map<String, Value>, fields: Value) {
    if let Value::Object(fields) = fields {
        for (key, value) in fields {
            // The envelope's own keys always win.
            if key != "ok" && key != "error" {
                body.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_merges_data() {
        let envelope = ok(json!({"host": "db1", "all_ok": true}));
        assert_eq!(envelope, json!({"ok": true, "host": "db1", "all_ok": true}));
        assert!(is_ok(&envelope));
    }

    #[test]
    fn test_err_shape() {
        let envelope = err("ssh exec failed", code::SSH_ERROR, json!({"rc": 255}));
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["message"], "ssh exec failed");
        assert_eq!(envelope["error"]["code"], "SSH_ERROR");
        assert_eq!(envelope["rc"], 255);
        assert!(!is_ok(&envelope));
    }

    #[test]
    fn test_data_cannot_override_status() {
        let envelope = ok(json!({"ok": false, "error": "x"}));
        assert!(is_ok(&envelope));
        assert!(envelope.get("error").is_none());
    }

    #[test]
    fn test_non_object_data_ignored() {
        assert_eq!(ok(Value::Null), json!({"ok": true}));
    }
}
