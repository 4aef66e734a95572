//! Tool parameter guardrail
//!
//! Per-tool limits on numeric ranges and string lengths, checked right
//! before a tool handler runs.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::error::GuardError;

/// Constraint on a single tool parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Limit {
    /// Inclusive numeric range. Arrays are checked element by element.
    Range { min: f64, max: f64 },
    /// Maximum string length in characters
    MaxLength(usize),
}

/// Limit table keyed by tool name, then parameter name
#[derive(Debug, Clone, Default)]
pub struct ToolLimits {
    limits: HashMap<String, HashMap<String, Limit>>,
}

impl ToolLimits {
    /// Empty table: every call passes
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits for the agent's local tools and the tool server's tools
    pub fn with_defaults() -> Self {
        let port = Limit::Range { min: 0.0, max: 65535.0 };
        let mut table = Self::new();
        table
            .insert("FindWhatsRunningByPorts", "min", port)
            .insert("FindWhatsRunningByPorts", "max", port)
            .insert("FindRunningProcesses", "min", port)
            .insert("MongoDBDataValidator", "argument", Limit::MaxLength(100))
            .insert("SendEmail", "argument", Limit::MaxLength(5000))
            .insert("tcp_portcheck", "ports", Limit::Range { min: 1.0, max: 65535.0 })
            .insert("tcp_portcheck", "timeout_s", Limit::Range { min: 0.1, max: 60.0 })
            .insert("tcp_portcheck", "host", Limit::MaxLength(255))
            .insert("validate_collection", "collection", Limit::MaxLength(255))
            .insert("validate_collection", "db_name", Limit::MaxLength(64))
            .insert("db_oracle_connect", "dsn", Limit::MaxLength(1024))
            .insert("db_oracle_tablespaces", "dsn", Limit::MaxLength(1024));
        for tool in [
            "db_mongo_ssh_ping",
            "db_mongo_ssh_rs_status",
            "validate_collection",
            "db_mongo_connect",
            "db_oracle_connect",
        ] {
            table.insert(tool, "port", Limit::Range { min: 1.0, max: 65535.0 });
        }
        table
    }

    /// Add or replace the limit for one parameter of one tool
    pub fn insert(&mut self, tool: &str, param: &str, limit: Limit) -> &mut Self {
        self.limits
            .entry(tool.to_string())
            .or_default()
            .insert(param.to_string(), limit);
        self
    }

    /// Check `params` against the limits declared for `tool_name`
    ///
    /// Only parameters present both in the table and in the call are checked.
    /// Unknown tools and undeclared parameters pass unchecked.
    pub fn validate_tool_usage(&self, tool_name: &str, params: &Value) -> Result<(), GuardError> {
        let (Some(limits), Some(params)) = (self.limits.get(tool_name), params.as_object()) else {
            return Ok(());
        };

        for (name, limit) in limits {
            let Some(value) = params.get(name) else {
                continue;
            };
            if let Err(reason) = check(value, limit) {
                warn!(tool = tool_name, param = %name, %reason, "tool parameter rejected");
                return Err(GuardError::safety(format!(
                    "Parameter '{}' of tool {} {}",
                    name, tool_name, reason
                )));
            }
        }
        Ok(())
    }
}

fn check(value: &Value, limit: &Limit) -> Result<(), String> {
    match (limit, value) {
        (Limit::Range { .. }, Value::Array(items)) => {
            items.iter().try_for_each(|item| check(item, limit))
        }
        (Limit::Range { min, max }, _) => {
            let n = value
                .as_f64()
                .ok_or_else(|| format!("must be a number, got {}", value))?;
            if n < *min || n > *max {
                return Err(format!("value {} outside allowed range [{}, {}]", n, min, max));
            }
            Ok(())
        }
        (Limit::MaxLength(max), _) => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("must be a string, got {}", value))?;
            let len = s.chars().count();
            if len > *max {
                return Err(format!("length {} exceeds maximum {}", len, max));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_port_above_range_rejected() {
        let limits = ToolLimits::with_defaults();
        let err = limits
            .validate_tool_usage("FindWhatsRunningByPorts", &json!({"max": 70000}))
            .unwrap_err();
        assert!(err.is_safety_violation());
        assert!(err.to_string().contains("max"));
    }

    #[test]
    fn test_port_within_range_allowed() {
        let limits = ToolLimits::with_defaults();
        assert!(limits
            .validate_tool_usage("FindWhatsRunningByPorts", &json!({"max": 500}))
            .is_ok());
    }

    #[test]
    fn test_range_bounds_inclusive() {
        let limits = ToolLimits::with_defaults();
        let ok = json!({"min": 0, "max": 65535});
        assert!(limits.validate_tool_usage("FindWhatsRunningByPorts", &ok).is_ok());
        let below = json!({"min": -1});
        assert!(limits.validate_tool_usage("FindWhatsRunningByPorts", &below).is_err());
    }

    #[test]
    fn test_string_length_limit() {
        let limits = ToolLimits::with_defaults();
        let long = "x".repeat(101);
        assert!(limits
            .validate_tool_usage("MongoDBDataValidator", &json!({"argument": long}))
            .is_err());
        assert!(limits
            .validate_tool_usage("MongoDBDataValidator", &json!({"argument": "mongodb"}))
            .is_ok());
    }

    #[test]
    fn test_undeclared_params_and_tools_pass() {
        let limits = ToolLimits::with_defaults();
        assert!(limits
            .validate_tool_usage("FindWhatsRunningByPorts", &json!({"other": 10_000_000}))
            .is_ok());
        assert!(limits
            .validate_tool_usage("UnknownTool", &json!({"max": 10_000_000}))
            .is_ok());
    }

    #[test]
    fn test_wrong_type_rejected() {
        let limits = ToolLimits::with_defaults();
        assert!(limits
            .validate_tool_usage("FindWhatsRunningByPorts", &json!({"max": "lots"}))
            .is_err());
    }

    #[test]
    fn test_array_elements_checked() {
        let limits = ToolLimits::with_defaults();
        assert!(limits
            .validate_tool_usage("tcp_portcheck", &json!({"ports": [22, 443]}))
            .is_ok());
        assert!(limits
            .validate_tool_usage("tcp_portcheck", &json!({"ports": [22, 0]}))
            .is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_range_check_matches_bounds(value in -100_000i64..200_000) {
            let limits = ToolLimits::with_defaults();
            let result = limits.validate_tool_usage("FindWhatsRunningByPorts", &json!({"max": value}));
            prop_assert_eq!(result.is_ok(), (0..=65535).contains(&value));
        }

        #[test]
        fn prop_validation_does_not_mutate(value in 0u32..100_000) {
            let limits = ToolLimits::with_defaults();
            let params = json!({"min": value, "max": value});
            let before = params.clone();
            let _ = limits.validate_tool_usage("FindWhatsRunningByPorts", &params);
            prop_assert_eq!(params, before);
        }
    }
}
