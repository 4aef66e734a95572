//! Local agent tools
//!
//! Each tool runs one guarded local command. Tools are registered with the
//! agent by name and invoked through `Agent::execute_tool`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::config::Config;
use crate::error::GuardError;
use crate::executor::CommandGuard;

/// A named capability the agent can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry name, also the key in the tool limit table
    fn name(&self) -> &str;

    /// Human-readable description shown to the model and in listings
    fn describe(&self) -> &str;

    /// Run the tool with JSON input
    async fn invoke(&self, input: &Value) -> Result<String, GuardError>;
}

/// Lists user-space processes (kernel threads under PID 2 excluded)
pub struct FindRunningProcesses {
    guard: CommandGuard,
}

impl FindRunningProcesses {
    pub fn new(guard: CommandGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for FindRunningProcesses {
    fn name(&self) -> &str {
        "FindRunningProcesses"
    }

    fn describe(&self) -> &str {
        "Determine what applications are running on the system by looking at running processes. \
         Disregard processes that are used by typical Linux system processes"
    }

    async fn invoke(&self, _input: &Value) -> Result<String, GuardError> {
        let result = self.guard.execute("ps --ppid 2 -p 2 --deselect", None).await?;
        Ok(result.stdout)
    }
}

/// Lists sockets, optionally restricted to a local port range
pub struct FindWhatsRunningByPorts {
    guard: CommandGuard,
}

impl FindWhatsRunningByPorts {
    pub fn new(guard: CommandGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for FindWhatsRunningByPorts {
    fn name(&self) -> &str {
        "FindWhatsRunningByPorts"
    }

    fn describe(&self) -> &str {
        "Determine what applications are running on the system by looking at open listening ports. \
         Disregard ports that are used by typical Linux system processes."
    }

    async fn invoke(&self, input: &Value) -> Result<String, GuardError> {
        let min = input.get("min").and_then(Value::as_u64).unwrap_or(0);
        let max = input.get("max").and_then(Value::as_u64).unwrap_or(65535);
        let result = self.guard.execute("netstat -aln", None).await?;
        Ok(filter_by_port(&result.stdout, min, max))
    }
}

/// Keep netstat lines whose local port lies in `[min, max]`
///
/// Lines without a parseable local address (headers, unix sockets) are kept.
fn filter_by_port(output: &str, min: u64, max: u64) -> String {
    if min == 0 && max >= 65535 {
        return output.to_string();
    }
    output
        .lines()
        .filter(|line| match local_port(line) {
            Some(port) => (min..=max).contains(&port),
            None => !line.starts_with("tcp") && !line.starts_with("udp"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn local_port(line: &str) -> Option<u64> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if !fields.first()?.starts_with("tcp") && !fields.first()?.starts_with("udp") {
        return None;
    }
    let local = fields.get(3)?;
    local.rsplit(':').next()?.parse().ok()
}

/// Runs the MongoDB integrity script, only for MongoDB workloads
pub struct MongoDBDataValidator {
    guard: CommandGuard,
}

impl MongoDBDataValidator {
    pub fn new(guard: CommandGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for MongoDBDataValidator {
    fn name(&self) -> &str {
        "MongoDBDataValidator"
    }

    fn describe(&self) -> &str {
        "This tool validates a MongoDB database to ensure the database is not corrupted. \
         Do not use this tool to validate anything that is not MongoDB. \
         It can only be used if MongoDB is currently running."
    }

    async fn invoke(&self, input: &Value) -> Result<String, GuardError> {
        let argument = input.get("argument").and_then(Value::as_str).unwrap_or("");
        if argument != "mongodb" {
            info!(argument, "refusing non-MongoDB workload");
            return Ok(format!(
                "Validation Failed. Reason: {} cannot be used to validate mongodb",
                argument
            ));
        }
        let result = self
            .guard
            .execute("mongosh --file scripts/mongoDBValidator.js", None)
            .await?;
        Ok(result.stdout)
    }
}

/// Mails a validation report to the configured user
pub struct SendEmail {
    guard: CommandGuard,
    recipient: Option<String>,
}

impl SendEmail {
    pub fn new(guard: CommandGuard, recipient: Option<String>) -> Self {
        Self { guard, recipient }
    }
}

#[async_trait]
impl Tool for SendEmail {
    fn name(&self) -> &str {
        "SendEmail"
    }

    fn describe(&self) -> &str {
        "Send an email."
    }

    async fn invoke(&self, input: &Value) -> Result<String, GuardError> {
        let Some(recipient) = self.recipient.as_deref() else {
            return Ok("Error: USER_EMAIL environment variable not set".to_string());
        };
        if recipient.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
            return Err(GuardError::Input(format!("invalid recipient address: {}", recipient)));
        }
        let argument = input.get("argument").and_then(Value::as_str).unwrap_or("");
        let body = format!("Subject: Data Validation\n\n{}\n.\n", argument);
        let result = self
            .guard
            .execute(&format!("sendmail -t {}", recipient), Some(&body))
            .await?;
        Ok(result.stdout)
    }
}

/// The standard tool set for an agent session
pub fn default_tools(config: &Config) -> Vec<Box<dyn Tool>> {
    let guard = CommandGuard::new(config);
    vec![
        Box::new(FindRunningProcesses::new(guard.clone())),
        Box::new(MongoDBDataValidator::new(guard.clone())),
        Box::new(SendEmail::new(guard.clone(), config.user_email.clone())),
        Box::new(FindWhatsRunningByPorts::new(guard)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn guard() -> CommandGuard {
        CommandGuard::with_limits(50 * 1024, 500, Duration::from_secs(5))
    }

    const NETSTAT: &str = "Active Internet connections (servers and established)
Proto Recv-Q Send-Q Local Address           Foreign Address         State
tcp        0      0 0.0.0.0:22              0.0.0.0:*               LISTEN
tcp        0      0 127.0.0.1:27017         0.0.0.0:*               LISTEN
tcp6       0      0 :::8080                 :::*                    LISTEN
udp        0      0 0.0.0.0:68              0.0.0.0:*";

    #[test]
    fn test_filter_by_port_range() {
        let out = filter_by_port(NETSTAT, 1000, 30000);
        assert!(out.contains("27017"));
        assert!(out.contains(":::8080"));
        assert!(!out.contains("0.0.0.0:22 "));
        assert!(!out.contains(":68"));
        assert!(out.contains("Proto"));
    }

    #[test]
    fn test_filter_full_range_keeps_everything() {
        assert_eq!(filter_by_port(NETSTAT, 0, 65535), NETSTAT);
    }

    #[test]
    fn test_default_tool_names() {
        let tools = default_tools(&Config::default());
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "FindRunningProcesses",
                "MongoDBDataValidator",
                "SendEmail",
                "FindWhatsRunningByPorts"
            ]
        );
        assert!(tools.iter().all(|t| !t.describe().is_empty()));
    }

    #[tokio::test]
    async fn test_mongo_validator_refuses_other_workloads() {
        let tool = MongoDBDataValidator::new(guard());
        let out = tool.invoke(&json!({"argument": "postgres"})).await.unwrap();
        assert_eq!(
            out,
            "Validation Failed. Reason: postgres cannot be used to validate mongodb"
        );
    }

    #[tokio::test]
    async fn test_send_email_without_recipient() {
        let tool = SendEmail::new(guard(), None);
        let out = tool.invoke(&json!({"argument": "report"})).await.unwrap();
        assert!(out.contains("USER_EMAIL"));
    }

    #[tokio::test]
    async fn test_send_email_rejects_odd_recipient() {
        let tool = SendEmail::new(guard(), Some("a@b.c; reboot".into()));
        let err = tool.invoke(&json!({"argument": "report"})).await.unwrap_err();
        assert!(matches!(err, GuardError::Input(_)));
    }
}
