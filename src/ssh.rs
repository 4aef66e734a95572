//! Remote command execution over SSH
//!
//! `SshExecutor` is the seam the tool server talks to. The default
//! implementation drives the system OpenSSH client as an argument vector;
//! password logins go through `sshpass -e` so the password never appears
//! on a command line.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

use crate::error::GuardError;

/// How to authenticate to the remote host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    KeyFile(PathBuf),
    /// Whatever the local ssh agent or default identity provides
    Agent,
}

/// A host to run commands on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub username: String,
    pub port: u16,
    pub credential: Credential,
}

/// Argument names a tool uses for its SSH connection details
#[derive(Debug, Clone, Copy)]
pub struct ArgNames {
    pub host: &'static str,
    pub user: &'static str,
    pub password: &'static str,
    pub key_path: &'static str,
}

/// `host`, `username`, `password`, `key_path`
pub const VM_ARGS: ArgNames = ArgNames {
    host: "host",
    user: "username",
    password: "password",
    key_path: "key_path",
};

/// `ssh_host`, `ssh_user`, `ssh_password`, `ssh_key_path`
pub const SSH_ARGS: ArgNames = ArgNames {
    host: "ssh_host",
    user: "ssh_user",
    password: "ssh_password",
    key_path: "ssh_key_path",
};

impl SshTarget {
    /// Read connection details from tool arguments
    ///
    /// A key path takes precedence over a password.
    pub fn from_args(args: &Value, names: &ArgNames) -> Result<Self, GuardError> {
        let text = |key: &str| {
            args.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        let host = text(names.host)
            .ok_or_else(|| GuardError::Input(format!("{} is required", names.host)))?;
        let username = text(names.user)
            .ok_or_else(|| GuardError::Input(format!("{} is required", names.user)))?;
        if host.starts_with('-') || username.starts_with('-') {
            return Err(GuardError::Input("host and user must not start with '-'".into()));
        }

        let credential = match (text(names.key_path), text(names.password)) {
            (Some(path), _) => Credential::KeyFile(PathBuf::from(path)),
            (None, Some(password)) => Credential::Password(password.to_string()),
            (None, None) => Credential::Agent,
        };

        Ok(Self {
            host: host.to_string(),
            username: username.to_string(),
            port: 22,
            credential,
        })
    }
}

/// Exit status and captured streams of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one command on a remote host
#[async_trait]
pub trait SshExecutor: Send + Sync {
    /// Run `command` through the remote login shell
    ///
    /// A non-zero exit is a normal `RemoteOutput`; only failures to start or
    /// finish the session are errors.
    async fn execute(
        &self,
        target: &SshTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteOutput, GuardError>;
}

/// Executor backed by the local `ssh` binary
#[derive(Debug, Clone, Default)]
pub struct OpenSshExecutor;

/// Program, arguments and optional `SSHPASS` value for one invocation
fn build_invocation(target: &SshTarget, command: &str, timeout: Duration) -> (String, Vec<String>, Option<String>) {
    let mut ssh_args = vec![
        "-o".to_string(),
        format!("ConnectTimeout={}", timeout.as_secs().max(1)),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-p".to_string(),
        target.port.to_string(),
        "-l".to_string(),
        target.username.clone(),
    ];

    match &target.credential {
        Credential::Password(password) => {
            let mut args = vec!["-e".to_string(), "ssh".to_string()];
            args.append(&mut ssh_args);
            args.push(target.host.clone());
            args.push(command.to_string());
            ("sshpass".to_string(), args, Some(password.clone()))
        }
        Credential::KeyFile(path) => {
            ssh_args.extend([
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                "-i".to_string(),
                path.display().to_string(),
                target.host.clone(),
                command.to_string(),
            ]);
            ("ssh".to_string(), ssh_args, None)
        }
        Credential::Agent => {
            ssh_args.extend([
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                target.host.clone(),
                command.to_string(),
            ]);
            ("ssh".to_string(), ssh_args, None)
        }
    }
}

#[async_trait]
impl SshExecutor for OpenSshExecutor {
    async fn execute(
        &self,
        target: &SshTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteOutput, GuardError> {
        let (program, args, password) = build_invocation(target, command, timeout);
        debug!(host = %target.host, user = %target.username, program = %program, "ssh exec");

        let mut cmd = TokioCommand::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(password) = password {
            cmd.env("SSHPASS", password);
        }

        let child = cmd
            .spawn()
            .map_err(|e| GuardError::Transport(format!("failed to start {}: {}", program, e)))?;

        // Connect timeout plus the same budget again for the command itself.
        let budget = timeout.saturating_mul(2);
        let output = match tokio::time::timeout(budget, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(GuardError::Transport(format!("ssh wait failed: {}", e))),
            Err(_) => {
                warn!(host = %target.host, secs = budget.as_secs(), "ssh timed out");
                return Err(GuardError::Transport(format!(
                    "ssh to {} timed out after {}s",
                    target.host,
                    budget.as_secs()
                )));
            }
        };

        Ok(RemoteOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Quote `value` as a single POSIX shell word
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
