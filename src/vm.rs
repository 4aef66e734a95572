//! Linux VM health checks over SSH

use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::envelope::{self, code};
use crate::ssh::{ArgNames, SSH_ARGS, SshExecutor, SshTarget, VM_ARGS};

const UPTIME_MEM_CMD: &str =
    "uptime && cat /proc/meminfo | egrep 'MemTotal|MemFree|MemAvailable|SwapTotal|SwapFree'";
const FS_USAGE_CMD: &str = "df -P -k";
const SERVICES_CMD: &str =
    "systemctl list-units --type=service --state=running --no-legend --no-pager | awk '{print $1}'";
const ROOT_DF_CMD: &str = "df -h /";
const SSHD_ACTIVE_CMD: &str = "systemctl is-active sshd || true";

/// One row of `df -P -k`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filesystem {
    pub filesystem: String,
    pub blocks_k: Option<u64>,
    pub used_k: Option<u64>,
    pub avail_k: Option<u64>,
    pub use_pct: Option<u8>,
    pub mountpoint: String,
}

/// Parse POSIX `df -P -k` output, skipping the header
///
/// Rows with fewer than six columns are dropped. Unparseable numbers become
/// `None` (the three size columns together).
pub fn parse_df(output: &str) -> Vec<Filesystem> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                return None;
            }
            let sizes = (
                parts[1].parse::<u64>(),
                parts[2].parse::<u64>(),
                parts[3].parse::<u64>(),
            );
            let (blocks_k, used_k, avail_k) = match sizes {
                (Ok(b), Ok(u), Ok(a)) => (Some(b), Some(u), Some(a)),
                _ => (None, None, None),
            };
            Some(Filesystem {
                filesystem: parts[0].to_string(),
                blocks_k,
                used_k,
                avail_k,
                use_pct: parts[4].trim_end_matches('%').parse().ok(),
                mountpoint: parts[5].to_string(),
            })
        })
        .collect()
}

/// Remote VM checks sharing one SSH executor
pub struct VmTools<'a> {
    ssh: &'a dyn SshExecutor,
    timeout: Duration,
}

impl<'a> VmTools<'a> {
    pub fn new(ssh: &'a dyn SshExecutor, timeout: Duration) -> Self {
        Self { ssh, timeout }
    }

    /// `vm_linux_uptime_load_mem(host, username, password?, key_path?)`
    pub async fn uptime_load_mem(&self, args: &Value) -> Value {
        let target = match SshTarget::from_args(args, &VM_ARGS) {
            Ok(t) => t,
            Err(e) => return envelope::err(e.to_string(), code::INPUT_ERROR, Value::Null),
        };
        match self.ssh.execute(&target, UPTIME_MEM_CMD, self.timeout).await {
            Ok(out) if out.success() => envelope::ok(json!({
                "rc": out.exit_code,
                "stdout": out.stdout,
                "stderr": out.stderr,
            })),
            Ok(out) => {
                warn!(host = %target.host, rc = out.exit_code, "uptime_load_mem failed");
                envelope::err(
                    "ssh exec failed",
                    code::SSH_ERROR,
                    json!({"rc": out.exit_code, "stdout": out.stdout, "stderr": out.stderr}),
                )
            }
            Err(e) => envelope::err(e.to_string(), code::SSH_ERROR, Value::Null),
        }
    }

    /// `vm_linux_fs_usage(host, username, password?, key_path?)`
    pub async fn fs_usage(&self, args: &Value) -> Value {
        let target = match SshTarget::from_args(args, &VM_ARGS) {
            Ok(t) => t,
            Err(e) => return envelope::err(e.to_string(), code::INPUT_ERROR, Value::Null),
        };
        match self.ssh.execute(&target, FS_USAGE_CMD, self.timeout).await {
            Ok(out) if out.success() => envelope::ok(json!({
                "rc": out.exit_code,
                "filesystems": parse_df(&out.stdout),
                "stderr": out.stderr,
            })),
            Ok(out) => {
                warn!(host = %target.host, rc = out.exit_code, "fs_usage failed");
                envelope::err(
                    "ssh exec failed",
                    code::SSH_ERROR,
                    json!({"rc": out.exit_code, "stderr": out.stderr}),
                )
            }
            Err(e) => envelope::err(e.to_string(), code::SSH_ERROR, Value::Null),
        }
    }

    /// `vm_linux_services(host, username, password?, key_path?, required?)`
    pub async fn services(&self, args: &Value) -> Value {
        let target = match SshTarget::from_args(args, &VM_ARGS) {
            Ok(t) => t,
            Err(e) => return envelope::err(e.to_string(), code::INPUT_ERROR, Value::Null),
        };
        let required: Vec<String> = args
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let out = match self.ssh.execute(&target, SERVICES_CMD, self.timeout).await {
            Ok(out) => out,
            Err(e) => return envelope::err(e.to_string(), code::SSH_ERROR, Value::Null),
        };

        let running: Vec<&str> = out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let missing: Vec<&String> = required
            .iter()
            .filter(|svc| !running.contains(&svc.as_str()))
            .collect();

        let payload = json!({
            "rc": out.exit_code,
            "running": running,
            "required": required,
            "missing": missing,
            "stderr": out.stderr,
        });

        if out.success() && missing.is_empty() {
            return envelope::ok(payload);
        }
        info!(host = %target.host, rc = out.exit_code, ?missing, "services check issues");
        let failure = if out.success() {
            code::SERVICE_CHECK_FAILED
        } else {
            code::SSH_ERROR
        };
        envelope::err("service(s) missing or ssh error", failure, payload)
    }

    /// `vm_validator(vm_ip, ssh_user, ssh_password)`
    ///
    /// Root filesystem `df` plus `sshd` liveness; `PASS` needs both.
    pub async fn validate(&self, args: &Value) -> Value {
        let names = ArgNames {
            host: "vm_ip",
            ..SSH_ARGS
        };
        let target = match SshTarget::from_args(args, &names) {
            Ok(t) => t,
            Err(e) => return envelope::err(e.to_string(), code::INPUT_ERROR, Value::Null),
        };
        let vm_ip = target.host.clone();

        let disk = self.ssh.execute(&target, ROOT_DF_CMD, self.timeout).await;
        let sshd = self.ssh.execute(&target, SSHD_ACTIVE_CMD, self.timeout).await;
        let (disk, sshd) = match (disk, sshd) {
            (Ok(d), Ok(s)) => (d, s),
            (Err(e), _) | (_, Err(e)) => {
                return envelope::err(e.to_string(), code::SSH_ERROR, json!({"details": {"vm_ip": vm_ip}}));
            }
        };

        // `systemctl is-active` prints "inactive" for stopped units.
        let sshd_active = sshd.stdout.trim() == "active";
        if disk.success() && sshd_active {
            return envelope::ok(json!({
                "validation_status": "PASS",
                "checks": [
                    {"id": "disk_root_df", "rc": disk.exit_code, "stdout": disk.stdout, "stderr": disk.stderr},
                    {"id": "svc_sshd_active", "rc": sshd.exit_code, "stdout": sshd.stdout.trim(), "stderr": sshd.stderr},
                ],
                "details": {"vm_ip": vm_ip},
            }));
        }

        warn!(vm_ip = %vm_ip, disk_rc = disk.exit_code, sshd = %sshd.stdout.trim(), "vm validation failed");
        envelope::err(
            "vm validation failed",
            code::VM_VALIDATE_FAILED,
            json!({"validation_status": "FAIL", "details": {"vm_ip": vm_ip}}),
        )
    }
}
