//! Oracle listener and service discovery over SSH

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::Config;
use crate::envelope::{self, code};
use crate::ssh::{SSH_ARGS, SshExecutor, SshTarget, shell_quote};

const PMON_CMD: &str = "ps -ef | egrep 'ora_pmon_|pmon' | grep -v grep || true";

static PMON_SID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"ora_pmon_([A-Za-z0-9_#$]+)").ok());
static LISTENER_SERVICE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"Service\s+"([A-Za-z0-9_.$-]+)""#).ok());
static LISTENER_PORT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\(PORT=([0-9]+)\)").ok());
static TNS_SERVICE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"SERVICE_NAME\s*=\s*([A-Za-z0-9_.$-]+)").ok());

fn captures<T>(re: &LazyLock<Option<Regex>>, text: &str, convert: impl Fn(&str) -> Option<T>) -> Vec<T> {
    match &**re {
        Some(re) => re
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .filter_map(|m| convert(m.as_str()))
            .collect(),
        None => Vec::new(),
    }
}

/// SIDs from `ora_pmon_<SID>` process names
pub fn parse_pmon_sids(ps_output: &str) -> Vec<String> {
    captures(&PMON_SID, ps_output, |s| Some(s.to_string()))
}

/// Service names from `lsnrctl status` / `lsnrctl services`
pub fn parse_listener_services(lsnrctl_output: &str) -> Vec<String> {
    captures(&LISTENER_SERVICE, lsnrctl_output, |s| Some(s.to_string()))
}

/// `(PORT=nnnn)` values from lsnrctl output or listener.ora
pub fn parse_ports(text: &str) -> Vec<u16> {
    captures(&LISTENER_PORT, text, |s| s.parse().ok())
}

/// `SERVICE_NAME = x` entries from tnsnames.ora
pub fn parse_tns_services(tnsnames: &str) -> Vec<String> {
    captures(&TNS_SERVICE, tnsnames, |s| Some(s.to_string()))
}

/// Discovered SIDs, services and ports, each sorted and de-duplicated
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Discoveries {
    pub sids: BTreeSet<String>,
    pub services: BTreeSet<String>,
    pub ports: BTreeSet<u16>,
}

impl Discoveries {
    /// `<host>/<service>` per service, else `<host>/<first SID>`
    pub fn candidate_dsns(&self, host: &str) -> Vec<String> {
        if self.services.is_empty() {
            return self
                .sids
                .iter()
                .next()
                .map(|sid| vec![format!("{}/{}", host, sid)])
                .unwrap_or_default();
        }
        self.services
            .iter()
            .map(|svc| format!("{}/{}", host, svc))
            .collect()
    }
}

pub struct OracleTools<'a> {
    ssh: &'a dyn SshExecutor,
    timeout: Duration,
    listener_paths: [String; 2],
    tnsnames_paths: [String; 2],
}

impl<'a> OracleTools<'a> {
    pub fn new(ssh: &'a dyn SshExecutor, timeout: Duration, config: &Config) -> Self {
        Self {
            ssh,
            timeout,
            listener_paths: [config.listener_ora(), "/etc/oracle/listener.ora".to_string()],
            tnsnames_paths: [config.tnsnames_ora(), "/etc/oracle/tnsnames.ora".to_string()],
        }
    }

    /// `db_oracle_discover(ssh_host, ssh_user, ssh_password?, ssh_key_path?,
    /// lsnrctl_path = "lsnrctl", sudo_oracle = false)`
    ///
    /// Every remote step tolerates failure; whatever was found is returned.
    /// The config files are read only when the listener gave no services or
    /// no ports.
    pub async fn discover(&self, args: &Value) -> Value {
        let target = match SshTarget::from_args(args, &SSH_ARGS) {
            Ok(t) => t,
            Err(e) => return envelope::err(e.to_string(), code::INPUT_ERROR, Value::Null),
        };
        let lsnrctl = args
            .get("lsnrctl_path")
            .and_then(Value::as_str)
            .unwrap_or("lsnrctl");
        let sudo_oracle = args.get("sudo_oracle").and_then(Value::as_bool).unwrap_or(false);

        let mut found = Discoveries::default();

        let pmon = match self.ssh.execute(&target, PMON_CMD, self.timeout).await {
            Ok(out) => out.stdout,
            Err(e) => return envelope::err(e.to_string(), code::SSH_ERROR, Value::Null),
        };
        found.sids.extend(parse_pmon_sids(&pmon));

        let lsnrctl = shell_quote(lsnrctl);
        let status_cmd = wrap_sudo(
            &format!("{} status || {} services || true", lsnrctl, lsnrctl),
            sudo_oracle,
        );
        let listener = self.remote_text(&target, &status_cmd).await;
        found.services.extend(parse_listener_services(&listener));
        found.ports.extend(parse_ports(&listener));

        if found.services.is_empty() || found.ports.is_empty() {
            debug!(host = %target.host, "listener incomplete, reading network config files");
            for path in &self.listener_paths {
                let text = self.remote_text(&target, &cat_cmd(path, sudo_oracle)).await;
                found.ports.extend(parse_ports(&text));
            }
            for path in &self.tnsnames_paths {
                let text = self.remote_text(&target, &cat_cmd(path, sudo_oracle)).await;
                found.services.extend(parse_tns_services(&text));
            }
        }

        let candidate_dsns = found.candidate_dsns(&target.host);
        info!(
            host = %target.host,
            sids = found.sids.len(),
            services = found.services.len(),
            ports = found.ports.len(),
            "oracle discovery finished"
        );

        envelope::ok(json!({
            "discoveries": {
                "sids": found.sids,
                "services": found.services,
                "ports": found.ports,
            },
            "candidate_dsns": candidate_dsns,
        }))
    }

    /// Stdout of a best-effort remote command; failures read as empty
    async fn remote_text(&self, target: &SshTarget, command: &str) -> String {
        match self.ssh.execute(target, command, self.timeout).await {
            Ok(out) => out.stdout,
            Err(e) => {
                debug!(host = %target.host, error = %e, "discovery step failed");
                String::new()
            }
        }
    }
}

fn wrap_sudo(command: &str, sudo_oracle: bool) -> String {
    if sudo_oracle {
        format!("sudo -u oracle -H sh -lc {}", shell_quote(command))
    } else {
        command.to_string()
    }
}

fn cat_cmd(path: &str, sudo_oracle: bool) -> String {
    wrap_sudo(&format!("cat {} 2>/dev/null || true", shell_quote(path)), sudo_oracle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::testing::ScriptedSsh;

    const PS: &str = "oracle    2211     1  0 10:01 ?  00:00:00 ora_pmon_ORCLCDB
oracle    3311     1  0 10:01 ?  00:00:00 ora_pmon_TEST#1
";

    const LSNRCTL: &str = r#"
Listening Endpoints Summary...
  (DESCRIPTION=(ADDRESS=(PROTOCOL=tcp)(HOST=db1)(PORT=1521)))
Services Summary...
Service "ORCLCDB" has 1 instance(s).
Service "orclpdb1.example.com" has 1 instance(s).
The command completed successfully
"#;

    const TNSNAMES: &str = "ORCLPDB1 =
  (DESCRIPTION =
    (ADDRESS = (PROTOCOL = TCP)(HOST = db1)(PORT = 1521))
    (CONNECT_DATA = (SERVER = DEDICATED) (SERVICE_NAME = orclpdb1))
  )";

    fn args() -> Value {
        json!({"ssh_host": "db1", "ssh_user": "oracle", "ssh_password": "pw"})
    }

    #[test]
    fn test_parsers() {
        assert_eq!(parse_pmon_sids(PS), vec!["ORCLCDB", "TEST#1"]);
        assert_eq!(
            parse_listener_services(LSNRCTL),
            vec!["ORCLCDB", "orclpdb1.example.com"]
        );
        assert_eq!(parse_ports(LSNRCTL), vec![1521]);
        assert_eq!(parse_tns_services(TNSNAMES), vec!["orclpdb1"]);
    }

    #[test]
    fn test_candidate_dsns_fall_back_to_sid() {
        let mut found = Discoveries::default();
        found.sids.insert("ORCLCDB".into());
        assert_eq!(found.candidate_dsns("db1"), vec!["db1/ORCLCDB"]);
        found.services.insert("svc".into());
        assert_eq!(found.candidate_dsns("db1"), vec!["db1/svc"]);
        assert!(Discoveries::default().candidate_dsns("db1").is_empty());
    }

    #[test]
    fn test_wrap_sudo() {
        assert_eq!(wrap_sudo("lsnrctl status", false), "lsnrctl status");
        assert_eq!(
            wrap_sudo("lsnrctl status", true),
            "sudo -u oracle -H sh -lc 'lsnrctl status'"
        );
    }

    #[tokio::test]
    async fn test_discover_from_listener() {
        let ssh = ScriptedSsh::new()
            .reply("pmon", 0, PS)
            .reply("status", 0, LSNRCTL);
        let config = Config::default();
        let result = OracleTools::new(&ssh, Duration::from_secs(1), &config)
            .discover(&args())
            .await;

        assert_eq!(result["ok"], true);
        assert_eq!(result["discoveries"]["ports"], json!([1521]));
        assert_eq!(
            result["candidate_dsns"],
            json!(["db1/ORCLCDB", "db1/orclpdb1.example.com"])
        );
        // Listener answered fully, so no config files were read.
        assert!(!ssh.commands().iter().any(|c| c.starts_with("cat ")));
    }

    #[tokio::test]
    async fn test_discover_falls_back_to_config_files() {
        let ssh = ScriptedSsh::new()
            .reply("pmon", 0, PS)
            .reply("status", 0, "TNS-12541: TNS:no listener")
            .reply("tnsnames.ora", 0, TNSNAMES)
            .reply("listener.ora", 0, "(ADDRESS = (PROTOCOL = TCP)(HOST = db1)(PORT=1522))");
        let config = Config::default();
        let result = OracleTools::new(&ssh, Duration::from_secs(1), &config)
            .discover(&args())
            .await;

        assert_eq!(result["discoveries"]["services"], json!(["orclpdb1"]));
        assert_eq!(result["discoveries"]["ports"], json!([1522]));
        assert_eq!(result["discoveries"]["sids"], json!(["ORCLCDB", "TEST#1"]));
        assert_eq!(result["candidate_dsns"], json!(["db1/orclpdb1"]));
    }

    #[tokio::test]
    async fn test_discover_transport_failure() {
        let ssh = ScriptedSsh::new().fail("pmon", "no route to host");
        let config = Config::default();
        let result = OracleTools::new(&ssh, Duration::from_secs(1), &config)
            .discover(&args())
            .await;
        assert_eq!(result["error"]["code"], "SSH_ERROR");
    }
}
