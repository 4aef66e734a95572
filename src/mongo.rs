//! MongoDB checks run through `mongosh` on the database host over SSH
//!
//! For deployments where mongod only listens on the remote loopback.

use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::warn;

use crate::envelope::{self, code};
use crate::ssh::{SSH_ARGS, SshExecutor, SshTarget, shell_quote};

const VIA: &str = "ssh_exec";

/// Last line of `stdout` that parses as a JSON object or array
pub fn json_from_stdout(stdout: &str) -> Option<Value> {
    stdout
        .lines()
        .map(str::trim)
        .rev()
        .filter(|l| l.starts_with('{') || l.starts_with('['))
        .find_map(|l| serde_json::from_str(l).ok())
}

/// Loopback connection URI for mongosh on the remote host
///
/// Credentials are percent-encoded so they cannot break out of the URI.
pub fn local_uri(user: Option<&str>, password: Option<&str>, port: u16, auth_db: &str) -> String {
    build_uri("127.0.0.1", user, password, port, auth_db)
}

/// `mongodb://[user:password@]host:port/db[?authSource=db]`
///
/// Credentials are only included when both are non-empty.
pub fn build_uri(host: &str, user: Option<&str>, password: Option<&str>, port: u16, db: &str) -> String {
    match (user, password) {
        (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => format!(
            "mongodb://{}:{}@{}:{}/{}?authSource={}",
            uri_encode(user),
            uri_encode(password),
            host,
            port,
            uri_encode(db),
            uri_encode(db)
        ),
        _ => format!("mongodb://{}:{}/{}", host, port, uri_encode(db)),
    }
}

fn uri_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

/// Escape for a single-quoted JavaScript string literal
pub fn js_quote(value: &str) -> String {
    value.replace('\\', r"\\").replace('\'', r"\'")
}

/// Settings shared by every mongosh call
struct MongoArgs {
    target: SshTarget,
    uri: String,
    mongosh: String,
}

impl MongoArgs {
    fn parse(args: &Value) -> Result<Self, Value> {
        let target = SshTarget::from_args(args, &SSH_ARGS)
            .map_err(|e| envelope::err(e.to_string(), code::INPUT_ERROR, json!({"via": VIA})))?;
        let text = |key: &str| args.get(key).and_then(Value::as_str);
        let port = match args.get("port").map(Value::as_u64) {
            None => 27017,
            Some(Some(p)) if (1..=65535).contains(&p) => p as u16,
            Some(_) => {
                return Err(envelope::err(
                    "port must be an integer in 1..=65535",
                    code::INPUT_ERROR,
                    json!({"via": VIA}),
                ));
            }
        };
        let auth_db = text("auth_db").unwrap_or("admin");
        Ok(Self {
            target,
            uri: local_uri(text("mongo_user"), text("mongo_password"), port, auth_db),
            mongosh: text("mongosh_path").unwrap_or("mongosh").to_string(),
        })
    }

    /// `mongosh --quiet '<uri>' --eval '<js>'`
    fn command(&self, js: &str) -> String {
        format!(
            "{} --quiet {} --eval {}",
            shell_quote(&self.mongosh),
            shell_quote(&self.uri),
            shell_quote(js)
        )
    }
}

/// MongoDB tools sharing one SSH executor
pub struct MongoTools<'a> {
    ssh: &'a dyn SshExecutor,
    timeout: Duration,
}

impl<'a> MongoTools<'a> {
    pub fn new(ssh: &'a dyn SshExecutor, timeout: Duration) -> Self {
        Self { ssh, timeout }
    }

    /// Run `js` remotely and parse its JSON result, or build the failure envelope
    async fn eval(&self, mongo: &MongoArgs, js: &str, op: &str) -> Result<Value, Value> {
        let out = self
            .ssh
            .execute(&mongo.target, &mongo.command(js), self.timeout)
            .await
            .map_err(|e| envelope::err(e.to_string(), code::SSH_ERROR, json!({"via": VIA})))?;

        if !out.success() {
            warn!(op, rc = out.exit_code, "mongosh over ssh failed");
            return Err(envelope::err(
                "ssh exec failed",
                code::SSH_ERROR,
                json!({"rc": out.exit_code, "stderr": out.stderr, "stdout": out.stdout, "via": VIA}),
            ));
        }

        json_from_stdout(&out.stdout).ok_or_else(|| {
            warn!(op, "could not parse mongosh output");
            envelope::err(
                "could not parse JSON from mongosh output",
                code::PARSE_ERROR,
                json!({"stdout": out.stdout, "via": VIA}),
            )
        })
    }

    /// `db_mongo_ssh_ping`: `db.adminCommand({ ping: 1 })`
    pub async fn ping(&self, args: &Value) -> Value {
        let mongo = match MongoArgs::parse(args) {
            Ok(m) => m,
            Err(envelope) => return envelope,
        };
        match self
            .eval(&mongo, "JSON.stringify(db.adminCommand({ ping: 1 }))", "ping")
            .await
        {
            Ok(data) => envelope::ok(json!({"ping": data, "via": VIA})),
            Err(envelope) => envelope,
        }
    }

    /// `db_mongo_ssh_rs_status`: `rs.status()`
    pub async fn rs_status(&self, args: &Value) -> Value {
        let mongo = match MongoArgs::parse(args) {
            Ok(m) => m,
            Err(envelope) => return envelope,
        };
        match self.eval(&mongo, "JSON.stringify(rs.status())", "rs.status").await {
            Ok(data) => envelope::ok(json!({
                "set": data.get("set"),
                "myState": data.get("myState"),
                "members": data.get("members").cloned().unwrap_or_else(|| json!([])),
                "raw": data,
                "via": VIA,
            })),
            Err(envelope) => envelope,
        }
    }

    /// `validate_collection`: `db.getSiblingDB(db).getCollection(c).validate({full})`
    pub async fn validate_collection(&self, args: &Value) -> Value {
        let collection = args.get("collection").and_then(Value::as_str).unwrap_or("");
        if collection.is_empty() {
            return envelope::err("collection is required", code::INPUT_ERROR, json!({"via": VIA}));
        }
        let mongo = match MongoArgs::parse(args) {
            Ok(m) => m,
            Err(envelope) => return envelope,
        };
        let db_name = args.get("db_name").and_then(Value::as_str).unwrap_or("admin");
        let full = args.get("full").and_then(Value::as_bool).unwrap_or(true);

        let js = format!(
            "JSON.stringify(db.getSiblingDB('{}').getCollection('{}').validate({{full: {}}}))",
            js_quote(db_name),
            js_quote(collection),
            full
        );

        let data = match self.eval(&mongo, &js, "validate").await {
            Ok(data) => data,
            Err(envelope) => return envelope,
        };

        let valid = is_valid(&data);
        let mut result = Map::new();
        result.insert("via".into(), json!(VIA));
        result.insert("db".into(), json!(db_name));
        result.insert("collection".into(), json!(collection));
        result.insert("full".into(), json!(full));
        for key in ["errors", "warnings", "nIndexes", "nrecords", "repaired"] {
            if let Some(value) = data.get(key) {
                result.insert(key.into(), value.clone());
            }
        }
        result.insert("validate".into(), data);

        if valid {
            envelope::ok(Value::Object(result))
        } else {
            envelope::err(
                "collection validation reported invalid",
                code::VALIDATE_FAILED,
                Value::Object(result),
            )
        }
    }
}

/// `valid`, falling back to `ok`, as a truthy flag
fn is_valid(data: &Value) -> bool {
    match data.get("valid").or_else(|| data.get("ok")) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}
