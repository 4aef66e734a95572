//! Recovery-validation tool server
//!
//! Speaks JSON-RPC 2.0 either over HTTP (one request per POST to `/mcp`) or
//! over stdin/stdout (one message per line). It answers the MCP methods
//! `initialize`, `ping`, `tools/list`, `tools/call`, `resources/list`,
//! `resources/read`, `prompts/list` and `prompts/get`. Every tool result is
//! an envelope (see `envelope`) wrapped as MCP text content.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, PROFILE_MIME};
use crate::clients::DbClients;
use crate::config::Config;
use crate::envelope::{self, code};
use crate::mongo::MongoTools;
use crate::net;
use crate::oracle::OracleTools;
use crate::redact::redact_json;
use crate::ssh::SshExecutor;
use crate::tool_limits::ToolLimits;
use crate::vm::VmTools;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "Recovery_Validation_MCP";

/// HTTP endpoint for JSON-RPC requests
pub const MCP_PATH: &str = "/mcp";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    /// Absent for notifications
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: Value,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

/// Read the optional secrets file, logging key names only
///
/// A missing or malformed file yields an empty map.
pub fn load_secrets(path: &Path) -> Map<String, Value> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no secrets file found");
            return Map::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read secrets file");
            return Map::new();
        }
    };
    match serde_json::from_str::<Map<String, Value>>(&content) {
        Ok(secrets) => {
            let keys: Vec<&str> = secrets.keys().map(String::as_str).collect();
            info!(path = %path.display(), ?keys, "loaded secrets file");
            secrets
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse secrets file");
            Map::new()
        }
    }
}

/// The tool server: configuration, SSH transport, local database clients,
/// the resource catalog and the parameter table
pub struct ToolServer {
    config: Config,
    ssh: Box<dyn SshExecutor>,
    clients: DbClients,
    catalog: Catalog,
    limits: ToolLimits,
    secrets: Map<String, Value>,
}

impl ToolServer {
    pub fn new(config: Config, ssh: Box<dyn SshExecutor>) -> Self {
        let secrets = load_secrets(&config.secrets_file);
        Self {
            clients: DbClients::new(&config),
            catalog: Catalog::from_config(&config),
            config,
            ssh,
            limits: ToolLimits::with_defaults(),
            secrets,
        }
    }

    /// Names of the entries in the secrets file
    pub fn secret_names(&self) -> Vec<&str> {
        self.secrets.keys().map(String::as_str).collect()
    }

    /// Bind `server_host:server_port` and serve HTTP until the process stops
    pub async fn serve_http(self: Arc<Self>) -> std::io::Result<()> {
        let listener =
            TcpListener::bind((self.config.server_host.as_str(), self.config.server_port)).await?;
        self.serve_on(listener).await
    }

    /// Serve HTTP on an already bound listener
    pub async fn serve_on(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(
            name = SERVER_NAME,
            addr = %listener.local_addr()?,
            path = MCP_PATH,
            "tool server listening on http"
        );
        axum::serve(listener, router(self)).await
    }

    /// Serve until stdin closes
    pub async fn serve_stdio(&self) -> std::io::Result<()> {
        info!(name = SERVER_NAME, "tool server listening on stdio");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(reply) = self.handle_line(&line).await {
                stdout.write_all(reply.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        info!("stdin closed, tool server stopping");
        Ok(())
    }

    /// Answer one JSON-RPC line; `None` for notifications
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let response = match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => self.handle(request).await?,
            Err(e) => {
                warn!(error = %e, "malformed JSON-RPC message");
                RpcResponse::error(Value::Null, PARSE_ERROR, format!("Parse error: {}", e))
            }
        };
        match serde_json::to_string(&response) {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(error = %e, "could not serialize response");
                None
            }
        }
    }

    async fn handle(&self, request: RpcRequest) -> Option<RpcResponse> {
        let Some(id) = request.id else {
            debug!(method = %request.method, "notification");
            return None;
        };
        if request.jsonrpc != "2.0" {
            return Some(RpcResponse::error(id, INVALID_REQUEST, "jsonrpc must be \"2.0\""));
        }

        let response = match request.method.as_str() {
            "initialize" => RpcResponse::result(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {
                        "tools": { "listChanged": false },
                        "resources": { "subscribe": false, "listChanged": false },
                        "prompts": { "listChanged": false },
                    },
                    "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
                    "instructions": "Validates recovered infrastructure resources including Linux VMs, \
                        Oracle databases, and MongoDB clusters. Exposes tools to check network \
                        connectivity, OS health, database connectivity, and replica status.",
                }),
            ),
            "ping" => RpcResponse::result(id, json!({})),
            "tools/list" => RpcResponse::result(id, json!({ "tools": tool_descriptors() })),
            "tools/call" => {
                let Some(name) = request.params.get("name").and_then(Value::as_str) else {
                    return Some(RpcResponse::error(id, INVALID_PARAMS, "missing tool name"));
                };
                let arguments = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let outcome = self.call_tool(name, &arguments).await;
                RpcResponse::result(
                    id,
                    json!({
                        "content": [{ "type": "text", "text": outcome.to_string() }],
                        "isError": !envelope::is_ok(&outcome),
                    }),
                )
            }
            "resources/list" => RpcResponse::result(id, json!({ "resources": self.catalog.resources() })),
            "resources/read" => {
                let uri = request.params.get("uri").and_then(Value::as_str).unwrap_or("");
                match self.catalog.read_resource(uri) {
                    Some(text) => RpcResponse::result(
                        id,
                        json!({ "contents": [{ "uri": uri, "mimeType": PROFILE_MIME, "text": text }] }),
                    ),
                    None => RpcResponse::error(id, INVALID_PARAMS, format!("Unknown resource: {}", uri)),
                }
            }
            "prompts/list" => RpcResponse::result(id, json!({ "prompts": self.catalog.prompts() })),
            "prompts/get" => {
                let name = request.params.get("name").and_then(Value::as_str).unwrap_or("");
                match self.catalog.get_prompt(name) {
                    Some((entry, text)) => RpcResponse::result(
                        id,
                        json!({
                            "description": entry.description,
                            "messages": [{ "role": "user", "content": { "type": "text", "text": text } }],
                        }),
                    ),
                    None => RpcResponse::error(id, INVALID_PARAMS, format!("Unknown prompt: {}", name)),
                }
            }
            other => RpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", other)),
        };
        Some(response)
    }

    /// Check parameters against the limit table, then run the named tool
    pub async fn call_tool(&self, name: &str, args: &Value) -> Value {
        debug!(tool = name, args = %redact_json(args), "tools/call");

        if let Err(e) = self.limits.validate_tool_usage(name, args) {
            return envelope::err(e.to_string(), code::SAFETY_VIOLATION, Value::Null);
        }

        let timeout = Duration::from_secs(self.config.ssh_timeout_secs);
        let ssh = &*self.ssh;
        let result = match name {
            "tcp_portcheck" => net::tcp_portcheck(args).await,
            "vm_linux_uptime_load_mem" => VmTools::new(ssh, timeout).uptime_load_mem(args).await,
            "vm_linux_fs_usage" => VmTools::new(ssh, timeout).fs_usage(args).await,
            "vm_linux_services" => VmTools::new(ssh, timeout).services(args).await,
            "vm_validator" => VmTools::new(ssh, timeout).validate(args).await,
            "db_mongo_ssh_ping" => MongoTools::new(ssh, timeout).ping(args).await,
            "db_mongo_ssh_rs_status" => MongoTools::new(ssh, timeout).rs_status(args).await,
            "validate_collection" => MongoTools::new(ssh, timeout).validate_collection(args).await,
            "db_oracle_discover" => {
                OracleTools::new(ssh, timeout, &self.config).discover(args).await
            }
            "db_mongo_connect" => self.clients.mongo_connect(args).await,
            "db_mongo_rs_status" => self.clients.mongo_rs_status(args).await,
            "db_oracle_connect" => self.clients.oracle_connect(args).await,
            "db_oracle_tablespaces" => self.clients.oracle_tablespaces(args).await,
            other => envelope::err(format!("Unknown tool: {}", other), code::UNKNOWN_TOOL, Value::Null),
        };

        if !envelope::is_ok(&result) {
            info!(tool = name, error = %redact_json(&result["error"]), "tool reported failure");
        }
        result
    }
}

/// Routes for the HTTP transport
pub fn router(server: Arc<ToolServer>) -> Router {
    Router::new().route(MCP_PATH, post(handle_http)).with_state(server)
}

/// POST /mcp: one JSON-RPC message per request body
async fn handle_http(State(server): State<Arc<ToolServer>>, body: String) -> Response {
    match server.handle_line(&body).await {
        Some(reply) => ([(header::CONTENT_TYPE, "application/json")], reply).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn ssh_properties(host: &str, user: &str, password: &str, key_path: &str) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert(host.into(), json!({"type": "string"}));
    props.insert(user.into(), json!({"type": "string"}));
    props.insert(password.into(), json!({"type": "string"}));
    props.insert(key_path.into(), json!({"type": "string"}));
    props
}

fn schema(mut props: Map<String, Value>, extra: Value, required: &[&str]) -> Value {
    if let Value::Object(extra) = extra {
        props.extend(extra);
    }
    json!({ "type": "object", "properties": props, "required": required })
}

/// `tools/list` entries
pub fn tool_descriptors() -> Vec<Value> {
    let vm = || ssh_properties("host", "username", "password", "key_path");
    let remote = || ssh_properties("ssh_host", "ssh_user", "ssh_password", "ssh_key_path");
    let mongo = json!({
        "port": {"type": "integer", "default": 27017},
        "mongo_user": {"type": "string"},
        "mongo_password": {"type": "string"},
        "auth_db": {"type": "string", "default": "admin"},
        "mongosh_path": {"type": "string", "default": "mongosh"},
    });

    let mut validate_extra = mongo.clone();
    if let Value::Object(fields) = &mut validate_extra {
        fields.insert("db_name".into(), json!({"type": "string", "default": "admin"}));
        fields.insert("collection".into(), json!({"type": "string"}));
        fields.insert("full".into(), json!({"type": "boolean", "default": true}));
    }

    let string = || json!({"type": "string"});
    let tool = |name: &str, description: &str, input_schema: Value| {
        json!({ "name": name, "description": description, "inputSchema": input_schema })
    };

    vec![
        tool(
            "tcp_portcheck",
            "Selective TCP connectivity check. Reports per-port reachability and latency.",
            json!({
                "type": "object",
                "properties": {
                    "host": {"type": "string"},
                    "ports": {"type": "array", "items": {"type": "integer"}},
                    "timeout_s": {"type": "number", "default": 1.0},
                },
                "required": ["host", "ports"],
            }),
        ),
        tool(
            "vm_linux_uptime_load_mem",
            "Return uptime, load averages, and memory information from a Linux host.",
            schema(vm(), Value::Null, &["host", "username"]),
        ),
        tool(
            "vm_linux_fs_usage",
            "Return POSIX filesystem usage statistics.",
            schema(vm(), Value::Null, &["host", "username"]),
        ),
        tool(
            "vm_linux_services",
            "List running systemd services and verify required ones are active.",
            schema(
                vm(),
                json!({"required": {"type": "array", "items": {"type": "string"}}}),
                &["host", "username"],
            ),
        ),
        tool(
            "vm_validator",
            "Root filesystem df check plus sshd liveness; PASS or FAIL.",
            schema(
                ssh_properties("vm_ip", "ssh_user", "ssh_password", "ssh_key_path"),
                Value::Null,
                &["vm_ip", "ssh_user"],
            ),
        ),
        tool(
            "db_mongo_ssh_ping",
            "SSH into the server and run db.adminCommand({ ping: 1 }) locally via mongosh.",
            schema(remote(), mongo.clone(), &["ssh_host", "ssh_user"]),
        ),
        tool(
            "db_mongo_ssh_rs_status",
            "SSH into the server and run rs.status() locally via mongosh.",
            schema(remote(), mongo, &["ssh_host", "ssh_user"]),
        ),
        tool(
            "validate_collection",
            "SSH into the server and validate one collection via mongosh.",
            schema(remote(), validate_extra, &["ssh_host", "ssh_user", "collection"]),
        ),
        tool(
            "db_oracle_discover",
            "Discover Oracle SIDs, listener services and ports over SSH and build candidate DSNs.",
            schema(
                remote(),
                json!({
                    "lsnrctl_path": {"type": "string", "default": "lsnrctl"},
                    "sudo_oracle": {"type": "boolean", "default": false},
                }),
                &["ssh_host", "ssh_user"],
            ),
        ),
        tool(
            "db_mongo_connect",
            "Connect to MongoDB with the local mongosh and return the ping response and server version.",
            json!({
                "type": "object",
                "properties": {
                    "uri": string(),
                    "host": string(),
                    "port": {"type": "integer", "default": 27017},
                    "user": string(),
                    "password": string(),
                    "database": {"type": "string", "default": "admin"},
                },
            }),
        ),
        tool(
            "db_mongo_rs_status",
            "Return replica set status (set, myState, members) for a MongoDB cluster.",
            json!({
                "type": "object",
                "properties": { "uri": string() },
                "required": ["uri"],
            }),
        ),
        tool(
            "db_oracle_connect",
            "Connect to Oracle with the local sqlplus and return instance name, version, open mode and role.",
            json!({
                "type": "object",
                "properties": {
                    "dsn": string(),
                    "host": string(),
                    "port": {"type": "integer", "default": 1521},
                    "service": string(),
                    "user": string(),
                    "password": string(),
                },
            }),
        ),
        tool(
            "db_oracle_tablespaces",
            "Tablespace usage (used_pct, free_mb) for an Oracle database, most used first.",
            json!({
                "type": "object",
                "properties": { "dsn": string(), "user": string(), "password": string() },
                "required": ["dsn", "user", "password"],
            }),
        ),
    ]
}
