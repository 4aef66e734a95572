//! TCP reachability checks

use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tracing::info;

use crate::envelope::{self, code};

/// Outcome of one connection attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortResult {
    pub port: u16,
    pub ok: bool,
    pub latency_ms: f64,
    pub error: Option<String>,
}

/// Try to open a TCP connection to `host:port` within `timeout`
pub async fn check_port(host: &str, port: u16, timeout: Duration) -> PortResult {
    let start = Instant::now();
    let outcome = tokio::time::timeout(timeout, TcpStream::connect((host, port))).await;
    let latency_ms = (start.elapsed().as_secs_f64() * 100_000.0).round() / 100.0;

    let error = match outcome {
        Ok(Ok(_stream)) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some("timed out".to_string()),
    };

    PortResult {
        port,
        ok: error.is_none(),
        latency_ms,
        error,
    }
}

/// `tcp_portcheck(host, ports, timeout_s = 1.0)`
///
/// Ports are checked one after another so latencies are not skewed by each
/// other.
pub async fn tcp_portcheck(args: &Value) -> Value {
    let Some(host) = args.get("host").and_then(Value::as_str).filter(|h| !h.is_empty()) else {
        return envelope::err("host is required", code::INPUT_ERROR, Value::Null);
    };
    let Some(raw_ports) = args.get("ports").and_then(Value::as_array) else {
        return envelope::err("ports must be a list of integers", code::INPUT_ERROR, Value::Null);
    };
    let ports: Option<Vec<u16>> = raw_ports
        .iter()
        .map(|p| p.as_u64().and_then(|p| u16::try_from(p).ok()))
        .collect();
    let Some(ports) = ports else {
        return envelope::err("ports must be a list of integers", code::INPUT_ERROR, Value::Null);
    };
    let timeout_s = args.get("timeout_s").and_then(Value::as_f64).unwrap_or(1.0);
    let timeout = Duration::from_secs_f64(timeout_s.clamp(0.0, 60.0));

    let mut results = Vec::with_capacity(ports.len());
    for port in ports {
        results.push(check_port(host, port, timeout).await);
    }

    let all_ok = results.iter().all(|r| r.ok);
    if !all_ok {
        let failed: Vec<u16> = results.iter().filter(|r| !r.ok).map(|r| r.port).collect();
        info!(host, ?failed, "tcp_portcheck failures");
    }

    envelope::ok(json!({
        "host": host,
        "results": results,
        "all_ok": all_ok,
    }))
}
