//! The slice of the MCP JSON-RPC protocol the lifecycle manager speaks.
//!
//! Only what is needed to establish a session and check liveness:
//! `initialize`, `notifications/initialized` and `ping`.
//! See: <https://spec.modelcontextprotocol.io/>

use crate::transport::{TransportError, TransportResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol version.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_PING: &str = "ping";

/// JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// The `initialize` request opening a session.
    pub fn initialize(id: u64) -> Self {
        let params = serde_json::to_value(InitializeParams::default()).ok();
        Self::new(id, METHOD_INITIALIZE, params)
    }

    pub fn ping(id: u64) -> Self {
        Self::new(id, METHOD_PING, None)
    }
}

/// JSON-RPC response. Servers may echo ids as numbers or strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Whether this response answers request `id`.
    pub fn answers(&self, id: u64) -> bool {
        match &self.id {
            Value::Number(n) => n.as_u64() == Some(id),
            Value::String(s) => s.parse::<u64>().ok() == Some(id),
            _ => false,
        }
    }

    /// Collapse into the result payload or the server's error message.
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(error) => Err(format!("{} (code {})", error.message, error.code)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC notification (no id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }

    pub fn initialized() -> Self {
        Self::new(METHOD_INITIALIZED, None)
    }
}

/// MCP initialization parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(Default::default()),
            client_info: ClientInfo::default(),
        }
    }
}

/// Client info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "mcpvisor".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The parts of an `initialize` result surfaced as tracker metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

/// Server info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl InitializeResult {
    /// Key/value pairs for the tracker.
    pub fn metadata(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if !self.protocol_version.is_empty() {
            out.push(("protocol_version".to_string(), self.protocol_version.clone()));
        }
        if let Some(info) = &self.server_info {
            out.push(("server_name".to_string(), info.name.clone()));
            if let Some(version) = &info.version {
                out.push(("server_version".to_string(), version.clone()));
            }
        }
        out
    }
}

/// Longest unterminated event-stream line accepted from a peer.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a chunked event-stream body into lines.
///
/// Bytes are held until their `\n` arrives, so a UTF-8 sequence split
/// across chunks decodes intact.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    limit: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit,
        }
    }

    /// Append a chunk. Fails once the unterminated tail outgrows the limit.
    pub fn push(&mut self, chunk: &[u8]) -> TransportResult<()> {
        self.pending.extend_from_slice(chunk);
        let tail_start = self
            .pending
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |i| i + 1);
        if self.pending.len() - tail_start > self.limit {
            self.pending.clear();
            return Err(TransportError::new(format!(
                "Event stream line exceeds {} bytes",
                self.limit
            )));
        }
        Ok(())
    }

    /// Next complete line, without its `\r\n` / `\n` terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.pending.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=newline).collect();
        Some(
            String::from_utf8_lossy(&line)
                .trim_end_matches(['\r', '\n'])
                .to_string(),
        )
    }
}

/// Parse the JSON-RPC response carried by a `data:` line, if any.
pub fn response_from_data_line(line: &str) -> Option<JsonRpcResponse> {
    let data = line.strip_prefix("data:")?;
    serde_json::from_str(data.trim()).ok()
}
