//! MCP server configuration and state.

use crate::error::{McpError, McpResult};
use mcpvisor_util::Identifier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Stable server identity, assigned at registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(Identifier::server())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ServerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport kind of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
            TransportKind::Sse => "sse",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local server spawned as a child process speaking over stdin/stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioConfig {
    /// Program to run.
    #[serde(default)]
    pub command: String,

    /// Arguments for the command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment overrides. Values may reference `$VAR` from the caller.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Connect timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Wait for the `initialize` response before reporting connected.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub handshake: bool,
}

/// Remote server reached with plain HTTP requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Remote server reached over a Server-Sent Events stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Connect timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

/// Transport-specific configuration, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Stdio(StdioConfig),
    Http(HttpConfig),
    Sse(SseConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio(_) => TransportKind::Stdio,
            TransportConfig::Http(_) => TransportKind::Http,
            TransportConfig::Sse(_) => TransportKind::Sse,
        }
    }

    /// Configured timeout, if any.
    pub fn timeout_secs(&self) -> Option<u64> {
        match self {
            TransportConfig::Stdio(c) => c.timeout,
            TransportConfig::Http(c) => c.timeout,
            TransportConfig::Sse(c) => c.timeout,
        }
    }

    fn validate(&self) -> McpResult<()> {
        match self {
            TransportConfig::Stdio(c) => {
                if c.command.trim().is_empty() {
                    return Err(McpError::validation(
                        "stdio server requires a 'command'",
                    ));
                }
            }
            TransportConfig::Http(HttpConfig { url, .. })
            | TransportConfig::Sse(SseConfig { url, .. }) => {
                let kind = self.kind();
                if url.trim().is_empty() {
                    return Err(McpError::validation(format!(
                        "{kind} server requires a 'url'"
                    )));
                }
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(McpError::validation(format!(
                        "{kind} server url must start with http:// or https://, got '{url}'"
                    )));
                }
            }
        }
        if self.timeout_secs() == Some(0) {
            return Err(McpError::validation("timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Configuration for an MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Stable identity.
    #[serde(default = "ServerId::generate")]
    pub id: ServerId,

    /// Unique display name.
    pub name: String,

    /// Whether the server may be started.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub transport: TransportConfig,
}

impl ServerConfig {
    /// Create a server configuration with a fresh id.
    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            id: ServerId::generate(),
            name: name.into(),
            enabled: true,
            transport,
        }
    }

    /// Create a stdio server configuration.
    pub fn stdio<I, S>(name: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            TransportConfig::Stdio(StdioConfig {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                handshake: true,
                ..Default::default()
            }),
        )
    }

    /// Create an HTTP server configuration.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            name,
            TransportConfig::Http(HttpConfig {
                url: url.into(),
                ..Default::default()
            }),
        )
    }

    /// Create an SSE server configuration.
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            name,
            TransportConfig::Sse(SseConfig {
                url: url.into(),
                ..Default::default()
            }),
        )
    }

    /// Add a header (http/sse) or an environment variable (stdio).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.transport {
            TransportConfig::Http(c) => {
                c.headers.insert(key.into(), value.into());
            }
            TransportConfig::Sse(c) => {
                c.headers.insert(key.into(), value.into());
            }
            TransportConfig::Stdio(c) => {
                c.env.insert(key.into(), value.into());
            }
        }
        self
    }

    /// Add an environment variable (stdio only).
    pub fn with_env(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_header(key, value)
    }

    /// Set the timeout in seconds.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        match &mut self.transport {
            TransportConfig::Stdio(c) => c.timeout = Some(secs),
            TransportConfig::Http(c) => c.timeout = Some(secs),
            TransportConfig::Sse(c) => c.timeout = Some(secs),
        }
        self
    }

    /// Skip the `initialize` handshake (stdio only).
    pub fn without_handshake(mut self) -> Self {
        if let TransportConfig::Stdio(c) = &mut self.transport {
            c.handshake = false;
        }
        self
    }

    /// Disable the server.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Effective connect timeout.
    pub fn timeout(&self, default_secs: u64) -> Duration {
        Duration::from_secs(self.transport.timeout_secs().unwrap_or(default_secs))
    }

    /// Check the invariants a config must satisfy before registration.
    pub fn validate(&self) -> McpResult<()> {
        if self.name.trim().is_empty() {
            return Err(McpError::validation("server name must not be empty"));
        }
        if self.id.as_str().trim().is_empty() {
            return Err(McpError::validation("server id must not be empty"));
        }
        self.transport.validate()
    }
}

/// Lifecycle state of a server. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Starting,
    Running,
    Stopping,
    #[default]
    Stopped,
    Error,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
            ServerState::Error => "error",
        }
    }

    /// Whether a live transport may exist in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ServerState::Starting | ServerState::Running | ServerState::Stopping
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
