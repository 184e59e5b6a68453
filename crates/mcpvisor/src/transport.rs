//! Transport adapters.
//!
//! One adapter per [`TransportKind`]; the controller only ever sees the
//! [`Transport`] trait and a single [`TransportError`] type.

use crate::http::HttpTransport;
use crate::server::{ServerConfig, TransportConfig, TransportKind};
use crate::sse::{SseTransport, DEFAULT_STALE_AFTER};
use crate::stdio::StdioTransport;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Uniform failure reported by every adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// An operation exceeded its time budget.
    pub fn timeout(operation: &str, after: Duration) -> Self {
        Self::new(format!("{operation} timed out after {}", format_duration(after)))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::new(format!("IO error: {e}"))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("Invalid JSON: {e}"))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::new(format!("Connection failed: {e}"))
        } else {
            Self::new(format!("Request failed: {e}"))
        }
    }
}

pub(crate) fn format_duration(d: Duration) -> String {
    if d.as_millis() % 1000 == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Connection to one MCP server.
///
/// `connect` may be dropped mid-flight when a stop cancels a start; adapters
/// must record any resource they allocate before the next await point so
/// that `disconnect`/`force_terminate` can release it.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Establish the connection.
    async fn connect(&mut self) -> TransportResult<()>;

    /// Release the connection gracefully.
    async fn disconnect(&mut self) -> TransportResult<()>;

    /// Check that the connection is still usable.
    async fn healthcheck(&mut self) -> TransportResult<()>;

    /// Release everything without waiting on the peer.
    async fn force_terminate(&mut self) {}

    /// Facts worth showing in status output (pid, session id, ...).
    fn metadata(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Builds adapters for server configs.
pub trait TransportFactory: Send + Sync {
    /// Create an unconnected adapter. `timeout` bounds the adapter's own
    /// waits (process exit, HTTP requests).
    fn create(&self, config: &ServerConfig, timeout: Duration)
        -> TransportResult<Box<dyn Transport>>;
}

/// Factory producing the real stdio/http/sse adapters.
#[derive(Debug, Clone, Copy)]
pub struct DefaultTransportFactory {
    sse_stale_after: Duration,
}

impl DefaultTransportFactory {
    pub fn new() -> Self {
        Self {
            sse_stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Window after which a silent SSE stream fails its healthcheck.
    pub fn with_sse_stale_after(mut self, stale_after: Duration) -> Self {
        self.sse_stale_after = stale_after;
        self
    }
}

impl Default for DefaultTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(
        &self,
        config: &ServerConfig,
        timeout: Duration,
    ) -> TransportResult<Box<dyn Transport>> {
        let transport: Box<dyn Transport> = match &config.transport {
            TransportConfig::Stdio(c) => Box::new(StdioTransport::new(&config.name, c, timeout)),
            TransportConfig::Http(c) => Box::new(HttpTransport::new(&config.name, c, timeout)?),
            TransportConfig::Sse(c) => Box::new(
                SseTransport::new(&config.name, c, timeout)?
                    .with_stale_after(self.sse_stale_after),
            ),
        };
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::new("connection refused");
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn test_timeout_message() {
        let err = TransportError::timeout("connect", Duration::from_secs(5));
        assert_eq!(err.to_string(), "connect timed out after 5s");
        let err = TransportError::timeout("disconnect", Duration::from_millis(250));
        assert_eq!(err.to_string(), "disconnect timed out after 250ms");
    }

    #[test]
    fn test_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: TransportError = io.into();
        assert!(err.message.contains("pipe closed"));
    }

    #[test]
    fn test_default_factory_dispatches_by_kind() {
        let factory = DefaultTransportFactory::new().with_sse_stale_after(Duration::from_secs(5));
        let timeout = Duration::from_secs(1);

        let stdio = ServerConfig::stdio("s", "cat", Vec::<String>::new());
        assert_eq!(
            factory.create(&stdio, timeout).unwrap().kind(),
            TransportKind::Stdio
        );

        let http = ServerConfig::http("h", "http://127.0.0.1:1/mcp");
        assert_eq!(
            factory.create(&http, timeout).unwrap().kind(),
            TransportKind::Http
        );

        let sse = ServerConfig::sse("e", "http://127.0.0.1:1/sse");
        assert_eq!(
            factory.create(&sse, timeout).unwrap().kind(),
            TransportKind::Sse
        );
    }
}
