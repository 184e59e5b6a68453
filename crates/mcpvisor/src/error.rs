//! MCP lifecycle error types.

use crate::transport::TransportError;
use thiserror::Error;

/// Result type for lifecycle operations.
pub type McpResult<T> = Result<T, McpError>;

/// Errors returned by the registry and the lifecycle controller.
#[derive(Debug, Error)]
pub enum McpError {
    /// Invalid server configuration (missing field, duplicate name, ...).
    #[error("Invalid server configuration: {0}")]
    Validation(String),

    /// Server not found.
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// Server is quarantined after repeated failures.
    #[error("Server '{0}' is quarantined after repeated failures; clear the quarantine to retry")]
    Quarantined(String),

    /// Server is disabled in the registry.
    #[error("Server '{0}' is disabled")]
    Disabled(String),

    /// Transport failure. Only surfaced by direct adapter use; the
    /// controller converts these into an `Error` state instead.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a server-not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::ServerNotFound(what.into())
    }

    /// Whether the operator must run `clear-quarantine` before retrying.
    pub fn is_quarantined(&self) -> bool {
        matches!(self, Self::Quarantined(_))
    }
}
