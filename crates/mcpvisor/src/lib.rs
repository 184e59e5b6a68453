//! MCP server lifecycle management.
//!
//! mcpvisor defines, starts, monitors and tears down external MCP (Model
//! Context Protocol) servers on behalf of an agent host, so that a broken
//! server can never take the host down with it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌───────────────────┐     ┌─────────────┐
//! │    host     │────▶│  McpManager  │────▶│ Transport adapter │────▶│ MCP server  │
//! │ (agent/CLI) │◀────│              │◀────│ stdio / http / sse│◀────│  (tools)    │
//! └─────────────┘     └──────┬───────┘     └───────────────────┘     └─────────────┘
//!                            │
//!          registry · health tracker · quarantine policy
//! ```
//!
//! State machine of a server:
//!
//! ```text
//! STOPPED ──start──▶ STARTING ──ok──▶ RUNNING ──stop──▶ STOPPING ──▶ STOPPED
//!                       │  └──stop──────────────────────────▲
//!                       └──fail──▶ ERROR ◀──healthcheck fails── RUNNING
//! ```
//!
//! Failures never retry on their own. After a configurable number of
//! consecutive failures a server is quarantined and refuses to start until
//! the quarantine is cleared.
//!
//! # Example
//!
//! ```no_run
//! use mcpvisor::{ManagerConfig, McpManager, ServerConfig, ServerRegistry};
//!
//! # async fn example() -> mcpvisor::McpResult<()> {
//! let registry = ServerRegistry::load("/tmp/mcp_servers.json").await;
//! let manager = McpManager::new(registry, ManagerConfig::default());
//!
//! let id = manager
//!     .install(ServerConfig::stdio(
//!         "filesystem",
//!         "npx",
//!         vec!["-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
//!     ))
//!     .await?;
//!
//! let state = manager.start(&id).await?;
//! println!("{state}: {:?}", manager.get_status(&id).await.error_message);
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
pub mod http;
mod manager;
pub mod protocol;
mod quarantine;
mod registry;
mod server;
pub mod sse;
mod status;
pub mod stdio;
mod tracker;
mod transport;

pub use config::ManagerConfig;
pub use error::{McpError, McpResult};
pub use http::HttpTransport;
pub use manager::McpManager;
pub use quarantine::{QuarantinePolicy, QuarantineState, DEFAULT_THRESHOLD};
pub use registry::ServerRegistry;
pub use server::{
    HttpConfig, ServerConfig, ServerId, ServerState, SseConfig, StdioConfig, TransportConfig,
    TransportKind,
};
pub use sse::SseTransport;
pub use status::{ConnectivityReport, ServerSnapshot, ServerStatus};
pub use stdio::StdioTransport;
pub use tracker::{
    EventLevel, HealthTracker, TrackerEvent, TrackerRecord, DEFAULT_EVENT_LIMIT, EVENT_CAPACITY,
};
pub use transport::{
    DefaultTransportFactory, Transport, TransportError, TransportFactory, TransportResult,
};
