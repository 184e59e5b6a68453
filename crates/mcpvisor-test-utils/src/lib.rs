//! Testing utilities, fixtures, and fakes for mcpvisor.
//!
//! - **Fakes**: scripted transport adapters and a factory that hands them out
//! - **Clock**: a manually advanced clock for uptime and cooldown tests
//! - **Fixtures**: temporary registry files
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use mcpvisor::{ManagerConfig, McpManager, ServerRegistry};
//! use mcpvisor_test_utils::{ConnectOutcome, FakeTransportFactory};
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn test_failing_server() {
//!     let factory = FakeTransportFactory::new(ConnectOutcome::fail("refused"));
//!     let manager = McpManager::new(ServerRegistry::in_memory(), ManagerConfig::default())
//!         .with_transport_factory(Arc::new(factory.clone()));
//!     // ...
//!     assert_eq!(factory.connect_calls(), 1);
//! }
//! ```

pub mod clock;
pub mod fakes;
pub mod fixtures;

pub use clock::ManualClock;
pub use fakes::{ConnectOutcome, FakeTransport, FakeTransportFactory};
pub use fixtures::TestRegistry;

use mcpvisor_util::log::{self, LogConfig, LogLevel};

/// Install a debug-level subscriber once per test binary. Output goes to
/// stderr only when `MCPVISOR_TEST_LOG` is set.
pub fn init_test_logging() {
    let config = LogConfig {
        print: std::env::var_os("MCPVISOR_TEST_LOG").is_some(),
        level: LogLevel::Debug,
        include_location: true,
        ansi: false,
    };
    let _ = log::init(config);
}
