//! Shared utilities for mcpvisor.
//!
//! This crate provides common utilities used across the mcpvisor workspace:
//! - Logging setup with tracing
//! - Config/state path resolution
//! - ULID-based server identifier generation
//! - `$VAR` expansion for secrets passed to child processes
//! - A clock abstraction so tests can control time

pub mod clock;
pub mod env;
pub mod id;
pub mod log;
pub mod path;

pub use clock::{Clock, SystemClock};
pub use env::{expand_env, expand_env_with};
pub use id::{IdPrefix, Identifier};
