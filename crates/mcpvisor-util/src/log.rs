//! Logging setup using tracing.
//!
//! The manager is embedded in a host agent process, so logging must never
//! fight the host over the global subscriber: [`init`] only installs one if
//! nothing else has, and its default filter only covers the mcpvisor crates.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose events the default filter lets through.
const TARGETS: [&str; 2] = ["mcpvisor", "mcpvisor_util"];

/// Verbosity for the mcpvisor crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Write formatted events to stderr. Without it the subscriber only
    /// feeds whatever layers the host adds later.
    pub print: bool,
    /// Level for the mcpvisor crates. `RUST_LOG` replaces the whole filter.
    pub level: LogLevel,
    /// Include file and line in each event.
    pub include_location: bool,
    pub ansi: bool,
}

impl LogConfig {
    /// Filter directive scoping `level` to the mcpvisor crates, e.g.
    /// `mcpvisor=debug,mcpvisor_util=debug`.
    pub fn directive(&self) -> String {
        TARGETS
            .iter()
            .map(|target| format!("{target}={}", self.level.as_str()))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
    }
}

/// Initialize logging with the given configuration.
///
/// Returns `false` when a global subscriber was already installed (by the
/// host or an earlier call); the existing one is left untouched.
pub fn init(config: LogConfig) -> bool {
    let subscriber = tracing_subscriber::registry().with(config.filter());

    if config.print {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(config.ansi)
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location);

        subscriber.with(fmt_layer).try_init().is_ok()
    } else {
        subscriber.try_init().is_ok()
    }
}
