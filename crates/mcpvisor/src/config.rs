//! Lifecycle manager configuration.

use crate::quarantine::DEFAULT_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for [`McpManager`](crate::McpManager). Every field has a default
/// so a partial JSON document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Consecutive failures before a server is quarantined.
    pub quarantine_threshold: u32,

    /// Lift quarantine automatically after this many seconds. `None` keeps
    /// it until cleared by hand.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine_cooldown_secs: Option<u64>,

    /// How long a started server must stay healthy before its failure
    /// counter is reset.
    pub grace_period_ms: u64,

    /// Budget for a graceful disconnect before force-terminating.
    pub teardown_timeout_ms: u64,

    /// Period between background healthchecks of a running server.
    pub health_interval_ms: u64,

    /// Budget for a single healthcheck.
    pub health_timeout_ms: u64,

    /// Connect timeout for servers that don't set one.
    pub default_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            quarantine_threshold: DEFAULT_THRESHOLD,
            quarantine_cooldown_secs: None,
            grace_period_ms: 5_000,
            teardown_timeout_ms: 10_000,
            health_interval_ms: 30_000,
            health_timeout_ms: 5_000,
            default_timeout_secs: 30,
        }
    }
}

impl ManagerConfig {
    pub fn with_quarantine_threshold(mut self, threshold: u32) -> Self {
        self.quarantine_threshold = threshold;
        self
    }

    pub fn with_quarantine_cooldown(mut self, cooldown: Option<Duration>) -> Self {
        self.quarantine_cooldown_secs = cooldown.map(|d| d.as_secs());
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_ms = duration_ms(grace);
        self
    }

    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval_ms = duration_ms(interval);
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    pub fn quarantine_cooldown(&self) -> Option<Duration> {
        self.quarantine_cooldown_secs.map(Duration::from_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    /// Never zero, so the monitor loop can't spin.
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms.max(1))
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.quarantine_threshold, 3);
        assert_eq!(config.quarantine_cooldown(), None);
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert_eq!(config.teardown_timeout(), Duration::from_secs(10));
        assert_eq!(config.default_timeout_secs, 30);
    }

    #[test]
    fn test_partial_json() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{"quarantine_threshold": 5, "quarantine_cooldown_secs": 60}"#)
                .unwrap();
        assert_eq!(config.quarantine_threshold, 5);
        assert_eq!(config.quarantine_cooldown(), Some(Duration::from_secs(60)));
        assert_eq!(config.grace_period_ms, 5_000);
    }

    #[test]
    fn test_builders() {
        let config = ManagerConfig::default()
            .with_grace_period(Duration::from_millis(50))
            .with_teardown_timeout(Duration::from_millis(200))
            .with_health_interval(Duration::ZERO)
            .with_quarantine_threshold(2);
        assert_eq!(config.grace_period_ms, 50);
        assert_eq!(config.teardown_timeout_ms, 200);
        assert_eq!(config.health_interval(), Duration::from_millis(1));
        assert_eq!(config.quarantine_threshold, 2);
    }
}
