//! Clock abstraction.
//!
//! Uptime must never go backwards while a server runs, so [`SystemClock`]
//! anchors wall-clock time once and advances it with a monotonic
//! [`Instant`].

use chrono::{DateTime, Utc};
use std::time::Instant;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time. Successive calls never decrease.
    fn now(&self) -> DateTime<Utc>;
}

/// Monotonic wall clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor_wall: DateTime<Utc>,
    anchor: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.anchor.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_wall + elapsed
    }
}
