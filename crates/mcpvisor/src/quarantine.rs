//! Failure-count circuit breaker.
//!
//! Consecutive start or health failures accumulate; at the threshold the
//! server is quarantined and the controller refuses to start it until the
//! quarantine is cleared (manually, or by the optional cooldown).

use crate::server::ServerId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Default number of consecutive failures before quarantine.
pub const DEFAULT_THRESHOLD: u32 = 3;

/// Quarantine bookkeeping for one server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuarantineState {
    pub consecutive_failure_count: u32,
    pub quarantined: bool,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Quarantine policy shared by all servers of a manager.
#[derive(Debug)]
pub struct QuarantinePolicy {
    threshold: u32,
    cooldown: Option<Duration>,
    states: Mutex<HashMap<ServerId, QuarantineState>>,
}

impl QuarantinePolicy {
    /// `cooldown: None` means quarantine is only ever cleared manually.
    pub fn new(threshold: u32, cooldown: Option<Duration>) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    fn with_state<R>(&self, id: &ServerId, f: impl FnOnce(&mut QuarantineState) -> R) -> R {
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(states.entry(id.clone()).or_default())
    }

    /// Count a failure. Returns `true` when this failure tripped the breaker.
    pub fn on_failure(&self, id: &ServerId, now: DateTime<Utc>) -> bool {
        let threshold = self.threshold;
        self.with_state(id, |state| {
            state.consecutive_failure_count = state.consecutive_failure_count.saturating_add(1);
            state.last_failure_at = Some(now);
            let tripped = !state.quarantined && state.consecutive_failure_count >= threshold;
            if state.consecutive_failure_count >= threshold {
                state.quarantined = true;
            }
            tripped
        })
    }

    /// The server survived its grace period.
    pub fn on_success(&self, id: &ServerId) {
        self.with_state(id, |state| {
            state.consecutive_failure_count = 0;
            state.quarantined = false;
        });
    }

    /// Manual override.
    pub fn clear(&self, id: &ServerId) {
        self.with_state(id, |state| *state = QuarantineState::default());
    }

    /// Whether starts are currently refused. Applies the cooldown, if any.
    pub fn is_quarantined(&self, id: &ServerId, now: DateTime<Utc>) -> bool {
        let cooldown = self.cooldown;
        self.with_state(id, |state| {
            if !state.quarantined {
                return false;
            }
            let expired = match (cooldown, state.last_failure_at) {
                (Some(cooldown), Some(last)) => {
                    (now - last).to_std().unwrap_or(Duration::ZERO) >= cooldown
                }
                _ => false,
            };
            if expired {
                *state = QuarantineState::default();
                return false;
            }
            true
        })
    }

    pub fn state(&self, id: &ServerId) -> QuarantineState {
        self.with_state(id, |state| state.clone())
    }

    pub fn forget(&self, id: &ServerId) {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
    }
}

impl Default for QuarantinePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, None)
    }
}
