//! Per-server health and event tracking.
//!
//! History is kept across restarts so a flapping server can be diagnosed;
//! it is only cleared by an explicit [`HealthTracker::reset`].

use crate::server::{ServerId, ServerState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

/// Maximum number of events retained per server.
pub const EVENT_CAPACITY: usize = 50;

/// Number of events shown in compact status output.
pub const DEFAULT_EVENT_LIMIT: usize = 5;

/// Severity of a tracker event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// One entry in a server's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerEvent {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
}

/// Health record of one server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerRecord {
    pub state: ServerState,
    pub started_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Most recent first.
    pub recent_events: VecDeque<TrackerEvent>,
    pub metadata: BTreeMap<String, String>,
}

impl TrackerRecord {
    fn push(&mut self, event: TrackerEvent) {
        self.recent_events.push_front(event);
        self.recent_events.truncate(EVENT_CAPACITY);
    }
}

/// Event logs and uptime for every server the controller has touched.
#[derive(Debug, Default)]
pub struct HealthTracker {
    records: RwLock<HashMap<ServerId, TrackerRecord>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<R>(&self, id: &ServerId, f: impl FnOnce(&mut TrackerRecord) -> R) -> R {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(records.entry(id.clone()).or_default())
    }

    fn read_record<R>(&self, id: &ServerId, f: impl FnOnce(&TrackerRecord) -> R) -> Option<R> {
        let records = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.get(id).map(f)
    }

    /// Append an event.
    pub fn record_event(
        &self,
        id: &ServerId,
        level: EventLevel,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) {
        let event = TrackerEvent {
            timestamp,
            level,
            message: message.into(),
        };
        self.with_record(id, |record| record.push(event));
    }

    /// Up to `limit` events, most recent first.
    pub fn recent_events(&self, id: &ServerId, limit: usize) -> Vec<TrackerEvent> {
        self.read_record(id, |record| {
            record.recent_events.iter().take(limit).cloned().collect()
        })
        .unwrap_or_default()
    }

    /// Number of retained events.
    pub fn event_count(&self, id: &ServerId) -> usize {
        self.read_record(id, |record| record.recent_events.len())
            .unwrap_or(0)
    }

    /// Record a state transition. Entering `Running` stamps `started_at`;
    /// any other state clears it.
    pub fn set_state(&self, id: &ServerId, state: ServerState, now: DateTime<Utc>) {
        self.with_record(id, |record| {
            if state == ServerState::Running {
                if record.state != ServerState::Running || record.started_at.is_none() {
                    record.started_at = Some(now);
                }
                record.error_message = None;
            } else {
                record.started_at = None;
            }
            record.state = state;
        });
    }

    pub fn state(&self, id: &ServerId) -> ServerState {
        self.read_record(id, |record| record.state).unwrap_or_default()
    }

    pub fn set_error(&self, id: &ServerId, message: Option<String>) {
        self.with_record(id, |record| record.error_message = message);
    }

    pub fn error_message(&self, id: &ServerId) -> Option<String> {
        self.read_record(id, |record| record.error_message.clone())
            .flatten()
    }

    /// Replace metadata keys reported by the adapter.
    pub fn set_metadata<I>(&self, id: &ServerId, entries: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.with_record(id, |record| record.metadata.extend(entries));
    }

    pub fn metadata(&self, id: &ServerId) -> BTreeMap<String, String> {
        self.read_record(id, |record| record.metadata.clone())
            .unwrap_or_default()
    }

    /// Time since the server entered `Running`, or `None` when it isn't.
    pub fn uptime(&self, id: &ServerId, now: DateTime<Utc>) -> Option<Duration> {
        self.read_record(id, |record| match (record.state, record.started_at) {
            (ServerState::Running, Some(started)) => {
                Some((now - started).to_std().unwrap_or(Duration::ZERO))
            }
            _ => None,
        })
        .flatten()
    }

    /// Snapshot of a record.
    pub fn record(&self, id: &ServerId) -> Option<TrackerRecord> {
        self.read_record(id, Clone::clone)
    }

    /// Clear history (events, error and metadata). State and uptime of a
    /// live server are kept.
    pub fn reset(&self, id: &ServerId) {
        self.with_record(id, |record| {
            record.recent_events.clear();
            record.error_message = None;
            record.metadata.clear();
        });
    }

    /// Drop everything known about a server.
    pub fn forget(&self, id: &ServerId) {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
    }
}
