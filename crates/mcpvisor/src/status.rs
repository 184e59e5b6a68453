//! Status snapshots returned to callers.

use crate::server::{ServerState, TransportKind};
use crate::tracker::TrackerEvent;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Status of one server, as rendered by `status` and `list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    /// `false` for an unknown id; every other field is then defaulted.
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<TransportKind>,
    pub state: ServerState,
    pub enabled: bool,
    pub quarantined: bool,
    pub error_message: Option<String>,
    /// Whole seconds on the wire.
    #[serde(rename = "tracker_uptime", serialize_with = "serialize_uptime")]
    pub uptime: Option<Duration>,
    pub recent_events_count: usize,
    /// Most recent first.
    pub recent_events: Vec<TrackerEvent>,
    #[serde(rename = "tracker_metadata")]
    pub metadata: BTreeMap<String, String>,
}

impl ServerStatus {
    /// Status of an id that isn't registered.
    pub fn missing() -> Self {
        Self::default()
    }
}

fn serialize_uptime<S>(uptime: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match uptime {
        Some(d) => serializer.serialize_some(&d.as_secs()),
        None => serializer.serialize_none(),
    }
}

/// Lightweight state published to watchers on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSnapshot {
    pub state: ServerState,
    pub quarantined: bool,
    pub error_message: Option<String>,
}

/// Outcome of a one-shot connectivity test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityReport {
    pub success: bool,
    #[serde(rename = "latency_ms", serialize_with = "serialize_latency")]
    pub latency: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectivityReport {
    pub fn passed(latency: Duration) -> Self {
        Self {
            success: true,
            latency,
            error: None,
        }
    }

    pub fn failed(latency: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            latency,
            error: Some(error.into()),
        }
    }
}

fn serialize_latency<S>(latency: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX))
}
