//! Terminal events published by monitors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::MonitorStatus;

/// Unique identifier for a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorId(Uuid);

impl MonitorId {
    /// Create a new random monitor id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for MonitorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MonitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind of terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEventType {
    Completed,
    Failed,
    Timeout,
}

/// Event published exactly once when a monitor reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEvent<T> {
    /// Monitor that produced the event.
    pub monitor_id: MonitorId,
    pub event_type: MonitorEventType,
    /// The watched subject.
    pub subject: T,
    /// Final poll status. `None` for timeouts, where the poll function was not consulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MonitorStatus>,
    pub timestamp: DateTime<Utc>,
}

impl<T> MonitorEvent<T> {
    #[must_use]
    pub fn completed(monitor_id: MonitorId, subject: T, at: DateTime<Utc>) -> Self {
        Self {
            monitor_id,
            event_type: MonitorEventType::Completed,
            subject,
            status: Some(MonitorStatus::Done),
            timestamp: at,
        }
    }

    #[must_use]
    pub fn failed(monitor_id: MonitorId, subject: T, at: DateTime<Utc>) -> Self {
        Self {
            monitor_id,
            event_type: MonitorEventType::Failed,
            subject,
            status: Some(MonitorStatus::Failed),
            timestamp: at,
        }
    }

    #[must_use]
    pub fn timeout(monitor_id: MonitorId, subject: T, at: DateTime<Utc>) -> Self {
        Self {
            monitor_id,
            event_type: MonitorEventType::Timeout,
            subject,
            status: None,
            timestamp: at,
        }
    }
}
