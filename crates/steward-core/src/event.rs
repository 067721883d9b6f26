use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SessionState;

/// Kind of state change a [`SessionEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEventType {
    /// First write for a session id.
    Created,
    /// Any later write for the same id.
    Updated,
    /// The session was removed from every tier.
    Deleted,
}

impl SessionEventType {
    /// Stable lowercase tag, as stored in the event table.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SessionEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state-change notification mirrored to auxiliary consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Session the change applies to.
    pub session_id: String,
    /// What happened.
    pub event_type: SessionEventType,
    /// Opaque event payload.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// When the store observed the change.
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    /// Creates an event with an empty payload, stamped now.
    pub fn new(session_id: impl Into<String>, event_type: SessionEventType) -> Self {
        Self {
            session_id: session_id.into(),
            event_type,
            data: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a `created`/`updated` event carrying a summary of the written
    /// state rather than the state itself.
    pub fn written(
        session_id: impl Into<String>,
        event_type: SessionEventType,
        state: &SessionState,
        ttl_secs: Option<u64>,
    ) -> Self {
        let mut event = Self::new(session_id, event_type);
        event.data.insert("kind".into(), state.kind().into());
        event.data.insert("bytes".into(), state.encoded_len().into());
        event.data.insert(
            "ttl_secs".into(),
            ttl_secs.map_or(serde_json::Value::Null, Into::into),
        );
        event
    }

    /// Creates a `deleted` event.
    pub fn deleted(session_id: impl Into<String>) -> Self {
        Self::new(session_id, SessionEventType::Deleted)
    }
}
