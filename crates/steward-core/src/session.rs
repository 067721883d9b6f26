use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::StewardResult;

/// Opaque session payload owned by the agent engine.
///
/// The store never looks inside; it only needs the payload to be
/// serializable. Callers convert their own session types with
/// [`SessionState::from_serializable`] and [`SessionState::to_typed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState(serde_json::Value);

impl SessionState {
    /// Wraps an already-built JSON value.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Serializes any caller type into an opaque state.
    pub fn from_serializable<T: Serialize>(value: &T) -> StewardResult<Self> {
        Ok(Self(serde_json::to_value(value)?))
    }

    /// Reconstructs a caller type from the opaque state.
    pub fn to_typed<T: DeserializeOwned>(&self) -> StewardResult<T> {
        Ok(serde_json::from_value(self.0.clone())?)
    }

    /// Borrows the underlying JSON value.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Consumes the state, returning the underlying JSON value.
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Name of the top-level JSON type, used in event summaries.
    pub fn kind(&self) -> &'static str {
        match self.0 {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "bool",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => "object",
        }
    }

    /// Length in bytes of the compact JSON encoding.
    pub fn encoded_len(&self) -> usize {
        self.0.to_string().len()
    }
}

impl From<serde_json::Value> for SessionState {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// A session as persisted by the durable tier.
///
/// Timestamps are owned by the durable tier: `created_at` is set on insert
/// and `updated_at` on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Caller-supplied session id.
    pub session_id: String,
    /// Latest stored state.
    pub state: SessionState,
    /// First insert.
    pub created_at: DateTime<Utc>,
    /// Most recent write.
    pub updated_at: DateTime<Utc>,
}
