//! State snapshot functionality

use lexis_core::{HistoryEntry, StateError, StateResult, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A point-in-time copy of the state tree and its history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Unique snapshot id
    pub id: String,
    /// Timestamp of snapshot creation
    pub timestamp: Timestamp,
    /// Deep copy of the tree
    pub state: Value,
    /// Copy of the mutation history, oldest first
    pub history: Vec<HistoryEntry>,
}

impl StateSnapshot {
    /// Create a new snapshot from a tree and its history
    pub fn new(state: Value, history: Vec<HistoryEntry>) -> Self {
        Self {
            id: format!("snapshot_{}", uuid::Uuid::new_v4().simple()),
            timestamp: Timestamp::now(),
            state,
            history,
        }
    }

    /// Check the snapshot can replace a live tree
    pub fn verify(&self) -> StateResult<()> {
        if self.id.trim().is_empty() {
            return Err(StateError::MalformedSnapshot("missing snapshot id".to_string()));
        }
        if !self.state.is_object() {
            return Err(StateError::MalformedSnapshot(format!(
                "state must be an object, found {}",
                type_name(&self.state)
            )));
        }
        Ok(())
    }

    /// Serialize snapshot to JSON
    pub fn to_json(&self) -> StateResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StateError::Serialization(e.to_string()))
    }

    /// Deserialize snapshot from JSON
    pub fn from_json(json: &str) -> StateResult<Self> {
        serde_json::from_str(json).map_err(|e| StateError::MalformedSnapshot(e.to_string()))
    }

    /// Number of top-level keys
    pub fn len(&self) -> usize {
        self.state.as_object().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
