//! Core types for LEXIS
//!
//! Defines the data records shared between the store and its hosts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Reserved path that receives every mutation
pub const WILDCARD_PATH: &str = "*";

/// Default namespace that module scopes live under
pub const MODULES_NAMESPACE: &str = "modules";

/// Timestamp in milliseconds since Unix epoch
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(chrono::Utc::now().timestamp_millis() as u64)
    }

    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Identifier handed out by the subscription registry
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

/// Kind of a recorded mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    /// Value replaced
    Set,
    /// Object value shallow-merged into the existing object
    Merge,
    /// Path removed from the tree
    Unset,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::Set => "set",
            MutationKind::Merge => "merge",
            MutationKind::Unset => "unset",
        };
        f.write_str(name)
    }
}

/// One committed mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: MutationKind,
    pub path: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub timestamp: Timestamp,
    pub source: String,
}

/// Persisted state envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEnvelope {
    pub version: String,
    pub timestamp: Timestamp,
    /// Path -> value, or top-level key -> branch when `top_level` is set
    pub data: serde_json::Map<String, Value>,
    /// Keys of `data` are literal top-level keys, not dot paths
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub top_level: bool,
}

impl PersistedEnvelope {
    pub fn new(version: impl Into<String>, data: serde_json::Map<String, Value>) -> Self {
        Self {
            version: version.into(),
            timestamp: Timestamp::now(),
            data,
            top_level: false,
        }
    }

    /// Envelope holding whole top-level branches
    pub fn top_level(version: impl Into<String>, data: serde_json::Map<String, Value>) -> Self {
        Self {
            top_level: true,
            ..Self::new(version, data)
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
