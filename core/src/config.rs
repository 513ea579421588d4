//! Configuration types for LEXIS

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::StateError;
use crate::traits::StateResult;

/// Default storage key for the persisted envelope
pub const DEFAULT_PERSISTENCE_KEY: &str = "lexis_state";

/// Default state schema version
pub const DEFAULT_STATE_VERSION: &str = "1.0.0";

/// State store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Log every mutation at info level
    pub debug: bool,

    /// Record mutations in the history ring
    pub enable_history: bool,

    /// History ring capacity
    pub max_history: usize,

    /// Persist state to durable storage
    pub enable_persistence: bool,

    /// Storage key for the persisted envelope
    pub persistence_key: String,

    /// Schedule a debounced save after every notifying mutation
    pub auto_save: bool,

    /// Debounce quiet period in milliseconds
    pub save_delay_ms: u64,

    /// Version stamped on persisted envelopes; restore requires an exact match
    pub state_version: String,

    /// Top-level branches never persisted by a full save
    pub persist_exclude: Vec<String>,

    /// Maximum nesting of `set` calls made from inside subscriber callbacks
    pub max_notify_depth: usize,

    /// Reject writes through non-object intermediates instead of replacing them
    pub strict_paths: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            debug: false,
            enable_history: true,
            max_history: 50,
            enable_persistence: true,
            persistence_key: DEFAULT_PERSISTENCE_KEY.to_string(),
            auto_save: true,
            save_delay_ms: 1000,
            state_version: DEFAULT_STATE_VERSION.to_string(),
            persist_exclude: vec!["cache".to_string()],
            max_notify_depth: 16,
            strict_paths: false,
        }
    }
}

impl StoreConfig {
    /// Parse configuration from JSON, defaulting missing fields
    pub fn from_json(json: &str) -> StateResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| StateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> StateResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            StateError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> StateResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings the store cannot operate with
    pub fn validate(&self) -> StateResult<()> {
        if self.enable_history && self.max_history == 0 {
            return Err(StateError::Config(
                "max_history must be positive when history is enabled".to_string(),
            ));
        }
        if self.max_notify_depth == 0 {
            return Err(StateError::Config("max_notify_depth must be positive".to_string()));
        }
        if self.enable_persistence && self.persistence_key.trim().is_empty() {
            return Err(StateError::Config("persistence_key must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn save_delay(&self) -> Duration {
        Duration::from_millis(self.save_delay_ms)
    }

    /// Configuration for a purely in-memory store
    pub fn memory_only() -> Self {
        Self {
            enable_persistence: false,
            auto_save: false,
            ..Self::default()
        }
    }
}
