//! Core traits defining LEXIS interfaces
//!
//! Consumers of the store (feature modules, the legacy bridge) program
//! against these traits rather than a concrete store.

use serde_json::Value;
use std::sync::Arc;

/// Result type for LEXIS operations
pub type StateResult<T> = Result<T, crate::error::StateError>;

/// Write validator: returns false to reject the value
pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Read access to a path-addressed state tree
pub trait StateProvider: Send + Sync {
    /// Owned copy of the value at `path`, `None` when absent
    fn get(&self, path: &str) -> Option<Value>;

    /// Value at `path`, or `default` when absent
    fn get_or(&self, path: &str, default: Value) -> Value {
        self.get(path).unwrap_or(default)
    }

    /// Check if a path resolves to a value
    fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }
}

/// Write access to a path-addressed state tree
pub trait StateMutator: StateProvider {
    /// Replace the value at `path`
    fn set(&self, path: &str, value: Value) -> StateResult<()>;

    /// Remove the value at `path`
    fn unset(&self, path: &str) -> StateResult<()>;
}

/// Durable key-value storage the persistence layer writes envelopes to
pub trait DurableStorage: Send + Sync {
    fn get_item(&self, key: &str) -> StateResult<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> StateResult<()>;

    fn remove_item(&self, key: &str) -> StateResult<()>;
}
