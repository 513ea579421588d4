//! Error types for LEXIS

use thiserror::Error;

/// Main error type for the state store
#[derive(Error, Debug)]
pub enum StateError {
    // ============ Path Errors ============
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path conflict at '{path}': segment '{segment}' is not an object")]
    PathConflict { path: String, segment: String },

    // ============ Mutation Errors ============
    #[error("Validation failed for '{0}'")]
    Validation(String),

    #[error("Mutation depth limit {depth} exceeded while setting '{path}'")]
    RecursionLimit { depth: usize, path: String },

    #[error("Type mismatch at '{path}': {reason}")]
    TypeMismatch { path: String, reason: String },

    // ============ Persistence Errors ============
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("State version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: String, got: String },

    #[error("Persistence disabled")]
    PersistenceDisabled,

    // ============ Snapshot Errors ============
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    Config(String),

    // ============ General Errors ============
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        StateError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}
