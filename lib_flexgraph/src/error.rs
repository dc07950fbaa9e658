//! # Error Taxonomy
//!
//! Store failures are transient and abort only the current poll cycle.
//! Parse failures are per record and never abort a cycle. A capacity
//! violation is a programming error and stops the poller.

use std::time::Duration;

use thiserror::Error;

/// Failures talking to the external record store.
///
/// Both variants are the "store unavailable" condition: the caller retries
/// after a backoff and keeps everything already buffered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Every store failure is retried on the next cycle.
    pub fn is_transient(&self) -> bool {
        true
    }
}

#[cfg(feature = "connections")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Per-record failures raised by the payload parser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed key '{key}': {reason}")]
    MalformedKey { key: String, reason: String },

    #[error("malformed payload for '{key}': {reason}")]
    MalformedPayload { key: String, reason: String },

    #[error("invalid timestamp for '{key}': {value}")]
    InvalidTimestamp { key: String, value: String },
}

impl ParseError {
    /// Short label used in logs and diagnostics counters.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::MalformedKey { .. } => "malformed_key",
            ParseError::MalformedPayload { .. } => "malformed_payload",
            ParseError::InvalidTimestamp { .. } => "invalid_timestamp",
        }
    }
}

/// Errors surfaced by the registry, the snapshot builder and the poller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("instrument not found: {0}")]
    NotFound(String),

    #[error("capacity invariant violated: {len} records in a buffer of capacity {capacity}")]
    CapacityInvariantViolation { len: usize, capacity: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Rejected engine configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("key pattern '{pattern}' must have exactly three ':'-separated segments")]
    KeyPattern { pattern: String },
}
