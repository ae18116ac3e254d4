//! Error types for seckill operations
//!
//! Contention outcomes (sold out, duplicate order, lock busy) are not errors;
//! see [`crate::OrderRejection`]. Everything here is either a store fault or
//! an invariant violation.

use std::time::Duration;
use thiserror::Error;

/// Faults talking to the KV store or the durable store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{backend} unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("{backend} {operation} timed out after {after:?}")]
    Timeout {
        backend: String,
        operation: String,
        after: Duration,
    },

    #[error("Value at {key} has the wrong type: {reason}")]
    WrongType { key: String, reason: String },

    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },
}

impl StoreError {
    pub fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(backend: impl Into<String>, operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            backend: backend.into(),
            operation: operation.into(),
            after,
        }
    }
}

/// Broken assumptions. Logged and surfaced, never a panic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantError {
    #[error("Id sequence overflow in namespace {namespace}: {sequence} exceeds {max}")]
    SequenceOverflow {
        namespace: String,
        sequence: i64,
        max: u64,
    },

    #[error("Id sequence for namespace {namespace} returned non-positive value {sequence}")]
    SequenceUnderflow { namespace: String, sequence: i64 },

    #[error("Id timestamp overflow: {elapsed_secs}s since anchor exceeds {max_secs}s")]
    TimestampOverflow { elapsed_secs: i64, max_secs: u64 },

    #[error("Clock {now_secs}s is before epoch anchor {anchor_secs}s")]
    ClockBeforeEpoch { now_secs: i64, anchor_secs: i64 },

    #[error("Lock {lock_key} is not held by the releasing token")]
    LockNotHeld { lock_key: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all seckill errors.
#[derive(Debug, Clone, Error)]
pub enum SeckillError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl SeckillError {
    /// Store faults are worth retrying at the caller's discretion; broken
    /// invariants and bad configuration are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            SeckillError::Store(_) => true,
            SeckillError::Invariant(_) | SeckillError::Config(_) => false,
        }
    }
}

/// Result type alias for seckill operations.
pub type SeckillResult<T> = Result<T, SeckillError>;

// =============================================================================
// TESTS
// =============================================================================
