//! Error types for the store crate.

use thiserror::Error;

use crate::types::{Kind, ObjectKey};

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Store error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// The object does not exist. Expected absence, not a failure.
    #[error("{kind} '{key}' not found")]
    NotFound { kind: Kind, key: ObjectKey },

    /// Create lost a race with another creator of the same key.
    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: Kind, key: ObjectKey },

    /// Version token mismatch: a concurrent writer got there first.
    #[error("conflict on {kind} '{key}': expected version {expected}, stored version {actual}")]
    Conflict {
        kind: Kind,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    /// Record rejected at the write boundary.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// An object of one kind was used where another was required.
    #[error("expected a {expected} object, got {actual}")]
    UnexpectedKind { expected: Kind, actual: Kind },

    /// The store could not serve the request right now.
    #[error("store operation '{operation}' unavailable: {reason}")]
    Unavailable { operation: String, reason: String },

    /// A watcher fell behind and missed events; it must resync.
    #[error("{kind} watch lagged, {skipped} events skipped")]
    Lagged { kind: Kind, skipped: u64 },

    /// The watch stream ended.
    #[error("watch channel closed")]
    ChannelClosed,
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: Kind, key: ObjectKey) -> Self {
        Self::NotFound { kind, key }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: Kind, key: ObjectKey) -> Self {
        Self::AlreadyExists { kind, key }
    }

    /// Create a version conflict error.
    pub fn conflict(kind: Kind, key: ObjectKey, expected: u64, actual: u64) -> Self {
        Self::Conflict {
            kind,
            key,
            expected,
            actual,
        }
    }

    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create an unexpected kind error.
    pub fn unexpected_kind(expected: Kind, actual: Kind) -> Self {
        Self::UnexpectedKind { expected, actual }
    }

    /// Create an unavailable error.
    pub fn unavailable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Optimistic-concurrency races: retried without growing backoff.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::AlreadyExists { .. })
    }
}
