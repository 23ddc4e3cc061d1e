//! Error types for the reconciler crate.

use std::fmt;

use harbor_store::ObjectKey;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone)]
pub enum Error {
    /// A store read or write failed.
    Store(harbor_store::Error),
    /// Invalid configuration.
    InvalidConfig { reason: String },
    /// Every watch stream ended.
    WatchFailed { reason: String },
    /// A worker or controller task died.
    TaskFailed { task: String, reason: String },
    /// The owner has no uid, so children cannot reference it.
    OwnerUidMissing { owner: ObjectKey },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => {
                write!(f, "store error: {err}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
            Self::WatchFailed { reason } => {
                write!(f, "watch failed: {reason}")
            }
            Self::TaskFailed { task, reason } => {
                write!(f, "task '{task}' failed: {reason}")
            }
            Self::OwnerUidMissing { owner } => {
                write!(f, "owner '{owner}' has no uid; it must be read from the store first")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<harbor_store::Error> for Error {
    fn from(err: harbor_store::Error) -> Self {
        Self::Store(err)
    }
}

impl Error {
    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a watch failed error.
    pub fn watch_failed(reason: impl Into<String>) -> Self {
        Self::WatchFailed {
            reason: reason.into(),
        }
    }

    /// Create a task failed error.
    pub fn task_failed(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TaskFailed {
            task: task.into(),
            reason: reason.into(),
        }
    }

    /// Create an owner uid missing error.
    pub fn owner_uid_missing(owner: ObjectKey) -> Self {
        Self::OwnerUidMissing { owner }
    }

    /// Optimistic-concurrency race: retry soon, without growing backoff.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_conflict())
    }
}
