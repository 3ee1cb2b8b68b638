//! Error types for stratadb.

use std::io;
use thiserror::Error;

/// Result type alias for stratadb operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for engine operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Data corruption detected (bad MANIFEST record, comparator mismatch,
    /// missing required recovery fields).
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Resource not found (e.g. no CURRENT file where one is required).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller violated a precondition (level out of range, decreasing
    /// sequence number).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A compaction raced with a concurrent flush and its inputs no longer
    /// describe a consistent level. The compaction must be discarded and
    /// re-picked; the database itself is unaffected.
    #[error("Compaction is obsolete: {0}")]
    CompactionObsolete(String),

    /// Internal invariant violation (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a compaction-obsolete error.
    pub fn compaction_obsolete<S: Into<String>>(msg: S) -> Self {
        Error::CompactionObsolete(msg.into())
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if this error indicates corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// Check if the failed operation may simply be retried later.
    ///
    /// Only obsolete compactions qualify: the planner re-evaluates on the
    /// next tick and picks a consistent input set.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CompactionObsolete(_))
    }
}
