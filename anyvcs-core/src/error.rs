//! Error types shared across the version control layer

use std::path::PathBuf;

/// Result type for version control operations
pub type Result<T> = std::result::Result<T, VcsError>;

/// Errors that can occur while talking to a version control backend
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// The backend tool/process is missing or cannot be started. Fatal,
    /// surfaced to the caller without retry.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the operation (conflict, empty commit message,
    /// precondition failure). Surfaced as a typed failure.
    #[error("Backend rejected {op}: {reason}")]
    Rejected { op: &'static str, reason: String },

    /// The backend does not implement this operation (e.g. locking).
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Path not tracked by the repository: {0}")]
    NotFound(PathBuf),

    #[error("Unknown revision: {0}")]
    UnknownRevision(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization error: {0}")]
    State(String),
}

impl From<serde_json::Error> for VcsError {
    fn from(e: serde_json::Error) -> Self {
        VcsError::State(e.to_string())
    }
}

impl VcsError {
    /// Whether the failure is worth retrying after the cache re-queries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VcsError::Rejected { .. })
    }
}
