//! Error types for lifecycle orchestration.

use directory::DirectoryError;
use thiserror::Error;

/// Errors that terminate an orchestration run outright.
///
/// Recoverable per-item failures do not use this type; they are accumulated
/// into the run's report instead.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Request rejected before any remote call was made.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced user does not exist.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// A directory call failed in a way the run cannot absorb
    /// (authentication failures always land here).
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// A worker task died instead of reporting an outcome.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    /// Whether the whole run was invalidated by rejected credentials.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Directory(e) if e.is_auth_failure())
    }
}
