//! Error types for directory API calls.

use thiserror::Error;

/// Result type alias using [`DirectoryError`].
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Errors surfaced by directory API calls.
///
/// Every variant that originates from an HTTP response carries the status,
/// so callers can decide fatality without re-parsing messages.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Resource absent (404). Often non-fatal: detaching something already
    /// removed, or deleting an already-deleted user.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// Duplicate creation or conflicting update (409).
    #[error("conflict on {resource}: {message}")]
    Conflict { resource: String, message: String },

    /// Authentication or authorization rejected (401/403). Fatal, never
    /// retried.
    #[error("authentication failed (HTTP {status})")]
    AuthFailure { status: u16 },

    /// Rate limited (429). Retried with backoff, honoring `Retry-After`.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Service-side transient failure (5xx) or transport-level failure.
    #[error("service unavailable (HTTP {status:?}): {message}")]
    Unavailable { status: Option<u16>, message: String },

    /// Rejected client-side before any remote call was made.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Any other non-success API response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Transport error from the HTTP client.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Json(#[from] serde_json::Error),
}

impl DirectoryError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Unavailable { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether the error invalidates the whole run (credentials rejected).
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DirectoryError::RateLimited { retry_after_secs: 3 }.is_transient());
        assert!(DirectoryError::Unavailable {
            status: Some(503),
            message: "down".into()
        }
        .is_transient());
        assert!(!DirectoryError::AuthFailure { status: 401 }.is_transient());
        assert!(!DirectoryError::NotFound {
            resource: "user P1".into()
        }
        .is_transient());
        assert!(!DirectoryError::Validation("bad email".into()).is_transient());
    }

    #[test]
    fn test_auth_failure_flag() {
        assert!(DirectoryError::AuthFailure { status: 403 }.is_auth_failure());
        assert!(!DirectoryError::Api {
            status: 400,
            message: "bad request".into()
        }
        .is_auth_failure());
    }
}
