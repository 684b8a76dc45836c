//! Collaborator error types.
//!
//! Failures reported by the persistence, stream, and presence collaborators.
//! The engine decides per failure whether it is surfaced (failed send, failed
//! history load) or absorbed (presence, stream drops that are retried).

use std::time::Duration;

use thiserror::Error;

/// Error reported by a backend collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Request did not reach the backend or the connection broke.
    #[error("network error: {0}")]
    Network(String),

    /// No response within the allowed window.
    #[error("request timed out after {elapsed:?}")]
    Timeout {
        /// How long we waited.
        elapsed: Duration,
    },

    /// Target row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend refused the request (policy, validation).
    #[error("rejected by backend: {0}")]
    Rejected(String),
}

impl CollaboratorError {
    /// Returns true if this error may succeed on retry.
    ///
    /// Rejections and missing rows are final; network failures and timeouts
    /// are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout { .. })
    }
}
