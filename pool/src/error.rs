use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`crate::RemoteService`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("remote unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("no session became available within {timeout:?}")]
    PoolExhausted { timeout: Duration },

    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("invalid pool config: {0}")]
    InvalidConfig(String),

    #[error("pool is closed")]
    Closed,
}

impl From<RemoteError> for PoolError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::NotFound(session_id) => PoolError::SessionNotFound { session_id },
            RemoteError::Unavailable(reason) => PoolError::RemoteUnavailable(reason),
        }
    }
}

impl PoolError {
    /// Whether retrying the same call later can succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::PoolExhausted { .. } | PoolError::RemoteUnavailable(_)
        )
    }
}
