pub mod memory;

use async_trait::async_trait;

use crate::error::RemoteError;

/// The remote stateful service sessions live on.
///
/// Implementations must report a deleted or expired session as
/// [`RemoteError::NotFound`] and transient failures as
/// [`RemoteError::Unavailable`].
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn create_session(&self) -> Result<String, RemoteError>;

    async fn ping(&self, session_id: &str) -> Result<(), RemoteError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), RemoteError>;

    async fn exists(&self, session_id: &str) -> Result<bool, RemoteError>;

    /// Runs one statement in a transaction bound to `session_id` and returns
    /// the affected row count.
    async fn execute(&self, session_id: &str, statement: &str) -> Result<u64, RemoteError>;
}
