use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::time::Clock;
use pool::{InMemoryRemote, RemoteError, RemoteService};
use tokio::sync::{Notify, Semaphore};

/// In-memory remote whose pings can be held open and whose session
/// creation can be failed on demand.
pub struct GatedRemote {
    pub inner: InMemoryRemote,
    pub ping_started: Notify,
    gated: AtomicBool,
    gate: Semaphore,
    fail_create: AtomicBool,
}

impl GatedRemote {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: InMemoryRemote::new(clock),
            ping_started: Notify::new(),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            fail_create: AtomicBool::new(false),
        }
    }

    /// Pings block until `open_gate` is called.
    pub fn close_gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn open_gate(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(1_000);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteService for GatedRemote {
    async fn create_session(&self) -> Result<String, RemoteError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("create rejected".into()));
        }
        self.inner.create_session().await
    }

    async fn ping(&self, session_id: &str) -> Result<(), RemoteError> {
        if self.gated.load(Ordering::SeqCst) {
            self.ping_started.notify_one();
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| RemoteError::Unavailable("gate closed".into()))?;
            permit.forget();
        }
        self.inner.ping(session_id).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), RemoteError> {
        self.inner.delete_session(session_id).await
    }

    async fn exists(&self, session_id: &str) -> Result<bool, RemoteError> {
        self.inner.exists(session_id).await
    }

    async fn execute(&self, session_id: &str, statement: &str) -> Result<u64, RemoteError> {
        self.inner.execute(session_id, statement).await
    }
}
