//! In-process stand-in for the managed database service.
//!
//! Sessions expire after `idle_ttl` without a ping or statement, the same
//! way the real backend reclaims inactive sessions. Expiry is evaluated
//! lazily whenever a session is touched.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::time::Clock;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::RemoteError;
use crate::remote::RemoteService;

#[derive(Debug, Clone, Copy)]
struct RemoteSession {
    created_ms: u64,
    last_used_ms: u64,
}

/// Per-operation call counters, incremented before the call is resolved.
#[derive(Debug, Default)]
pub struct RemoteCalls {
    pub create: AtomicU64,
    pub ping: AtomicU64,
    pub delete: AtomicU64,
    pub exists: AtomicU64,
    pub execute: AtomicU64,
}

impl RemoteCalls {
    pub fn pings(&self) -> u64 {
        self.ping.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> u64 {
        self.create.load(Ordering::SeqCst)
    }

    pub fn executes(&self) -> u64 {
        self.execute.load(Ordering::SeqCst)
    }
}

pub struct InMemoryRemote {
    clock: Arc<dyn Clock>,
    idle_ttl_ms: Option<u64>,
    latency: Option<Duration>,
    sessions: Mutex<HashMap<String, RemoteSession>>,
    unavailable: AtomicBool,
    calls: RemoteCalls,
}

impl InMemoryRemote {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            idle_ttl_ms: None,
            latency: None,
            sessions: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            calls: RemoteCalls::default(),
        }
    }

    /// Expire sessions that go unused for longer than `ttl`.
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl_ms = Some(ttl.as_millis() as u64);
        self
    }

    /// Delay every operation by `latency` (tokio time).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Simulate an outage: every operation fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        info!(unavailable, "remote availability switched");
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> &RemoteCalls {
        &self.calls
    }

    /// Ids of sessions that currently exist (after applying expiry).
    pub fn live_sessions(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, s| !self.is_expired(s, now));
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Age of a live session in milliseconds.
    pub fn session_age_ms(&self, session_id: &str) -> Option<u64> {
        let now = self.clock.now_ms();
        self.sessions
            .lock()
            .get(session_id)
            .map(|s| now.saturating_sub(s.created_ms))
    }

    fn is_expired(&self, s: &RemoteSession, now_ms: u64) -> bool {
        self.idle_ttl_ms
            .is_some_and(|ttl| now_ms.saturating_sub(s.last_used_ms) > ttl)
    }

    async fn enter(&self, counter: &AtomicU64) -> Result<(), RemoteError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }

    /// Looks up a live session, dropping it first if it has expired.
    /// `touch` refreshes its remote-side idle timer.
    fn lookup(&self, session_id: &str, touch: bool) -> Result<(), RemoteError> {
        let now = self.clock.now_ms();
        let mut sessions = self.sessions.lock();

        let expired = match sessions.get(session_id) {
            None => return Err(RemoteError::NotFound(session_id.to_string())),
            Some(s) => self.is_expired(s, now),
        };

        if expired {
            sessions.remove(session_id);
            debug!(session_id, "remote session expired after idle ttl");
            return Err(RemoteError::NotFound(session_id.to_string()));
        }

        if touch {
            if let Some(s) = sessions.get_mut(session_id) {
                s.last_used_ms = now;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteService for InMemoryRemote {
    async fn create_session(&self) -> Result<String, RemoteError> {
        self.enter(&self.calls.create).await?;

        let now = self.clock.now_ms();
        let session_id = Uuid::new_v4().to_string();
        self.sessions.lock().insert(
            session_id.clone(),
            RemoteSession {
                created_ms: now,
                last_used_ms: now,
            },
        );

        debug!(session_id = %session_id, "remote session created");
        Ok(session_id)
    }

    async fn ping(&self, session_id: &str) -> Result<(), RemoteError> {
        self.enter(&self.calls.ping).await?;
        self.lookup(session_id, true)
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), RemoteError> {
        self.enter(&self.calls.delete).await?;
        self.lookup(session_id, false)?;
        self.sessions.lock().remove(session_id);

        debug!(session_id, "remote session deleted");
        Ok(())
    }

    async fn exists(&self, session_id: &str) -> Result<bool, RemoteError> {
        self.enter(&self.calls.exists).await?;
        match self.lookup(session_id, false) {
            Ok(()) => Ok(true),
            Err(RemoteError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn execute(&self, session_id: &str, statement: &str) -> Result<u64, RemoteError> {
        self.enter(&self.calls.execute).await?;
        self.lookup(session_id, true)?;

        debug!(session_id, statement, "statement executed");
        Ok(1)
    }
}
