use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use common::logger::warn_if_slow;
use common::time::Clock;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{Span, debug, field, info, instrument, warn};

use crate::config::{FreshnessPolicy, PoolConfig};
use crate::error::{PoolError, RemoteError};
use crate::metrics::PoolCounters;
use crate::model::{
    MaintenanceReport, PoolStatus, Session, SessionLocation, SessionSnapshot,
};
use crate::remote::RemoteService;

const SLOW_REMOTE_CALL: Duration = Duration::from_millis(500);

/// Bookkeeping guarded by the pool's single lock.
///
/// Every session is in exactly one of the three collections. The semaphore
/// never holds more permits than `available.len()`.
struct PoolState {
    available: VecDeque<Session>,
    checked_out: HashMap<String, Session>,
    in_maintenance: HashMap<String, Session>,
    closed: bool,
}

struct PoolInner {
    config: PoolConfig,
    remote: Arc<dyn RemoteService>,
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState>,
    semaphore: Semaphore,
    counters: PoolCounters,
}

impl PoolInner {
    /// Puts a caller's session back. Returns `false` if the pool is closed and
    /// the session was not taken back.
    fn put_back(&self, mut session: Session, confirmed_at_ms: Option<u64>) -> bool {
        if self.config.freshness == FreshnessPolicy::OnConfirmedUse {
            if let Some(ts) = confirmed_at_ms {
                session.last_activity_ms = session.last_activity_ms.max(ts);
            }
        }

        let mut state = self.state.lock();
        state.checked_out.remove(&session.session_id);
        if state.closed {
            return false;
        }
        state.available.push_back(session);
        drop(state);

        self.semaphore.add_permits(1);
        PoolCounters::incr(&self.counters.releases);
        true
    }

    /// Returns a session taken out by a maintenance pass. `original_id` is the
    /// id it was taken out under; recreation may have changed it.
    fn finish_maintenance(&self, original_id: &str, session: Session) -> bool {
        let mut state = self.state.lock();
        state.in_maintenance.remove(original_id);
        if state.closed {
            return false;
        }
        state.available.push_back(session);
        drop(state);

        self.semaphore.add_permits(1);
        true
    }

    async fn discard(&self, session_id: &str) {
        match self.remote.delete_session(session_id).await {
            Ok(()) => debug!(session_id, "discarded session deleted on remote"),
            Err(e) => debug!(session_id, error = %e, "discarded session could not be deleted"),
        }
    }

    /// `discard` for synchronous drop paths. Without a runtime to run the
    /// delete on, the remote session is left behind and counted.
    fn discard_detached(self: &Arc<Self>, session_id: String) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                handle.spawn(async move { inner.discard(&session_id).await });
            }
            Err(_) => {
                PoolCounters::incr(&self.counters.orphaned);
                warn!(
                    session_id = %session_id,
                    "no runtime to delete dropped session; remote session left behind"
                );
            }
        }
    }
}

/// A session taken out of the available set by a maintenance pass.
///
/// Goes back to the pool when dropped, so a pass that is cancelled mid-ping
/// still returns everything it claimed.
struct MaintenanceClaim {
    inner: Arc<PoolInner>,
    original_id: String,
    session: Session,
    returned: bool,
}

impl MaintenanceClaim {
    async fn complete(mut self) {
        self.returned = true;
        let inner = Arc::clone(&self.inner);
        let session = self.session.clone();
        if !inner.finish_maintenance(&self.original_id, session.clone()) {
            inner.discard(&session.session_id).await;
        }
    }
}

impl Drop for MaintenanceClaim {
    fn drop(&mut self) {
        if self.returned {
            return;
        }
        debug!(session_id = %self.session.session_id, "maintenance interrupted; returning session");
        if !self
            .inner
            .finish_maintenance(&self.original_id, self.session.clone())
        {
            self.inner.discard_detached(self.session.session_id.clone());
        }
    }
}

/// Fixed-size pool of remote sessions with lazily triggered keep-alive pings.
///
/// The pool never pings on its own; something has to call
/// [`Pool::maintain`] (see [`crate::MaintenanceTask`]).
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Pool {
    /// Validates `config` and creates `config.size` sessions on the remote.
    ///
    /// If any creation fails the sessions created so far are deleted and the
    /// error is returned.
    #[instrument(skip_all, target = "pool", fields(size = config.size))]
    pub async fn new(
        config: PoolConfig,
        remote: Arc<dyn RemoteService>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let mut available = VecDeque::with_capacity(config.size);
        for _ in 0..config.size {
            match remote.create_session().await {
                Ok(session_id) => available.push_back(Session::new(session_id, clock.now_ms())),
                Err(e) => {
                    warn!(
                        error = %e,
                        created = available.len(),
                        "initial session creation failed; rolling back"
                    );
                    for s in &available {
                        if let Err(e) = remote.delete_session(&s.session_id).await {
                            debug!(session_id = %s.session_id, error = %e, "rollback delete failed");
                        }
                    }
                    return Err(PoolError::RemoteUnavailable(e.to_string()));
                }
            }
        }

        info!(
            size = config.size,
            ping_interval_ms = config.ping_interval_ms(),
            acquire_timeout_ms = config.acquire_timeout.as_millis() as u64,
            freshness = %config.freshness,
            check_on_release = config.check_on_release,
            "session pool ready"
        );

        let permits = available.len();
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                remote,
                clock,
                state: Mutex::new(PoolState {
                    available,
                    checked_out: HashMap::new(),
                    in_maintenance: HashMap::new(),
                    closed: false,
                }),
                semaphore: Semaphore::new(permits),
                counters: PoolCounters::default(),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn counters(&self) -> &PoolCounters {
        &self.inner.counters
    }

    /// Checks out a session, waiting up to `acquire_timeout`.
    ///
    /// Under [`FreshnessPolicy::OnCheckout`] this stamps the session's
    /// activity with the current time before the caller has used it.
    #[instrument(skip(self), target = "pool", fields(session_id = field::Empty))]
    pub async fn acquire(&self) -> Result<PooledSession, PoolError> {
        let inner = &self.inner;
        let timeout = inner.config.acquire_timeout;

        let permit = tokio::time::timeout(timeout, inner.semaphore.acquire())
            .await
            .map_err(|_| {
                PoolCounters::incr(&inner.counters.exhausted);
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "no session available before timeout"
                );
                PoolError::PoolExhausted { timeout }
            })?
            .map_err(|_| PoolError::Closed)?;
        // Given back by `put_back` once the session returns.
        permit.forget();

        let session = {
            let mut state = inner.state.lock();
            // Only reachable when `close` drained the pool after we got a permit.
            let Some(mut session) = state.available.pop_front() else {
                return Err(PoolError::Closed);
            };
            if inner.config.freshness == FreshnessPolicy::OnCheckout {
                session.last_activity_ms = inner.clock.now_ms();
            }
            state
                .checked_out
                .insert(session.session_id.clone(), session.clone());
            session
        };

        PoolCounters::incr(&inner.counters.acquisitions);
        Span::current().record("session_id", field::display(&session.session_id));
        debug!(
            last_activity_ms = session.last_activity_ms,
            valid = session.valid,
            "session checked out"
        );

        Ok(PooledSession {
            inner: Arc::clone(inner),
            session,
            confirmed_at_ms: None,
            returned: false,
        })
    }

    /// Returns a session to the pool.
    ///
    /// With `check_on_release` the remote is asked whether the session still
    /// exists; a missing one is flagged so the next maintenance pass replaces
    /// it. Otherwise no validation happens here.
    #[instrument(skip(self, session), target = "pool", fields(session_id = %session.session_id()))]
    pub async fn release(&self, mut session: PooledSession) {
        let inner = Arc::clone(&session.inner);
        let mut entry = session.session.clone();

        if inner.config.check_on_release {
            match inner.remote.exists(&entry.session_id).await {
                Ok(true) => {}
                Ok(false) => {
                    entry.valid = false;
                    PoolCounters::incr(&inner.counters.release_misses);
                    warn!("released session no longer exists on remote; flagged for recreation");
                }
                Err(e) => debug!(error = %e, "existence check on release failed"),
            }
        }

        // Until here a cancelled release leaves the guard to return the session.
        session.returned = true;
        if !inner.put_back(entry, session.confirmed_at_ms) {
            debug!("pool closed; discarding released session");
            inner.discard(session.session_id()).await;
        }
    }

    /// One maintenance pass.
    ///
    /// Available sessions whose tracked activity is at least `ping_interval`
    /// old (or that are flagged invalid) are pinged; those the remote no
    /// longer knows are recreated. Fresh sessions are skipped without any
    /// remote call. Remote failures are logged and retried on the next pass.
    #[instrument(skip(self), target = "pool")]
    pub async fn maintain(&self) -> MaintenanceReport {
        let inner = &self.inner;
        let ping_interval_ms = inner.config.ping_interval_ms();
        let now = inner.clock.now_ms();
        let mut report = MaintenanceReport::default();

        let claims: Vec<MaintenanceClaim> = {
            let mut state = inner.state.lock();
            if state.closed {
                return report;
            }

            let mut claims = Vec::new();
            let mut kept = VecDeque::with_capacity(state.available.len());
            while let Some(session) = state.available.pop_front() {
                if !session.needs_ping(now, ping_interval_ms) {
                    debug!(
                        session_id = %session.session_id,
                        idle_ms = session.idle_ms(now),
                        ping_interval_ms,
                        "session fresh; skipping ping"
                    );
                    report.skipped += 1;
                    kept.push_back(session);
                    continue;
                }

                match inner.semaphore.try_acquire() {
                    Ok(permit) => {
                        permit.forget();
                        state
                            .in_maintenance
                            .insert(session.session_id.clone(), session.clone());
                        claims.push(MaintenanceClaim {
                            inner: Arc::clone(inner),
                            original_id: session.session_id.clone(),
                            session,
                            returned: false,
                        });
                    }
                    Err(_) => {
                        // A waiting acquirer already owns the permit for it.
                        debug!(session_id = %session.session_id, "session claimed by acquirer; deferring");
                        report.skipped += 1;
                        kept.push_back(session);
                    }
                }
            }
            state.available = kept;
            claims
        };

        for mut claim in claims {
            self.refresh(&mut claim.session, &mut report).await;
            claim.complete().await;
        }

        PoolCounters::incr(&inner.counters.passes);
        PoolCounters::add(&inner.counters.skipped, report.skipped);

        if report.remote_calls_attempted() > 0 {
            info!(
                pinged = report.pinged,
                recreated = report.recreated,
                skipped = report.skipped,
                failed = report.failed,
                "maintenance pass complete"
            );
        } else {
            debug!(skipped = report.skipped, "maintenance pass complete; nothing due");
        }

        report
    }

    /// Pings (or recreates) one session taken out of the available set.
    /// Runs without the pool lock.
    async fn refresh(&self, session: &mut Session, report: &mut MaintenanceReport) {
        let inner = &self.inner;

        let ping = if session.valid {
            warn_if_slow(
                "remote_ping",
                SLOW_REMOTE_CALL,
                inner.remote.ping(&session.session_id),
            )
            .await
        } else {
            Err(RemoteError::NotFound(session.session_id.clone()))
        };

        match ping {
            Ok(()) => {
                session.last_activity_ms = inner.clock.now_ms();
                session.valid = true;
                report.pinged += 1;
                PoolCounters::incr(&inner.counters.pings);
                debug!(session_id = %session.session_id, "session pinged");
            }
            Err(RemoteError::NotFound(_)) => {
                session.valid = false;
                let created = warn_if_slow(
                    "remote_create_session",
                    SLOW_REMOTE_CALL,
                    inner.remote.create_session(),
                )
                .await;

                match created {
                    Ok(new_id) => {
                        info!(
                            old_session_id = %session.session_id,
                            new_session_id = %new_id,
                            "session missing on remote; recreated"
                        );
                        *session = Session::new(new_id, inner.clock.now_ms());
                        report.recreated += 1;
                        PoolCounters::incr(&inner.counters.recreated);
                    }
                    Err(e) => {
                        warn!(
                            session_id = %session.session_id,
                            error = %e,
                            "session recreation failed; will retry next pass"
                        );
                        report.failed += 1;
                        PoolCounters::incr(&inner.counters.remote_failures);
                    }
                }
            }
            Err(e @ RemoteError::Unavailable(_)) => {
                warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "ping failed; will retry next pass"
                );
                report.failed += 1;
                PoolCounters::incr(&inner.counters.remote_failures);
            }
        }
    }

    /// Deletes `session_id` on the remote without telling the pool.
    ///
    /// Debug hook: the pool keeps treating the session as valid until a
    /// maintenance pass pings it.
    #[instrument(skip(self), target = "pool")]
    pub async fn force_invalidate(&self, session_id: &str) -> Result<(), PoolError> {
        self.inner.remote.delete_session(session_id).await?;
        warn!("session deleted on remote; pool state left untouched");
        Ok(())
    }

    /// Runs `statement` through a pooled session.
    ///
    /// A missing session surfaces as [`PoolError::SessionNotFound`]; the pool
    /// is not repaired here.
    #[instrument(skip(self), target = "pool")]
    pub async fn execute(&self, statement: &str) -> Result<u64, PoolError> {
        let mut session = self.acquire().await?;

        let result = self
            .inner
            .remote
            .execute(session.session_id(), statement)
            .await;

        match &result {
            Ok(rows) => {
                session.record_success();
                debug!(session_id = %session.session_id(), rows, "statement succeeded");
            }
            Err(e) => warn!(session_id = %session.session_id(), error = %e, "statement failed"),
        }

        self.release(session).await;
        result.map_err(PoolError::from)
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();

        let snapshot = |s: &Session, location| SessionSnapshot {
            session_id: s.session_id.clone(),
            created_ms: s.created_ms,
            last_activity_ms: s.last_activity_ms,
            valid: s.valid,
            location,
        };

        let mut sessions: Vec<SessionSnapshot> = state
            .available
            .iter()
            .map(|s| snapshot(s, SessionLocation::Available))
            .collect();
        sessions.extend(
            state
                .checked_out
                .values()
                .map(|s| snapshot(s, SessionLocation::CheckedOut)),
        );
        sessions.extend(
            state
                .in_maintenance
                .values()
                .map(|s| snapshot(s, SessionLocation::InMaintenance)),
        );

        PoolStatus {
            capacity: self.inner.config.size,
            available: state.available.len(),
            checked_out: state.checked_out.len(),
            in_maintenance: state.in_maintenance.len(),
            closed: state.closed,
            sessions,
        }
    }

    /// Stops handing out sessions and deletes the available ones on the
    /// remote. Sessions still checked out are deleted when released.
    /// Returns how many remote deletions succeeded.
    #[instrument(skip(self), target = "pool")]
    pub async fn close(&self) -> usize {
        let drained: Vec<Session> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return 0;
            }
            state.closed = true;
            state.available.drain(..).collect()
        };
        self.inner.semaphore.close();

        let mut deleted = 0;
        for s in &drained {
            match self.inner.remote.delete_session(&s.session_id).await {
                Ok(()) => deleted += 1,
                Err(e) => debug!(session_id = %s.session_id, error = %e, "delete on close failed"),
            }
        }

        info!(deleted, drained = drained.len(), "session pool closed");
        deleted
    }
}

/// A checked-out session. Goes back to the pool on [`Pool::release`] or
/// when dropped.
pub struct PooledSession {
    inner: Arc<PoolInner>,
    session: Session,
    confirmed_at_ms: Option<u64>,
    returned: bool,
}

impl PooledSession {
    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.session.last_activity_ms
    }

    pub fn is_valid(&self) -> bool {
        self.session.valid
    }

    /// Records that a remote operation on this session just succeeded.
    ///
    /// Only moves the activity timestamp under
    /// [`FreshnessPolicy::OnConfirmedUse`], and only once returned.
    pub fn record_success(&mut self) {
        self.confirmed_at_ms = Some(self.inner.clock.now_ms());
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("session", &self.session)
            .field("confirmed_at_ms", &self.confirmed_at_ms)
            .finish()
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if self.returned {
            return;
        }
        if !self
            .inner
            .put_back(self.session.clone(), self.confirmed_at_ms)
        {
            debug!(session_id = %self.session.session_id, "pool closed; deleting dropped session");
            self.inner.discard_detached(self.session.session_id.clone());
        }
    }
}
