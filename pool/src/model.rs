/// Pool-side view of one remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub created_ms: u64,
    /// Locally tracked activity; drives ping eligibility.
    pub last_activity_ms: u64,
    /// Last known existence state. May be stale relative to the remote.
    pub valid: bool,
}

impl Session {
    pub fn new(session_id: String, now_ms: u64) -> Self {
        Self {
            session_id,
            created_ms: now_ms,
            last_activity_ms: now_ms,
            valid: true,
        }
    }

    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_activity_ms)
    }

    /// Whether a maintenance pass should contact the remote for this session.
    pub fn needs_ping(&self, now_ms: u64, ping_interval_ms: u64) -> bool {
        !self.valid || self.idle_ms(now_ms) >= ping_interval_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLocation {
    Available,
    CheckedOut,
    InMaintenance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub created_ms: u64,
    pub last_activity_ms: u64,
    pub valid: bool,
    pub location: SessionLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    pub capacity: usize,
    pub available: usize,
    pub checked_out: usize,
    pub in_maintenance: usize,
    pub closed: bool,
    pub sessions: Vec<SessionSnapshot>,
}

/// Outcome of one [`crate::Pool::maintain`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Sessions that answered a ping.
    pub pinged: usize,
    /// Sessions found missing on the remote and replaced.
    pub recreated: usize,
    /// Sessions considered fresh; no remote call made.
    pub skipped: usize,
    /// Ping or recreate attempts that hit a remote failure.
    pub failed: usize,
}

impl MaintenanceReport {
    pub fn remote_calls_attempted(&self) -> usize {
        self.pinged + self.recreated + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_ping_at_exact_interval_boundary() {
        let s = Session::new("s".into(), 1_000);
        assert!(!s.needs_ping(1_999, 1_000));
        assert!(s.needs_ping(2_000, 1_000));
    }

    #[test]
    fn invalid_session_always_needs_ping() {
        let mut s = Session::new("s".into(), 1_000);
        s.valid = false;
        assert!(s.needs_ping(1_000, 60_000));
    }

    #[test]
    fn idle_ms_saturates_when_clock_is_behind() {
        let s = Session::new("s".into(), 5_000);
        assert_eq!(s.idle_ms(4_000), 0);
    }
}
