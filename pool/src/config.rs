use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PoolError;

/// When a session's locally tracked activity timestamp moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreshnessPolicy {
    /// Every checkout counts as activity, whether or not the caller's
    /// remote operation succeeds. A session deleted server-side stays
    /// "fresh" as long as it keeps being checked out.
    #[default]
    OnCheckout,

    /// Only a remote interaction recorded through
    /// [`crate::PooledSession::record_success`] counts as activity.
    OnConfirmedUse,
}

impl fmt::Display for FreshnessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FreshnessPolicy::OnCheckout => "checkout",
            FreshnessPolicy::OnConfirmedUse => "confirmed",
        };
        f.write_str(s)
    }
}

impl FromStr for FreshnessPolicy {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "checkout" | "on_checkout" => Ok(FreshnessPolicy::OnCheckout),
            "confirmed" | "on_confirmed_use" => Ok(FreshnessPolicy::OnConfirmedUse),
            other => Err(PoolError::InvalidConfig(format!(
                "unknown freshness policy: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of sessions owned by the pool. Fixed for the pool's lifetime.
    pub size: usize,

    /// Sessions whose tracked activity is younger than this are skipped by
    /// a maintenance pass without any remote call.
    ///
    /// This is NOT a schedule: nothing is pinged unless someone calls
    /// [`crate::Pool::maintain`].
    pub ping_interval: Duration,

    /// How long [`crate::Pool::acquire`] waits for a session before failing
    /// with [`PoolError::PoolExhausted`].
    pub acquire_timeout: Duration,

    pub freshness: FreshnessPolicy,

    /// Ask the remote whether a session still exists when it is released,
    /// and mark it invalid if not. Invalid sessions are recreated by the next
    /// maintenance pass regardless of `ping_interval`.
    pub check_on_release: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 1,
            ping_interval: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(5),
            freshness: FreshnessPolicy::OnCheckout,
            check_on_release: false,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_freshness(mut self, freshness: FreshnessPolicy) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_check_on_release(mut self, enabled: bool) -> Self {
        self.check_on_release = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.size == 0 {
            return Err(PoolError::InvalidConfig(
                "size must be greater than 0".into(),
            ));
        }
        if self.ping_interval.is_zero() {
            return Err(PoolError::InvalidConfig(
                "ping_interval must be greater than zero".into(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "acquire_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn ping_interval_ms(&self) -> u64 {
        self.ping_interval.as_millis() as u64
    }
}
