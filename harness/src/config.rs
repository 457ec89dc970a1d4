use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use pool::{FreshnessPolicy, PoolConfig};

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Instance and database the pooled sessions belong to. Only used as log
    /// labels: the harness talks to the in-memory backend.
    pub instance_name: String,
    pub database_name: String,

    // =========================
    // Pool configuration
    // =========================
    /// Size, ping interval, acquire timeout and freshness policy.
    ///
    /// Defaults describe a single-session pool with a five minute ping
    /// interval, the setup in which the stale-session defect shows up.
    pub pool: PoolConfig,

    // =========================
    // Background maintenance
    // =========================
    /// Delay between maintenance passes.
    ///
    /// The pool only pings sessions whose tracked activity is older than the
    /// ping interval, so a short delay here is cheap. It must not be zero:
    /// an unthrottled loop spins a core.
    pub maintenance_interval: Duration,

    // =========================
    // Simulated backend
    // =========================
    /// Sessions idle on the backend for longer than this are reclaimed.
    pub remote_idle_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = PoolConfig::default();

        let pool = PoolConfig::new()
            .with_size(parse_or(&lookup, "POOL_SIZE", defaults.size))
            .with_ping_interval(Duration::from_secs(parse_or(
                &lookup,
                "PING_INTERVAL_SECS",
                defaults.ping_interval.as_secs(),
            )))
            .with_acquire_timeout(Duration::from_secs(parse_or(
                &lookup,
                "ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout.as_secs(),
            )))
            .with_freshness(parse_or(&lookup, "FRESHNESS", FreshnessPolicy::default()))
            .with_check_on_release(parse_flag(&lookup, "CHECK_ON_RELEASE", false));

        Self {
            instance_name: lookup("INSTANCE_NAME").unwrap_or_else(|| "local-instance".to_string()),
            database_name: lookup("DATABASE_NAME").unwrap_or_else(|| "local-db".to_string()),
            pool,
            maintenance_interval: Duration::from_millis(
                parse_or(&lookup, "MAINTENANCE_INTERVAL_MS", 100u64).max(1),
            ),
            remote_idle_ttl: Duration::from_secs(parse_or(&lookup, "REMOTE_IDLE_TTL_SECS", 3_600)),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "invalid config value; using default");
            default
        }
    }
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => default,
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        Some(v) => {
            tracing::warn!(key, value = %v, "invalid flag value; using default");
            default
        }
    }
}
