use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minimal counters for operational visibility.
#[derive(Clone, Default, Debug)]
pub struct PoolCounters {
    pub acquisitions: Arc<AtomicU64>,
    pub releases: Arc<AtomicU64>,
    pub exhausted: Arc<AtomicU64>,

    // maintenance
    pub passes: Arc<AtomicU64>,
    pub pings: Arc<AtomicU64>,
    pub skipped: Arc<AtomicU64>,
    pub recreated: Arc<AtomicU64>,
    pub remote_failures: Arc<AtomicU64>,

    // release-time existence checks that found the session gone
    pub release_misses: Arc<AtomicU64>,
    // sessions dropped after close that could not be deleted on the remote
    pub orphaned: Arc<AtomicU64>,
}

impl PoolCounters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
