//! Periodic driver for [`Pool::maintain`].
//!
//! The pool itself never schedules anything. This runs passes on a fixed
//! tokio interval until cancelled; a pass with remote failures is logged and
//! the loop carries on.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::pool::Pool;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Runs maintenance passes every `every` until `cancel` fires.
/// Returns the number of completed passes.
pub async fn run_maintenance(pool: Pool, every: Duration, cancel: CancellationToken) -> u64 {
    let every = every.max(MIN_INTERVAL);
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(every_ms = every.as_millis() as u64, "maintenance loop started");

    let mut passes: u64 = 0;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let report = pool.maintain().await;
        passes += 1;

        if report.failed > 0 {
            warn!(
                passes,
                failed = report.failed,
                "maintenance pass hit remote failures; continuing"
            );
        }
    }

    info!(passes, "maintenance loop stopped");
    passes
}

/// Handle to a spawned maintenance loop. Dropping it cancels the loop.
pub struct MaintenanceTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<u64>>,
}

impl MaintenanceTask {
    pub fn spawn(pool: Pool, every: Duration) -> Self {
        let cancel = CancellationToken::new();
        let span = tracing::info_span!("maintenance_task");
        let handle = tokio::spawn(run_maintenance(pool, every, cancel.clone()).instrument(span));

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Token that stops the loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels the loop and waits for it. Returns the number of passes run.
    pub async fn stop(mut self) -> u64 {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        match handle.await {
            Ok(passes) => passes,
            Err(e) => {
                warn!(error = %e, "maintenance task did not shut down cleanly");
                0
            }
        }
    }
}

impl Drop for MaintenanceTask {
    fn drop(&mut self) {
        if self.handle.is_some() {
            debug!("maintenance task handle dropped; cancelling loop");
            self.cancel.cancel();
        }
    }
}
