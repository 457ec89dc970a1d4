mod config;
mod menu;

use std::sync::Arc;

use anyhow::Context;
use common::logger::init_logger;
use common::time::{Clock, SystemClock};
use pool::{InMemoryRemote, MaintenanceTask, Pool};

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the process environment still applies.
    dotenvy::dotenv().ok();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_logger("pool-harness", is_production);

    let cfg = AppConfig::from_env();
    tracing::info!(
        instance = %cfg.instance_name,
        database = %cfg.database_name,
        maintenance_interval_ms = cfg.maintenance_interval.as_millis() as u64,
        "Starting session pool harness..."
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let remote =
        Arc::new(InMemoryRemote::new(Arc::clone(&clock)).with_idle_ttl(cfg.remote_idle_ttl));

    let pool = Pool::new(cfg.pool.clone(), remote.clone(), clock)
        .await
        .context("failed to initialise session pool")?;

    let maintenance = MaintenanceTask::spawn(pool.clone(), cfg.maintenance_interval);

    let (result, interrupted) = tokio::select! {
        r = menu::run(&pool, remote.as_ref(), tokio::io::stdin(), tokio::io::stdout()) => (r, false),
        signal = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            (signal.context("failed to listen for ctrl_c"), true)
        }
    };

    let passes = maintenance.stop().await;
    let deleted = pool.close().await;
    tracing::info!(passes, deleted, "harness stopped");

    if interrupted && result.is_ok() {
        // The blocking stdin reader would hold runtime shutdown until the next line.
        std::process::exit(0);
    }
    result
}
