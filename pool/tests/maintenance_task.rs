use std::sync::Arc;
use std::time::Duration;

use common::time::ManualClock;
use pool::metrics::PoolCounters;
use pool::{InMemoryRemote, MaintenanceTask, Pool, PoolConfig, run_maintenance};
use tokio_util::sync::CancellationToken;

const T: Duration = Duration::from_secs(300);

async fn setup() -> anyhow::Result<(Pool, Arc<InMemoryRemote>, ManualClock)> {
    let clock = ManualClock::new(0);
    let remote = Arc::new(InMemoryRemote::new(Arc::new(clock.clone())));
    let pool = Pool::new(
        PoolConfig::new().with_ping_interval(T),
        remote.clone(),
        Arc::new(clock.clone()),
    )
    .await?;
    Ok((pool, remote, clock))
}

#[tokio::test(start_paused = true)]
async fn task_runs_passes_until_stopped() -> anyhow::Result<()> {
    let (pool, _remote, _clock) = setup().await?;

    let task = MaintenanceTask::spawn(pool.clone(), Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(task.is_running());

    let passes = task.stop().await;
    assert!(passes >= 3, "expected at least 3 passes, got {passes}");
    assert_eq!(PoolCounters::get(&pool.counters().passes), passes);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn task_survives_outage_and_repairs_afterwards() -> anyhow::Result<()> {
    let (pool, remote, clock) = setup().await?;
    let original = pool.status().sessions[0].session_id.clone();
    pool.force_invalidate(&original).await?;
    clock.advance(T);

    remote.set_unavailable(true);
    let task = MaintenanceTask::spawn(pool.clone(), Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(task.is_running());
    assert!(PoolCounters::get(&pool.counters().remote_failures) >= 2);
    assert_eq!(pool.status().sessions[0].session_id, original);

    remote.set_unavailable(false);
    tokio::time::sleep(Duration::from_millis(200)).await;
    task.stop().await;

    let status = pool.status();
    assert_ne!(status.sessions[0].session_id, original);
    assert!(status.sessions[0].valid);
    assert_eq!(PoolCounters::get(&pool.counters().recreated), 1);
    Ok(())
}

#[tokio::test]
async fn dropping_the_handle_cancels_the_loop() -> anyhow::Result<()> {
    let (pool, _remote, _clock) = setup().await?;

    let task = MaintenanceTask::spawn(pool, Duration::from_millis(10));
    let token = task.cancel_token();
    drop(task);

    assert!(token.is_cancelled());
    Ok(())
}

#[tokio::test]
async fn pre_cancelled_loop_runs_no_passes() -> anyhow::Result<()> {
    let (pool, remote, clock) = setup().await?;
    clock.advance(T);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let passes = run_maintenance(pool, Duration::from_millis(10), cancel).await;

    assert_eq!(passes, 0);
    assert_eq!(remote.calls().pings(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn zero_interval_is_clamped_instead_of_panicking() -> anyhow::Result<()> {
    let (pool, _remote, _clock) = setup().await?;

    let task = MaintenanceTask::spawn(pool, Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(task.stop().await >= 1);
    Ok(())
}
