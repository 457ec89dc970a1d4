use std::sync::Arc;
use std::time::Duration;

use common::time::{Clock, ManualClock};
use pool::{FreshnessPolicy, InMemoryRemote, Pool, PoolConfig, PoolError, RemoteService};

const T: Duration = Duration::from_secs(300);

async fn setup(
    freshness: FreshnessPolicy,
) -> anyhow::Result<(Pool, Arc<InMemoryRemote>, ManualClock)> {
    let clock = ManualClock::new(1_700_000_000_000);
    let remote = Arc::new(InMemoryRemote::new(Arc::new(clock.clone())));
    let config = PoolConfig::new()
        .with_size(1)
        .with_ping_interval(T)
        .with_freshness(freshness);
    let pool = Pool::new(config, remote.clone(), Arc::new(clock.clone())).await?;
    Ok((pool, remote, clock))
}

/// Steps (a)-(c): checkout, server-side delete, checkout again inside the
/// ping interval. Leaves the clock just past `T` after step (a).
async fn invalidate_then_touch(
    pool: &Pool,
    remote: &InMemoryRemote,
    clock: &ManualClock,
) -> anyhow::Result<String> {
    // (a)
    let s = pool.acquire().await?;
    let id = s.session_id().to_string();
    pool.release(s).await;

    // (b)
    pool.force_invalidate(&id).await?;
    assert!(!remote.exists(&id).await?);
    assert!(pool.status().sessions[0].valid, "pool must not notice the delete");

    // (c)
    clock.advance(T - Duration::from_secs(1));
    let s = pool.acquire().await?;
    assert_eq!(s.session_id(), id);
    pool.release(s).await;

    clock.advance(Duration::from_secs(2));
    Ok(id)
}

#[tokio::test]
async fn checkout_refresh_masks_server_side_deletion() -> anyhow::Result<()> {
    let (pool, remote, clock) = setup(FreshnessPolicy::OnCheckout).await?;
    let id = invalidate_then_touch(&pool, &remote, &clock).await?;

    // (d)
    let report = pool.maintain().await;
    assert_eq!(report.skipped, 1);
    assert_eq!(report.remote_calls_attempted(), 0);
    assert_eq!(remote.calls().pings(), 0);

    let err = pool.execute("SELECT 1").await.unwrap_err();
    assert_eq!(
        err,
        PoolError::SessionNotFound {
            session_id: id.clone()
        }
    );

    // The failed query checked the session out again, so it stays hidden.
    let report = pool.maintain().await;
    assert_eq!(report.skipped, 1);
    assert_eq!(pool.status().sessions[0].session_id, id);
    Ok(())
}

#[tokio::test]
async fn failed_queries_keep_a_dead_session_fresh_indefinitely() -> anyhow::Result<()> {
    let (pool, remote, clock) = setup(FreshnessPolicy::OnCheckout).await?;
    let id = pool.status().sessions[0].session_id.clone();
    pool.force_invalidate(&id).await?;

    for _ in 0..10 {
        clock.advance(T - Duration::from_secs(1));
        assert!(matches!(
            pool.execute("SELECT 1").await,
            Err(PoolError::SessionNotFound { .. })
        ));
        assert_eq!(pool.maintain().await.skipped, 1);
    }

    assert_eq!(remote.calls().pings(), 0);
    assert_eq!(remote.calls().executes(), 10);
    Ok(())
}

#[tokio::test]
async fn confirmed_use_policy_detects_and_recreates_dead_session() -> anyhow::Result<()> {
    let (pool, remote, clock) = setup(FreshnessPolicy::OnConfirmedUse).await?;
    let id = invalidate_then_touch(&pool, &remote, &clock).await?;

    let report = pool.maintain().await;
    assert_eq!(report.recreated, 1);
    assert_eq!(remote.calls().pings(), 1);

    let status = pool.status();
    let new_id = &status.sessions[0].session_id;
    assert_ne!(new_id, &id);
    assert!(status.sessions[0].valid);
    assert_eq!(remote.live_sessions(), vec![new_id.clone()]);

    assert_eq!(pool.execute("SELECT 1").await?, 1);
    Ok(())
}

#[tokio::test]
async fn confirmed_use_still_skips_sessions_with_recent_successes() -> anyhow::Result<()> {
    let (pool, remote, clock) = setup(FreshnessPolicy::OnConfirmedUse).await?;

    clock.advance(T - Duration::from_secs(1));
    pool.execute("SELECT 1").await?;
    clock.advance(Duration::from_secs(2));

    let report = pool.maintain().await;
    assert_eq!(report.skipped, 1);
    assert_eq!(remote.calls().pings(), 0);
    Ok(())
}

#[tokio::test]
async fn acquire_stamps_activity_no_earlier_than_call_start() -> anyhow::Result<()> {
    let (pool, _remote, clock) = setup(FreshnessPolicy::OnCheckout).await?;

    for step in [1u64, 30, 299, 301] {
        clock.advance(Duration::from_secs(step));
        let started = clock.now_ms();

        let s = pool.acquire().await?;
        assert!(s.last_activity_ms() >= started);
        // Caller never uses the session; the stamp stays.
        drop(s);

        assert!(pool.status().sessions[0].last_activity_ms >= started);
    }
    Ok(())
}

#[tokio::test]
async fn maintenance_is_idempotent_within_one_interval() -> anyhow::Result<()> {
    let (pool, remote, clock) = setup(FreshnessPolicy::OnCheckout).await?;
    clock.advance(T);

    let first = pool.maintain().await;
    assert_eq!(first.pinged, 1);

    for _ in 0..5 {
        clock.advance(Duration::from_secs(10));
        let report = pool.maintain().await;
        assert_eq!(report.pinged, 0);
        assert_eq!(report.skipped, 1);
    }

    assert_eq!(remote.calls().pings(), 1);
    Ok(())
}

#[tokio::test]
async fn invalidated_session_is_recreated_with_new_id_once_due() -> anyhow::Result<()> {
    let (pool, remote, clock) = setup(FreshnessPolicy::OnCheckout).await?;
    let original = pool.status().sessions[0].session_id.clone();

    pool.force_invalidate(&original).await?;
    clock.advance(T);

    let report = pool.maintain().await;
    assert_eq!(report.recreated, 1);
    assert_eq!(report.pinged, 0);

    let replaced = pool.status().sessions[0].session_id.clone();
    assert_ne!(replaced, original);
    assert!(remote.exists(&replaced).await?);
    assert_eq!(pool.execute("SELECT 1").await?, 1);
    Ok(())
}

#[tokio::test]
async fn force_invalidate_of_unknown_session_reports_not_found() -> anyhow::Result<()> {
    let (pool, _remote, _clock) = setup(FreshnessPolicy::OnCheckout).await?;

    let err = pool.force_invalidate("no-such-session").await.unwrap_err();
    assert!(matches!(err, PoolError::SessionNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn idle_ttl_expiry_is_repaired_by_regular_pings() -> anyhow::Result<()> {
    let clock = ManualClock::new(0);
    let remote = Arc::new(
        InMemoryRemote::new(Arc::new(clock.clone())).with_idle_ttl(Duration::from_secs(3600)),
    );
    let pool = Pool::new(
        PoolConfig::new().with_ping_interval(T),
        remote.clone(),
        Arc::new(clock.clone()),
    )
    .await?;
    let id = pool.status().sessions[0].session_id.clone();

    // Pinging every interval keeps the remote from reclaiming the session.
    for _ in 0..24 {
        clock.advance(T);
        assert_eq!(pool.maintain().await.pinged, 1);
    }
    assert!(remote.exists(&id).await?);
    assert!(remote.session_age_ms(&id).unwrap() >= 2 * 3_600_000);
    Ok(())
}
