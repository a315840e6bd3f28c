//! Concurrent access tests for the worker and context pools.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, mock_context_pool, mock_pool, wait_until};
use render_pool::launcher::mock::MockLauncher;
use render_pool::prelude::*;
use tokio::task::JoinSet;

/// Verifies that every lease is counted exactly once under contention.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_release() {
    let (pool, launcher) = mock_pool(config().capacity(3).acquire_timeout(None).build().unwrap()).await;

    let mut tasks = JoinSet::new();
    for _ in 0..20 {
        let pool = Arc::clone(&pool);
        tasks.spawn(async move {
            let lease = pool.acquire().await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(lease);
            Ok::<_, PoolError>(())
        });
    }
    while let Some(result) = tasks.join_next().await {
        assert!(result.unwrap().is_ok(), "Task should get a worker");
    }

    let status = pool.status();
    assert_eq!(status.busy_count, 0);
    assert_eq!(status.queue_depth, 0);
    let usage: u64 = status.workers.iter().map(|w| w.usage_count).sum();
    assert_eq!(usage, 3 + 20);
    assert_eq!(launcher.launch_count(), 3);
}

/// Verifies that status can be read while leases churn.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_status_access() {
    let (pool, _launcher) = mock_pool(config().capacity(2).acquire_timeout(None).build().unwrap()).await;

    let mut tasks = JoinSet::new();
    for i in 0..10 {
        let pool = Arc::clone(&pool);
        tasks.spawn(async move {
            for _ in 0..50 {
                if i % 2 == 0 {
                    let status = pool.status();
                    assert!(status.busy_count <= status.capacity);
                } else {
                    drop(pool.acquire().await.unwrap());
                }
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        assert!(result.is_ok(), "Task should complete without panic");
    }
}

/// Verifies that a cancelled waiter does not swallow a released worker.
#[tokio::test]
async fn test_cancelled_waiter_passes_worker_on() {
    let (pool, _launcher) = mock_pool(config().capacity(1).acquire_timeout(None).build().unwrap()).await;

    let holder = pool.acquire().await.unwrap();
    let cancelled = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
    };
    wait_until(|| pool.status().queue_depth, 1).await;
    let patient = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await.map(|l| l.id()) })
    };
    wait_until(|| pool.status().queue_depth, 2).await;

    cancelled.abort();
    let _ = cancelled.await;
    assert_eq!(pool.status().queue_depth, 1);

    drop(holder);
    assert_eq!(patient.await.unwrap().unwrap(), WorkerId::new(0));
}

// ============================================================================
// Context pool
// ============================================================================

/// Verifies that the host worker starts lazily and adopts its default context.
#[tokio::test]
async fn test_context_pool_lazy_start() {
    let (pool, launcher) = mock_context_pool(config().min_warm(2).capacity(4).build().unwrap());
    assert!(pool.status().worker_endpoint.is_none());
    assert_eq!(launcher.launch_count(), 0);

    let lease = pool.acquire().await.unwrap();

    let status = pool.status();
    assert!(status.worker_endpoint.is_some());
    assert_eq!(status.live, 2);
    assert_eq!(status.busy, 1);
    assert_eq!(launcher.launch_count(), 1);
    assert_eq!(launcher.open_contexts(&WorkerId::new(0)), 2);
    drop(lease);
}

/// Verifies growth up to the maximum and shrinking back to the minimum.
#[tokio::test]
async fn test_context_pool_grows_and_shrinks() {
    let (pool, _launcher) = mock_context_pool(
        config()
            .min_warm(1)
            .capacity(3)
            .acquire_timeout(Some(Duration::from_millis(30)))
            .build()
            .unwrap(),
    );

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    let c = pool.acquire().await.unwrap();
    assert_eq!(pool.status().live, 3);
    assert!(matches!(pool.acquire().await, Err(PoolError::AcquireTimeout(_))));

    drop(a);
    assert_eq!(pool.status().live, 3);
    drop(b);
    assert_eq!(pool.status().live, 2);
    drop(c);

    let status = pool.status();
    assert_eq!(status.live, 1);
    assert_eq!(status.busy, 0);
    assert_eq!(status.queue_depth, 0);
}

/// Verifies that a released context goes to the waiting caller.
#[tokio::test]
async fn test_context_pool_hand_off() {
    let (pool, _launcher) = mock_context_pool(config().min_warm(1).capacity(1).build().unwrap());
    let pool = pool.into_shared();

    let held = pool.acquire().await.unwrap();
    let key = held.key();
    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await.map(|lease| lease.key()) })
    };
    wait_until(|| pool.status().queue_depth, 1).await;

    drop(held);
    assert_eq!(waiter.await.unwrap().unwrap(), key);
}

/// Verifies that a discarded context is replaced for a waiting caller.
#[tokio::test]
async fn test_context_pool_discard_replenishes() {
    let (pool, launcher) = mock_context_pool(config().min_warm(1).capacity(1).build().unwrap());
    let pool = pool.into_shared();

    let held = pool.acquire().await.unwrap();
    let key = held.key();
    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await.map(|lease| lease.key()) })
    };
    wait_until(|| pool.status().queue_depth, 1).await;

    held.discard();
    let replacement = waiter.await.unwrap().unwrap();
    assert_ne!(replacement, key);

    // The replacement was released back as the only idle context.
    let status = pool.status();
    assert_eq!(status.live, 1);
    assert_eq!(status.busy, 0);
    wait_until(|| launcher.open_contexts(&WorkerId::new(0)), 1).await;
}

/// Verifies that a caller queued behind a failed context creation still gets one.
#[tokio::test]
async fn test_context_pool_failed_creation_serves_queued_caller() {
    let (pool, launcher) = mock_context_pool(
        config()
            .min_warm(1)
            .capacity(2)
            .acquire_timeout(Some(Duration::from_secs(2)))
            .build()
            .unwrap(),
    );
    let pool = pool.into_shared();

    let held = pool.acquire().await.unwrap();
    launcher.set_context_delay(Duration::from_millis(200));
    launcher.fail_next_contexts(1);

    let creating = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await.map(|lease| lease.key()) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let queued = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await.map(|lease| lease.key()) })
    };
    wait_until(|| pool.status().queue_depth, 1).await;

    assert!(matches!(creating.await.unwrap(), Err(PoolError::Connect(_))));
    let key = queued.await.unwrap().unwrap();
    assert_ne!(key, held.key());
    assert_eq!(pool.status().live, 2);
}

/// Verifies that a queued caller gets the error when the replacement fails too.
#[tokio::test]
async fn test_context_pool_failed_creation_rejects_queued_caller() {
    let (pool, launcher) = mock_context_pool(
        config()
            .min_warm(1)
            .capacity(2)
            .acquire_timeout(Some(Duration::from_secs(2)))
            .build()
            .unwrap(),
    );
    let pool = pool.into_shared();

    let _held = pool.acquire().await.unwrap();
    launcher.set_context_delay(Duration::from_millis(100));
    launcher.fail_next_contexts(2);

    let creating = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    let queued = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
    };
    wait_until(|| pool.status().queue_depth, 1).await;

    assert!(matches!(creating.await.unwrap(), Err(PoolError::Connect(_))));
    assert!(matches!(queued.await.unwrap(), Err(PoolError::Connect(_))));
    assert_eq!(pool.status().live, 1);
}

/// Verifies that shutdown closes the host worker and rejects new leases.
#[tokio::test]
async fn test_context_pool_shutdown() {
    let (pool, launcher): (ContextPool<MockLauncher>, _) =
        mock_context_pool(config().min_warm(1).capacity(2).build().unwrap());
    pool.init().await.unwrap();

    pool.shutdown().await;

    assert_eq!(launcher.close_count(), 1);
    assert!(matches!(pool.acquire().await, Err(PoolError::ShuttingDown)));
    assert_eq!(pool.status().live, 0);
}

/// Verifies that dropping the pool without shutdown closes its contexts and host.
#[tokio::test]
async fn test_context_pool_drop_closes_everything() {
    let (pool, launcher) = mock_context_pool(config().min_warm(2).capacity(3).build().unwrap());
    pool.init().await.unwrap();
    assert_eq!(launcher.open_contexts(&WorkerId::new(0)), 2);

    drop(pool);

    assert_eq!(launcher.open_contexts(&WorkerId::new(0)), 0);
    assert_eq!(launcher.close_count(), 1);
}
