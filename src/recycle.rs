//! Usage-based worker retirement.
//!
//! Each lease bumps the worker's usage count. When an acquisition finds the
//! count already over the budget, the worker is retired: closed and
//! relaunched under the same id with the count reset to 1.
//!
//! A worker that still has extra contexts open is not yanked away. Instead
//! a retry is scheduled `retire_delay` later with one fewer retry left, and
//! the worker is handed out unchanged in the meantime. Once the retries are
//! used up the worker is replaced regardless.
//!
//! Each record owns at most one [`RetirementTimer`]; arming a new one always
//! cancels the previous. The timer carries the retries it has left. An
//! acquisition that finds a timer already pending leaves it running, so
//! steady traffic cannot push the forced retirement back.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::Result;
use crate::launcher::{WorkerId, WorkerLauncher};
use crate::pool::{WorkerPoolInner, connect_worker, count_open_contexts};
use crate::traits::Worker;

/// Handle to a scheduled retirement attempt.
pub(crate) struct RetirementTimer {
    sequence: u64,
    retries_left: u32,
    handle: JoinHandle<()>,
}

impl RetirementTimer {
    /// Stop the attempt from running.
    pub(crate) fn cancel(self) {
        self.handle.abort();
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Deferrals still allowed once this attempt fires.
    pub(crate) fn retries_left(&self) -> u32 {
        self.retries_left
    }
}

/// Result of a retirement attempt on a leased worker.
pub(crate) enum Retirement<W: Worker> {
    /// Contexts were still open; the same worker, retry scheduled.
    Deferred {
        worker: Arc<W>,
        connection: W::Connection,
    },
    /// A fresh worker now sits in the slot.
    Replaced {
        worker: Arc<W>,
        connection: W::Connection,
    },
}

/// Retire a worker the caller currently holds.
///
/// When a retirement is already scheduled for the worker, it is left to run
/// and the worker is handed out unchanged.
///
/// # Errors
///
/// Only fails when the replacement cannot be launched or reached.
pub(crate) async fn retire<L: WorkerLauncher>(
    inner: &Arc<WorkerPoolInner<L>>,
    id: WorkerId,
    worker: Arc<L::Worker>,
    connection: <L::Worker as Worker>::Connection,
    retries_left: u32,
) -> Result<Retirement<L::Worker>> {
    let pending = inner
        .lock()
        .records
        .get(&id)
        .and_then(|record| record.retirement.as_ref().map(RetirementTimer::retries_left));
    if let Some(retries) = pending {
        log::debug!(
            "♻️ {} is over its usage budget, retirement already pending ({} retries left)",
            id,
            retries
        );
        return Ok(Retirement::Deferred { worker, connection });
    }

    let open = count_open_contexts(&worker).await;
    if open > 1 && retries_left > 0 {
        log::info!(
            "♻️ {} is over its usage budget but has {} contexts open - retrying in {:?} ({} retries left)",
            id,
            open,
            inner.config().retire_delay,
            retries_left - 1
        );
        schedule(inner, id, retries_left - 1);
        return Ok(Retirement::Deferred { worker, connection });
    }

    log::info!("♻️ Retiring {} after reaching its usage budget", id);
    drop(connection);
    let fresh = inner.relaunch(id, worker).await?;
    let connection = connect_worker(&fresh).await?;
    Ok(Retirement::Replaced {
        worker: fresh,
        connection,
    })
}

/// Arm a retirement attempt for `id` after the configured delay.
pub(crate) fn schedule<L: WorkerLauncher>(
    inner: &Arc<WorkerPoolInner<L>>,
    id: WorkerId,
    retries_left: u32,
) {
    if inner.is_shutting_down() {
        return;
    }

    let delay = inner.config().retire_delay;
    let sequence = inner.next_timer_sequence();

    // Spawn while holding the lock so the timer cannot fire before it is armed.
    let mut registry = inner.lock();
    let task_inner = Arc::clone(inner);
    let handle = inner.runtime_handle().spawn(async move {
        tokio::time::sleep(delay).await;
        run_timer(task_inner, id, sequence, retries_left).await;
    });

    match registry.records.get_mut(&id) {
        Some(record) => record.arm_retirement(RetirementTimer {
            sequence,
            retries_left,
            handle,
        }),
        None => handle.abort(),
    }
}

async fn run_timer<L: WorkerLauncher>(
    inner: Arc<WorkerPoolInner<L>>,
    id: WorkerId,
    sequence: u64,
    retries_left: u32,
) {
    let claimed = {
        let mut registry = inner.lock();
        match registry.records.get_mut(&id) {
            Some(record)
                if record
                    .retirement
                    .as_ref()
                    .is_some_and(|timer| timer.sequence() == sequence) =>
            {
                // Our own handle: detach it rather than abort ourselves.
                record.retirement = None;
                if record.retiring {
                    None
                } else {
                    record.retiring = true;
                    Some((Arc::clone(&record.worker), record.leased))
                }
            }
            _ => None,
        }
    };
    let Some((worker, leased)) = claimed else {
        return;
    };

    let open = count_open_contexts(&worker).await;
    if (open > 1 || leased) && retries_left > 0 {
        log::debug!(
            "♻️ {} still in use ({} contexts open, leased: {}) - {} retries left",
            id,
            open,
            leased,
            retries_left
        );
        // Re-arm before letting go, so nobody can lease it with no timer pending.
        schedule(&inner, id, retries_left - 1);
        let mut registry = inner.lock();
        if let Some(record) = registry.records.get_mut(&id) {
            record.retiring = false;
        }
        registry.make_available(id);
        return;
    }

    if leased || open > 1 {
        log::warn!("♻️ Forcing retirement of {} ({} contexts open)", id, open);
    } else {
        log::info!("♻️ Retiring {} on schedule", id);
    }

    let replaced = match inner.relaunch(id, worker).await {
        Ok(_) => true,
        Err(e) => {
            log::error!("❌ Scheduled retirement of {} failed: {}", id, e);
            false
        }
    };
    inner.finish_retirement(id, replaced);
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfigBuilder;
    use crate::launcher::mock::MockLauncher;
    use crate::pool::WorkerPool;
    use std::time::Duration;

    async fn single_worker_pool(retire_retries: u32) -> (WorkerPool<MockLauncher>, MockLauncher) {
        let launcher = MockLauncher::new();
        let pool = WorkerPool::builder()
            .config(
                PoolConfigBuilder::new()
                    .capacity(1)
                    .min_warm(1)
                    .retire_retries(retire_retries)
                    .retire_delay(Duration::from_millis(100))
                    .launch_backoff(Duration::from_millis(1))
                    .build()
                    .unwrap(),
            )
            .launcher(launcher.clone())
            .build()
            .unwrap();
        pool.init().await.unwrap();
        (pool, launcher)
    }

    fn pending_timer(pool: &WorkerPool<MockLauncher>) -> Option<(u64, u32)> {
        pool.inner().lock().records[&WorkerId::new(0)]
            .retirement
            .as_ref()
            .map(|timer| (timer.sequence(), timer.retries_left()))
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within a second");
    }

    /// Verifies that arming twice leaves one timer and one relaunch.
    #[tokio::test]
    async fn test_rearming_keeps_single_timer() {
        let (pool, launcher) = single_worker_pool(0).await;

        schedule(pool.inner(), WorkerId::new(0), 0);
        let first = pending_timer(&pool).unwrap();
        schedule(pool.inner(), WorkerId::new(0), 0);
        let second = pending_timer(&pool).unwrap();
        assert_ne!(first.0, second.0);

        eventually(|| launcher.launch_count() == 2).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(launcher.launch_count(), 2);
        assert_eq!(launcher.close_count(), 1);
        let registry = pool.inner().lock();
        let record = &registry.records[&WorkerId::new(0)];
        assert!(record.retirement.is_none());
        assert!(!record.is_busy());
        assert_eq!(record.usage_count, 1);
    }

    /// Verifies that a timer firing on a leased worker re-arms with one retry less.
    #[tokio::test]
    async fn test_timer_defers_while_leased() {
        let (pool, launcher) = single_worker_pool(2).await;
        let lease = pool.acquire().await.unwrap();

        schedule(pool.inner(), WorkerId::new(0), 2);
        eventually(|| pending_timer(&pool).is_some_and(|(_, retries)| retries == 1)).await;

        assert_eq!(launcher.launch_count(), 1);
        let registry = pool.inner().lock();
        let record = &registry.records[&WorkerId::new(0)];
        assert_eq!(record.endpoint, lease.endpoint());
        assert!(record.leased);
        assert!(!record.retiring);
    }

    /// Verifies that an acquisition over budget does not reset a pending timer.
    #[tokio::test]
    async fn test_retire_leaves_pending_timer() {
        let (pool, launcher) = single_worker_pool(3).await;
        schedule(pool.inner(), WorkerId::new(0), 1);
        let armed = pending_timer(&pool).unwrap();

        let worker = Arc::clone(&pool.inner().lock().records[&WorkerId::new(0)].worker);
        let connection = worker.connect().unwrap();
        let outcome = retire(pool.inner(), WorkerId::new(0), worker, connection, 3).await.unwrap();

        assert!(matches!(outcome, Retirement::Deferred { .. }));
        assert_eq!(pending_timer(&pool), Some(armed));
        assert_eq!(launcher.launch_count(), 1);
    }

    /// Verifies that forcing out a leased worker turns the old lease's release into a no-op.
    #[tokio::test]
    async fn test_forced_retirement_orphans_old_lease() {
        let (pool, launcher) = single_worker_pool(0).await;
        let old = pool.acquire().await.unwrap();

        schedule(pool.inner(), WorkerId::new(0), 0);
        eventually(|| launcher.launch_count() == 2).await;
        eventually(|| pool.status().busy_count == 0).await;
        assert_ne!(pool.status().workers[0].endpoint, old.endpoint());

        let current = pool.acquire().await.unwrap();
        assert_eq!(current.id(), WorkerId::new(0));
        drop(old);
        assert_eq!(pool.status().busy_count, 1);

        drop(current);
        assert_eq!(pool.status().busy_count, 0);
    }
}
