//! Worker pool: registry, FIFO acquisition and lifecycle.
//!
//! [`WorkerPool`] keeps up to `capacity` worker processes alive and leases
//! them out one caller at a time.
//!
//! # Acquisition
//!
//! 1. An idle worker, when nobody is queued ahead, is picked at random.
//! 2. Otherwise, if the registry has room (lazy mode), a new worker is
//!    launched for the caller.
//! 3. Otherwise the caller joins a FIFO queue. A released worker goes
//!    straight to the head of the queue.
//!
//! Before the lease is returned the worker is pinged. A worker that does not
//! answer is relaunched under the same id and the caller gets the fresh one.
//! A worker over its usage budget goes through the [recycler](crate::recycle).
//!
//! # Example
//!
//! ```rust,ignore
//! use render_pool::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = WorkerPool::builder()
//!         .config(PoolConfigBuilder::new().capacity(4).build()?)
//!         .launcher(ChromeLauncher::new())
//!         .on_ready(|status| println!("ready: {}", status))
//!         .build()?;
//!
//!     pool.init().await?;
//!
//!     {
//!         let browser = pool.acquire().await?;
//!         let tab = browser.new_tab()?;
//!         // ...
//!     } // lease released here
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::OnceCell;

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::launcher::{WorkerId, WorkerLauncher};
use crate::lease::WorkerLease;
use crate::queue::{Abandon, HandOff, WaitTicket};
use crate::recycle::{self, Retirement};
use crate::registry::{Registry, WorkerRecord};
use crate::status::PoolStatus;
use crate::traits::Worker;

/// Callback invoked once, after `init()` has filled the pool.
pub type ReadyCallback = Box<dyn FnOnce(&PoolStatus) + Send + 'static>;

/// A pool shared between request handlers.
pub type SharedWorkerPool<L> = Arc<WorkerPool<L>>;

/// Connection type leased out by a pool using launcher `L`.
pub type Connection<L> = <<L as WorkerLauncher>::Worker as Worker>::Connection;

// ============================================================================
// Blocking worker calls
// ============================================================================

pub(crate) async fn connect_worker<W: Worker>(worker: &Arc<W>) -> Result<W::Connection> {
    let worker = Arc::clone(worker);
    tokio::task::spawn_blocking(move || worker.connect()).await?
}

/// Open contexts on `worker`, or 0 when it cannot tell.
pub(crate) async fn count_open_contexts<W: Worker>(worker: &Arc<W>) -> usize {
    let counted = Arc::clone(worker);
    match tokio::task::spawn_blocking(move || counted.open_contexts()).await {
        Ok(Ok(count)) => count,
        Ok(Err(e)) => {
            log::warn!("⚠️ Could not count contexts on {}: {}", worker.endpoint(), e);
            0
        }
        Err(e) => {
            log::warn!("⚠️ Context count task failed: {}", e);
            0
        }
    }
}

pub(crate) async fn close_worker<W: Worker>(worker: Arc<W>) {
    let endpoint = worker.endpoint().to_string();
    match tokio::task::spawn_blocking(move || worker.close()).await {
        Ok(Ok(())) => log::debug!("🛑 Closed {}", endpoint),
        Ok(Err(e)) => log::warn!("⚠️ Error closing {}: {}", endpoint, e),
        Err(e) => log::warn!("⚠️ Close task for {} failed: {}", endpoint, e),
    }
}

// ============================================================================
// WorkerPoolInner
// ============================================================================

/// Shared state behind a [`WorkerPool`] and its leases.
///
/// The registry mutex is never held across an `.await` or a blocking call.
pub(crate) struct WorkerPoolInner<L: WorkerLauncher> {
    config: PoolConfig,
    launcher: L,
    registry: Mutex<Registry<L::Worker>>,
    shutting_down: AtomicBool,
    initialized: OnceCell<()>,
    on_ready: Mutex<Option<ReadyCallback>>,
    timer_sequence: AtomicU64,
    started_at: Instant,
    runtime_handle: tokio::runtime::Handle,
}

impl<L: WorkerLauncher> WorkerPoolInner<L> {
    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Registry<L::Worker>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn runtime_handle(&self) -> &tokio::runtime::Handle {
        &self.runtime_handle
    }

    pub(crate) fn next_timer_sequence(&self) -> u64 {
        self.timer_sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn status(&self) -> PoolStatus {
        let registry = self.lock();
        PoolStatus {
            capacity: self.config.capacity,
            busy_count: registry.busy_count(),
            queue_depth: registry.waiters.len(),
            launching: registry.reserved.len(),
            usage_budget: self.config.usage_budget,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            workers: registry.records.values().map(WorkerRecord::status).collect(),
        }
    }

    async fn launch(self: &Arc<Self>, id: WorkerId) -> Result<Arc<L::Worker>> {
        let inner = Arc::clone(self);
        let worker = tokio::task::spawn_blocking(move || inner.launcher.launch(&id)).await??;
        Ok(Arc::new(worker))
    }

    /// Launch with exponential backoff between attempts.
    pub(crate) async fn launch_with_retry(self: &Arc<Self>, id: WorkerId) -> Result<Arc<L::Worker>> {
        let attempts = self.config.launch_retries + 1;
        let mut backoff = self.config.launch_backoff;
        let mut attempt = 1;

        loop {
            match self.launch(id).await {
                Ok(worker) => return Ok(worker),
                Err(e) if attempt < attempts && !self.is_shutting_down() => {
                    log::warn!(
                        "⚠️ Launch of {} failed (attempt {}/{}): {} - retrying in {:?}",
                        id,
                        attempt,
                        attempts,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    log::error!("❌ Giving up on launching {}: {}", id, e);
                    return Err(e);
                }
            }
        }
    }

    /// Close the worker in slot `id` and launch a replacement there.
    ///
    /// The replacement starts with a usage count of 1.
    pub(crate) async fn relaunch(
        self: &Arc<Self>,
        id: WorkerId,
        old: Arc<L::Worker>,
    ) -> Result<Arc<L::Worker>> {
        if let Some(record) = self.lock().records.get_mut(&id) {
            record.cancel_retirement();
        }
        close_worker(old).await;

        let fresh = self.launch_with_retry(id).await?;

        let accepted = {
            let mut registry = self.lock();
            match registry.records.get_mut(&id) {
                Some(record) if !self.is_shutting_down() => {
                    record.replace_worker(Arc::clone(&fresh));
                    true
                }
                _ => false,
            }
        };

        if accepted {
            log::info!("🔄 {} relaunched at {}", id, fresh.endpoint());
            Ok(fresh)
        } else {
            close_worker(fresh).await;
            Err(PoolError::ShuttingDown)
        }
    }

    /// Hand a worker the pool itself was holding back to callers.
    pub(crate) fn finish_retirement(&self, id: WorkerId, replaced: bool) {
        let mut registry = self.lock();
        if let Some(record) = registry.records.get_mut(&id) {
            record.retiring = false;
            if replaced {
                // Whoever held the old process keeps a stale endpoint; their release is a no-op.
                record.leased = false;
            }
        }
        registry.make_available(id);
    }

    /// Launch workers in the background for callers queued behind a launch
    /// that did not complete.
    ///
    /// Each launch that fails rejects the head waiter with the launch error,
    /// so the loop ends once a worker is placed or the queue is empty.
    fn launch_for_waiters(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.runtime_handle.spawn(async move {
            loop {
                let slot = {
                    let mut registry = inner.lock();
                    if inner.is_shutting_down() || registry.waiters.is_empty() {
                        None
                    } else {
                        let queued = registry.waiters.len();
                        registry.reserve_slot(inner.config.capacity).map(|id| (id, queued))
                    }
                };
                let Some((id, queued)) = slot else {
                    return;
                };

                log::info!("🚀 Launching {} for {} queued callers", id, queued);
                let reservation = SlotReservation::detached(&inner, id);
                match inner.launch_with_retry(id).await {
                    Ok(worker) => {
                        reservation.fill(worker, false);
                        return;
                    }
                    Err(e) => {
                        drop(reservation);
                        inner.lock().waiters.reject(e);
                    }
                }
            }
        });
    }

    // ------------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------------

    pub(crate) async fn init(self: &Arc<Self>) -> Result<()> {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }
        self.initialized.get_or_try_init(|| self.populate()).await?;
        Ok(())
    }

    async fn populate(self: &Arc<Self>) -> Result<()> {
        let target = if self.config.eager_launch {
            self.config.capacity
        } else {
            self.config.min_warm
        };
        let init_timeout = self.config.init_timeout;

        log::info!(
            "🚀 Initializing worker pool: {} of {} workers (timeout: {}s)",
            target,
            self.config.capacity,
            init_timeout.as_secs()
        );

        match tokio::time::timeout(init_timeout, self.fill_to(target)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::error!("❌ Worker pool initialization failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                log::error!("❌ Worker pool initialization timed out after {}s", init_timeout.as_secs());
                return Err(PoolError::Launch(format!(
                    "initialization timed out after {}s",
                    init_timeout.as_secs()
                )));
            }
        }

        let status = self.status();
        log::info!("✅ Worker pool ready - {}", status);

        let callback = self
            .on_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback(&status);
        }
        Ok(())
    }

    /// Launch workers one by one until the registry holds `target`.
    ///
    /// A launch failure here is fatal and is not retried.
    async fn fill_to(self: &Arc<Self>, target: usize) -> Result<()> {
        loop {
            let slot = {
                let mut registry = self.lock();
                if registry.records.len() + registry.reserved.len() >= target {
                    None
                } else {
                    registry.reserve_slot(self.config.capacity)
                }
            };
            let Some(id) = slot else {
                return Ok(());
            };

            let reservation = SlotReservation::new(self, id);
            let worker = self.launch(id).await?;
            log::debug!("✅ {} launched at {}", id, worker.endpoint());
            reservation.fill(worker, false);
        }
    }

    // ------------------------------------------------------------------------
    // Acquire / release
    // ------------------------------------------------------------------------

    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<WorkerLease<L>> {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }
        self.init().await?;

        let claim = {
            let mut registry = self.lock();
            let idle = if registry.waiters.is_empty() {
                registry.pick_idle()
            } else {
                None
            };
            match idle {
                Some(id) => {
                    if let Some(record) = registry.records.get_mut(&id) {
                        record.leased = true;
                    }
                    Claim::Idle(id)
                }
                None if registry.waiters.is_empty() => {
                    match registry.reserve_slot(self.config.capacity) {
                        Some(id) => Claim::Launch(id),
                        None => Claim::enqueue(&mut *registry),
                    }
                }
                None => Claim::enqueue(&mut *registry),
            }
        };

        let (id, fresh) = match claim {
            Claim::Idle(id) => (id, false),
            Claim::Launch(id) => {
                log::debug!("🚀 No idle worker - growing pool with {}", id);
                let reservation = SlotReservation::new(self, id);
                let worker = self.launch_with_retry(id).await?;
                reservation.fill(worker, true);
                (id, true)
            }
            Claim::Wait(ticket, rx, position) => {
                log::debug!("⏳ No idle worker - queued at position {}", position);
                let ticket = WaitTicket::new(ticket, rx, Arc::clone(self));
                (ticket.wait(self.config.acquire_timeout).await?, false)
            }
        };

        self.checkout(id, fresh).await
    }

    /// Turn a worker reserved for the caller into a lease.
    ///
    /// `fresh` marks a worker launched for this very lease, whose initial
    /// usage count already covers it.
    async fn checkout(self: &Arc<Self>, id: WorkerId, mut fresh: bool) -> Result<WorkerLease<L>> {
        let claim = LeaseClaim::new(self, id);

        let worker = self
            .lock()
            .records
            .get(&id)
            .map(|record| Arc::clone(&record.worker))
            .ok_or(PoolError::ShuttingDown)?;

        let (mut worker, mut connection) = match connect_worker(&worker).await {
            Ok(connection) => (worker, connection),
            Err(e) => {
                log::warn!("⚠️ {} is not answering ({}) - relaunching", id, e);
                let replacement = self.relaunch(id, worker).await?;
                fresh = true;
                let connection = connect_worker(&replacement).await?;
                (replacement, connection)
            }
        };

        if !fresh {
            let over_budget = self
                .lock()
                .records
                .get(&id)
                .is_some_and(|record| record.usage_count > self.config.usage_budget);
            if over_budget {
                match recycle::retire(self, id, worker, connection, self.config.retire_retries).await? {
                    Retirement::Replaced {
                        worker: replacement,
                        connection: reconnected,
                    } => {
                        worker = replacement;
                        connection = reconnected;
                        fresh = true;
                    }
                    Retirement::Deferred {
                        worker: same,
                        connection: same_connection,
                    } => {
                        worker = same;
                        connection = same_connection;
                    }
                }
            }
        }

        let usage_count = {
            let mut registry = self.lock();
            let record = registry.records.get_mut(&id).ok_or(PoolError::ShuttingDown)?;
            if !fresh {
                record.usage_count += 1;
            }
            record.usage_count
        };

        claim.disarm();
        log::debug!("📤 Leased {} ({}, use #{})", id, worker.endpoint(), usage_count);
        Ok(WorkerLease::new(id, usage_count, worker, connection, Arc::clone(self)))
    }

    /// End a lease identified by the endpoint it was issued for.
    pub(crate) fn return_worker(&self, endpoint: &str) {
        let mut registry = self.lock();
        match registry.find_by_endpoint(endpoint) {
            Some(id) => {
                registry.release(id);
                log::trace!("📥 {} released", id);
            }
            None => log::debug!("Lease for {} outlived its worker - nothing to release", endpoint),
        }
    }

    /// End a lease and replace its worker before anyone else gets it.
    pub(crate) fn discard_worker(self: &Arc<Self>, endpoint: &str) {
        let target = {
            let mut registry = self.lock();
            registry
                .find_by_endpoint(endpoint)
                .and_then(|id| registry.records.get_mut(&id))
                .filter(|record| record.leased && !record.retiring)
                .map(|record| {
                    record.leased = false;
                    record.retiring = true;
                    (record.id, Arc::clone(&record.worker))
                })
        };
        let Some((id, worker)) = target else {
            return;
        };

        log::warn!("🗑️ Discarding {} ({}) - relaunching in background", id, endpoint);
        let inner = Arc::clone(self);
        self.runtime_handle.spawn(async move {
            let replaced = match inner.relaunch(id, worker).await {
                Ok(_) => true,
                Err(e) => {
                    log::error!("❌ Relaunch of discarded {} failed: {}", id, e);
                    false
                }
            };
            inner.finish_retirement(id, replaced);
        });
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Empty the registry: wake waiters, cancel timers, collect workers.
    fn drain(&self) -> Vec<Arc<L::Worker>> {
        let mut registry = self.lock();
        let woken = registry.waiters.clear();
        if woken > 0 {
            log::info!("Woke {} queued callers", woken);
        }
        registry.reserved.clear();
        std::mem::take(&mut registry.records)
            .into_values()
            .map(|mut record| {
                record.cancel_retirement();
                record.worker
            })
            .collect()
    }

    pub(crate) async fn shutdown(self: &Arc<Self>) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            log::debug!("Pool already shut down");
            return;
        }
        log::info!("🛑 Shutting down worker pool...");

        let workers = self.drain();
        let count = workers.len();
        let closing: Vec<_> = workers
            .into_iter()
            .map(|worker| tokio::task::spawn_blocking(move || worker.close()))
            .collect();

        let wait_all = async {
            for task in closing {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => log::warn!("⚠️ Error closing worker: {}", e),
                    Err(e) => log::warn!("⚠️ Close task failed: {}", e),
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, wait_all).await {
            Ok(()) => log::info!("✅ Shutdown complete - closed {} workers", count),
            Err(_) => log::warn!(
                "⚠️ Shutdown gave up after {}s with workers still closing",
                self.config.shutdown_timeout.as_secs()
            ),
        }
    }

    fn shutdown_sync(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("🛑 Shutting down worker pool (sync mode)...");
        let workers = self.drain();
        let count = workers.len();
        for worker in workers {
            if let Err(e) = worker.close() {
                log::warn!("⚠️ Error closing {}: {}", worker.endpoint(), e);
            }
        }
        log::info!("Sync shutdown complete - closed {} workers", count);
    }
}

impl<L: WorkerLauncher> Abandon<WorkerId> for WorkerPoolInner<L> {
    fn abandon(&self, ticket: u64, rx: &mut HandOff<WorkerId>) {
        let mut registry = self.lock();
        registry.waiters.remove(ticket);
        // A worker may have been handed to us right before we gave up.
        if let Ok(Ok(id)) = rx.try_recv() {
            registry.release(id);
        }
    }
}

/// How an acquisition will be served.
enum Claim {
    Idle(WorkerId),
    Launch(WorkerId),
    Wait(u64, HandOff<WorkerId>, usize),
}

impl Claim {
    fn enqueue<W: Worker>(registry: &mut Registry<W>) -> Self {
        let (ticket, rx) = registry.waiters.enqueue();
        Claim::Wait(ticket, rx, registry.waiters.len())
    }
}

/// A slot claimed for a launch in flight. Dropping it frees the slot.
///
/// Callers that queued while the slot was reserved counted on it. If it is
/// dropped unfilled while they wait, a background launch is started for them.
struct SlotReservation<L: WorkerLauncher> {
    inner: Arc<WorkerPoolInner<L>>,
    id: Option<WorkerId>,
    serves_waiters: bool,
}

impl<L: WorkerLauncher> SlotReservation<L> {
    fn new(inner: &Arc<WorkerPoolInner<L>>, id: WorkerId) -> Self {
        Self {
            inner: Arc::clone(inner),
            id: Some(id),
            serves_waiters: true,
        }
    }

    /// A reservation owned by [`WorkerPoolInner::launch_for_waiters`].
    fn detached(inner: &Arc<WorkerPoolInner<L>>, id: WorkerId) -> Self {
        let mut reservation = Self::new(inner, id);
        reservation.serves_waiters = false;
        reservation
    }

    fn fill(mut self, worker: Arc<L::Worker>, leased: bool) {
        let Some(id) = self.id.take() else {
            return;
        };
        let mut registry = self.inner.lock();
        if self.inner.is_shutting_down() {
            registry.reserved.remove(&id);
            drop(registry);
            log::debug!("Pool shut down while {} was launching - closing it", id);
            self.inner.runtime_handle.spawn(close_worker(worker));
            return;
        }
        registry.insert(id, worker, leased);
        if !leased {
            registry.make_available(id);
        }
    }
}

impl<L: WorkerLauncher> Drop for SlotReservation<L> {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let stranded = {
            let mut registry = self.inner.lock();
            registry.reserved.remove(&id);
            registry.waiters.len()
        };
        if self.serves_waiters && stranded > 0 && !self.inner.is_shutting_down() {
            log::warn!("⚠️ Launch of {} did not complete with {} callers queued", id, stranded);
            self.inner.launch_for_waiters();
        }
    }
}

/// A record reserved for a caller whose lease is not built yet.
///
/// Dropping it without [`disarm`](Self::disarm) releases the record, so an
/// error or a cancelled acquire never leaves a worker stuck busy.
struct LeaseClaim<L: WorkerLauncher> {
    inner: Arc<WorkerPoolInner<L>>,
    id: WorkerId,
    armed: bool,
}

impl<L: WorkerLauncher> LeaseClaim<L> {
    fn new(inner: &Arc<WorkerPoolInner<L>>, id: WorkerId) -> Self {
        Self {
            inner: Arc::clone(inner),
            id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<L: WorkerLauncher> Drop for LeaseClaim<L> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().release(self.id);
        }
    }
}

// ============================================================================
// WorkerPool
// ============================================================================

/// Pool of worker processes leased out one caller at a time.
///
/// Share it between tasks with [`into_shared`](Self::into_shared).
/// Dropping the pool shuts it down synchronously if
/// [`shutdown`](Self::shutdown) was not awaited first.
pub struct WorkerPool<L: WorkerLauncher> {
    inner: Arc<WorkerPoolInner<L>>,
}

impl<L: WorkerLauncher> WorkerPool<L> {
    /// Create a builder.
    pub fn builder() -> WorkerPoolBuilder<L> {
        WorkerPoolBuilder::new()
    }

    /// Launch the initial workers and run the ready callback.
    ///
    /// Launches `capacity` workers in eager mode, `min_warm` otherwise.
    /// Calling it again after success does nothing. `acquire()` calls it on
    /// first use.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Launch`] if a worker fails to start or init times out
    /// - [`PoolError::ShuttingDown`] after shutdown
    pub async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    /// Lease a worker, waiting in FIFO order if none is free.
    ///
    /// The lease is released when dropped.
    ///
    /// # Errors
    ///
    /// - [`PoolError::AcquireTimeout`] if `acquire_timeout` elapses in the queue
    /// - [`PoolError::ShuttingDown`] if the pool shuts down first
    /// - [`PoolError::Launch`] if a needed (re)launch fails after retries
    /// - [`PoolError::Connect`] if a freshly relaunched worker is unreachable
    pub async fn acquire(&self) -> Result<WorkerLease<L>> {
        self.inner.acquire().await
    }

    /// Snapshot of pool health. Never changes pool state.
    pub fn status(&self) -> PoolStatus {
        self.inner.status()
    }

    /// The pool's configuration.
    pub fn config(&self) -> &PoolConfig {
        self.inner.config()
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.is_shutting_down()
    }

    /// Close every worker and reject further acquisitions.
    ///
    /// Cancels retirement timers, wakes queued callers with
    /// [`PoolError::ShuttingDown`] and does not wait for leased workers to
    /// come back. Bounded by `shutdown_timeout`.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    /// Wrap the pool for sharing across tasks.
    pub fn into_shared(self) -> SharedWorkerPool<L> {
        log::debug!("Converting WorkerPool into shared handle");
        Arc::new(self)
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<WorkerPoolInner<L>> {
        &self.inner
    }
}

impl<L: WorkerLauncher> Drop for WorkerPool<L> {
    fn drop(&mut self) {
        if !self.inner.is_shutting_down() {
            log::warn!("WorkerPool dropped without explicit shutdown - cleaning up");
            self.inner.shutdown_sync();
        }
    }
}

impl<L: WorkerLauncher> std::fmt::Debug for WorkerPool<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("status", &self.status())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

// ============================================================================
// WorkerPoolBuilder
// ============================================================================

/// Builder for [`WorkerPool`].
///
/// ```rust,ignore
/// let pool = WorkerPool::builder()
///     .config(PoolConfigBuilder::new().capacity(2).usage_budget(100).build()?)
///     .launcher(ChromeLauncher::new().with_storage(".browser-cache"))
///     .build()?;
/// ```
pub struct WorkerPoolBuilder<L: WorkerLauncher> {
    config: Option<PoolConfig>,
    launcher: Option<L>,
    on_ready: Option<ReadyCallback>,
}

impl<L: WorkerLauncher> WorkerPoolBuilder<L> {
    /// Create a builder with default configuration and no launcher.
    pub fn new() -> Self {
        Self {
            config: None,
            launcher: None,
            on_ready: None,
        }
    }

    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the launcher (required).
    pub fn launcher(mut self, launcher: L) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Run `callback` once the pool has been initialized.
    pub fn on_ready<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&PoolStatus) + Send + 'static,
    {
        self.on_ready = Some(Box::new(callback));
        self
    }

    /// Build the pool. No worker is launched until `init()` or the first
    /// `acquire()`.
    ///
    /// # Errors
    ///
    /// [`PoolError::Configuration`] if no launcher was given or if called
    /// outside a tokio runtime.
    pub fn build(self) -> Result<WorkerPool<L>> {
        let launcher = self
            .launcher
            .ok_or_else(|| PoolError::Configuration("No launcher provided".to_string()))?;
        let runtime_handle = tokio::runtime::Handle::try_current().map_err(|_| {
            PoolError::Configuration("WorkerPool must be built inside a tokio runtime".to_string())
        })?;
        let config = self.config.unwrap_or_default();

        log::info!(
            "🏗️ Worker pool created (capacity: {}, usage budget: {}, eager: {})",
            config.capacity,
            config.usage_budget,
            config.eager_launch
        );

        Ok(WorkerPool {
            inner: Arc::new(WorkerPoolInner {
                config,
                launcher,
                registry: Mutex::new(Registry::new()),
                shutting_down: AtomicBool::new(false),
                initialized: OnceCell::new(),
                on_ready: Mutex::new(self.on_ready),
                timer_sequence: AtomicU64::new(0),
                started_at: Instant::now(),
                runtime_handle,
            }),
        })
    }
}

impl<L: WorkerLauncher> Default for WorkerPoolBuilder<L> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Environment initialization (feature-gated)
// ============================================================================

/// Build and initialize a Chrome-backed pool from environment variables.
///
/// Reads the variables listed in [`config::env`](crate::config::env) plus
/// `CHROME_PATH`, launches the initial workers and returns a shared pool.
///
/// # Errors
///
/// - [`PoolError::Configuration`] if the configuration is invalid
/// - [`PoolError::Launch`] if init fails
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     env_logger::init();
///     let pool = render_pool::init_worker_pool().await?;
///     println!("{}", pool.status());
///     Ok(())
/// }
/// ```
#[cfg(feature = "env-config")]
pub async fn init_worker_pool() -> Result<SharedWorkerPool<crate::launcher::ChromeLauncher>> {
    use crate::config::env::{chrome_path_from_env, from_env};
    use crate::launcher::ChromeLauncher;

    log::info!("Initializing worker pool from environment...");

    let config = from_env()?;
    let chrome_path = chrome_path_from_env();
    log::info!(
        "   - Chrome path: {}",
        chrome_path.as_deref().unwrap_or("auto-detect")
    );

    let launcher = ChromeLauncher::from_config(&config, chrome_path);
    let pool = WorkerPool::builder()
        .config(config)
        .launcher(launcher)
        .build()
        .inspect_err(|e| log::error!("❌ Failed to create worker pool: {}", e))?;

    pool.init()
        .await
        .inspect_err(|e| log::error!("❌ Failed to initialize worker pool: {}", e))?;

    Ok(pool.into_shared())
}

// ============================================================================
// Unit Tests
// ============================================================================
