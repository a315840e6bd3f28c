//! Page-level sub-pool: reusable contexts inside one long-lived worker.
//!
//! Instead of leasing whole browser processes, [`ContextPool`] launches a
//! single worker and leases out its contexts (tabs). The worker is launched
//! on first use. Contexts that already exist in it are adopted, and new ones
//! are opened until `min_warm` are alive.
//!
//! - `acquire()` takes an idle context, opens a new one while fewer than
//!   `capacity` are alive, or waits in FIFO order.
//! - Releasing a context hands it to the oldest waiter. With nobody waiting
//!   it goes idle, unless more than one is already idle and the pool is
//!   above `min_warm`, in which case it is closed.
//!
//! ```rust,ignore
//! let pool = ContextPool::builder()
//!     .config(PoolConfigBuilder::new().min_warm(2).capacity(8).build()?)
//!     .launcher(ChromeLauncher::new().for_context_host())
//!     .build()?;
//!
//! let tab = pool.acquire().await?;
//! tab.navigate_to("data:text/html,<p>hi</p>")?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::OnceCell;

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::launcher::{WorkerId, WorkerLauncher};
use crate::queue::{Abandon, HandOff, WaitQueue, WaitTicket};
use crate::status::ContextPoolStatus;
use crate::traits::{ContextHost, Worker};

/// Context type of the worker produced by launcher `L`.
pub type Context<L> = <<L as WorkerLauncher>::Worker as ContextHost>::Context;

struct ContextSlot<C> {
    key: u64,
    context: Arc<C>,
    busy: bool,
}

struct ContextState<C> {
    slots: Vec<ContextSlot<C>>,
    waiters: WaitQueue<u64>,
    creating: usize,
    next_key: u64,
}

impl<C> ContextState<C> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            waiters: WaitQueue::new(),
            creating: 0,
            next_key: 0,
        }
    }

    fn add(&mut self, context: C, busy: bool) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        self.slots.push(ContextSlot {
            key,
            context: Arc::new(context),
            busy,
        });
        key
    }

    fn idle_count(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.busy).count()
    }

    fn busy_count(&self) -> usize {
        self.slots.len() - self.idle_count()
    }

    fn take_idle(&mut self) -> Option<u64> {
        let slot = self.slots.iter_mut().find(|slot| !slot.busy)?;
        slot.busy = true;
        Some(slot.key)
    }

    fn context(&self, key: u64) -> Option<Arc<C>> {
        self.slots
            .iter()
            .find(|slot| slot.key == key)
            .map(|slot| Arc::clone(&slot.context))
    }

    fn remove(&mut self, key: u64) -> Option<Arc<C>> {
        let index = self.slots.iter().position(|slot| slot.key == key)?;
        Some(self.slots.remove(index).context)
    }

    /// Return a context. Yields the context when it should be closed.
    fn release(&mut self, key: u64, min: usize) -> Option<Arc<C>> {
        let index = self.slots.iter().position(|slot| slot.key == key)?;
        if !self.slots[index].busy {
            return None;
        }
        // Stays busy when a waiter takes it.
        self.waiters.hand_off(key)?;

        self.slots[index].busy = false;
        if self.idle_count() > 1 && self.slots.len() > min {
            return Some(self.slots.remove(index).context);
        }
        None
    }

    /// Place a new idle context, giving it to a waiter if one is queued.
    fn offer(&mut self, context: C) {
        let key = self.add(context, true);
        if let Some(unclaimed) = self.waiters.hand_off(key) {
            if let Some(slot) = self.slots.iter_mut().find(|slot| slot.key == unclaimed) {
                slot.busy = false;
            }
        }
    }
}

// ============================================================================
// ContextPoolInner
// ============================================================================

pub(crate) struct ContextPoolInner<L: WorkerLauncher>
where
    L::Worker: ContextHost,
{
    config: PoolConfig,
    launcher: L,
    worker: OnceCell<Arc<L::Worker>>,
    state: Mutex<ContextState<Context<L>>>,
    shutting_down: AtomicBool,
    started_at: Instant,
    runtime_handle: tokio::runtime::Handle,
}

impl<L: WorkerLauncher> ContextPoolInner<L>
where
    L::Worker: ContextHost,
{
    fn lock(&self) -> MutexGuard<'_, ContextState<Context<L>>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn status(&self) -> ContextPoolStatus {
        let state = self.lock();
        ContextPoolStatus {
            worker_endpoint: self.worker.get().map(|worker| worker.endpoint().to_string()),
            min_contexts: self.config.min_warm,
            max_contexts: self.config.capacity,
            live: state.slots.len(),
            busy: state.busy_count(),
            queue_depth: state.waiters.len(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    async fn ensure_worker(self: &Arc<Self>) -> Result<Arc<L::Worker>> {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }
        self.worker
            .get_or_try_init(|| self.start_worker())
            .await
            .map(Arc::clone)
    }

    async fn start_worker(self: &Arc<Self>) -> Result<Arc<L::Worker>> {
        log::info!(
            "🚀 Starting context host ({}..={} contexts)",
            self.config.min_warm,
            self.config.capacity
        );

        let inner = Arc::clone(self);
        let worker = Arc::new(
            tokio::task::spawn_blocking(move || inner.launcher.launch(&WorkerId::new(0))).await??,
        );

        let host = Arc::clone(&worker);
        let existing = tokio::task::spawn_blocking(move || host.existing_contexts()).await??;
        let adopted = existing.len();
        {
            let mut state = self.lock();
            for context in existing {
                state.add(context, false);
            }
        }

        let mut opened = 0;
        while self.lock().slots.len() < self.config.min_warm {
            let context = create_context(&worker).await?;
            self.lock().add(context, false);
            opened += 1;
        }

        log::info!(
            "✅ Context host ready at {} (adopted {}, opened {})",
            worker.endpoint(),
            adopted,
            opened
        );
        Ok(worker)
    }

    async fn acquire(self: &Arc<Self>) -> Result<ContextLease<L>> {
        let worker = self.ensure_worker().await?;

        let claim = {
            let mut state = self.lock();
            let idle = if state.waiters.is_empty() { state.take_idle() } else { None };
            match idle {
                Some(key) => Claim::Idle(key),
                None if state.waiters.is_empty()
                    && state.slots.len() + state.creating < self.config.capacity =>
                {
                    state.creating += 1;
                    Claim::Create
                }
                None => {
                    let (ticket, rx) = state.waiters.enqueue();
                    Claim::Wait(ticket, rx)
                }
            }
        };

        let key = match claim {
            Claim::Idle(key) => key,
            Claim::Create => {
                let creation = Creation::new(self);
                let context = create_context(&worker).await?;
                creation.fill(context)
            }
            Claim::Wait(ticket, rx) => {
                log::debug!("⏳ All contexts busy - waiting");
                WaitTicket::new(ticket, rx, Arc::clone(self))
                    .wait(self.config.acquire_timeout)
                    .await?
            }
        };

        let context = self.lock().context(key).ok_or(PoolError::ShuttingDown)?;
        Ok(ContextLease {
            key,
            context,
            pool: Arc::clone(self),
            discard: false,
        })
    }

    fn release(&self, key: u64) {
        let doomed = self.lock().release(key, self.config.min_warm);
        if let Some(context) = doomed {
            log::debug!("Closing surplus context #{}", key);
            self.close_in_background(context);
        }
    }

    fn discard(self: &Arc<Self>, key: u64) {
        let removed = self.lock().remove(key);
        if let Some(context) = removed {
            log::warn!("🗑️ Discarding context #{}", key);
            self.close_in_background(context);
            self.replenish();
        }
    }

    /// Open a context for the head waiter after one was discarded or a
    /// creation it queued behind failed.
    ///
    /// A failed attempt rejects the head waiter with the error and moves on
    /// to the next one.
    fn replenish(self: &Arc<Self>) {
        let wanted = {
            let mut state = self.lock();
            let wanted = !state.waiters.is_empty()
                && state.slots.len() + state.creating < self.config.capacity;
            if wanted {
                state.creating += 1;
            }
            wanted
        };
        if !wanted || self.is_shutting_down() {
            if wanted {
                self.lock().creating -= 1;
            }
            return;
        }

        let inner = Arc::clone(self);
        self.runtime_handle.spawn(async move {
            let creation = Creation::detached(&inner);
            let Some(worker) = inner.worker.get().cloned() else {
                return;
            };
            match create_context(&worker).await {
                Ok(context) => creation.offer(context),
                Err(e) => {
                    log::error!("❌ Could not open a context for a queued caller: {}", e);
                    drop(creation);
                    inner.lock().waiters.reject(e);
                    inner.replenish();
                }
            }
        });
    }

    fn close_in_background(&self, context: Arc<Context<L>>) {
        let Some(worker) = self.worker.get().cloned() else {
            return;
        };
        self.runtime_handle.spawn_blocking(move || {
            if let Err(e) = worker.close_context(&context) {
                log::warn!("⚠️ Error closing context: {}", e);
            }
        });
    }

    fn drain(&self) -> Vec<Arc<Context<L>>> {
        let mut state = self.lock();
        state.waiters.clear();
        std::mem::take(&mut state.slots)
            .into_iter()
            .map(|slot| slot.context)
            .collect()
    }

    async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("🛑 Shutting down context pool...");

        let contexts = self.drain();
        let Some(worker) = self.worker.get().cloned() else {
            log::info!("✅ Context pool shut down (worker never started)");
            return;
        };

        let count = contexts.len();
        let closing = tokio::task::spawn_blocking(move || {
            for context in &contexts {
                if let Err(e) = worker.close_context(context) {
                    log::warn!("⚠️ Error closing context: {}", e);
                }
            }
            worker.close()
        });

        match tokio::time::timeout(self.config.shutdown_timeout, closing).await {
            Ok(Ok(Ok(()))) => log::info!("✅ Context pool shut down - closed {} contexts", count),
            Ok(Ok(Err(e))) => log::warn!("⚠️ Error closing context host: {}", e),
            Ok(Err(e)) => log::warn!("⚠️ Shutdown task failed: {}", e),
            Err(_) => log::warn!(
                "⚠️ Context pool shutdown gave up after {}s",
                self.config.shutdown_timeout.as_secs()
            ),
        }
    }

    fn shutdown_sync(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let contexts = self.drain();
        if let Some(worker) = self.worker.get() {
            for context in &contexts {
                if let Err(e) = worker.close_context(context) {
                    log::warn!("⚠️ Error closing context: {}", e);
                }
            }
            if let Err(e) = worker.close() {
                log::warn!("⚠️ Error closing context host: {}", e);
            }
        }
    }
}

async fn create_context<W: ContextHost>(worker: &Arc<W>) -> Result<W::Context> {
    let host = Arc::clone(worker);
    tokio::task::spawn_blocking(move || host.new_context()).await?
}

impl<L: WorkerLauncher> Abandon<u64> for ContextPoolInner<L>
where
    L::Worker: ContextHost,
{
    fn abandon(&self, ticket: u64, rx: &mut HandOff<u64>) {
        let doomed = {
            let mut state = self.lock();
            state.waiters.remove(ticket);
            match rx.try_recv() {
                Ok(Ok(key)) => state.release(key, self.config.min_warm),
                _ => None,
            }
        };
        if let Some(context) = doomed {
            self.close_in_background(context);
        }
    }
}

enum Claim {
    Idle(u64),
    Create,
    Wait(u64, HandOff<u64>),
}

/// A context creation in flight, counted against capacity until placed.
///
/// Dropped unplaced while callers wait behind it, it asks the pool to
/// replenish for them.
struct Creation<L: WorkerLauncher>
where
    L::Worker: ContextHost,
{
    inner: Arc<ContextPoolInner<L>>,
    pending: bool,
    serves_waiters: bool,
}

impl<L: WorkerLauncher> Creation<L>
where
    L::Worker: ContextHost,
{
    fn new(inner: &Arc<ContextPoolInner<L>>) -> Self {
        Self {
            inner: Arc::clone(inner),
            pending: true,
            serves_waiters: true,
        }
    }

    /// A creation owned by [`ContextPoolInner::replenish`].
    fn detached(inner: &Arc<ContextPoolInner<L>>) -> Self {
        let mut creation = Self::new(inner);
        creation.serves_waiters = false;
        creation
    }

    /// Place the context as leased by the caller.
    fn fill(mut self, context: Context<L>) -> u64 {
        self.pending = false;
        let mut state = self.inner.lock();
        state.creating -= 1;
        state.add(context, true)
    }

    /// Place the context for the head waiter, or idle.
    fn offer(mut self, context: Context<L>) {
        self.pending = false;
        let mut state = self.inner.lock();
        state.creating -= 1;
        state.offer(context);
    }
}

impl<L: WorkerLauncher> Drop for Creation<L>
where
    L::Worker: ContextHost,
{
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        let stranded = {
            let mut state = self.inner.lock();
            state.creating -= 1;
            state.waiters.len()
        };
        if self.serves_waiters && stranded > 0 {
            log::warn!("⚠️ Context creation did not complete with {} callers queued", stranded);
            self.inner.replenish();
        }
    }
}

// ============================================================================
// ContextPool
// ============================================================================

/// Pool of contexts inside a single worker.
pub struct ContextPool<L: WorkerLauncher>
where
    L::Worker: ContextHost,
{
    inner: Arc<ContextPoolInner<L>>,
}

impl<L: WorkerLauncher> ContextPool<L>
where
    L::Worker: ContextHost,
{
    /// Create a builder.
    pub fn builder() -> ContextPoolBuilder<L> {
        ContextPoolBuilder::new()
    }

    /// Launch the hosting worker and open the warm contexts now rather than
    /// on first acquire.
    pub async fn init(&self) -> Result<()> {
        self.inner.ensure_worker().await.map(|_| ())
    }

    /// Lease a context, waiting in FIFO order if all are busy.
    ///
    /// # Errors
    ///
    /// - [`PoolError::AcquireTimeout`] if `acquire_timeout` elapses
    /// - [`PoolError::ShuttingDown`] after shutdown
    /// - [`PoolError::Launch`] if the hosting worker fails to start
    /// - [`PoolError::Connect`] if a new context cannot be opened
    pub async fn acquire(&self) -> Result<ContextLease<L>> {
        self.inner.acquire().await
    }

    /// Snapshot of the pool.
    pub fn status(&self) -> ContextPoolStatus {
        self.inner.status()
    }

    /// Close all contexts, then the hosting worker.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    /// Wrap the pool for sharing across tasks.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl<L: WorkerLauncher> Drop for ContextPool<L>
where
    L::Worker: ContextHost,
{
    fn drop(&mut self) {
        if !self.inner.is_shutting_down() {
            log::warn!("ContextPool dropped without explicit shutdown - cleaning up");
            self.inner.shutdown_sync();
        }
    }
}

/// Builder for [`ContextPool`].
pub struct ContextPoolBuilder<L: WorkerLauncher> {
    config: Option<PoolConfig>,
    launcher: Option<L>,
}

impl<L: WorkerLauncher> ContextPoolBuilder<L>
where
    L::Worker: ContextHost,
{
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: None,
            launcher: None,
        }
    }

    /// Use `config`: `min_warm` and `capacity` bound the live contexts.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the launcher for the hosting worker (required).
    pub fn launcher(mut self, launcher: L) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Build the pool. The worker is launched on first use.
    ///
    /// # Errors
    ///
    /// [`PoolError::Configuration`] without a launcher or outside a tokio
    /// runtime.
    pub fn build(self) -> Result<ContextPool<L>> {
        let launcher = self
            .launcher
            .ok_or_else(|| PoolError::Configuration("No launcher provided".to_string()))?;
        let runtime_handle = tokio::runtime::Handle::try_current().map_err(|_| {
            PoolError::Configuration("ContextPool must be built inside a tokio runtime".to_string())
        })?;

        Ok(ContextPool {
            inner: Arc::new(ContextPoolInner {
                config: self.config.unwrap_or_default(),
                launcher,
                worker: OnceCell::new(),
                state: Mutex::new(ContextState::new()),
                shutting_down: AtomicBool::new(false),
                started_at: Instant::now(),
                runtime_handle,
            }),
        })
    }
}

impl<L: WorkerLauncher> Default for ContextPoolBuilder<L>
where
    L::Worker: ContextHost,
{
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ContextLease
// ============================================================================

/// Lease on one context, released on drop.
pub struct ContextLease<L: WorkerLauncher>
where
    L::Worker: ContextHost,
{
    key: u64,
    context: Arc<Context<L>>,
    pool: Arc<ContextPoolInner<L>>,
    discard: bool,
}

impl<L: WorkerLauncher> ContextLease<L>
where
    L::Worker: ContextHost,
{
    /// Pool-local key of this context.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Close the context instead of returning it to the pool.
    pub fn discard(mut self) {
        self.discard = true;
    }
}

impl<L: WorkerLauncher> std::ops::Deref for ContextLease<L>
where
    L::Worker: ContextHost,
{
    type Target = Context<L>;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

impl<L: WorkerLauncher> Drop for ContextLease<L>
where
    L::Worker: ContextHost,
{
    fn drop(&mut self) {
        if self.discard {
            self.pool.discard(self.key);
        } else {
            self.pool.release(self.key);
        }
    }
}

impl<L: WorkerLauncher> std::fmt::Debug for ContextLease<L>
where
    L::Worker: ContextHost,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextLease")
            .field("key", &self.key)
            .field("discard", &self.discard)
            .finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
