//! In-memory launcher for testing pool behavior without Chrome.
//!
//! # Feature Flag
//!
//! Only available with the `test-utils` feature or under `#[cfg(test)]`.
//!
//! [`MockLauncher`] is cheap to clone and every clone shares the same state,
//! so a test can keep one copy to steer workers (kill them, open contexts,
//! make launches fail) after handing another copy to a pool.
//!
//! # Example
//!
//! ```rust,ignore
//! use render_pool::launcher::mock::MockLauncher;
//!
//! let launcher = MockLauncher::new();
//! let control = launcher.clone();
//!
//! let pool = WorkerPool::builder().launcher(launcher).build()?;
//! pool.init().await?;
//!
//! control.kill(&WorkerId::new(0));
//! assert_eq!(control.launch_count(), 10);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{WorkerId, WorkerLauncher};
use crate::error::{PoolError, Result};
use crate::traits::{ContextHost, Worker};

/// Launcher producing [`MockWorker`]s.
#[derive(Clone, Default)]
pub struct MockLauncher {
    state: Arc<LauncherState>,
}

#[derive(Default)]
struct LauncherState {
    launches: AtomicUsize,
    closes: Arc<AtomicUsize>,
    sequence: AtomicU64,
    always_fail: Mutex<Option<String>>,
    fail_next: AtomicUsize,
    launch_delay: Mutex<Duration>,
    live: Mutex<HashMap<WorkerId, Arc<WorkerState>>>,
    context_faults: Arc<ContextFaults>,
}

/// Failure injection for `new_context`, shared by every worker.
#[derive(Default)]
struct ContextFaults {
    fail_next: AtomicUsize,
    delay: Mutex<Duration>,
}

struct WorkerState {
    alive: AtomicBool,
    contexts: Mutex<Vec<u64>>,
    next_context: AtomicU64,
}

impl MockLauncher {
    /// Launcher whose launches always succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Launcher whose launches always fail with `message`.
    pub fn always_fails<S: Into<String>>(message: S) -> Self {
        let launcher = Self::new();
        *launcher.state.always_fail.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(message.into());
        launcher
    }

    /// Make the next `n` launches fail.
    pub fn fail_next(&self, n: usize) {
        self.state.fail_next.store(n, Ordering::SeqCst);
    }

    /// Block every launch for `delay` before returning.
    pub fn set_launch_delay(&self, delay: Duration) {
        *self.state.launch_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Make the next `n` context creations fail, on any worker.
    pub fn fail_next_contexts(&self, n: usize) {
        self.state.context_faults.fail_next.store(n, Ordering::SeqCst);
    }

    /// Block every context creation for `delay` before returning.
    pub fn set_context_delay(&self, delay: Duration) {
        *self
            .state
            .context_faults
            .delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of launch attempts so far, failed ones included.
    pub fn launch_count(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    /// Number of workers closed so far.
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Simulate a crash of the current worker for `id`.
    ///
    /// Its endpoint stops answering `connect()`.
    pub fn kill(&self, id: &WorkerId) {
        if let Some(worker) = self.worker_state(id) {
            worker.alive.store(false, Ordering::SeqCst);
        }
    }

    /// Force the current worker for `id` to report `n` open contexts.
    pub fn set_open_contexts(&self, id: &WorkerId, n: usize) {
        if let Some(worker) = self.worker_state(id) {
            let mut contexts = worker.contexts.lock().unwrap_or_else(PoisonError::into_inner);
            contexts.clear();
            for _ in 0..n {
                contexts.push(worker.next_context.fetch_add(1, Ordering::SeqCst));
            }
        }
    }

    /// Open contexts of the current worker for `id`.
    pub fn open_contexts(&self, id: &WorkerId) -> usize {
        self.worker_state(id)
            .map(|w| w.contexts.lock().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }

    fn worker_state(&self, id: &WorkerId) -> Option<Arc<WorkerState>> {
        self.state
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn should_fail(&self) -> Option<String> {
        if let Some(message) = self
            .state
            .always_fail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Some(message);
        }
        let pending = self
            .state
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        pending.ok().map(|_| "injected launch failure".to_string())
    }
}

impl WorkerLauncher for MockLauncher {
    type Worker = MockWorker;

    fn launch(&self, id: &WorkerId) -> Result<MockWorker> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.launch_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if let Some(message) = self.should_fail() {
            log::debug!("MockLauncher: failing launch of {}", id);
            return Err(PoolError::Launch(message));
        }

        let sequence = self.state.sequence.fetch_add(1, Ordering::SeqCst);
        let worker = Arc::new(WorkerState {
            alive: AtomicBool::new(true),
            contexts: Mutex::new(vec![0]),
            next_context: AtomicU64::new(1),
        });
        self.state
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(*id, Arc::clone(&worker));

        Ok(MockWorker {
            endpoint: format!("mock://{}/{}", id, sequence),
            state: worker,
            closes: Arc::clone(&self.state.closes),
            context_faults: Arc::clone(&self.state.context_faults),
        })
    }
}

impl std::fmt::Debug for MockLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLauncher")
            .field("launches", &self.launch_count())
            .field("closes", &self.close_count())
            .finish()
    }
}

/// Worker produced by [`MockLauncher`].
pub struct MockWorker {
    endpoint: String,
    state: Arc<WorkerState>,
    closes: Arc<AtomicUsize>,
    context_faults: Arc<ContextFaults>,
}

/// Connection handed out by [`MockWorker::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConnection {
    /// Endpoint that was connected to.
    pub endpoint: String,
}

/// Context handed out by [`MockWorker`] as a [`ContextHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MockContext(pub u64);

impl Worker for MockWorker {
    type Connection = MockConnection;

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn connect(&self) -> Result<MockConnection> {
        if !self.state.alive.load(Ordering::SeqCst) {
            return Err(PoolError::Connect(format!("{} is not answering", self.endpoint)));
        }
        Ok(MockConnection {
            endpoint: self.endpoint.clone(),
        })
    }

    fn open_contexts(&self) -> Result<usize> {
        Ok(self.state.contexts.lock().unwrap_or_else(PoisonError::into_inner).len())
    }

    fn close(&self) -> Result<()> {
        if self.state.alive.swap(false, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl ContextHost for MockWorker {
    type Context = MockContext;

    fn existing_contexts(&self) -> Result<Vec<MockContext>> {
        Ok(self
            .state
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|key| MockContext(*key))
            .collect())
    }

    fn new_context(&self) -> Result<MockContext> {
        let delay = *self
            .context_faults
            .delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if !self.state.alive.load(Ordering::SeqCst) {
            return Err(PoolError::Connect(format!("{} is not answering", self.endpoint)));
        }
        let injected = self
            .context_faults
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(PoolError::Connect("injected context failure".to_string()));
        }
        let key = self.state.next_context.fetch_add(1, Ordering::SeqCst);
        self.state
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key);
        Ok(MockContext(key))
    }

    fn close_context(&self, context: &MockContext) -> Result<()> {
        self.state
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key| *key != context.0);
        Ok(())
    }
}

impl std::fmt::Debug for MockWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockWorker")
            .field("endpoint", &self.endpoint)
            .field("alive", &self.state.alive.load(Ordering::SeqCst))
            .finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies that each launch gets a distinct endpoint and one default context.
    #[test]
    fn test_mock_launch() {
        let launcher = MockLauncher::new();
        let a = launcher.launch(&WorkerId::new(0)).unwrap();
        let b = launcher.launch(&WorkerId::new(0)).unwrap();

        assert_ne!(a.endpoint(), b.endpoint());
        assert_eq!(a.open_contexts().unwrap(), 1);
        assert_eq!(launcher.launch_count(), 2);
    }

    /// Verifies that always_fails returns the configured message.
    #[test]
    fn test_mock_always_fails() {
        let launcher = MockLauncher::always_fails("Chrome not installed");

        match launcher.launch(&WorkerId::new(0)) {
            Err(PoolError::Launch(msg)) => assert_eq!(msg, "Chrome not installed"),
            other => panic!("expected launch error, got {:?}", other),
        }
        assert_eq!(launcher.launch_count(), 1);
    }

    /// Verifies that fail_next only affects the requested number of launches.
    #[test]
    fn test_mock_fail_next() {
        let launcher = MockLauncher::new();
        launcher.fail_next(2);

        assert!(launcher.launch(&WorkerId::new(0)).is_err());
        assert!(launcher.launch(&WorkerId::new(0)).is_err());
        assert!(launcher.launch(&WorkerId::new(0)).is_ok());
    }

    /// Verifies that a killed worker refuses connections and clones share state.
    #[test]
    fn test_mock_kill() {
        let launcher = MockLauncher::new();
        let control = launcher.clone();
        let worker = launcher.launch(&WorkerId::new(1)).unwrap();

        assert!(worker.connect().is_ok());
        control.kill(&WorkerId::new(1));
        assert!(matches!(worker.connect(), Err(PoolError::Connect(_))));
    }

    /// Verifies context bookkeeping.
    #[test]
    fn test_mock_contexts() {
        let launcher = MockLauncher::new();
        let id = WorkerId::new(0);
        let worker = launcher.launch(&id).unwrap();

        let ctx = worker.new_context().unwrap();
        assert_eq!(launcher.open_contexts(&id), 2);
        worker.close_context(&ctx).unwrap();
        assert_eq!(worker.existing_contexts().unwrap(), vec![MockContext(0)]);

        launcher.set_open_contexts(&id, 3);
        assert_eq!(worker.open_contexts().unwrap(), 3);
    }

    /// Verifies that context failures are injected across workers.
    #[test]
    fn test_mock_fail_next_contexts() {
        let launcher = MockLauncher::new();
        let worker = launcher.launch(&WorkerId::new(0)).unwrap();
        launcher.fail_next_contexts(1);

        assert!(matches!(worker.new_context(), Err(PoolError::Connect(_))));
        assert!(worker.new_context().is_ok());
        assert_eq!(launcher.open_contexts(&WorkerId::new(0)), 2);
    }

    /// Verifies that closing counts once per worker.
    #[test]
    fn test_mock_close_count() {
        let launcher = MockLauncher::new();
        let worker = launcher.launch(&WorkerId::new(0)).unwrap();

        worker.close().unwrap();
        worker.close().unwrap();
        assert_eq!(launcher.close_count(), 1);
    }
}
