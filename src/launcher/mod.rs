//! Worker launchers.
//!
//! A [`WorkerLauncher`] starts one worker process for a given [`WorkerId`].
//! The pool calls it during init, when it grows on demand, and whenever a
//! worker has to be replaced (usage budget exhausted, crash, render timeout).
//!
//! | Launcher | Description |
//! |----------|-------------|
//! | [`ChromeLauncher`] | Headless Chrome/Chromium via `headless_chrome` |
//! | [`mock::MockLauncher`] | In-memory workers for tests (feature-gated) |
//!
//! # Example
//!
//! ```rust,ignore
//! use render_pool::{ChromeLauncher, WorkerId, WorkerLauncher, Worker};
//!
//! let launcher = ChromeLauncher::new();
//! let worker = launcher.launch(&WorkerId::new(0))?;
//! println!("worker reachable at {}", worker.endpoint());
//! ```

mod chrome;
pub mod storage;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use chrome::{CONTEXT_HOST_ARGS, ChromeLauncher, ChromeWorker, HARDENED_ARGS, create_chrome_options};

use std::fmt;

use crate::error::Result;
use crate::traits::Worker;

/// Stable identity of a worker slot.
///
/// The id survives relaunches: a retired or crashed worker is replaced under
/// the same id, which is what lets durable storage be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(usize);

impl WorkerId {
    /// Id for the given slot number.
    pub fn new(slot: usize) -> Self {
        Self(slot)
    }

    /// Slot number of this id.
    pub fn slot(&self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Starts worker processes.
///
/// # Thread Safety
///
/// Launchers are shared by the pool across blocking tasks and must be
/// `Send + Sync`.
pub trait WorkerLauncher: Send + Sync + 'static {
    /// The worker type this launcher produces.
    type Worker: Worker;

    /// Start a worker for `id`.
    ///
    /// # Errors
    ///
    /// [`PoolError::Launch`](crate::PoolError::Launch) when the process
    /// cannot be started.
    fn launch(&self, id: &WorkerId) -> Result<Self::Worker>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_display_and_order() {
        assert_eq!(WorkerId::new(3).to_string(), "worker-3");
        assert!(WorkerId::new(2) < WorkerId::new(10));
        assert_eq!(WorkerId::new(7).slot(), 7);
    }
}
