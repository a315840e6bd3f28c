//! RAII lease on a pooled worker.
//!
//! A [`WorkerLease`] is what [`WorkerPool::acquire`](crate::WorkerPool::acquire)
//! returns. It derefs to the worker's connection (an `Arc<Browser>` for
//! Chrome) and gives the worker back when dropped, even on early return,
//! error or panic.
//!
//! ```rust,ignore
//! let browser = pool.acquire().await?;
//! let tab = browser.new_tab()?;          // via Deref
//! println!("{} on use #{}", browser.id(), browser.usage_count());
//! // released here
//! ```
//!
//! # Release semantics
//!
//! Release looks the worker up by the endpoint the lease was issued for. If
//! the worker was replaced while leased (forced retirement), the endpoint no
//! longer matches and the release is a no-op.
//!
//! A caller that saw the worker misbehave (for example a render timeout) can
//! call [`discard`](WorkerLease::discard) instead: the worker is closed and
//! relaunched before anyone else gets it.

use std::sync::Arc;

use crate::launcher::{WorkerId, WorkerLauncher};
use crate::pool::{Connection, WorkerPoolInner};
use crate::traits::Worker;

/// Lease on one worker, released on drop.
pub struct WorkerLease<L: WorkerLauncher> {
    id: WorkerId,
    endpoint: String,
    usage_count: u64,
    worker: Arc<L::Worker>,
    /// `Option` so Drop can disconnect before releasing.
    connection: Option<Connection<L>>,
    pool: Arc<WorkerPoolInner<L>>,
    discard: bool,
}

impl<L: WorkerLauncher> WorkerLease<L> {
    pub(crate) fn new(
        id: WorkerId,
        usage_count: u64,
        worker: Arc<L::Worker>,
        connection: Connection<L>,
        pool: Arc<WorkerPoolInner<L>>,
    ) -> Self {
        Self {
            id,
            endpoint: worker.endpoint().to_string(),
            usage_count,
            worker,
            connection: Some(connection),
            pool,
            discard: false,
        }
    }

    /// Slot id of the leased worker.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Endpoint of the process this lease was issued for.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The worker's usage count at the time of leasing.
    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    /// The leased worker.
    pub fn worker(&self) -> &Arc<L::Worker> {
        &self.worker
    }

    /// The connection to the leased worker.
    pub fn connection(&self) -> &Connection<L> {
        self
    }

    /// Give the worker back for replacement instead of reuse.
    pub fn discard(mut self) {
        self.discard = true;
    }
}

impl<L: WorkerLauncher> std::ops::Deref for WorkerLease<L> {
    type Target = Connection<L>;

    fn deref(&self) -> &Self::Target {
        match &self.connection {
            Some(connection) => connection,
            // Only taken in Drop.
            None => unreachable!("WorkerLease used after release"),
        }
    }
}

impl<L: WorkerLauncher> Drop for WorkerLease<L> {
    fn drop(&mut self) {
        // Disconnect before the worker can be handed to someone else.
        drop(self.connection.take());

        if self.discard {
            self.pool.discard_worker(&self.endpoint);
        } else {
            log::trace!("Returning {} ({}) to pool", self.id, self.endpoint);
            self.pool.return_worker(&self.endpoint);
        }
    }
}

impl<L: WorkerLauncher> std::fmt::Debug for WorkerLease<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLease")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("usage_count", &self.usage_count)
            .field("discard", &self.discard)
            .finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
