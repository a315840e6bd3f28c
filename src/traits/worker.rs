//! Worker and context host traits.

use crate::error::Result;

/// A launched worker process.
///
/// Every method may block on I/O; the pools call them from
/// `tokio::task::spawn_blocking`.
///
/// # Thread Safety
///
/// Workers are shared between the registry and outstanding leases through
/// `Arc`, so implementations must be `Send + Sync`.
pub trait Worker: Send + Sync + 'static {
    /// What a caller holds while leasing this worker.
    ///
    /// Dropping the connection disconnects without stopping the process.
    type Connection: Send + Sync + 'static;

    /// Opaque descriptor of where this process can be reached.
    ///
    /// Changes whenever the process is replaced, so a lease can tell whether
    /// the worker it was given still exists.
    fn endpoint(&self) -> &str;

    /// Check the process answers and return a connection to it.
    ///
    /// # Errors
    ///
    /// [`PoolError::Connect`](crate::PoolError::Connect) when the process is
    /// gone or unresponsive.
    fn connect(&self) -> Result<Self::Connection>;

    /// Number of execution contexts currently open in the process.
    ///
    /// A freshly launched worker reports 1 for its default context.
    fn open_contexts(&self) -> Result<usize>;

    /// Stop the process. Best effort; closing twice is not an error.
    fn close(&self) -> Result<()>;
}

/// A worker that can host independent execution contexts.
pub trait ContextHost: Worker {
    /// Handle to one context (a tab for browsers).
    type Context: Send + Sync + 'static;

    /// Contexts that already exist in the process, such as the initial tab.
    fn existing_contexts(&self) -> Result<Vec<Self::Context>>;

    /// Open a new context.
    fn new_context(&self) -> Result<Self::Context>;

    /// Close one context.
    fn close_context(&self, context: &Self::Context) -> Result<()>;
}
