//! Error types for the worker pool.
//!
//! [`PoolError`] covers everything the pool itself can fail with. Rendering
//! errors live in [`crate::render::RenderError`], which wraps a `PoolError`
//! when acquisition is what went wrong.
//!
//! # Example
//!
//! ```rust
//! use render_pool::{PoolError, Result};
//!
//! fn lease_something() -> Result<()> {
//!     Err(PoolError::Configuration("capacity must be greater than 0".to_string()))
//! }
//!
//! match lease_something() {
//!     Err(PoolError::ShuttingDown) => println!("pool is going away"),
//!     Err(e) => eprintln!("Error: {}", e),
//!     Ok(()) => {}
//! }
//! ```

use std::time::Duration;

/// Errors that can occur during worker pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A worker process could not be started.
    ///
    /// Fatal during pool initialization. Relaunches triggered later by
    /// recycling or crash recovery retry with backoff before giving up
    /// with this error.
    ///
    /// # Common Causes
    ///
    /// - Chrome/Chromium binary not found
    /// - Storage directory not writable
    /// - Process limits exceeded
    #[error("Failed to launch worker: {0}")]
    Launch(String),

    /// A launched worker stopped answering on its endpoint.
    ///
    /// The pool recovers from this on its own by relaunching the worker
    /// under the same id. Callers only see it if the relaunched worker is
    /// unreachable too.
    #[error("Failed to connect to worker: {0}")]
    Connect(String),

    /// Waited longer than the configured acquire timeout for a free worker.
    ///
    /// The caller's place in the wait queue has been given up.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use render_pool::PoolError;
    ///
    /// let error = PoolError::AcquireTimeout(Duration::from_secs(30));
    /// assert_eq!(error.to_string(), "Timed out after 30s waiting for a free worker");
    /// ```
    #[error("Timed out after {}s waiting for a free worker", .0.as_secs())]
    AcquireTimeout(Duration),

    /// Operation attempted during or after pool shutdown.
    ///
    /// Returned by `acquire()` once shutdown has begun, and to every caller
    /// still waiting in the queue when it starts.
    #[error("Pool is shutting down")]
    ShuttingDown,

    /// Invalid configuration provided.
    ///
    /// Use [`PoolConfigBuilder`](crate::PoolConfigBuilder), which validates
    /// at build time.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A blocking worker task panicked or was cancelled.
    #[error("Worker task failed: {0}")]
    TaskFailed(String),
}

/// Result type alias using [`PoolError`].
pub type Result<T> = std::result::Result<T, PoolError>;

impl From<String> for PoolError {
    fn from(msg: String) -> Self {
        PoolError::Configuration(msg)
    }
}

impl From<&str> for PoolError {
    fn from(msg: &str) -> Self {
        PoolError::Configuration(msg.to_string())
    }
}

impl From<tokio::task::JoinError> for PoolError {
    fn from(err: tokio::task::JoinError) -> Self {
        PoolError::TaskFailed(err.to_string())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies the Display output of each variant.
    #[test]
    fn test_error_display() {
        assert_eq!(
            PoolError::Launch("no chrome".into()).to_string(),
            "Failed to launch worker: no chrome"
        );
        assert_eq!(
            PoolError::Connect("refused".into()).to_string(),
            "Failed to connect to worker: refused"
        );
        assert_eq!(PoolError::ShuttingDown.to_string(), "Pool is shutting down");
        assert_eq!(
            PoolError::AcquireTimeout(Duration::from_millis(2500)).to_string(),
            "Timed out after 2s waiting for a free worker"
        );
    }

    /// Verifies that string conversions produce configuration errors.
    #[test]
    fn test_error_from_strings() {
        let from_string: PoolError = String::from("bad").into();
        let from_str: PoolError = "worse".into();

        assert!(matches!(from_string, PoolError::Configuration(ref m) if m == "bad"));
        assert!(matches!(from_str, PoolError::Configuration(ref m) if m == "worse"));
    }

    /// Verifies that PoolError is thread-safe.
    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PoolError>();
    }
}
