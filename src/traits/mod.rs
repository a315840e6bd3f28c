//! Traits describing what the pools need from a worker process.
//!
//! - [`Worker`]: a launched process the worker pool can connect to, inspect
//!   and close.
//! - [`ContextHost`]: a worker that can also host many independent
//!   execution contexts (tabs), used by the context pool.
//!
//! Both are implemented for Chrome by [`ChromeWorker`](crate::ChromeWorker)
//! and for tests by the mock worker behind the `test-utils` feature.
//!
//! # Implementing a Custom Worker
//!
//! ```rust,ignore
//! use render_pool::{Worker, Result};
//!
//! struct RemoteWorker { endpoint: String }
//!
//! impl Worker for RemoteWorker {
//!     type Connection = ();
//!
//!     fn endpoint(&self) -> &str { &self.endpoint }
//!     fn connect(&self) -> Result<()> { Ok(()) }
//!     fn open_contexts(&self) -> Result<usize> { Ok(1) }
//!     fn close(&self) -> Result<()> { Ok(()) }
//! }
//! ```

mod worker;

pub use worker::{ContextHost, Worker};
