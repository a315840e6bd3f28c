//! Convenience re-exports.
//!
//! ```rust,ignore
//! use render_pool::prelude::*;
//! ```

pub use crate::config::{PoolConfig, PoolConfigBuilder};
pub use crate::context_pool::{ContextLease, ContextPool};
pub use crate::error::{PoolError, Result};
pub use crate::launcher::{ChromeLauncher, WorkerId, WorkerLauncher};
pub use crate::lease::WorkerLease;
pub use crate::pool::{SharedWorkerPool, WorkerPool};
pub use crate::render::{RenderError, RenderRequest, render_on_context, render_on_worker};
pub use crate::status::{ContextPoolStatus, PoolStatus};
pub use crate::traits::{ContextHost, Worker};

#[cfg(feature = "env-config")]
pub use crate::pool::init_worker_pool;

pub use std::sync::Arc;
