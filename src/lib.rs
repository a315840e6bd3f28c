//! # render-pool
//!
//! A pool of headless Chrome workers for rendering HTML markup to PNG.
//!
//! ## Features
//!
//! - **Fixed-capacity pool**: up to `capacity` workers, launched eagerly or on
//!   demand, each under a stable slot id
//! - **Strict FIFO waiting**: freed workers are handed directly to the oldest
//!   waiter, with optional acquire timeout
//! - **Usage-based recycling**: workers are relaunched after `usage_budget`
//!   leases, deferred while they still have pages open
//! - **Self-healing**: a worker that stops answering is relaunched under the
//!   same id on its next acquisition
//! - **Context sub-pool**: lease tabs of a single long-lived worker instead of
//!   whole processes
//! - **RAII leases**: workers and contexts return to the pool on drop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use render_pool::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = WorkerPool::builder()
//!         .config(PoolConfigBuilder::new().capacity(4).build()?)
//!         .launcher(ChromeLauncher::new())
//!         .build()?;
//!     pool.init().await?;
//!
//!     let request = RenderRequest::new("<div id=\"content\">Hello</div>");
//!     let image = render_on_worker(&pool, &request).await?;
//!     std::fs::write("hello.png", &image.data)?;
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description | Default |
//! |---------|-------------|---------|
//! | `env-config` | Load configuration from `app.env` and `RENDER_POOL_*` variables | ✅ |
//! | `serde` | `Serialize` for status snapshots and render requests | ❌ |
//! | `axum-integration` | `POST /render` and `GET /status` router | ❌ |
//! | `test-utils` | In-memory [`MockLauncher`](launcher::mock::MockLauncher) | ❌ |

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod context_pool;
pub mod error;
pub mod launcher;
pub mod lease;
pub mod pool;
pub mod prelude;
pub mod render;
pub mod status;
pub mod traits;

pub(crate) mod queue;
pub(crate) mod recycle;
pub(crate) mod registry;

/// Web framework integrations.
#[cfg(feature = "axum-integration")]
pub mod integrations;

// ============================================================================
// Re-exports (Public API)
// ============================================================================

pub use config::{PoolConfig, PoolConfigBuilder};
pub use context_pool::{ContextLease, ContextPool, ContextPoolBuilder};
pub use error::{PoolError, Result};
pub use launcher::{ChromeLauncher, ChromeWorker, WorkerId, WorkerLauncher, create_chrome_options};
pub use lease::WorkerLease;
pub use pool::{SharedWorkerPool, WorkerPool, WorkerPoolBuilder};
pub use render::{
    RenderError, RenderRequest, RenderedImage, Viewport, render_on_context, render_on_worker,
};
pub use status::{ContextPoolStatus, PoolStatus, WorkerStatus};
pub use traits::{ContextHost, Worker};

#[cfg(feature = "env-config")]
pub use config::env::{chrome_path_from_env, from_env};

#[cfg(feature = "env-config")]
pub use pool::init_worker_pool;
