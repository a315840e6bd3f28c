//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use render_pool::launcher::mock::MockLauncher;
use render_pool::{ContextPool, PoolConfig, PoolConfigBuilder, SharedWorkerPool, WorkerPool};

/// Enable `RUST_LOG` output once per test binary.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Base configuration with one warm worker and fast launch retries.
pub fn config() -> PoolConfigBuilder {
    PoolConfigBuilder::new()
        .min_warm(1)
        .launch_backoff(Duration::from_millis(1))
        .shutdown_timeout(Duration::from_secs(2))
}

/// Build and initialize a shared pool over a mock launcher.
///
/// Returns a clone of the launcher for steering workers.
pub async fn mock_pool(config: PoolConfig) -> (SharedWorkerPool<MockLauncher>, MockLauncher) {
    init_logger();
    let launcher = MockLauncher::new();
    let pool = WorkerPool::builder()
        .config(config)
        .launcher(launcher.clone())
        .build()
        .expect("pool should build");
    pool.init().await.expect("pool should initialize");
    (pool.into_shared(), launcher)
}

/// Build a context pool over a mock launcher.
pub fn mock_context_pool(config: PoolConfig) -> (ContextPool<MockLauncher>, MockLauncher) {
    init_logger();
    let launcher = MockLauncher::new();
    let pool = ContextPool::builder()
        .config(config)
        .launcher(launcher.clone())
        .build()
        .expect("context pool should build");
    (pool, launcher)
}

/// Poll `depth` until it reports `expected` or a second passes.
pub async fn wait_until<F: Fn() -> usize>(depth: F, expected: usize) {
    for _ in 0..200 {
        if depth() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} but got {}", expected, depth());
}
