//! Configuration for pool sizing, recycling and timeouts.
//!
//! This module provides [`PoolConfig`] and [`PoolConfigBuilder`]. The same
//! config drives both the worker pool (where `capacity` counts worker
//! processes) and the context pool (where `capacity` and `min_warm` bound the
//! number of contexts inside a single worker).
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use render_pool::PoolConfigBuilder;
//!
//! let config = PoolConfigBuilder::new()
//!     .capacity(4)
//!     .usage_budget(500)
//!     .retire_delay(Duration::from_secs(30))
//!     .build()
//!     .expect("Invalid configuration");
//!
//! assert_eq!(config.capacity, 4);
//! assert_eq!(config.usage_budget, 500);
//! ```
//!
//! # Environment Configuration
//!
//! With the `env-config` feature, [`env::from_env`] reads `RENDER_POOL_*`
//! variables and an optional `app.env` file.

use std::path::PathBuf;
use std::time::Duration;

/// Default directory that holds per-worker browser profiles.
pub const DEFAULT_STORAGE_DIR: &str = ".browser-cache";

/// Configuration for pool behavior and limits.
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `capacity` | 10 | Workers (or contexts) the pool may hold |
/// | `usage_budget` | 1000 | Leases a worker serves before retirement |
/// | `min_warm` | 2 | Launched up front in lazy mode; context floor |
/// | `eager_launch` | true | Launch `capacity` workers at init |
/// | `persist_storage` | false | Keep a browser profile per worker id |
/// | `storage_dir` | `.browser-cache` | Root of the per-worker profiles |
/// | `retire_retries` | 3 | Deferrals before a busy worker is forced out |
/// | `retire_delay` | 60s | Wait between retirement attempts |
/// | `acquire_timeout` | 30s | Longest wait in the queue (`None` = forever) |
/// | `launch_retries` | 2 | Extra attempts for a failed relaunch |
/// | `launch_backoff` | 500ms | First relaunch backoff, doubled per attempt |
/// | `init_timeout` | 60s | Limit for the whole init phase |
/// | `shutdown_timeout` | 10s | Limit for closing workers on shutdown |
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of workers in the registry.
    pub capacity: usize,

    /// Number of leases a worker may serve before it is retired.
    ///
    /// Checked at acquisition time: a worker whose usage count already
    /// exceeds the budget is replaced before being handed out.
    pub usage_budget: u64,

    /// Workers launched by `init()` when `eager_launch` is off.
    ///
    /// For the context pool this is the floor below which idle contexts
    /// are never destroyed.
    pub min_warm: usize,

    /// Launch the full `capacity` during init instead of growing on demand.
    pub eager_launch: bool,

    /// Give every worker id a durable profile directory under `storage_dir`.
    pub persist_storage: bool,

    /// Root directory for durable worker profiles.
    pub storage_dir: PathBuf,

    /// How many times a retirement may be deferred while the worker still
    /// has contexts open.
    pub retire_retries: u32,

    /// Delay before a deferred retirement is attempted again.
    pub retire_delay: Duration,

    /// Upper bound on time spent waiting for a free worker.
    pub acquire_timeout: Option<Duration>,

    /// Extra launch attempts when relaunching a worker.
    pub launch_retries: u32,

    /// Initial backoff between relaunch attempts.
    pub launch_backoff: Duration,

    /// Upper bound on the whole init phase.
    pub init_timeout: Duration,

    /// Upper bound on closing workers during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            usage_budget: 1000,
            min_warm: 2,
            eager_launch: true,
            persist_storage: false,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            retire_retries: 3,
            retire_delay: Duration::from_secs(60),
            acquire_timeout: Some(Duration::from_secs(30)),
            launch_retries: 2,
            launch_backoff: Duration::from_millis(500),
            init_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Builder for [`PoolConfig`] with validation.
///
/// # Example
///
/// ```rust
/// use render_pool::PoolConfigBuilder;
///
/// let config = PoolConfigBuilder::new()
///     .capacity(3)
///     .eager_launch(false)
///     .min_warm(1)
///     .build()
///     .unwrap();
///
/// assert!(!config.eager_launch);
/// ```
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Create a new builder starting from [`PoolConfig::default`].
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    /// Set the pool capacity. Must be greater than 0.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set the per-worker usage budget. Must be greater than 0.
    pub fn usage_budget(mut self, budget: u64) -> Self {
        self.config.usage_budget = budget;
        self
    }

    /// Set the warm minimum. Must not exceed capacity.
    pub fn min_warm(mut self, count: usize) -> Self {
        self.config.min_warm = count;
        self
    }

    /// Launch every worker at init (`true`) or grow on demand (`false`).
    pub fn eager_launch(mut self, eager: bool) -> Self {
        self.config.eager_launch = eager;
        self
    }

    /// Enable durable per-worker storage.
    pub fn persist_storage(mut self, persist: bool) -> Self {
        self.config.persist_storage = persist;
        self
    }

    /// Set the root directory for durable storage.
    pub fn storage_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    /// Set how many times a retirement may be deferred.
    pub fn retire_retries(mut self, retries: u32) -> Self {
        self.config.retire_retries = retries;
        self
    }

    /// Set the delay between retirement attempts.
    pub fn retire_delay(mut self, delay: Duration) -> Self {
        self.config.retire_delay = delay;
        self
    }

    /// Bound the time a caller may wait in the queue. `None` waits forever.
    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Set the number of extra relaunch attempts.
    pub fn launch_retries(mut self, retries: u32) -> Self {
        self.config.launch_retries = retries;
        self
    }

    /// Set the initial relaunch backoff.
    pub fn launch_backoff(mut self, backoff: Duration) -> Self {
        self.config.launch_backoff = backoff;
        self
    }

    /// Set the init phase timeout.
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.config.init_timeout = timeout;
        self
    }

    /// Set the shutdown timeout.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// - `capacity` is 0
    /// - `usage_budget` is 0
    /// - `min_warm` exceeds `capacity`
    /// - `acquire_timeout` is `Some(Duration::ZERO)`
    pub fn build(self) -> std::result::Result<PoolConfig, String> {
        if self.config.capacity == 0 {
            return Err("capacity must be greater than 0".to_string());
        }

        if self.config.usage_budget == 0 {
            return Err("usage_budget must be greater than 0".to_string());
        }

        if self.config.min_warm > self.config.capacity {
            return Err("min_warm cannot exceed capacity".to_string());
        }

        if self.config.acquire_timeout == Some(Duration::ZERO) {
            return Err("acquire_timeout must be non-zero (use None to wait forever)".to_string());
        }

        Ok(self.config)
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Environment Configuration (feature-gated)
// ============================================================================

/// Environment-based configuration loading.
///
/// Loads `app.env` from the current directory through `dotenvy` when it
/// exists, then reads:
///
/// | Variable | Type | Default |
/// |----------|------|---------|
/// | `RENDER_POOL_CAPACITY` | usize | 10 |
/// | `RENDER_POOL_USAGE_BUDGET` | u64 | 1000 |
/// | `RENDER_POOL_MIN_WARM` | usize | 2 |
/// | `RENDER_POOL_EAGER_LAUNCH` | bool | true |
/// | `RENDER_POOL_PERSIST_STORAGE` | bool | false |
/// | `RENDER_POOL_STORAGE_DIR` | path | `.browser-cache` |
/// | `RENDER_POOL_RETIRE_RETRIES` | u32 | 3 |
/// | `RENDER_POOL_RETIRE_DELAY_SECONDS` | u64 | 60 |
/// | `RENDER_POOL_ACQUIRE_TIMEOUT_SECONDS` | u64 | 30 (0 = wait forever) |
/// | `RENDER_POOL_INIT_TIMEOUT_SECONDS` | u64 | 60 |
/// | `RENDER_POOL_LAUNCH_RETRIES` | u32 | 2 |
/// | `RENDER_POOL_LAUNCH_BACKOFF_MS` | u64 | 500 |
/// | `RENDER_POOL_SHUTDOWN_TIMEOUT_SECONDS` | u64 | 10 |
/// | `CHROME_PATH` | String | auto |
///
/// # Example `app.env` File
///
/// ```text
/// RENDER_POOL_CAPACITY=4
/// RENDER_POOL_USAGE_BUDGET=1000
/// RENDER_POOL_PERSIST_STORAGE=true
/// # CHROME_PATH=/usr/bin/chromium
/// ```
#[cfg(feature = "env-config")]
pub mod env {
    use super::*;
    use crate::error::PoolError;

    /// Default environment file name.
    pub const ENV_FILE_NAME: &str = "app.env";

    /// Load environment variables from the `app.env` file.
    pub fn load_env_file() -> Result<PathBuf, dotenvy::Error> {
        dotenvy::from_filename(ENV_FILE_NAME)
    }

    fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
    }

    fn seconds(name: &str) -> Option<Duration> {
        var(name).map(Duration::from_secs)
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Configuration`] if the resulting values fail
    /// validation.
    pub fn from_env() -> Result<PoolConfig, PoolError> {
        match load_env_file() {
            Ok(path) => log::info!("📄 Loaded configuration from: {:?}", path),
            Err(e) => log::debug!(
                "📄 No {} file loaded: {} (using environment variables and defaults)",
                ENV_FILE_NAME,
                e
            ),
        }

        let defaults = PoolConfig::default();

        let capacity = var("RENDER_POOL_CAPACITY").unwrap_or(defaults.capacity);
        let usage_budget = var("RENDER_POOL_USAGE_BUDGET").unwrap_or(defaults.usage_budget);
        let min_warm = var("RENDER_POOL_MIN_WARM").unwrap_or(defaults.min_warm);
        let eager_launch = var("RENDER_POOL_EAGER_LAUNCH").unwrap_or(defaults.eager_launch);
        let persist_storage =
            var("RENDER_POOL_PERSIST_STORAGE").unwrap_or(defaults.persist_storage);
        let storage_dir = std::env::var("RENDER_POOL_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_dir);
        let retire_retries = var("RENDER_POOL_RETIRE_RETRIES").unwrap_or(defaults.retire_retries);
        let retire_delay =
            seconds("RENDER_POOL_RETIRE_DELAY_SECONDS").unwrap_or(defaults.retire_delay);
        // 0 means wait forever.
        let acquire_timeout = var::<u64>("RENDER_POOL_ACQUIRE_TIMEOUT_SECONDS")
            .map(|secs| (secs > 0).then(|| Duration::from_secs(secs)))
            .unwrap_or(defaults.acquire_timeout);
        let init_timeout =
            seconds("RENDER_POOL_INIT_TIMEOUT_SECONDS").unwrap_or(defaults.init_timeout);
        let launch_retries = var("RENDER_POOL_LAUNCH_RETRIES").unwrap_or(defaults.launch_retries);
        let launch_backoff = var("RENDER_POOL_LAUNCH_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.launch_backoff);
        let shutdown_timeout =
            seconds("RENDER_POOL_SHUTDOWN_TIMEOUT_SECONDS").unwrap_or(defaults.shutdown_timeout);

        log::info!("🔧 Loading pool configuration from environment:");
        log::info!("   - Capacity: {}", capacity);
        log::info!("   - Usage budget: {}", usage_budget);
        log::info!("   - Eager launch: {} (min warm: {})", eager_launch, min_warm);
        log::info!(
            "   - Persistent storage: {} ({})",
            persist_storage,
            storage_dir.display()
        );
        log::info!("   - Retirement: {} retries, {:?} apart", retire_retries, retire_delay);
        log::info!("   - Launch: {} retries, {:?} backoff", launch_retries, launch_backoff);

        PoolConfigBuilder::new()
            .capacity(capacity)
            .usage_budget(usage_budget)
            .min_warm(min_warm)
            .eager_launch(eager_launch)
            .persist_storage(persist_storage)
            .storage_dir(storage_dir)
            .retire_retries(retire_retries)
            .retire_delay(retire_delay)
            .acquire_timeout(acquire_timeout)
            .init_timeout(init_timeout)
            .launch_retries(launch_retries)
            .launch_backoff(launch_backoff)
            .shutdown_timeout(shutdown_timeout)
            .build()
            .map_err(PoolError::Configuration)
    }

    /// Get the Chrome binary path from `CHROME_PATH`, if set.
    pub fn chrome_path_from_env() -> Option<String> {
        std::env::var("CHROME_PATH").ok()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies the documented defaults.
    #[test]
    fn test_config_defaults() {
        let config = PoolConfig::default();

        assert_eq!(config.capacity, 10);
        assert_eq!(config.usage_budget, 1000);
        assert_eq!(config.min_warm, 2);
        assert!(config.eager_launch);
        assert!(!config.persist_storage);
        assert_eq!(config.storage_dir, PathBuf::from(".browser-cache"));
        assert_eq!(config.retire_delay, Duration::from_secs(60));
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(30)));
    }

    /// Verifies that builder setters land in the built config.
    #[test]
    fn test_config_builder() {
        let config = PoolConfigBuilder::new()
            .capacity(2)
            .usage_budget(1)
            .min_warm(0)
            .eager_launch(false)
            .persist_storage(true)
            .storage_dir("/tmp/profiles")
            .retire_retries(0)
            .retire_delay(Duration::from_millis(10))
            .acquire_timeout(None)
            .launch_retries(5)
            .build()
            .unwrap();

        assert_eq!(config.capacity, 2);
        assert_eq!(config.usage_budget, 1);
        assert_eq!(config.min_warm, 0);
        assert!(!config.eager_launch);
        assert!(config.persist_storage);
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/profiles"));
        assert_eq!(config.retire_retries, 0);
        assert_eq!(config.acquire_timeout, None);
        assert_eq!(config.launch_retries, 5);
    }

    /// Verifies that invalid values are rejected at build time.
    #[test]
    fn test_config_validation() {
        let zero_capacity = PoolConfigBuilder::new().capacity(0).build();
        assert!(zero_capacity.is_err());
        assert!(zero_capacity.unwrap_err().contains("capacity"));

        assert!(PoolConfigBuilder::new().usage_budget(0).build().is_err());

        let warm_exceeds = PoolConfigBuilder::new().capacity(2).min_warm(3).build();
        assert_eq!(warm_exceeds.unwrap_err(), "min_warm cannot exceed capacity");

        assert!(
            PoolConfigBuilder::new()
                .acquire_timeout(Some(Duration::ZERO))
                .build()
                .is_err()
        );
    }

    /// Verifies that unset variables fall back to the defaults and set ones apply.
    #[cfg(feature = "env-config")]
    #[test]
    fn test_from_env() {
        const VARS: [&str; 5] = [
            "RENDER_POOL_RETIRE_DELAY_SECONDS",
            "RENDER_POOL_SHUTDOWN_TIMEOUT_SECONDS",
            "RENDER_POOL_ACQUIRE_TIMEOUT_SECONDS",
            "RENDER_POOL_LAUNCH_RETRIES",
            "RENDER_POOL_LAUNCH_BACKOFF_MS",
        ];
        // SAFETY: no other test in this binary touches these variables.
        unsafe {
            for name in VARS {
                std::env::remove_var(name);
            }
            std::env::set_var("RENDER_POOL_LAUNCH_RETRIES", "5");
            std::env::set_var("RENDER_POOL_LAUNCH_BACKOFF_MS", "250");
            std::env::set_var("RENDER_POOL_ACQUIRE_TIMEOUT_SECONDS", "0");
        }

        let config = env::from_env().unwrap();
        let defaults = PoolConfig::default();

        assert_eq!(config.launch_retries, 5);
        assert_eq!(config.launch_backoff, Duration::from_millis(250));
        assert_eq!(config.acquire_timeout, None);
        assert_eq!(config.retire_delay, defaults.retire_delay);
        assert_eq!(config.shutdown_timeout, defaults.shutdown_timeout);

        unsafe {
            for name in VARS {
                std::env::remove_var(name);
            }
        }
    }

    /// Verifies that PoolConfigBuilder implements Default.
    #[test]
    fn test_builder_default() {
        let config = PoolConfigBuilder::default().build().unwrap();
        assert_eq!(config.capacity, PoolConfig::default().capacity);
    }
}
