//! Headless Chrome launcher and worker.
//!
//! [`ChromeLauncher`] starts Chrome with a fixed hardened flag set suitable
//! for containers. [`ChromeWorker`] implements [`Worker`] and
//! [`ContextHost`] on top of a `headless_chrome::Browser`.
//!
//! # Example
//!
//! ```rust,ignore
//! use render_pool::ChromeLauncher;
//!
//! // Auto-detect Chrome, temporary profiles
//! let launcher = ChromeLauncher::new();
//!
//! // Custom binary, durable per-worker profiles
//! let launcher = ChromeLauncher::new()
//!     .with_path("/usr/bin/chromium")
//!     .with_storage(".browser-cache");
//! ```

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Emulation;
use headless_chrome::{Browser, LaunchOptions};

use super::{WorkerId, WorkerLauncher, storage};
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::traits::{ContextHost, Worker};

/// Flags every worker is started with.
pub const HARDENED_ARGS: &[&str] = &[
    "--single-process",
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--no-first-run",
    "--no-zygote",
    "--disable-background-timer-throttling",
];

/// Extra flags for a worker that hosts many tabs at once.
///
/// Keeps background tabs rendering at full speed.
pub const CONTEXT_HOST_ARGS: &[&str] = &[
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
];

/// How long `headless_chrome` keeps an idle connection open.
///
/// Pooled workers can sit idle for a long time between leases.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

static LAUNCH_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Launches headless Chrome workers.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    chrome_path: Option<PathBuf>,
    storage_root: Option<PathBuf>,
    context_host: bool,
}

impl ChromeLauncher {
    /// Launcher with an auto-detected Chrome binary and throwaway profiles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a launcher from pool configuration.
    ///
    /// Uses durable profiles under `config.storage_dir` when
    /// `config.persist_storage` is set.
    pub fn from_config(config: &PoolConfig, chrome_path: Option<String>) -> Self {
        let mut launcher = Self::new();
        if let Some(path) = chrome_path {
            launcher = launcher.with_path(path);
        }
        if config.persist_storage {
            launcher = launcher.with_storage(config.storage_dir.clone());
        }
        launcher
    }

    /// Use the Chrome binary at `path`.
    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.chrome_path = Some(path.into());
        self
    }

    /// Keep a durable profile per worker id under `root`.
    pub fn with_storage<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.storage_root = Some(root.into());
        self
    }

    /// Add the flags needed by a worker hosting many concurrent tabs.
    pub fn for_context_host(mut self) -> Self {
        self.context_host = true;
        self
    }

    fn extra_args(&self) -> &'static [&'static str] {
        if self.context_host { CONTEXT_HOST_ARGS } else { &[] }
    }
}

impl WorkerLauncher for ChromeLauncher {
    type Worker = ChromeWorker;

    fn launch(&self, id: &WorkerId) -> Result<ChromeWorker> {
        let profile = match &self.storage_root {
            Some(root) => Some(storage::prepare_profile_dir(root, id).map_err(|e| {
                PoolError::Launch(format!("profile directory for {} unavailable: {}", id, e))
            })?),
            None => None,
        };

        let options = create_chrome_options(self.chrome_path.clone(), profile, self.extra_args())?;

        log::debug!("🚀 Launching Chrome for {}...", id);
        let browser = Browser::new(options).map_err(|e| {
            log::error!("❌ Chrome launch failed for {}: {}", id, e);
            PoolError::Launch(e.to_string())
        })?;

        let sequence = LAUNCH_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let endpoint = format!("cdp://{}/{}", id, sequence);
        log::info!(
            "✅ Chrome started for {} (pid {:?}, endpoint {})",
            id,
            browser.get_process_id(),
            endpoint
        );

        Ok(ChromeWorker {
            browser: Mutex::new(Some(Arc::new(browser))),
            endpoint,
        })
    }
}

/// Build `headless_chrome` launch options with the hardened flag set.
///
/// # Errors
///
/// [`PoolError::Configuration`] when the options fail to build.
pub fn create_chrome_options(
    chrome_path: Option<PathBuf>,
    user_data_dir: Option<PathBuf>,
    extra_args: &'static [&'static str],
) -> Result<LaunchOptions<'static>> {
    let args: Vec<&'static OsStr> = HARDENED_ARGS
        .iter()
        .chain(extra_args)
        .map(|arg| OsStr::new(*arg))
        .collect();

    let mut builder = LaunchOptions::default_builder();
    builder
        .headless(true)
        .sandbox(false)
        .disable_default_args(true)
        .idle_browser_timeout(IDLE_CONNECTION_TIMEOUT)
        .path(chrome_path)
        .user_data_dir(user_data_dir)
        .args(args);

    builder.build().map_err(|e| {
        log::error!("❌ Failed to build Chrome launch options: {}", e);
        PoolError::Configuration(e.to_string())
    })
}

/// A running headless Chrome process.
///
/// The browser is held behind an `Arc` so leases can share it. Closing the
/// worker drops the pool's reference; the process exits once the last
/// outstanding connection is released.
pub struct ChromeWorker {
    browser: Mutex<Option<Arc<Browser>>>,
    endpoint: String,
}

impl ChromeWorker {
    fn browser(&self) -> Result<Arc<Browser>> {
        self.browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| PoolError::Connect(format!("{} has been closed", self.endpoint)))
    }

    fn tabs(&self) -> Result<Vec<Arc<Tab>>> {
        let browser = self.browser()?;
        let tabs = browser
            .get_tabs()
            .lock()
            .map_err(|e| PoolError::Connect(format!("tab list unavailable: {}", e)))?
            .clone();
        Ok(tabs)
    }
}

/// Keep focus-dependent page code running in background tabs.
fn emulate_focus(tab: &Tab) {
    if let Err(e) = tab.call_method(Emulation::SetFocusEmulationEnabled { enabled: true }) {
        log::warn!("⚠️ Focus emulation unavailable: {}", e);
    }
}

impl Worker for ChromeWorker {
    type Connection = Arc<Browser>;

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn connect(&self) -> Result<Arc<Browser>> {
        let browser = self.browser()?;
        browser
            .get_version()
            .map_err(|e| PoolError::Connect(format!("{}: {}", self.endpoint, e)))?;
        Ok(browser)
    }

    fn open_contexts(&self) -> Result<usize> {
        Ok(self.tabs()?.len())
    }

    fn close(&self) -> Result<()> {
        let taken = self
            .browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(browser) => {
                log::debug!(
                    "🛑 Closing {} (pid {:?}, {} other references)",
                    self.endpoint,
                    browser.get_process_id(),
                    Arc::strong_count(&browser) - 1
                );
                drop(browser);
            }
            None => log::trace!("{} already closed", self.endpoint),
        }
        Ok(())
    }
}

impl ContextHost for ChromeWorker {
    type Context = Arc<Tab>;

    fn existing_contexts(&self) -> Result<Vec<Arc<Tab>>> {
        let tabs = self.tabs()?;
        for tab in &tabs {
            emulate_focus(tab);
        }
        Ok(tabs)
    }

    fn new_context(&self) -> Result<Arc<Tab>> {
        let tab = self
            .browser()?
            .new_tab()
            .map_err(|e| PoolError::Connect(format!("new tab on {}: {}", self.endpoint, e)))?;
        emulate_focus(&tab);
        Ok(tab)
    }

    fn close_context(&self, context: &Arc<Tab>) -> Result<()> {
        context
            .close(true)
            .map(|_| ())
            .map_err(|e| PoolError::Connect(format!("close tab on {}: {}", self.endpoint, e)))
    }
}

impl std::fmt::Debug for ChromeWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromeWorker")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
