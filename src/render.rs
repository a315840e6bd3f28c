//! Rendering HTML markup to PNG on pooled workers.
//!
//! Each render loads the markup as a `data:` URL, waits for the target
//! selector (and optionally for the page's `window._renderDone` signal), and
//! captures the element as a PNG.
//!
//! The browser calls are blocking. [`capture_element`] must run on a
//! blocking thread; [`render_on_worker`] and [`render_on_context`] take care
//! of that.
//!
//! ```rust,ignore
//! let request = RenderRequest::new("<div id=\"content\">Hello</div>");
//! let image = render_on_worker(&pool, &request).await?;
//! std::fs::write("hello.png", &image.data)?;
//! ```
//!
//! # Render-done signal
//!
//! With `wait_for_signal` set, the page is expected to assign
//! `window._renderDone` once it has finished drawing. Any truthy value
//! completes the render; an object carrying a `msg` field fails it with
//! [`RenderError::RenderFailed`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use headless_chrome::Tab;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::types::Bounds;
use thiserror::Error;

use crate::context_pool::ContextPool;
use crate::error::PoolError;
use crate::launcher::ChromeLauncher;
use crate::pool::WorkerPool;

/// Selector captured when none is given.
pub const DEFAULT_SELECTOR: &str = "#content";

/// Viewport height when none is given.
pub const DEFAULT_HEIGHT: u32 = 800;

/// Per-render timeout when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(120);

const SIGNAL_CHECK: &str = "(() => { \
    const d = window._renderDone; \
    if (!d) return null; \
    if (typeof d === 'object' && d.msg) return String(d.msg); \
    return true; \
})()";

// ============================================================================
// Types
// ============================================================================

/// Browser viewport in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Viewport {
    /// Width in CSS pixels.
    pub width: u32,
    /// Height in CSS pixels.
    pub height: u32,
}

impl Viewport {
    /// Viewport of the given height with golden-ratio width.
    pub fn with_height(height: u32) -> Self {
        Self {
            width: (f64::from(height) / 0.618).ceil() as u32,
            height,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::with_height(DEFAULT_HEIGHT)
    }
}

/// One render job.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RenderRequest {
    /// Complete HTML document or fragment.
    pub html: String,
    /// CSS selector of the element to capture.
    pub selector: String,
    /// Browser window size while rendering.
    pub viewport: Viewport,
    /// Budget for loading, waiting and capturing.
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub timeout: Duration,
    /// Wait for `window._renderDone` after the selector appears.
    pub wait_for_signal: bool,
}

impl RenderRequest {
    /// Request for `html` with default selector, viewport and timeout.
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Self::default()
        }
    }

    /// Capture the element matching `selector`.
    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = selector.into();
        self
    }

    /// Render at `width` x `height`.
    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Viewport { width, height };
        self
    }

    /// Bound the whole render by `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Wait for `window._renderDone` before capturing.
    pub fn wait_for_signal(mut self, wait: bool) -> Self {
        self.wait_for_signal = wait;
        self
    }

    /// Reject requests that cannot render.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidRequest`] for blank markup or selector, a zero
    /// viewport dimension, or a zero timeout.
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.html.trim().is_empty() {
            return Err(RenderError::InvalidRequest("HTML content is required".to_string()));
        }
        if self.selector.trim().is_empty() {
            return Err(RenderError::InvalidRequest("selector must not be empty".to_string()));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(RenderError::InvalidRequest(format!(
                "viewport must be non-zero, got {}x{}",
                self.viewport.width, self.viewport.height
            )));
        }
        if self.timeout.is_zero() {
            return Err(RenderError::InvalidRequest("timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    fn data_url(&self) -> String {
        format!("data:text/html;charset=utf-8,{}", urlencoding::encode(&self.html))
    }
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            html: String::new(),
            selector: DEFAULT_SELECTOR.to_string(),
            viewport: Viewport::default(),
            timeout: DEFAULT_TIMEOUT,
            wait_for_signal: false,
        }
    }
}

#[cfg(feature = "serde")]
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Time spent in each render phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderTimings {
    /// Waiting for a worker or context.
    pub lease: Duration,
    /// Loading the document.
    pub load: Duration,
    /// Waiting for the selector and signal.
    pub wait: Duration,
    /// Taking the screenshot.
    pub capture: Duration,
}

/// A captured element.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    /// PNG bytes.
    pub data: Vec<u8>,
    /// Phase breakdown.
    pub timings: RenderTimings,
}

/// Render failures.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Rejected before leasing anything.
    #[error("Invalid render request: {0}")]
    InvalidRequest(String),

    /// The pool could not provide a worker.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The document could not be opened.
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// The document, selector or signal did not arrive in time.
    #[error("Render timed out: {0}")]
    RenderTimeout(String),

    /// The page reported failure through its render-done signal.
    #[error("Page reported render failure: {0}")]
    RenderFailed(String),

    /// The screenshot call failed.
    #[error("Screenshot failed: {0}")]
    Capture(String),

    /// The blocking render task panicked or was cancelled.
    #[error("Render task failed: {0}")]
    TaskFailed(String),
}

impl From<tokio::task::JoinError> for RenderError {
    fn from(e: tokio::task::JoinError) -> Self {
        RenderError::TaskFailed(e.to_string())
    }
}

impl RenderError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::Pool(PoolError::AcquireTimeout(_) | PoolError::ShuttingDown) => 503,
            Self::RenderFailed(_) | Self::Navigation(_) => 502,
            Self::RenderTimeout(_) => 504,
            Self::Pool(_) | Self::Capture(_) | Self::TaskFailed(_) => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Pool(PoolError::AcquireTimeout(_)) => "POOL_BUSY",
            Self::Pool(PoolError::ShuttingDown) => "POOL_SHUTTING_DOWN",
            Self::Pool(_) => "POOL_ERROR",
            Self::Navigation(_) => "NAVIGATION_FAILED",
            Self::RenderTimeout(_) => "RENDER_TIMEOUT",
            Self::RenderFailed(_) => "RENDER_FAILED",
            Self::Capture(_) => "CAPTURE_FAILED",
            Self::TaskFailed(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the worker or context that produced this error is suspect.
    pub fn taints_worker(&self) -> bool {
        matches!(self, Self::RenderTimeout(_))
    }
}

/// State of the render-done signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Not set yet.
    Pending,
    /// Set to a truthy value.
    Done,
    /// Set to an object with a `msg`.
    Failed(String),
}

/// Interpret the value returned by the signal check.
pub fn signal_state(value: Option<&serde_json::Value>) -> Signal {
    match value {
        None | Some(serde_json::Value::Null) | Some(serde_json::Value::Bool(false)) => {
            Signal::Pending
        }
        Some(serde_json::Value::String(msg)) => Signal::Failed(msg.clone()),
        Some(_) => Signal::Done,
    }
}

// ============================================================================
// Blocking capture
// ============================================================================

/// Render `request` in `tab` and capture the target element.
///
/// Blocking; call from `spawn_blocking`.
pub fn capture_element(tab: &Tab, request: &RenderRequest) -> Result<RenderedImage, RenderError> {
    let deadline = Instant::now() + request.timeout;
    let mut timings = RenderTimings::default();

    tab.set_default_timeout(request.timeout);
    if let Err(e) = tab.set_bounds(Bounds::Normal {
        left: Some(0),
        top: Some(0),
        width: Some(f64::from(request.viewport.width)),
        height: Some(f64::from(request.viewport.height)),
    }) {
        log::warn!("⚠️ Could not set viewport: {}", e);
    }

    let started = Instant::now();
    tab.navigate_to(&request.data_url())
        .map_err(|e| RenderError::Navigation(e.to_string()))?
        .wait_until_navigated()
        .map_err(|e| RenderError::RenderTimeout(format!("loading document: {}", e)))?;
    timings.load = started.elapsed();

    let started = Instant::now();
    let element = tab
        .wait_for_element_with_custom_timeout(&request.selector, remaining(deadline))
        .map_err(|e| {
            RenderError::RenderTimeout(format!("waiting for '{}': {}", request.selector, e))
        })?;
    if request.wait_for_signal {
        wait_for_signal(tab, deadline)?;
    }
    timings.wait = started.elapsed();

    let started = Instant::now();
    let data = element
        .capture_screenshot(CaptureScreenshotFormatOption::Png)
        .map_err(|e| RenderError::Capture(e.to_string()))?;
    timings.capture = started.elapsed();

    log::debug!(
        "Captured '{}' ({} bytes, load {:?}, wait {:?}, capture {:?})",
        request.selector,
        data.len(),
        timings.load,
        timings.wait,
        timings.capture
    );
    Ok(RenderedImage { data, timings })
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn wait_for_signal(tab: &Tab, deadline: Instant) -> Result<(), RenderError> {
    loop {
        let value = tab
            .evaluate(SIGNAL_CHECK, false)
            .map(|result| result.value)
            .unwrap_or(None);

        match signal_state(value.as_ref()) {
            Signal::Done => return Ok(()),
            Signal::Failed(msg) => return Err(RenderError::RenderFailed(msg)),
            Signal::Pending if Instant::now() >= deadline => {
                return Err(RenderError::RenderTimeout(
                    "page never signalled render completion".to_string(),
                ));
            }
            Signal::Pending => std::thread::sleep(SIGNAL_POLL_INTERVAL),
        }
    }
}

fn close_tab(tab: &Tab) {
    if let Err(e) = tab.close(true) {
        log::warn!("⚠️ Failed to close tab: {}", e);
    }
}

// ============================================================================
// Pool-backed rendering
// ============================================================================

/// Render on a leased worker in a fresh tab.
///
/// A render timeout discards the worker so it is relaunched before reuse.
pub async fn render_on_worker(
    pool: &WorkerPool<ChromeLauncher>,
    request: &RenderRequest,
) -> Result<RenderedImage, RenderError> {
    request.validate()?;

    let started = Instant::now();
    let lease = pool.acquire().await?;
    let lease_time = started.elapsed();

    let browser = Arc::clone(&*lease);
    let job = request.clone();
    let result = tokio::task::spawn_blocking(move || {
        let tab = browser
            .new_tab()
            .map_err(|e| RenderError::Navigation(format!("opening tab: {}", e)))?;
        let result = capture_element(&tab, &job);
        close_tab(&tab);
        result
    })
    .await?;

    finish(result, lease_time, |e| {
        log::warn!("🗑️ Discarding {} after render error: {}", lease.id(), e);
        lease.discard();
    })
}

/// Render in a leased context of a [`ContextPool`].
///
/// A render timeout discards the context.
pub async fn render_on_context(
    pool: &ContextPool<ChromeLauncher>,
    request: &RenderRequest,
) -> Result<RenderedImage, RenderError> {
    request.validate()?;

    let started = Instant::now();
    let lease = pool.acquire().await?;
    let lease_time = started.elapsed();

    let tab = Arc::clone(&*lease);
    let job = request.clone();
    let result = tokio::task::spawn_blocking(move || capture_element(&tab, &job)).await?;

    finish(result, lease_time, |e| {
        log::warn!("🗑️ Discarding context #{} after render error: {}", lease.key(), e);
        lease.discard();
    })
}

fn finish(
    result: Result<RenderedImage, RenderError>,
    lease_time: Duration,
    discard: impl FnOnce(&RenderError),
) -> Result<RenderedImage, RenderError> {
    match result {
        Ok(mut image) => {
            image.timings.lease = lease_time;
            log::info!(
                "✅ Rendered {} bytes in {:?}",
                image.data.len(),
                lease_time + image.timings.load + image.timings.wait + image.timings.capture
            );
            Ok(image)
        }
        Err(e) => {
            if e.taints_worker() {
                discard(&e);
            }
            log::error!("❌ Render failed: {}", e);
            Err(e)
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_viewport() {
        let viewport = Viewport::default();
        assert_eq!(viewport.height, 800);
        assert_eq!(viewport.width, 1295);
    }

    #[test]
    fn test_request_defaults() {
        let request = RenderRequest::new("<p>hi</p>");
        assert_eq!(request.selector, "#content");
        assert_eq!(request.timeout, Duration::from_secs(30));
        assert!(!request.wait_for_signal);
        assert!(request.validate().is_ok());
    }

    /// Verifies that unusable requests are rejected before touching the pool.
    #[test]
    fn test_validate_rejects() {
        let cases = [
            RenderRequest::new("   "),
            RenderRequest::new("<p/>").selector(""),
            RenderRequest::new("<p/>").viewport(0, 100),
            RenderRequest::new("<p/>").timeout(Duration::ZERO),
        ];
        for request in cases {
            match request.validate() {
                Err(RenderError::InvalidRequest(_)) => {}
                other => panic!("expected InvalidRequest, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_data_url_encodes_markup() {
        let url = RenderRequest::new("<p a=\"1\">#x</p>").data_url();
        assert!(url.starts_with("data:text/html;charset=utf-8,"));
        assert!(!url.contains('<'));
        assert!(!url.contains('#'));
    }

    #[test]
    fn test_signal_state() {
        assert_eq!(signal_state(None), Signal::Pending);
        assert_eq!(signal_state(Some(&json!(null))), Signal::Pending);
        assert_eq!(signal_state(Some(&json!(true))), Signal::Done);
        assert_eq!(
            signal_state(Some(&json!("font failed"))),
            Signal::Failed("font failed".to_string())
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RenderError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(
            RenderError::Pool(PoolError::AcquireTimeout(Duration::from_secs(1))).status_code(),
            503
        );
        assert_eq!(RenderError::Pool(PoolError::ShuttingDown).error_code(), "POOL_SHUTTING_DOWN");
        assert_eq!(RenderError::RenderTimeout("x".into()).status_code(), 504);
        assert_eq!(RenderError::Capture("x".into()).status_code(), 500);
    }

    /// Verifies that only timeouts mark the worker for replacement.
    #[test]
    fn test_taints_worker() {
        assert!(RenderError::RenderTimeout("x".into()).taints_worker());
        assert!(!RenderError::RenderFailed("x".into()).taints_worker());
        assert!(!RenderError::Pool(PoolError::ShuttingDown).taints_worker());
    }

    /// Verifies that a failed render runs the discard hook and a success does not.
    #[test]
    fn test_finish_discards_on_timeout() {
        let mut discarded = false;
        let result = finish(
            Err(RenderError::RenderTimeout("x".into())),
            Duration::ZERO,
            |_| discarded = true,
        );
        assert!(result.is_err());
        assert!(discarded);

        let image = RenderedImage {
            data: vec![1, 2, 3],
            timings: RenderTimings::default(),
        };
        let result = finish(Ok(image), Duration::from_millis(5), |_| panic!("no discard"));
        assert_eq!(result.unwrap().timings.lease, Duration::from_millis(5));
    }
}
