//! Axum integration.
//!
//! # Feature Flag
//!
//! Requires the `axum-integration` feature.
//!
//! Serves two routes over a shared Chrome-backed [`WorkerPool`]:
//!
//! | Route | Body | Response |
//! |-------|------|----------|
//! | `POST /render` | JSON [`RenderRequest`] | `image/png` |
//! | `GET /status` | - | JSON [`PoolStatus`] |
//!
//! Errors come back as JSON `{ "error": ..., "code": ... }` with the status
//! from [`RenderError::status_code`].
//!
//! ```rust,ignore
//! use render_pool::integrations::axum::WorkerPoolAxumExt;
//!
//! let pool = init_worker_pool().await?;
//! let app = pool.into_router();
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, app).await?;
//! ```

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::launcher::ChromeLauncher;
use crate::pool::{SharedWorkerPool, WorkerPool};
use crate::render::{RenderError, RenderRequest, render_on_worker};
use crate::status::PoolStatus;

/// Pool type served by the router.
pub type SharedChromePool = SharedWorkerPool<ChromeLauncher>;

/// Extractor for the shared pool.
pub type RenderPoolState = State<SharedChromePool>;

/// Conversions from a pool into axum state.
pub trait WorkerPoolAxumExt {
    /// Router serving `/render` and `/status`.
    fn into_router(self) -> Router;

    fn into_axum_extension(self) -> axum::Extension<SharedChromePool>;
}

impl WorkerPoolAxumExt for WorkerPool<ChromeLauncher> {
    fn into_router(self) -> Router {
        router(self.into_shared())
    }

    fn into_axum_extension(self) -> axum::Extension<SharedChromePool> {
        axum::Extension(self.into_shared())
    }
}

impl WorkerPoolAxumExt for SharedChromePool {
    fn into_router(self) -> Router {
        router(self)
    }

    fn into_axum_extension(self) -> axum::Extension<SharedChromePool> {
        axum::Extension(self)
    }
}

/// Router serving `/render` and `/status` over `pool`.
pub fn router(pool: SharedChromePool) -> Router {
    Router::new()
        .route("/render", post(render))
        .route("/status", get(status))
        .with_state(pool)
}

async fn render(State(pool): RenderPoolState, Json(request): Json<RenderRequest>) -> Response {
    match render_on_worker(&pool, &request).await {
        Ok(image) => ([(header::CONTENT_TYPE, "image/png")], image.data).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn status(State(pool): RenderPoolState) -> Json<PoolStatus> {
    Json(pool.status())
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl From<&RenderError> for ErrorResponse {
    fn from(err: &RenderError) -> Self {
        Self {
            error: err.to_string(),
            code: err.error_code(),
        }
    }
}

impl IntoResponse for RenderError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}
