//! HTTP render server on top of the worker pool.
//!
//! ```sh
//! RUST_LOG=info cargo run --example axum_render_server --features axum-integration
//!
//! curl -X POST localhost:3000/render \
//!     -H 'content-type: application/json' \
//!     -d '{"html": "<div id=\"content\">Hello</div>"}' -o hello.png
//! curl localhost:3000/status
//! ```
//!
//! Pool settings come from `app.env` or `RENDER_POOL_*` variables.

use render_pool::config::env::load_env_file;
use render_pool::integrations::axum::{SharedChromePool, router};
use render_pool::init_worker_pool;
use tokio::signal;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match load_env_file() {
        Ok(path) => log::info!("Loaded {}", path.display()),
        Err(_) => log::info!("No app.env found, using environment and defaults"),
    }

    let pool = init_worker_pool().await.expect("Failed to start worker pool");
    log::info!("{}", pool.status());

    let app = router(pool.clone());

    let addr = std::env::var("RENDER_SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    log::info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(pool))
        .await
        .expect("Server error");
}

async fn shutdown_signal(pool: SharedChromePool) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("Shutdown signal received, closing workers...");
    pool.shutdown().await;
}
