//! Web framework integrations.
//!
//! | Framework | Feature Flag | Module |
//! |-----------|--------------|--------|
//! | Axum | `axum-integration` | `axum` |
//!
//! ```toml
//! [dependencies]
//! render-pool = { version = "0.1", features = ["axum-integration"] }
//! ```

#[cfg(feature = "axum-integration")]
pub mod axum;
