//! HTTP API application wiring (Axum router + engine wiring).
//!
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: upload form parsing and response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use certdrop_infra::jobs::BatchService;

pub mod dto;
pub mod errors;
pub mod routes;

/// Uploads carry a spreadsheet and a template image or PDF.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(service: Arc<dyn BatchService>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(Extension(service))
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
}
