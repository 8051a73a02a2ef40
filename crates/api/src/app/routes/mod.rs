use axum::Router;

pub mod jobs;
pub mod system;

/// Router for the batch API.
pub fn router() -> Router {
    Router::new().nest("/api", jobs::router())
}
