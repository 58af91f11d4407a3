use axum::response::Html;
use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod error;
pub mod health;
pub mod iterations;
pub mod ws;

/// Application routes with state applied. Middleware layers and the metrics
/// endpoint are added by the server binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Static UI (embedded at compile time)
        .route("/", get(|| async { Html(include_str!("../../static/index.html")) }))
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(iterations::submit_job))
        .route("/api/v1/iterations", get(iterations::list_iterations))
        .route("/api/search", get(iterations::search_iterations))
        .route("/ws", get(ws::progress_socket))
        .with_state(state)
}
