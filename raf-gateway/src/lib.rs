//! raf-gateway library - memoized RAF scoring gateway
//!
//! Stages membership and diagnosis records into a relational engine, runs the
//! external scoring routine over them and memoizes the result rows per
//! canonical request.

use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod cache;
pub mod engine;
pub mod error;
pub mod orchestrator;

pub use cache::{CacheKey, MemoizationCache};
pub use error::{ApiError, BackendError, GatewayError};
pub use orchestrator::{CacheStatus, Orchestrator, Outcome};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl AppState {
    /// Create new application state
    pub fn new(orchestrator: Arc<Orchestrator>, max_body_bytes: usize) -> Self {
        Self {
            orchestrator,
            max_body_bytes,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::post;

    let body_limit = state.max_body_bytes;

    Router::new()
        .route("/process_data", post(api::process_data))
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
