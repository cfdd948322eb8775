//! Liveness endpoints

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Welcome to RAF Calculator API" }))
}

/// GET /health
///
/// Does not touch the database or the cache.
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Build liveness routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
}
