// src/routes/health.rs
//! Liveness endpoint.
//!
//! Exports a sub-router with `GET /health` for container orchestrators and
//! CI smoke tests. The handler never touches the reading store or the cache,
//! so it stays green while the store is down and the service is degraded.

use axum::{routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Generic over the state so it merges into any gateway router.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
