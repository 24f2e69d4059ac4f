//! Routes gateway: merges every endpoint family into one [`Router`].
//!
//! `main.rs` only knows about [`router`] and [`AppState`]; the sibling files
//! each export a sub-router over the shared state.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::watch;

use crate::{Error, FetchOrchestrator, ViewData};

mod cache;
mod health;
mod readings;

// ---

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<FetchOrchestrator>,
    /// Latest auto-refreshed dashboard view; `None` until the first refresh completes.
    pub dashboard: watch::Receiver<Option<ViewData>>,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(readings::router())
        .merge(cache::router())
        .merge(health::router())
        .with_state(state)
}

/// JSON `{"error": ...}` body with the status a library error maps to.
fn error_response(err: &Error) -> Response {
    // ---
    let status = match err {
        Error::UnknownFilter(_) => StatusCode::BAD_REQUEST,
        Error::InvalidRange { .. } | Error::Snapshot(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Store(_) | Error::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    }
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
