//! Cache maintenance endpoints.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{error_response, AppState};
use crate::TimeFilter;

// ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cache", delete(clear))
        .route("/cache/sweep", post(sweep))
}

#[derive(Debug, Deserialize)]
struct ClearParams {
    filter: Option<String>,
}

#[derive(Debug, Serialize)]
struct Removed {
    removed: usize,
}

/// `DELETE /cache[?filter=]`: one filter's entries, or everything.
async fn clear(Query(params): Query<ClearParams>, State(state): State<AppState>) -> Response {
    // ---
    let service = state.orchestrator.service();
    let removed = match params.filter.as_deref() {
        Some(raw) => match raw.parse::<TimeFilter>() {
            Ok(filter) => service.clear_cache_for_filter(filter).await,
            Err(e) => return error_response(&e),
        },
        None => service.clear_cache().await,
    };
    Json(Removed { removed }).into_response()
}

async fn sweep(State(state): State<AppState>) -> Json<Removed> {
    let removed = state.orchestrator.service().clear_expired_cache().await;
    Json(Removed { removed })
}
