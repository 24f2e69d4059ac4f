//! Read API over the history core.
//!
//! Plain GETs go straight to the service. Manual refreshes go through the
//! orchestrator so they are debounced and a newer refresh cancels an older
//! one for the same view.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{error_response, AppState};
use crate::{DateRange, FetchOutcome, RequestOutcome, TimeFilter, ViewData, ViewQuery};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/readings/current-day", get(current_day))
        .route("/readings/aggregated", get(aggregated))
        .route("/readings/range", get(date_range))
        .route("/readings/refresh", post(refresh))
        .route("/dashboard", get(dashboard))
}

#[derive(Debug, Deserialize)]
struct AggregatedParams {
    filter: String,
    use_cache: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    filter: String,
}

#[derive(Debug, Deserialize)]
struct RefreshParams {
    view: String,
}

#[derive(Debug, Serialize)]
struct RangeResponse {
    filter: TimeFilter,
    #[serde(flatten)]
    range: DateRange,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

/// 503 when nothing could be served, 200 otherwise (including degraded).
fn outcome_response<T: Serialize>(outcome: &FetchOutcome<T>) -> Response {
    let status = if outcome.is_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(outcome)).into_response()
}

fn view_response(view: &ViewData) -> Response {
    match view {
        ViewData::Readings(outcome) => outcome_response(outcome),
        ViewData::Buckets(outcome) => outcome_response(outcome),
    }
}

async fn current_day(State(state): State<AppState>) -> Response {
    // ---
    debug!("GET /readings/current-day");
    match state.orchestrator.service().get_current_day_data().await {
        Ok(outcome) => outcome_response(&outcome),
        Err(e) => error_response(&e),
    }
}

async fn aggregated(
    Query(params): Query<AggregatedParams>,
    State(state): State<AppState>,
) -> Response {
    // ---
    debug!("GET /readings/aggregated {:?}", params);
    let filter: TimeFilter = match params.filter.parse() {
        Ok(filter) => filter,
        Err(e) => return error_response(&e),
    };
    let use_cache = params.use_cache.unwrap_or(true);

    match state
        .orchestrator
        .service()
        .get_aggregated_data(filter, use_cache)
        .await
    {
        Ok(outcome) => outcome_response(&outcome),
        Err(e) => error_response(&e),
    }
}

async fn date_range(Query(params): Query<RangeParams>, State(state): State<AppState>) -> Response {
    // ---
    let service = state.orchestrator.service();
    let result = params
        .filter
        .parse::<TimeFilter>()
        .and_then(|filter| service.get_date_range(filter).map(|range| (filter, range)));

    match result {
        Ok((filter, range)) => {
            let tz = service.timezone();
            Json(RangeResponse {
                filter,
                range,
                start_date: range.start_date(&tz),
                end_date: range.end_date(&tz),
            })
            .into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn refresh(Query(params): Query<RefreshParams>, State(state): State<AppState>) -> Response {
    // ---
    let view: ViewQuery = match params.view.parse() {
        Ok(view) => view,
        Err(e) => return error_response(&e),
    };
    info!("POST /readings/refresh view={}", view);

    match state.orchestrator.refresh(view).await {
        Ok(RequestOutcome::Completed(data)) => view_response(&data),
        Ok(RequestOutcome::Superseded) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "superseded by a newer refresh" })),
        )
            .into_response(),
        Ok(RequestOutcome::Debounced { retry_after }) => {
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, secs.to_string())],
                Json(json!({
                    "error": "refresh debounced",
                    "retry_after_ms": retry_after.as_millis() as u64,
                })),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn dashboard(State(state): State<AppState>) -> Response {
    // ---
    let latest = state.dashboard.borrow().clone();
    match latest {
        Some(view) => view_response(&view),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "loading" })),
        )
            .into_response(),
    }
}
