//! Request orchestration on top of [`HistoricalDataService`].
//!
//! Adds the view-facing policies:
//!
//! - last request wins: a newer request for the same [`ViewQuery`] cancels
//!   the one in flight, including its backoff sleep
//! - manual refreshes of one view are debounced
//! - dashboards get a periodic auto-refresh that stops with the view
//! - the cache is swept on its own timer, independent of any view

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{AggregatedBucket, SensorReading, TimeFilter};
use crate::service::{DataStatus, FetchOutcome, HistoricalDataService};

// ---

/// A logical query a view can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewQuery {
    CurrentDay,
    Aggregated(TimeFilter),
}

impl fmt::Display for ViewQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewQuery::CurrentDay => f.write_str("current-day"),
            ViewQuery::Aggregated(filter) => write!(f, "{filter}"),
        }
    }
}

impl FromStr for ViewQuery {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "current-day" | "current_day" | "currentDay" => Ok(ViewQuery::CurrentDay),
            other => other.parse().map(ViewQuery::Aggregated),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ViewData {
    Readings(FetchOutcome<SensorReading>),
    Buckets(FetchOutcome<AggregatedBucket>),
}

impl ViewData {
    pub fn status(&self) -> &DataStatus {
        match self {
            ViewData::Readings(outcome) => &outcome.status,
            ViewData::Buckets(outcome) => &outcome.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Completed(ViewData),
    /// A newer request for the same view replaced this one.
    Superseded,
    /// Manual refresh arrived inside the debounce window.
    Debounced { retry_after: Duration },
}

#[derive(Debug)]
struct InFlight {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
pub struct FetchOrchestrator {
    service: Arc<HistoricalDataService>,
    debounce: Duration,
    next_id: AtomicU64,
    in_flight: Mutex<HashMap<ViewQuery, InFlight>>,
    last_manual: Mutex<HashMap<ViewQuery, Instant>>,
}

impl FetchOrchestrator {
    pub fn new(service: Arc<HistoricalDataService>, debounce: Duration) -> Self {
        Self {
            service,
            debounce,
            next_id: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
            last_manual: Mutex::new(HashMap::new()),
        }
    }

    pub fn service(&self) -> &Arc<HistoricalDataService> {
        &self.service
    }

    /// Fetch a view, cache first.
    pub async fn load(&self, query: ViewQuery) -> Result<RequestOutcome> {
        self.run(query, true).await
    }

    /// Caller-triggered refresh: bypasses the fresh cache, debounced per view.
    pub async fn refresh(&self, query: ViewQuery) -> Result<RequestOutcome> {
        // ---
        let now = Instant::now();
        {
            let mut last = self.last_manual.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = last.get(&query) {
                let elapsed = now.duration_since(*previous);
                if elapsed < self.debounce {
                    debug!(%query, ?elapsed, "manual refresh debounced");
                    return Ok(RequestOutcome::Debounced {
                        retry_after: self.debounce - elapsed,
                    });
                }
            }
            last.insert(query, now);
        }
        self.run(query, false).await
    }

    async fn run(&self, query: ViewQuery, use_cache: bool) -> Result<RequestOutcome> {
        // ---
        let cancel = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let previous = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                query,
                InFlight {
                    id,
                    cancel: cancel.clone(),
                },
            );
        if let Some(previous) = previous {
            debug!(%query, superseded = previous.id, by = id, "cancelling in-flight request");
            previous.cancel.cancel();
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = self.dispatch(query, use_cache) => Some(outcome),
        };

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if in_flight.get(&query).is_some_and(|current| current.id == id) {
                in_flight.remove(&query);
            }
        }

        match result {
            None => Ok(RequestOutcome::Superseded),
            Some(outcome) => outcome.map(RequestOutcome::Completed),
        }
    }

    async fn dispatch(&self, query: ViewQuery, use_cache: bool) -> Result<ViewData> {
        match query {
            ViewQuery::CurrentDay => self
                .service
                .fetch_current_day(use_cache)
                .await
                .map(ViewData::Readings),
            ViewQuery::Aggregated(filter) => self
                .service
                .get_aggregated_data(filter, use_cache)
                .await
                .map(ViewData::Buckets),
        }
    }

    /// Re-fetch `query` live every `every` until `cancel` fires.
    ///
    /// The receiver always holds the latest completed result. The task also
    /// stops once every receiver has been dropped.
    pub fn spawn_auto_refresh(
        self: &Arc<Self>,
        query: ViewQuery,
        every: Duration,
        cancel: CancellationToken,
    ) -> (watch::Receiver<Option<ViewData>>, JoinHandle<()>) {
        // ---
        let (tx, rx) = watch::channel(None);
        let this = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let outcome = tokio::select! {
                            _ = cancel.cancelled() => break,
                            outcome = this.run(query, false) => outcome,
                        };
                        match outcome {
                            Ok(RequestOutcome::Completed(view)) => {
                                if tx.send(Some(view)).is_err() {
                                    break;
                                }
                            }
                            Ok(other) => debug!(%query, ?other, "auto-refresh skipped"),
                            Err(err) => warn!(%query, error = %err, "auto-refresh failed"),
                        }
                    }
                }
            }
            debug!(%query, "auto-refresh stopped");
        });

        (rx, handle)
    }
}

/// Sweep expired cache entries every `every` until `cancel` fires.
pub fn spawn_cache_sweeper(
    service: Arc<HistoricalDataService>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    service.clear_expired_cache().await;
                }
            }
        }
    })
}
