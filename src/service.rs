//! Historical data service.
//!
//! Orchestrates store -> normalizer -> aggregator -> cache for the two
//! query shapes the views need:
//!
//! - the current-day feed: today's readings, unaggregated, newest N
//! - the reports feed: a filter's date range, bucketed by [`aggregate`]
//!
//! Live fetches run under a timeout with bounded exponential backoff. When
//! every attempt fails the last cached payload for the key is served, fresh
//! or not, tagged [`DataStatus::Degraded`]. With no cache at all the caller
//! gets an empty [`DataStatus::Unavailable`] result carrying the error. Store
//! failures never surface as `Err`; only programming errors do.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::aggregate;
use crate::cache::{self, CacheEntry, CachePayload, CacheStore};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{AggregatedBucket, RawReading, SensorReading, TimeFilter};
use crate::normalize::normalize_all;
use crate::range::{current_day_bounds, local_date, resolve_range, DateRange};
use crate::store::{ReadingStore, SortOrder, StoreQuery};

// ---

/// Timeout and retry schedule for live fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Per-attempt store timeout.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each retry after.
    pub backoff_base: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl FetchPolicy {
    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base, ...
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1 << exponent)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub collection: String,
    pub current_day_limit: usize,
    pub policy: FetchPolicy,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            collection: "sensor_readings".to_string(),
            current_day_limit: 50,
            policy: FetchPolicy::default(),
        }
    }
}

/// Where a result came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DataStatus {
    /// Fetched from the store just now.
    Live,
    /// Served from a fresh cache entry.
    Cached,
    /// Live fetch failed; this is the last known data.
    Degraded { error: String },
    /// Live fetch failed and nothing was cached.
    Unavailable { error: String },
}

impl DataStatus {
    pub fn error(&self) -> Option<&str> {
        match self {
            DataStatus::Degraded { error } | DataStatus::Unavailable { error } => Some(error),
            DataStatus::Live | DataStatus::Cached => None,
        }
    }
}

/// A result set plus how trustworthy it is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchOutcome<T> {
    #[serde(flatten)]
    pub status: DataStatus,
    /// When the data was fetched from the store; `None` when unavailable.
    pub as_of: Option<DateTime<Utc>>,
    pub data: Arc<Vec<T>>,
}

impl<T> FetchOutcome<T> {
    fn from_entry(data: Arc<Vec<T>>, entry: &CacheEntry, status: DataStatus) -> Self {
        Self {
            status,
            as_of: Some(entry.cached_at),
            data,
        }
    }

    fn unavailable(error: String) -> Self {
        Self {
            status: DataStatus::Unavailable { error },
            as_of: None,
            data: Arc::new(Vec::new()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.status, DataStatus::Degraded { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.status, DataStatus::Unavailable { .. })
    }

    /// The store answered and the window really holds no data.
    pub fn is_confirmed_empty(&self) -> bool {
        matches!(self.status, DataStatus::Live | DataStatus::Cached) && self.data.is_empty()
    }
}

/// How one query shape is stored in and read back from the cache.
struct PayloadKind<T> {
    extract: fn(&CachePayload) -> Option<Arc<Vec<T>>>,
    wrap: fn(Arc<Vec<T>>) -> CachePayload,
}

const READINGS: PayloadKind<SensorReading> = PayloadKind {
    extract: CachePayload::readings,
    wrap: CachePayload::Readings,
};

const BUCKETS: PayloadKind<AggregatedBucket> = PayloadKind {
    extract: CachePayload::buckets,
    wrap: CachePayload::Buckets,
};

pub struct HistoricalDataService {
    store: Arc<dyn ReadingStore>,
    cache: Arc<CacheStore>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    settings: ServiceSettings,
}

impl std::fmt::Debug for HistoricalDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoricalDataService")
            .field("store", &self.store.name())
            .field("tz", &self.tz)
            .field("settings", &self.settings)
            .finish()
    }
}

impl HistoricalDataService {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        cache: Arc<CacheStore>,
        clock: Arc<dyn Clock>,
        tz: Tz,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            tz,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// The window a filter covers right now. Re-derived on every call.
    pub fn get_date_range(&self, filter: TimeFilter) -> Result<DateRange> {
        resolve_range(filter, self.clock.now(), &self.tz)
    }

    /// Today's readings, cache first.
    pub async fn get_current_day_data(&self) -> Result<FetchOutcome<SensorReading>> {
        self.fetch_current_day(true).await
    }

    /// Today's readings, ascending, capped to the most recent `current_day_limit`.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_current_day(&self, use_cache: bool) -> Result<FetchOutcome<SensorReading>> {
        // ---
        let now = self.clock.now();
        let (start, next_midnight) = current_day_bounds(now, &self.tz)?;
        let key = cache::current_day_key(local_date(now, &self.tz));

        let query = StoreQuery::half_open(start, next_midnight)
            .order(SortOrder::Desc)
            .limit(self.settings.current_day_limit);

        let outcome = self
            .serve(&key, use_cache, &query, READINGS, |raws| {
                let mut readings = normalize_all(&raws, &self.tz, now);
                log_flagged(&readings);
                readings.sort_by_key(|r| r.timestamp);
                readings
            })
            .await;
        Ok(outcome)
    }

    /// A filter's range, bucketed and averaged.
    ///
    /// `use_cache = false` skips the fresh-cache shortcut; the stale fallback
    /// still applies if the live fetch fails.
    #[tracing::instrument(skip(self, filter), fields(filter = %filter))]
    pub async fn get_aggregated_data(
        &self,
        filter: TimeFilter,
        use_cache: bool,
    ) -> Result<FetchOutcome<AggregatedBucket>> {
        // ---
        let now = self.clock.now();
        let range = resolve_range(filter, now, &self.tz)?;
        let key = cache::aggregated_key(filter, &range, &self.tz);
        let query = StoreQuery::between(range.start, range.end);

        let outcome = self
            .serve(&key, use_cache, &query, BUCKETS, |raws| {
                let readings = normalize_all(&raws, &self.tz, now);
                log_flagged(&readings);

                let (dated, undated): (Vec<_>, Vec<_>) = readings
                    .into_iter()
                    .partition(|r| !r.flags.timestamp_fallback);
                if !undated.is_empty() {
                    warn!(
                        dropped = undated.len(),
                        "excluding readings without a usable timestamp from aggregation"
                    );
                }
                aggregate(&dated, filter, &self.tz)
            })
            .await;
        Ok(outcome)
    }

    /// Force-refresh one filter's entries. `daily` also drops the current-day feed.
    pub async fn clear_cache_for_filter(&self, filter: TimeFilter) -> usize {
        // ---
        let mut removed = self.cache.invalidate(&cache::filter_prefix(filter)).await;
        if filter == TimeFilter::Daily {
            removed += self.cache.invalidate(cache::CURRENT_DAY_PREFIX).await;
        }
        info!("Cleared {} cache entries for filter {}", removed, filter);
        removed
    }

    pub async fn clear_expired_cache(&self) -> usize {
        let removed = self.cache.sweep_expired().await;
        debug!("Swept {} expired cache entries", removed);
        removed
    }

    pub async fn clear_cache(&self) -> usize {
        let removed = self.cache.clear().await;
        info!("Cleared all {} cache entries", removed);
        removed
    }

    /// Cache check, live fetch with retry, cache write, stale fallback.
    async fn serve<T, B>(
        &self,
        key: &str,
        use_cache: bool,
        query: &StoreQuery,
        kind: PayloadKind<T>,
        build: B,
    ) -> FetchOutcome<T>
    where
        B: FnOnce(Vec<RawReading>) -> Vec<T>,
    {
        // ---
        if use_cache {
            if let Some(entry) = self.cache.get_fresh(key).await {
                if let Some(data) = (kind.extract)(&entry.payload) {
                    debug!(key, "serving fresh cache entry");
                    return FetchOutcome::from_entry(data, &entry, DataStatus::Cached);
                }
            }
        }

        match self.fetch_with_retry(query).await {
            Ok(raws) => {
                let fetched = raws.len();
                let data = Arc::new(build(raws));
                let entry = self.cache.put(key, (kind.wrap)(Arc::clone(&data))).await;
                info!(key, fetched, items = data.len(), "live fetch complete");
                FetchOutcome::from_entry(data, &entry, DataStatus::Live)
            }
            Err(err) => {
                let error = err.to_string();
                let fallback = self.cache.get(key).await.and_then(|entry| {
                    (kind.extract)(&entry.payload).map(|data| (data, entry))
                });
                match fallback {
                    Some((data, entry)) => {
                        warn!(key, %error, cached_at = %entry.cached_at, "serving last known data");
                        FetchOutcome::from_entry(data, &entry, DataStatus::Degraded { error })
                    }
                    None => {
                        warn!(key, %error, "no live data and nothing cached");
                        FetchOutcome::unavailable(error)
                    }
                }
            }
        }
    }

    /// One attempt plus up to `max_retries` retries, each under the timeout.
    async fn fetch_with_retry(&self, query: &StoreQuery) -> Result<Vec<RawReading>> {
        // ---
        let policy = self.settings.policy;
        let mut retry = 0;

        loop {
            let attempt = tokio::time::timeout(
                policy.timeout,
                self.store.query(&self.settings.collection, query),
            )
            .await;

            let err = match attempt {
                Ok(Ok(raws)) => return Ok(raws),
                Ok(Err(e)) => Error::Store(e),
                Err(_) => Error::Timeout(policy.timeout),
            };

            if retry >= policy.max_retries {
                warn!(attempts = retry + 1, error = %err, "store fetch failed, retries exhausted");
                return Err(err);
            }

            retry += 1;
            let delay = policy.backoff(retry);
            warn!(
                retry,
                ?delay,
                error = %err,
                store = self.store.name(),
                "store fetch failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn log_flagged(readings: &[SensorReading]) {
    // ---
    let out_of_range = readings
        .iter()
        .filter(|r| !r.flags.out_of_range.is_empty())
        .count();
    if out_of_range > 0 {
        warn!(count = out_of_range, "readings outside sanity bounds");
    }
    let fallback = readings.iter().filter(|r| r.flags.timestamp_fallback).count();
    if fallback > 0 {
        warn!(count = fallback, "readings with unparseable timestamps");
    }
}
