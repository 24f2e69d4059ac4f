//! In-memory cache for query results.
//!
//! One entry per cache key, last write wins. Freshness is advisory: an entry
//! older than the TTL is still returned by [`CacheStore::get`] so the service
//! can fall back to it when the store is unreachable.
//!
//! The store is an explicit object shared by reference (`Arc<CacheStore>`),
//! constructed once per process.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{AggregatedBucket, SensorReading, TimeFilter};
use crate::range::DateRange;

// ---

pub const CURRENT_DAY_PREFIX: &str = "currentDay:";
pub const AGGREGATED_PREFIX: &str = "aggregated:";

/// Default time-to-live for cached results.
pub fn default_ttl() -> Duration {
    Duration::hours(24)
}

/// `currentDay:YYYY-MM-DD`
pub fn current_day_key(date: NaiveDate) -> String {
    format!("{CURRENT_DAY_PREFIX}{}", date.format("%Y-%m-%d"))
}

/// `aggregated:<filter>:`, the prefix shared by every entry for one filter.
pub fn filter_prefix(filter: TimeFilter) -> String {
    format!("{AGGREGATED_PREFIX}{filter}:")
}

/// `aggregated:<filter>:<start date>:<end date>`, dates in the device zone.
pub fn aggregated_key(filter: TimeFilter, range: &DateRange, tz: &Tz) -> String {
    format!(
        "{}{}:{}",
        filter_prefix(filter),
        range.start_date(tz).format("%Y-%m-%d"),
        range.end_date(tz).format("%Y-%m-%d")
    )
}

/// Cached result set. Payloads are immutable snapshots shared via `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum CachePayload {
    Readings(Arc<Vec<SensorReading>>),
    Buckets(Arc<Vec<AggregatedBucket>>),
}

impl CachePayload {
    pub fn readings(&self) -> Option<Arc<Vec<SensorReading>>> {
        match self {
            CachePayload::Readings(items) => Some(Arc::clone(items)),
            CachePayload::Buckets(_) => None,
        }
    }

    pub fn buckets(&self) -> Option<Arc<Vec<AggregatedBucket>>> {
        match self {
            CachePayload::Buckets(items) => Some(Arc::clone(items)),
            CachePayload::Readings(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CachePayload::Readings(items) => items.len(),
            CachePayload::Buckets(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: CachePayload,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entry for `key` regardless of age.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Entry for `key` only while it is still fresh.
    pub async fn get_fresh(&self, key: &str) -> Option<CacheEntry> {
        self.get(key).await.filter(|entry| self.is_fresh(entry))
    }

    /// Store `payload` under `key` stamped with the current time, replacing any prior entry.
    pub async fn put(&self, key: &str, payload: CachePayload) -> CacheEntry {
        // ---
        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            cached_at: self.clock.now(),
        };
        self.entries
            .write()
            .await
            .insert(key.to_string(), entry.clone());
        tracing::debug!(key, items = entry.payload.len(), "cache put");
        entry
    }

    pub fn is_fresh(&self, entry: &CacheEntry) -> bool {
        self.clock.now() - entry.cached_at < self.ttl
    }

    /// Remove every entry whose key starts with `prefix`. Returns how many went.
    pub async fn invalidate(&self, prefix: &str) -> usize {
        // ---
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        tracing::debug!(prefix, removed, "cache invalidate");
        removed
    }

    /// Drop entries past their TTL.
    pub async fn sweep_expired(&self) -> usize {
        // ---
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now - entry.cached_at < self.ttl);
        before - entries.len()
    }

    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write all entries to `path` as JSON.
    pub async fn save_snapshot(&self, path: &Path) -> Result<usize> {
        // ---
        let entries: Vec<CacheEntry> = self.entries.read().await.values().cloned().collect();
        let json = serde_json::to_vec(&entries)
            .map_err(|e| Error::Snapshot(format!("encode {}: {e}", path.display())))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| Error::Snapshot(format!("write {}: {e}", path.display())))?;
        Ok(entries.len())
    }

    /// Merge entries from a snapshot written by [`save_snapshot`](Self::save_snapshot).
    ///
    /// A missing file is an empty snapshot. Restored entries keep their
    /// original `cached_at`, so freshness carries across restarts.
    pub async fn load_snapshot(&self, path: &Path) -> Result<usize> {
        // ---
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Snapshot(format!("read {}: {e}", path.display()))),
        };
        let restored: Vec<CacheEntry> = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Snapshot(format!("decode {}: {e}", path.display())))?;

        let count = restored.len();
        let mut entries = self.entries.write().await;
        for entry in restored {
            entries.insert(entry.key.clone(), entry);
        }
        Ok(count)
    }
}
