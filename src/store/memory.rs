//! In-process reading store.
//!
//! Holds documents in memory and can be told to fail or stall, which is how
//! the retry and fallback paths are exercised without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::{ReadingStore, SortOrder, StoreQuery, TIMESTAMP_FIELD};
use crate::error::StoreError;
use crate::models::RawReading;
use crate::normalize::{lookup, parse_timestamp};

// ---

#[derive(Debug)]
pub struct MemoryStore {
    tz: Tz,
    documents: Mutex<HashMap<String, Vec<(DateTime<Utc>, RawReading)>>>,
    fail_next: AtomicU32,
    latency: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl MemoryStore {
    /// `tz` is used to place documents whose timestamp is a naive local string.
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            documents: Mutex::new(HashMap::new()),
            fail_next: AtomicU32::new(0),
            latency: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Add a document. Returns `false` (and stores nothing) when its timestamp
    /// cannot be read, since such a document could never match a range query.
    pub fn insert(&self, collection: &str, raw: RawReading) -> bool {
        // ---
        let Some(at) = lookup(raw.fields(), TIMESTAMP_FIELD).and_then(|v| parse_timestamp(v, &self.tz))
        else {
            return false;
        };
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .push((at, raw));
        true
    }

    /// Make the next `n` queries fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Delay every query by `latency` (virtual time under a paused runtime).
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Number of queries received, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn query(&self, collection: &str, query: &StoreQuery) -> Result<Vec<RawReading>, StoreError> {
        // ---
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }

        let mut matched: Vec<(DateTime<Utc>, RawReading)> = self
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(at, _)| query.contains(*at))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        match query.order {
            SortOrder::Asc => matched.sort_by_key(|(at, _)| *at),
            SortOrder::Desc => matched.sort_by_key(|(at, _)| std::cmp::Reverse(*at)),
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        Ok(matched.into_iter().map(|(_, raw)| raw).collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
