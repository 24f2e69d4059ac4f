//! Reading store seam.
//!
//! The history core never talks to a database directly; it asks a
//! [`ReadingStore`] for raw documents in a time window. Three backends:
//!
//! - [`postgres::PgReadingStore`] for readings kept in Postgres
//! - [`http::HttpReadingStore`] for a document store behind a REST API
//! - [`memory::MemoryStore`] for tests and local runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::models::RawReading;

pub mod http;
pub mod memory;
pub mod postgres;

pub use http::HttpReadingStore;
pub use memory::MemoryStore;
pub use postgres::PgReadingStore;

// ---

/// Field every backend orders by.
pub const TIMESTAMP_FIELD: &str = "timestamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Shape of a time-window query. `range_start` is inclusive; `range_end` is
/// inclusive unless `end_exclusive` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreQuery {
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub end_exclusive: bool,
    pub order_by: String,
    #[serde(rename = "order_direction")]
    pub order: SortOrder,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl StoreQuery {
    pub fn between(range_start: DateTime<Utc>, range_end: DateTime<Utc>) -> Self {
        Self {
            range_start,
            range_end,
            end_exclusive: false,
            order_by: TIMESTAMP_FIELD.to_string(),
            order: SortOrder::Asc,
            limit: None,
        }
    }

    /// `[range_start, range_end)`.
    pub fn half_open(range_start: DateTime<Utc>, range_end: DateTime<Utc>) -> Self {
        Self {
            end_exclusive: true,
            ..Self::between(range_start, range_end)
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let below_end = if self.end_exclusive {
            at < self.range_end
        } else {
            at <= self.range_end
        };
        self.range_start <= at && below_end
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Raw documents of `collection` whose timestamp falls in the query window.
    async fn query(&self, collection: &str, query: &StoreQuery) -> Result<Vec<RawReading>, StoreError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
