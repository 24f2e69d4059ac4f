//! Historical water-quality data core.
//!
//! Fetches sensor readings from a reading store, normalizes heterogeneous
//! documents, buckets them on the device's local calendar, and caches the
//! results with a stale-on-failure fallback.
//!
//! Follows the Explicit Module Boundary Pattern (EMBP): sibling modules and
//! the `routes` gateway import shared types from the crate root rather than
//! reaching into each other's files.

pub mod aggregate;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod range;
pub mod routes;
pub mod schema;
pub mod service;
pub mod store;

pub use cache::{CacheEntry, CachePayload, CacheStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, StoreBackend};
pub use error::{Error, Result, StoreError};
pub use models::{
    AggregatedBucket, Parameter, Quality, RawReading, ReadingFlags, SensorReading, TimeFilter,
};
pub use orchestrator::{FetchOrchestrator, RequestOutcome, ViewData, ViewQuery};
pub use range::DateRange;
pub use service::{DataStatus, FetchOutcome, FetchPolicy, HistoricalDataService, ServiceSettings};
pub use store::{HttpReadingStore, MemoryStore, PgReadingStore, ReadingStore};
