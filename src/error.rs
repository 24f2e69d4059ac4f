//! Error taxonomy for the history core.
//!
//! Two layers: [`StoreError`] describes what went wrong talking to the
//! reading store, and [`Error`] is what the library surfaces to callers.
//! Store failures are retried and degraded inside the service; only
//! programming errors (unknown filter, inverted range) reach callers as `Err`.

use std::time::Duration;

use chrono::{DateTime, Utc};

// ---

/// Failures raised by a [`crate::store::ReadingStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode store response: {0}")]
    Decode(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the history core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown time filter '{0}' (expected daily, weekly, monthly or annually)")]
    UnknownFilter(String),

    #[error("invalid date range: start {start} is not before end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("store query timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache snapshot I/O failed: {0}")]
    Snapshot(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
