//! Postgres-backed reading store.
//!
//! Readings live in `water_readings` (see [`crate::schema`]). Rows are
//! rendered back into raw documents so they go through the same normalizer
//! as every other backend.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::PgPool;

use super::{ReadingStore, SortOrder, StoreQuery};
use crate::error::StoreError;
use crate::models::{Parameter, RawReading};

// ---

#[derive(Debug, sqlx::FromRow)]
struct ReadingRow {
    recorded_at: DateTime<Utc>,
    ph: Option<f64>,
    temperature: Option<f64>,
    turbidity: Option<f64>,
    salinity: Option<f64>,
}

impl ReadingRow {
    fn into_raw(self) -> RawReading {
        // ---
        let mut raw = RawReading::new().with(
            "timestamp",
            self.recorded_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        let values = [self.ph, self.temperature, self.turbidity, self.salinity];
        for (parameter, value) in Parameter::ALL.iter().zip(values) {
            if let Some(value) = value {
                raw = raw.with(parameter.key(), value);
            }
        }
        raw
    }
}

#[derive(Debug, Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn select_sql(order: SortOrder, end_exclusive: bool) -> String {
        // Postgres treats LIMIT NULL as no limit.
        let upper = if end_exclusive { "<" } else { "<=" };
        let direction = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        format!(
            r#"
            SELECT recorded_at, ph, temperature, turbidity, salinity
            FROM water_readings
            WHERE collection = $1 AND recorded_at >= $2 AND recorded_at {upper} $3
            ORDER BY recorded_at {direction}
            LIMIT $4
            "#
        )
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn query(&self, collection: &str, query: &StoreQuery) -> Result<Vec<RawReading>, StoreError> {
        // ---
        let limit = query.limit.map(|n| n as i64);
        tracing::debug!(collection, ?query, "postgres query");

        let sql = Self::select_sql(query.order, query.end_exclusive);
        let rows: Vec<ReadingRow> = sqlx::query_as(&sql)
            .bind(collection)
            .bind(query.range_start)
            .bind(query.range_end)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(ReadingRow::into_raw).collect())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
