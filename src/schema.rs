//! Database schema management for the Postgres reading store.
//!
//! Ensures the readings table and its index exist before serving requests.
//! Applied once on startup from `main.rs` when `STORE_BACKEND=postgres`.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create the `water_readings` table and its lookup index (idempotent).
///
/// Parameter columns are nullable: a sensor that did not report a value
/// stores NULL, never zero. Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS water_readings (
            id           BIGSERIAL PRIMARY KEY,
            collection   TEXT             NOT NULL,
            recorded_at  TIMESTAMPTZ      NOT NULL,
            ph           DOUBLE PRECISION,
            temperature  DOUBLE PRECISION,
            turbidity    DOUBLE PRECISION,
            salinity     DOUBLE PRECISION
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Every query is a time window within one collection
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_water_readings_collection_time
            ON water_readings (collection, recorded_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
