//! Narrow interface to the external statistics store, plus the Postgres
//! implementation used in production.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE watermeter_statistics_meta (
//!     statistic_id TEXT PRIMARY KEY,
//!     name         TEXT NOT NULL,
//!     unit         TEXT NOT NULL,
//!     has_sum      BOOLEAN NOT NULL,
//!     source       TEXT NOT NULL
//! );
//!
//! CREATE TABLE watermeter_statistics (
//!     statistic_id      TEXT NOT NULL,
//!     start_ts          TIMESTAMPTZ NOT NULL,
//!     incremental_usage DOUBLE PRECISION NOT NULL,
//!     cumulative_sum    DOUBLE PRECISION NOT NULL,
//!     PRIMARY KEY (statistic_id, start_ts)
//! );
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloud_client::domain::{LastKnownPoint, StatisticRecord, StreamMetadata};
use sqlx::{postgres::PgPool, Postgres, QueryBuilder};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("giving up after {attempts} failed write attempts: {last}")]
    RetriesExhausted { attempts: u32, last: sqlx::Error },
}

/// Read/write contract of the external statistics store. The cycle only ever
/// reads the newest point of a stream and appends batches to it.
#[async_trait]
pub trait StatisticsStore: Send + Sync {
    async fn get_last_point(
        &self,
        statistic_id: &str,
    ) -> Result<Option<LastKnownPoint>, StoreError>;

    async fn write_batch(
        &self,
        metadata: &StreamMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), StoreError>;
}

#[derive(sqlx::FromRow)]
struct LastPointRow {
    start_ts: DateTime<Utc>,
    cumulative_sum: f64,
}

pub struct PgStatisticsStore {
    pool: PgPool,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PgStatisticsStore {
    pub fn new(pool: PgPool, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            max_retries,
            retry_backoff,
        }
    }

    async fn insert_batch(
        &self,
        metadata: &StreamMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO watermeter_statistics_meta (statistic_id, name, unit, has_sum, source)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (statistic_id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(&metadata.statistic_id)
        .bind(&metadata.name)
        .bind(metadata.unit)
        .bind(metadata.has_sum)
        .bind(metadata.source)
        .execute(&mut *tx)
        .await?;

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO watermeter_statistics (statistic_id, start_ts, incremental_usage, cumulative_sum) ",
        );
        builder.push_values(records, |mut b, rec| {
            b.push_bind(&metadata.statistic_id)
                .push_bind(rec.start)
                .push_bind(rec.incremental_usage)
                .push_bind(rec.cumulative_sum);
        });
        // an hour that somehow got written by an earlier cycle stays as-is
        builder.push(" ON CONFLICT (statistic_id, start_ts) DO NOTHING");
        builder.build().execute(&mut *tx).await?;

        tx.commit().await
    }
}

#[async_trait]
impl StatisticsStore for PgStatisticsStore {
    async fn get_last_point(
        &self,
        statistic_id: &str,
    ) -> Result<Option<LastKnownPoint>, StoreError> {
        let row = sqlx::query_as::<_, LastPointRow>(
            r#"
            SELECT start_ts, cumulative_sum
            FROM watermeter_statistics
            WHERE statistic_id = $1
            ORDER BY start_ts DESC
            LIMIT 1
            "#,
        )
        .bind(statistic_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| LastKnownPoint {
            start: r.start_ts,
            cumulative_sum: r.cumulative_sum,
        }))
    }

    async fn write_batch(
        &self,
        metadata: &StreamMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut attempt: u32 = 0;
        loop {
            match self.insert_batch(metadata, records).await {
                Ok(()) => {
                    metrics::counter!("statistics_records_written_total")
                        .increment(records.len() as u64);
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        statistic_id = %metadata.statistic_id,
                        "statistics batch write failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    metrics::counter!("statistics_write_errors_total").increment(1);
                    return Err(StoreError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: e,
                    });
                }
            }
        }
    }
}
