use chrono::{DateTime, Utc};
use cloud_client::domain::{LastKnownPoint, StatisticRecord, StreamMetadata};
use tracing::debug;

use crate::store::{StatisticsStore, StoreError};

/// Attach a running cumulative sum to resolved hourly usage.
///
/// The sum is seeded with `base_sum` (0.0 on a cold start) and each record
/// satisfies `cumulative_sum[i] = cumulative_sum[i-1] + incremental_usage[i]`.
pub fn build_records(resolved: &[(DateTime<Utc>, f64)], base_sum: f64) -> Vec<StatisticRecord> {
    let mut cumulative_sum = base_sum;
    resolved
        .iter()
        .map(|&(start, usage)| {
            cumulative_sum += usage;
            StatisticRecord {
                start,
                incremental_usage: usage,
                cumulative_sum,
            }
        })
        .collect()
}

/// Build the statistic records for one stream and hand them to the store as
/// a single batch. An empty resolved sequence results in no store call at
/// all; existing history must never be touched by an empty write.
///
/// Returns the number of records written.
pub async fn emit<S>(
    store: &S,
    metadata: &StreamMetadata,
    resolved: &[(DateTime<Utc>, f64)],
    last_point: Option<&LastKnownPoint>,
) -> Result<usize, StoreError>
where
    S: StatisticsStore + ?Sized,
{
    let base_sum = last_point.map_or(0.0, |p| p.cumulative_sum);
    let records = build_records(resolved, base_sum);
    if records.is_empty() {
        debug!(statistic_id = %metadata.statistic_id, "no new hours to record");
        return Ok(0);
    }

    store.write_batch(metadata, &records).await?;
    Ok(records.len())
}
