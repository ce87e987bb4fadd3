use chrono::{DateTime, Utc};
use serde::Serialize;

/// The most recently persisted point of a statistic stream. Read back from
/// the store at the start of every reconciliation pass so the running sum
/// always continues from what was actually recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastKnownPoint {
    pub start: DateTime<Utc>,
    pub cumulative_sum: f64,
}

/// One hour-aligned statistic point.
///
/// `cumulative_sum` is non-decreasing within a stream: each record's sum is
/// the previous record's sum plus its own `incremental_usage`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticRecord {
    pub start: DateTime<Utc>,
    pub incremental_usage: f64,
    pub cumulative_sum: f64,
}

/// Identity and shape of one statistic stream, written alongside each batch.
#[derive(Debug, Clone)]
pub struct StreamMetadata {
    pub statistic_id: String,
    pub name: String,
    pub unit: &'static str,
    pub has_sum: bool,
    pub source: &'static str,
}
