use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use cloud_client::domain::LastKnownPoint;

/// Select the hours that are genuinely new relative to the last recorded
/// point, in ascending order, ready for emission.
///
/// The feed is fetched with overlapping day windows so a midnight rollover
/// never leaves a gap; this filter is what makes refetching the same hour
/// idempotent. Hours at or before the last recorded start are dropped (the
/// boundary hour itself was already persisted), as are hours with no usage
/// at all, which would only pad the stream with no-op records.
pub fn resolve_new_hours(
    buckets: &BTreeMap<DateTime<Utc>, f64>,
    last_point: Option<&LastKnownPoint>,
) -> Vec<(DateTime<Utc>, f64)> {
    buckets
        .iter()
        .filter(|(hour, _)| last_point.is_none_or(|p| **hour > p.start))
        .filter(|(_, usage)| **usage != 0.0)
        .map(|(hour, usage)| (*hour, *usage))
        .collect()
}
