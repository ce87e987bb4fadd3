use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use cloud_client::domain::RawReading;

/// Reduce raw sub-hourly readings into one usage total per hour bucket.
///
/// Rules:
/// - Readings with a null volume are skipped, never counted as zero.
/// - Readings whose bucket lands more than one hour past `now` are skipped;
///   the feed pads the current day with placeholder rows.
/// - The bucket key is the reading time truncated to the top of its hour in
///   the reporting timezone `tz`, stored as a UTC instant. Truncating in
///   local time keeps non-whole-hour UTC offsets aligned with the feed's
///   hour boundaries.
///
/// Pure and order-independent: the same reading set always yields the same
/// bucket map.
pub fn aggregate_hourly(
    readings: &[RawReading],
    now: DateTime<Utc>,
    tz: Tz,
) -> BTreeMap<DateTime<Utc>, f64> {
    let cutoff = now + Duration::hours(1);
    let mut buckets = BTreeMap::new();

    for reading in readings {
        let Some(volume) = reading.water else {
            continue;
        };
        // with_minute is None only inside a DST transition gap; such a
        // reading has no well-defined bucket and is dropped.
        let Some(hour) = truncate_to_hour(reading.time.with_timezone(&tz)) else {
            continue;
        };
        let hour_utc = hour.with_timezone(&Utc);
        if hour_utc > cutoff {
            continue;
        }
        *buckets.entry(hour_utc).or_insert(0.0) += volume;
    }

    buckets
}

fn truncate_to_hour(t: DateTime<Tz>) -> Option<DateTime<Tz>> {
    t.with_minute(0)?.with_second(0)?.with_nanosecond(0)
}
