use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use cloud_client::api::{ApiError, FetchOutcome, WatermeterApi};
use cloud_client::domain::{Device, RawReading, StreamMetadata};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::aggregate::aggregate_hourly;
use crate::continuity::resolve_new_hours;
use crate::emit;
use crate::store::{StatisticsStore, StoreError};

pub const SOURCE_NAME: &str = "cloud_watermeter";
pub const UNIT_LITERS: &str = "L";

#[derive(thiserror::Error, Debug)]
pub enum CycleError {
    /// Without a device list nothing can be reconciled; the whole tick is
    /// abandoned and retried at the next scheduled run.
    #[error("device list fetch failed: {0}")]
    DeviceList(#[from] ApiError),
}

/// Live per-device result of the latest cycle, consumed by the sensor layer.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub daily_total: f64,
    pub unit: &'static str,
    pub device: Device,
}

/// One scheduled reconciliation pass over all water meters of a home.
///
/// Devices are rediscovered on every run; per-device problems are isolated
/// so one meter's API hiccup never blocks statistics for the others.
pub struct ReconciliationCycle {
    api: Arc<dyn WatermeterApi>,
    store: Option<Arc<dyn StatisticsStore>>,
    home_id: i64,
    tz: Tz,
}

impl ReconciliationCycle {
    pub fn new(
        api: Arc<dyn WatermeterApi>,
        store: Option<Arc<dyn StatisticsStore>>,
        home_id: i64,
        tz: Tz,
    ) -> Self {
        Self {
            api,
            store,
            home_id,
            tz,
        }
    }

    pub async fn run(&self) -> Result<HashMap<String, DeviceReport>, CycleError> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, DeviceReport>, CycleError> {
        let devices = self.api.list_devices(self.home_id).await?;
        metrics::counter!("cycle_runs_total").increment(1);

        let today = now.with_timezone(&self.tz).date_naive();
        let yesterday = today - Days::new(1);

        let mut reports = HashMap::new();
        for device in devices {
            if !device.is_water_meter() {
                debug!(identifier = %device.identifier, "skipping non-watermeter device");
                continue;
            }
            if let Some(report) = self.reconcile_device(&device, today, yesterday, now).await {
                reports.insert(device.sanitized_identifier(), report);
            }
        }

        Ok(reports)
    }

    async fn reconcile_device(
        &self,
        device: &Device,
        today: NaiveDate,
        yesterday: NaiveDate,
        now: DateTime<Utc>,
    ) -> Option<DeviceReport> {
        debug!(identifier = %device.identifier, "found water meter device, fetching readings");

        let today_readings = match self.fetch_day(device, today).await {
            Some(values) => values,
            None => return None,
        };

        // The prior day is refetched alongside the current one so hours
        // around the local-midnight rollover are never missed; the
        // continuity filter makes the overlap harmless.
        if let Some(store) = self.store.clone() {
            let yesterday_readings = self.fetch_day(device, yesterday).await?;

            let mut combined = yesterday_readings;
            combined.extend(today_readings.iter().cloned());

            if let Err(e) = self
                .inject_statistics(store.as_ref(), device, &combined, now)
                .await
            {
                // The next cycle re-reads the last known point, so a failed
                // write cannot corrupt the running sum.
                error!(
                    error = %e,
                    identifier = %device.identifier,
                    "failed to record statistics for water meter"
                );
                metrics::counter!("cycle_statistics_failures_total").increment(1);
            }
        } else {
            debug!("no statistics store configured, skipping statistics injection");
        }

        // Live total for the current reporting day, independent of what has
        // already been persisted.
        let daily_total: f64 = today_readings.iter().filter_map(|r| r.water).sum();

        Some(DeviceReport {
            daily_total,
            unit: UNIT_LITERS,
            device: device.clone(),
        })
    }

    async fn fetch_day(&self, device: &Device, date: NaiveDate) -> Option<Vec<RawReading>> {
        match self
            .api
            .day_readings(date, self.tz.name(), &device.identifier)
            .await
        {
            Ok(FetchOutcome::Data(values)) => Some(values),
            Ok(FetchOutcome::Empty) => {
                warn!(
                    identifier = %device.identifier,
                    %date,
                    "no readings received for water meter, skipping device"
                );
                metrics::counter!("device_skipped_total").increment(1);
                None
            }
            Err(e) => {
                warn!(
                    error = %e,
                    identifier = %device.identifier,
                    %date,
                    "readings fetch failed, skipping device"
                );
                metrics::counter!("device_skipped_total").increment(1);
                None
            }
        }
    }

    async fn inject_statistics(
        &self,
        store: &dyn StatisticsStore,
        device: &Device,
        readings: &[RawReading],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let statistic_id = format!("{SOURCE_NAME}:{}_total", device.sanitized_identifier());

        let last_point = store.get_last_point(&statistic_id).await?;
        let buckets = aggregate_hourly(readings, now, self.tz);
        let resolved = resolve_new_hours(&buckets, last_point.as_ref());

        let metadata = StreamMetadata {
            name: format!(
                "{} Total",
                device.name.as_deref().unwrap_or(&device.identifier)
            ),
            statistic_id: statistic_id.clone(),
            unit: UNIT_LITERS,
            has_sum: true,
            source: SOURCE_NAME,
        };

        let written = emit::emit(store, &metadata, &resolved, last_point.as_ref()).await?;
        if written > 0 {
            debug!(%statistic_id, records = written, "recorded hourly statistics");
        }
        Ok(())
    }
}
