use std::{str::FromStr, sync::Arc, time::Duration};

use anyhow::Result;
use chrono_tz::Tz;
use cloud_client::api::CloudApiClient;
use reconciliation_service::{
    config::AppConfig,
    cycle::ReconciliationCycle,
    metrics_server, observability,
    state::{self, SensorSnapshot},
    store::{PgStatisticsStore, StatisticsStore},
};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr);
    }

    let tz = Tz::from_str(&cfg.account.timezone).map_err(|e| {
        anyhow::anyhow!("invalid account.timezone '{}': {e}", cfg.account.timezone)
    })?;

    let api = Arc::new(CloudApiClient::new(cfg.cloud.clone())?);

    // Fail early on bad credentials, and flag a home id the account does not
    // actually own before the first cycle runs against it.
    let locations = api.list_locations().await?;
    if !locations.iter().any(|l| l.id == cfg.account.home_id) {
        tracing::warn!(
            home_id = cfg.account.home_id,
            "configured home id not among the account's locations"
        );
    }

    let store: Option<Arc<dyn StatisticsStore>> = match &cfg.statistics {
        Some(stats_cfg) => {
            let pool = PgPoolOptions::new()
                .max_connections(stats_cfg.max_connections)
                .connect(&stats_cfg.database_uri)
                .await?;
            Some(Arc::new(PgStatisticsStore::new(
                pool,
                stats_cfg.max_retries,
                Duration::from_millis(stats_cfg.retry_backoff_ms),
            )))
        }
        None => {
            tracing::info!("no statistics store configured, long-term statistics disabled");
            None
        }
    };

    let snapshot = SensorSnapshot::new();
    if let Some(sensors_cfg) = &cfg.sensors {
        state::serve(&sensors_cfg.bind_addr, snapshot.clone())?;
    }

    let cycle = ReconciliationCycle::new(api, store, cfg.account.home_id, tz);

    // One tick at a time: the next fetch only starts after the previous
    // cycle finished, so overlapping runs cannot happen.
    let mut ticker =
        tokio::time::interval(Duration::from_secs(cfg.poll_interval_minutes * 60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match cycle.run().await {
            Ok(reports) => {
                tracing::info!(devices = reports.len(), "reconciliation cycle completed");
                snapshot.replace(reports).await;
            }
            Err(e) => {
                // retried automatically at the next tick
                tracing::warn!(error = %e, "reconciliation cycle failed");
                metrics::counter!("cycle_failures_total").increment(1);
            }
        }
    }
}
