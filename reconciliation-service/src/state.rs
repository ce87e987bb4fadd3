use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{extract::State, routing::get, Json, Router};
use tokio::sync::RwLock;

use crate::cycle::DeviceReport;

/// Output of the last successful cycle, readable at any time between ticks.
/// A failed cycle leaves the previous snapshot in place.
#[derive(Clone, Default)]
pub struct SensorSnapshot {
    inner: Arc<RwLock<HashMap<String, DeviceReport>>>,
}

impl SensorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, reports: HashMap<String, DeviceReport>) {
        *self.inner.write().await = reports;
    }

    pub async fn get(&self) -> HashMap<String, DeviceReport> {
        self.inner.read().await.clone()
    }
}

/// Serve the snapshot as JSON on `GET /sensors`.
pub fn serve(bind_addr: &str, snapshot: SensorSnapshot) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid sensors bind addr: {e}"))?;

    tokio::spawn(async move {
        let app = Router::new()
            .route("/sensors", get(sensors_handler))
            .with_state(snapshot);

        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    tracing::error!(error = %e, "sensor snapshot server error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, %addr, "failed to bind sensor snapshot listener");
            }
        }
    });

    Ok(())
}

async fn sensors_handler(
    State(snapshot): State<SensorSnapshot>,
) -> Json<HashMap<String, DeviceReport>> {
    Json(snapshot.get().await)
}
