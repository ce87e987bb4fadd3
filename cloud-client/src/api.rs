use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{Device, RawReading};

/// Per-request timeout; a slow endpoint degrades to an error, never a hang.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Tokens are treated as expired this long before their nominal expiry so a
/// request never races the server-side cutoff.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} from {endpoint}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
    },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("malformed payload from {endpoint}: {detail}")]
    Decode {
        endpoint: &'static str,
        detail: String,
    },
}

/// Outcome of a fetch that can legitimately come back without data, as
/// opposed to failing outright. A payload missing its `values` key is a "no
/// data" signal from the feed, not a transport error, and callers branch on
/// the two cases differently.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Data(T),
    Empty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudApiConfig {
    pub email: String,
    pub password: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_locations_url")]
    pub locations_url: String,
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,
    #[serde(default = "default_tsdb_base_url")]
    pub tsdb_base_url: String,
}

fn default_auth_url() -> String {
    "https://api.homewizardeasyonline.com/v1/auth/account/token".to_string()
}

fn default_locations_url() -> String {
    "https://homes.api.homewizard.com/locations".to_string()
}

fn default_graphql_url() -> String {
    "https://api.homewizard.energy/v1/graphql".to_string()
}

fn default_tsdb_base_url() -> String {
    "https://tsdb-reader.homewizard.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Default)]
struct TokenState {
    current: Option<(String, Instant)>,
}

/// Seam between the reconciliation cycle and the remote feed; lets the cycle
/// run against an in-process fake in tests.
#[async_trait]
pub trait WatermeterApi: Send + Sync {
    /// Fetch the account's device list for one home.
    async fn list_devices(&self, home_id: i64) -> Result<Vec<Device>, ApiError>;

    /// Fetch the raw interval readings of one device for one reporting day.
    async fn day_readings(
        &self,
        date: NaiveDate,
        timezone: &str,
        device_identifier: &str,
    ) -> Result<FetchOutcome<Vec<RawReading>>, ApiError>;
}

/// Asynchronous client for the watermeter cloud API.
///
/// Holds a bearer token obtained via basic auth and refreshes it on expiry.
/// The refresh runs while the token lock is held, so concurrent callers wait
/// on the in-flight refresh instead of issuing duplicates.
pub struct CloudApiClient {
    http: Client,
    cfg: CloudApiConfig,
    token: Mutex<TokenState>,
}

impl CloudApiClient {
    pub fn new(cfg: CloudApiConfig) -> Result<Self, ApiError> {
        let user_agent = format!("watermeter-cloud-bridge/{}", env!("CARGO_PKG_VERSION"));
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            http,
            cfg,
            token: Mutex::new(TokenState::default()),
        })
    }

    async fn ensure_token(&self) -> Result<String, ApiError> {
        let mut state = self.token.lock().await;

        if let Some((token, expires_at)) = &state.current {
            if Instant::now() < *expires_at {
                return Ok(token.clone());
            }
        }

        debug!("access token missing or expired, renewing");
        let response = self
            .http
            .get(&self.cfg.auth_url)
            .basic_auth(&self.cfg.email, Some(&self.cfg.password))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body: TokenResponse = response.json().await.map_err(|e| ApiError::Decode {
            endpoint: "auth",
            detail: e.to_string(),
        })?;

        let ttl = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        debug!(expires_in = body.expires_in, "authenticated to cloud API");
        state.current = Some((body.access_token.clone(), Instant::now() + ttl));
        Ok(body.access_token)
    }

    /// List the locations (homes) attached to the account. Used at startup
    /// to sanity-check the configured home id.
    pub async fn list_locations(&self) -> Result<Vec<Location>, ApiError> {
        let token = self.ensure_token().await?;
        let response = self
            .http
            .get(&self.cfg.locations_url)
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Status {
                endpoint: "locations",
                status: response.status(),
            });
        }

        response.json().await.map_err(|e| ApiError::Decode {
            endpoint: "locations",
            detail: e.to_string(),
        })
    }
}

#[async_trait]
impl WatermeterApi for CloudApiClient {
    async fn list_devices(&self, home_id: i64) -> Result<Vec<Device>, ApiError> {
        let token = self.ensure_token().await?;
        let payload = json!({
            "operationName": "DeviceList",
            "variables": { "homeId": home_id },
            "query": "query DeviceList($homeId: Int!) {home(id: $homeId) { devices { identifier name wifiStrength ... on CloudDevice { type model hardwareVersion onlineState }}}}",
        });

        let response = self
            .http
            .post(&self.cfg.graphql_url)
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Status {
                endpoint: "graphql",
                status: response.status(),
            });
        }

        let body: serde_json::Value = response.json().await.map_err(|e| ApiError::Decode {
            endpoint: "graphql",
            detail: e.to_string(),
        })?;

        if let Some(errors) = body.get("errors") {
            return Err(ApiError::Decode {
                endpoint: "graphql",
                detail: format!("device list query returned errors: {errors}"),
            });
        }

        let devices = body
            .pointer("/data/home/devices")
            .ok_or_else(|| ApiError::Decode {
                endpoint: "graphql",
                detail: "device list response missing data.home.devices".to_string(),
            })?;

        serde_json::from_value(devices.clone()).map_err(|e| ApiError::Decode {
            endpoint: "graphql",
            detail: format!("invalid device entry: {e}"),
        })
    }

    async fn day_readings(
        &self,
        date: NaiveDate,
        timezone: &str,
        device_identifier: &str,
    ) -> Result<FetchOutcome<Vec<RawReading>>, ApiError> {
        let token = self.ensure_token().await?;
        let url = format!(
            "{}/devices/date/{}",
            self.cfg.tsdb_base_url,
            date.format("%Y/%m/%d")
        );
        let payload = json!({
            "devices": [
                { "identifier": device_identifier, "measurementType": "water" }
            ],
            "type": "water",
            "values": true,
            "wattage": true,
            "gb": "15m",
            "tz": timezone,
            "fill": "linear",
            "three_phases": false,
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Status {
                endpoint: "tsdb",
                status: response.status(),
            });
        }

        let body: serde_json::Value = response.json().await.map_err(|e| ApiError::Decode {
            endpoint: "tsdb",
            detail: e.to_string(),
        })?;

        let Some(values) = body.get("values") else {
            return Ok(FetchOutcome::Empty);
        };

        let readings: Vec<RawReading> =
            serde_json::from_value(values.clone()).map_err(|e| ApiError::Decode {
                endpoint: "tsdb",
                detail: format!("invalid reading entry: {e}"),
            })?;

        Ok(FetchOutcome::Data(readings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Server, ServerGuard};

    fn test_config(server: &ServerGuard) -> CloudApiConfig {
        CloudApiConfig {
            email: "user@example.com".to_string(),
            password: "hunter2".to_string(),
            auth_url: format!("{}/v1/auth/account/token", server.url()),
            locations_url: format!("{}/locations", server.url()),
            graphql_url: format!("{}/v1/graphql", server.url()),
            tsdb_base_url: server.url(),
        }
    }

    async fn mock_token(server: &mut ServerGuard, expires_in: u64, hits: usize) -> mockito::Mock {
        server
            .mock("GET", "/v1/auth/account/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"access_token": "tok-1", "expires_in": {expires_in}}}"#
            ))
            .expect(hits)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn token_is_fetched_once_for_concurrent_callers() {
        let mut server = Server::new_async().await;
        let token_mock = mock_token(&mut server, 3600, 1).await;
        let locations_mock = server
            .mock("GET", "/locations")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id": 42, "name": "Home"}]"#)
            .expect(2)
            .create_async()
            .await;

        let client = CloudApiClient::new(test_config(&server)).unwrap();
        let (a, b) = tokio::join!(client.list_locations(), client.list_locations());
        assert_eq!(a.unwrap()[0].id, 42);
        assert_eq!(b.unwrap()[0].id, 42);

        token_mock.assert_async().await;
        locations_mock.assert_async().await;
    }

    #[tokio::test]
    async fn expired_token_is_renewed() {
        let mut server = Server::new_async().await;
        // expires_in below the safety margin, so every call renews
        let token_mock = mock_token(&mut server, 30, 2).await;
        let locations_mock = server
            .mock("GET", "/locations")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .expect(2)
            .create_async()
            .await;

        let client = CloudApiClient::new(test_config(&server)).unwrap();
        client.list_locations().await.unwrap();
        client.list_locations().await.unwrap();

        token_mock.assert_async().await;
        locations_mock.assert_async().await;
    }

    #[tokio::test]
    async fn device_list_errors_key_is_a_failure() {
        let mut server = Server::new_async().await;
        mock_token(&mut server, 3600, 1).await;
        server
            .mock("POST", "/v1/graphql")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"errors": [{"message": "forbidden"}]}"#)
            .create_async()
            .await;

        let client = CloudApiClient::new(test_config(&server)).unwrap();
        let res = client.list_devices(42).await;
        assert!(matches!(res, Err(ApiError::Decode { endpoint: "graphql", .. })));
    }

    #[tokio::test]
    async fn device_list_missing_node_is_a_failure() {
        let mut server = Server::new_async().await;
        mock_token(&mut server, 3600, 1).await;
        server
            .mock("POST", "/v1/graphql")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": {}}"#)
            .create_async()
            .await;

        let client = CloudApiClient::new(test_config(&server)).unwrap();
        assert!(client.list_devices(42).await.is_err());
    }

    #[tokio::test]
    async fn device_list_decodes_devices() {
        let mut server = Server::new_async().await;
        mock_token(&mut server, 3600, 1).await;
        server
            .mock("POST", "/v1/graphql")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": {"home": {"devices": [
                    {"identifier": "watermeter/AA:BB", "type": "watermeter", "name": "Meter", "model": "WTR-1"},
                    {"identifier": "link/1", "name": "Link"}
                ]}}}"#,
            )
            .create_async()
            .await;

        let client = CloudApiClient::new(test_config(&server)).unwrap();
        let devices = client.list_devices(42).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices[0].is_water_meter());
        assert!(!devices[1].is_water_meter());
    }

    #[tokio::test]
    async fn day_readings_without_values_key_is_empty() {
        let mut server = Server::new_async().await;
        mock_token(&mut server, 3600, 1).await;
        server
            .mock("POST", "/devices/date/2024/05/01")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "pending"}"#)
            .create_async()
            .await;

        let client = CloudApiClient::new(test_config(&server)).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let res = client
            .day_readings(date, "Europe/Paris", "watermeter/AA:BB")
            .await
            .unwrap();
        assert_eq!(res, FetchOutcome::Empty);
    }

    #[tokio::test]
    async fn day_readings_decodes_mixed_value_encodings() {
        let mut server = Server::new_async().await;
        mock_token(&mut server, 3600, 1).await;
        server
            .mock("POST", "/devices/date/2024/05/01")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"values": [
                    {"time": "2024-05-01T09:00:00+02:00", "water": 1.5},
                    {"time": "2024-05-01T09:15:00+02:00", "water": "2.5"},
                    {"time": "2024-05-01T09:30:00+02:00", "water": null}
                ]}"#,
            )
            .create_async()
            .await;

        let client = CloudApiClient::new(test_config(&server)).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let res = client
            .day_readings(date, "Europe/Paris", "watermeter/AA:BB")
            .await
            .unwrap();

        let FetchOutcome::Data(readings) = res else {
            panic!("expected data");
        };
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].water, Some(1.5));
        assert_eq!(readings[1].water, Some(2.5));
        assert_eq!(readings[2].water, None);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let mut server = Server::new_async().await;
        mock_token(&mut server, 3600, 1).await;
        server
            .mock("POST", "/v1/graphql")
            .with_status(502)
            .create_async()
            .await;

        let client = CloudApiClient::new(test_config(&server)).unwrap();
        let res = client.list_devices(42).await;
        assert!(matches!(res, Err(ApiError::Status { endpoint: "graphql", .. })));
    }
}
