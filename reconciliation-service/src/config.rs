use cloud_client::api::CloudApiConfig;
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub home_id: i64,
    /// IANA timezone of the reporting account. Sent with every time-series
    /// request and used for hour-bucket truncation, so the two cannot drift.
    pub timezone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatisticsConfig {
    pub database_uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub cloud: CloudApiConfig,
    pub account: AccountConfig,
    #[serde(default = "default_poll_interval_minutes")]
    pub poll_interval_minutes: u64,
    /// When absent, long-term statistics are disabled and only the live
    /// daily totals are maintained.
    pub statistics: Option<StatisticsConfig>,
    pub metrics: Option<MetricsConfig>,
    pub sensors: Option<SensorsConfig>,
}

fn default_max_connections() -> u32 {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_poll_interval_minutes() -> u64 {
    60
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path =
            env::var("WATERMETER_CONFIG").unwrap_or_else(|_| "watermeter-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        let cfg: AppConfig = toml::from_str(&contents)?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [cloud]
            email = "user@example.com"
            password = "hunter2"

            [account]
            home_id = 42
            timezone = "Europe/Paris"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.account.home_id, 42);
        assert_eq!(cfg.poll_interval_minutes, 60);
        assert!(cfg.statistics.is_none());
        assert!(cfg.cloud.auth_url.starts_with("https://"));
    }

    #[test]
    fn parses_full_config() {
        let cfg: AppConfig = toml::from_str(
            r#"
            poll_interval_minutes = 30

            [cloud]
            email = "user@example.com"
            password = "hunter2"

            [account]
            home_id = 42
            timezone = "Europe/Paris"

            [statistics]
            database_uri = "postgres://localhost/watermeter"
            max_retries = 5

            [metrics]
            bind_addr = "127.0.0.1:9102"

            [sensors]
            bind_addr = "127.0.0.1:8090"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.poll_interval_minutes, 30);
        let stats = cfg.statistics.unwrap();
        assert_eq!(stats.max_retries, 5);
        assert_eq!(stats.max_connections, 4);
        assert_eq!(stats.retry_backoff_ms, 500);
    }
}
