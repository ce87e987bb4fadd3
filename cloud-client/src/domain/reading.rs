use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer};

/// One sample from the remote time-series feed.
///
/// `water` is the volume consumed during the sample interval, in liters.
/// The feed pads the current day out with placeholder rows, so future
/// intervals arrive with a null volume; null means "no sample", never zero.
/// Depending on the endpoint version the volume is encoded either as a JSON
/// number or as a numeric string, so decoding accepts both.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawReading {
    pub time: DateTime<FixedOffset>,
    #[serde(default, deserialize_with = "lenient_volume")]
    pub water: Option<f64>,
}

fn lenient_volume<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    match raw {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| D::Error::custom("water volume out of f64 range")),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| D::Error::custom(format!("invalid water volume '{s}': {e}"))),
        Some(other) => Err(D::Error::custom(format!(
            "unexpected water volume type: {other}"
        ))),
    }
}
