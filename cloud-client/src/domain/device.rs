use serde::{Deserialize, Serialize};

/// Device kind as reported by the device-list query. Only water meters are
/// reconciled; every other kind is carried through untouched so callers can
/// log what they skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceKind {
    WaterMeter,
    Other(String),
}

impl From<String> for DeviceKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "watermeter" => Self::WaterMeter,
            _ => Self::Other(s),
        }
    }
}

impl From<DeviceKind> for String {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::WaterMeter => "watermeter".to_string(),
            DeviceKind::Other(s) => s,
        }
    }
}

/// One device from the account's device list.
///
/// `kind` is optional because the list query only resolves a type for cloud
/// devices; locally paired hardware comes back without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub identifier: String,
    #[serde(rename = "type", default)]
    pub kind: Option<DeviceKind>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl Device {
    pub fn is_water_meter(&self) -> bool {
        matches!(self.kind, Some(DeviceKind::WaterMeter))
    }

    /// Identifier with path separators replaced, stable enough to use as a
    /// statistic-stream key.
    pub fn sanitized_identifier(&self) -> String {
        self.identifier.replace('/', "_")
    }
}
