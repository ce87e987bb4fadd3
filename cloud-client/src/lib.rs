pub mod api;
pub mod domain;

pub use api::{ApiError, CloudApiClient, CloudApiConfig, FetchOutcome, WatermeterApi};
pub use domain::{Device, DeviceKind, LastKnownPoint, RawReading, StatisticRecord, StreamMetadata};
