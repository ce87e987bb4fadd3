pub mod device;
pub mod reading;
pub mod statistics;

pub use device::{Device, DeviceKind};
pub use reading::RawReading;
pub use statistics::{LastKnownPoint, StatisticRecord, StreamMetadata};
