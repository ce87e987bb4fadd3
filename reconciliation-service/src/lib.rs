pub mod aggregate;
pub mod config;
pub mod continuity;
pub mod cycle;
pub mod emit;
pub mod metrics_server;
pub mod observability;
pub mod state;
pub mod store;

pub use cycle::{DeviceReport, ReconciliationCycle};
