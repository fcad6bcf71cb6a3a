//! Telemetry fetching.
//!
//! - `role` - account roles and BLE device detection
//! - `strategy` - the per-attempt request graph
//! - `orchestrator` - the retrying fetch cycle around it

mod orchestrator;
mod role;
mod snapshot;
mod strategy;

pub use orchestrator::{CareLinkClient, CareLinkClientBuilder};
pub use role::{device_family, is_ble_device, Role, BLE_MARKER, SIMPLERA_MARKER};
pub use snapshot::{SnapshotSource, TelemetrySnapshot};
pub use strategy::{version_candidates, FetchStrategy, PERIODIC_ENDPOINT_FIELD};
