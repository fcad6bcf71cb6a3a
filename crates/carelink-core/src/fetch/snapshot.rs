//! Fetch results.

use crate::fetch::role::{device_family, Role};
use serde::Serialize;
use serde_json::Value;

/// Which request produced a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotSource {
    MonitorData,
    /// Legacy timestamped endpoint used when monitor data is empty.
    ConnectData,
    BlePeriodic { endpoint: String },
    /// Versioned periodic-data endpoint that answered a care partner.
    CarePartner { endpoint: String },
}

/// Latest device telemetry as returned by CareLink.
///
/// The payload is kept as-is; only the fields needed for summaries are
/// read here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub data: Value,
    pub source: SnapshotSource,
    pub role: Role,
}

impl TelemetrySnapshot {
    pub fn new(data: Value, source: SnapshotSource, role: Role) -> Self {
        Self { data, source, role }
    }

    /// Periodic endpoints nest the device payload under `patientData`.
    fn payload(&self) -> &Value {
        self.data.get("patientData").unwrap_or(&self.data)
    }

    /// Most recent sensor glucose record.
    pub fn last_sg(&self) -> Option<&Value> {
        self.payload().get("lastSG").filter(|sg| !sg.is_null())
    }

    /// Sensor glucose value of the most recent record.
    pub fn last_sg_value(&self) -> Option<f64> {
        self.last_sg()?.get("sg")?.as_f64()
    }

    pub fn device_family(&self) -> Option<&str> {
        device_family(self.payload())
    }

    /// Number of sensor glucose records in the payload.
    pub fn sg_count(&self) -> usize {
        self.payload()
            .get("sgs")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
