//! Account roles and device-family detection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Substring marking a BLE-relayed device family.
pub const BLE_MARKER: &str = "BLE";
/// Sensor family that uploads through the BLE periodic endpoint as well.
pub const SIMPLERA_MARKER: &str = "SIMPLERA";

/// Account role reported by the profile endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Patient,
    CarePartner,
    CarePartnerOus,
}

impl Role {
    /// Parse the profile's role string. Anything unrecognized is a patient.
    pub fn from_profile(role: Option<&str>) -> Self {
        let Some(role) = role else {
            return Role::Patient;
        };
        if role.eq_ignore_ascii_case("CARE_PARTNER") {
            Role::CarePartner
        } else if role.eq_ignore_ascii_case("CARE_PARTNER_OUS") {
            Role::CarePartnerOus
        } else {
            Role::Patient
        }
    }

    pub fn is_care_partner(&self) -> bool {
        matches!(self, Role::CarePartner | Role::CarePartnerOus)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "PATIENT",
            Role::CarePartner => "CARE_PARTNER",
            Role::CarePartnerOus => "CARE_PARTNER_OUS",
        }
    }

    /// Role value sent in periodic-data request bodies.
    pub fn request_role(&self) -> &'static str {
        if self.is_care_partner() {
            "carepartner"
        } else {
            "patient"
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device family of a monitor-data style body, if reported.
pub fn device_family(body: &Value) -> Option<&str> {
    body.get("deviceFamily")
        .or_else(|| body.get("medicalDeviceFamily"))
        .and_then(Value::as_str)
}

/// Whether a device family needs the BLE periodic-data endpoint.
/// Matching is a case-sensitive substring test.
pub fn is_ble_device(family: Option<&str>) -> bool {
    match family {
        Some(family) if !family.is_empty() => {
            family.contains(BLE_MARKER) || family.contains(SIMPLERA_MARKER)
        }
        _ => false,
    }
}
