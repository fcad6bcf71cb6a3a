//! CareLink endpoint resolution.
//!
//! Maps a server selection, country and language onto the fixed set of URLs
//! the fetch strategy talks to. Resolution is pure: the same inputs always
//! produce the same URL set.

use crate::config::ServerSelection;
use crate::error::{CareLinkError, Result};
use url::Url;

pub const EU_SERVER: &str = "carelink.minimed.eu";
pub const US_SERVER: &str = "carelink.minimed.com";

/// The named URLs used during one fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub base: String,
    /// Account profile ("me").
    pub me: String,
    pub linked_patients: String,
    pub monitor_data: String,
    pub country_settings: String,
    connect_data_base: String,
}

impl Endpoints {
    /// Resolve the URL set for a server, country and language.
    pub fn resolve(server: &ServerSelection, country_code: &str, language_code: &str) -> Result<Self> {
        let base = server_base(server)?;
        let country = country_code.trim();
        let language = language_code.trim();
        if country.is_empty() || language.is_empty() {
            return Err(CareLinkError::Config {
                message: "country and language codes must not be empty".to_string(),
            });
        }

        let country_settings = Url::parse_with_params(
            &format!("{}/patient/countries/settings", base),
            &[("countryCode", country), ("language", language)],
        )
        .map_err(|e| CareLinkError::Config {
            message: format!("Invalid server address {}: {}", base, e),
        })?;

        Ok(Self {
            me: format!("{}/patient/users/me", base),
            linked_patients: format!("{}/patient/m2m/links/patients", base),
            monitor_data: format!("{}/patient/monitor/data", base),
            country_settings: country_settings.into(),
            connect_data_base: format!("{}/patient/connect/data", base),
            base,
        })
    }

    /// Legacy connect-data URL qualified by a request time in epoch milliseconds.
    pub fn connect_data(&self, request_time_ms: i64) -> String {
        format!(
            "{}?cpSerialNumber=NONE&msgType=last24hours&requestTime={}",
            self.connect_data_base, request_time_ms
        )
    }

    /// Monitor-data URL scoped to a linked patient.
    pub fn patient_monitor_data(&self, patient_id: &str) -> String {
        match Url::parse_with_params(&self.monitor_data, &[("patientId", patient_id)]) {
            Ok(url) => url.into(),
            Err(_) => self.monitor_data.clone(),
        }
    }
}

/// Base URL (scheme + host, no trailing slash) for a server selection.
fn server_base(server: &ServerSelection) -> Result<String> {
    let host = match server {
        ServerSelection::Explicit(address) => {
            let address = address.trim().trim_end_matches('/');
            if address.is_empty() {
                return Err(CareLinkError::Config {
                    message: "explicit server address is empty".to_string(),
                });
            }
            if address.starts_with("http://") || address.starts_with("https://") {
                return Ok(address.to_string());
            }
            address.to_string()
        }
        ServerSelection::Named(name) => match name.trim().to_uppercase().as_str() {
            "EU" => EU_SERVER.to_string(),
            "US" => US_SERVER.to_string(),
            other => {
                return Err(CareLinkError::Config {
                    message: format!("Unknown server region '{}', expected EU or US", other),
                })
            }
        },
        ServerSelection::Default => EU_SERVER.to_string(),
    };
    Ok(format!("https://{}", host))
}
