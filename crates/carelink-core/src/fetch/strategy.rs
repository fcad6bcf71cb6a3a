//! Role-aware request graph for one fetch attempt.
//!
//! The graph is an explicit state machine:
//!
//! ```text
//! Profile ──> Patient ──────────────> done (monitor / connect data)
//!    │           └─ BLE family ─┐
//!    └──> CarePartner ──────────┼──> done (versioned periodic data)
//!                └─ BLE family ─┴──> Ble ──> done (periodic data)
//! ```
//!
//! Every transition is taken at most once per attempt. Nothing in here
//! retries; failures go back to the orchestrator.

use crate::endpoints::Endpoints;
use crate::error::{CareLinkError, Result};
use crate::fetch::role::{device_family, is_ble_device, Role};
use crate::fetch::snapshot::{SnapshotSource, TelemetrySnapshot};
use crate::network::{ApiResponse, Dispatcher};
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Country-settings field holding the periodic-data endpoint template.
/// The misspelling is CareLink's.
pub const PERIODIC_ENDPOINT_FIELD: &str = "blePereodicDataEndpoint";

static VERSION_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/v\d+/").expect("version segment regex must compile"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Flow {
    Profile,
    Patient,
    CarePartner { role: Role },
    Ble { role: Role, patient_id: Option<String> },
}

enum Step {
    Next(Flow),
    Done(TelemetrySnapshot),
}

/// Executes the request graph for the account behind the bearer token.
#[derive(Debug, Clone, Copy)]
pub struct FetchStrategy<'a> {
    endpoints: &'a Endpoints,
    patient_id: Option<&'a str>,
    username: Option<&'a str>,
}

impl<'a> FetchStrategy<'a> {
    pub fn new(endpoints: &'a Endpoints) -> Self {
        Self {
            endpoints,
            patient_id: None,
            username: None,
        }
    }

    /// Patient to read when a care partner is linked to several.
    pub fn with_patient_id(mut self, patient_id: Option<&'a str>) -> Self {
        self.patient_id = patient_id;
        self
    }

    /// Username for periodic-data bodies when the profile has none.
    pub fn with_username(mut self, username: Option<&'a str>) -> Self {
        self.username = username;
        self
    }

    /// Run the graph to completion. `dispatcher` must carry the bearer token.
    pub async fn execute(&self, dispatcher: Dispatcher<'_>) -> Result<TelemetrySnapshot> {
        let mut username = self.username.map(str::to_string);
        let mut flow = Flow::Profile;

        loop {
            let step = match flow {
                Flow::Profile => {
                    let profile = dispatcher.get(self.endpoints.me.as_str()).await?;
                    if let Some(name) = profile.body.get("username").and_then(Value::as_str) {
                        username = Some(name.to_string());
                    }
                    let role = Role::from_profile(profile.body.get("role").and_then(Value::as_str));
                    info!("Account role: {}", role);
                    if role.is_care_partner() {
                        Step::Next(Flow::CarePartner { role })
                    } else {
                        Step::Next(Flow::Patient)
                    }
                }
                Flow::Patient => self.patient(dispatcher).await?,
                Flow::CarePartner { role } => {
                    self.care_partner(dispatcher, role, username.as_deref()).await?
                }
                Flow::Ble { role, patient_id } => {
                    self.ble(dispatcher, role, patient_id, username.as_deref())
                        .await?
                }
            };

            match step {
                Step::Done(snapshot) => return Ok(snapshot),
                Step::Next(next) => {
                    debug!("Fetch flow -> {:?}", next);
                    flow = next;
                }
            }
        }
    }

    async fn patient(&self, dispatcher: Dispatcher<'_>) -> Result<Step> {
        match dispatcher.get(self.endpoints.monitor_data.as_str()).await {
            Ok(monitor) => {
                if is_ble_device(device_family(&monitor.body)) {
                    info!("BLE device detected, switching to periodic data endpoint");
                    return Ok(Step::Next(Flow::Ble {
                        role: Role::Patient,
                        patient_id: None,
                    }));
                }
                if monitor.field_count() > 1 {
                    return Ok(Step::Done(TelemetrySnapshot::new(
                        monitor.body,
                        SnapshotSource::MonitorData,
                        Role::Patient,
                    )));
                }
                debug!("Monitor data is empty, falling back to connect data");
            }
            Err(e @ CareLinkError::RequestCeilingExceeded { .. }) => return Err(e),
            Err(e) => warn!("Monitor data request failed ({}), falling back to connect data", e),
        }

        let connect = dispatcher
            .get(self.endpoints.connect_data(Utc::now().timestamp_millis()))
            .await?;
        Ok(Step::Done(TelemetrySnapshot::new(
            connect.body,
            SnapshotSource::ConnectData,
            Role::Patient,
        )))
    }

    async fn care_partner(
        &self,
        dispatcher: Dispatcher<'_>,
        role: Role,
        username: Option<&str>,
    ) -> Result<Step> {
        let patient_id = match self.patient_id {
            Some(id) => id.to_string(),
            None => {
                let linked = dispatcher.get(self.endpoints.linked_patients.as_str()).await?;
                first_linked_patient(&linked.body).ok_or(CareLinkError::NoLinkedPatient)?
            }
        };
        debug!("Reading data for linked patient {}", patient_id);

        match dispatcher
            .get(self.endpoints.patient_monitor_data(&patient_id))
            .await
        {
            Ok(monitor) if is_ble_device(device_family(&monitor.body)) => {
                info!("Linked patient uses a BLE device, switching to periodic data endpoint");
                return Ok(Step::Next(Flow::Ble {
                    role,
                    patient_id: Some(patient_id),
                }));
            }
            Ok(_) => {}
            Err(e @ CareLinkError::RequestCeilingExceeded { .. }) => return Err(e),
            Err(e) => debug!("Patient monitor check failed: {}", e),
        }

        let settings = dispatcher
            .get(self.endpoints.country_settings.as_str())
            .await?;
        let template = periodic_endpoint(&settings).ok_or(CareLinkError::MissingDataEndpoint)?;

        let body = json!({
            "username": username,
            "role": "carepartner",
            "patientId": patient_id,
        });

        let candidates = version_candidates(&template);
        let mut tried = Vec::with_capacity(candidates.len());
        for endpoint in candidates {
            info!("Trying periodic data endpoint {}", endpoint);
            tried.push(endpoint.clone());
            match dispatcher.post_json(endpoint.as_str(), body.clone()).await {
                Ok(response) if response.is_ok() => {
                    return Ok(Step::Done(TelemetrySnapshot::new(
                        response.body,
                        SnapshotSource::CarePartner { endpoint },
                        role,
                    )));
                }
                Ok(response) => {
                    warn!("Endpoint {} answered with status {}", endpoint, response.status)
                }
                Err(e @ CareLinkError::RequestCeilingExceeded { .. }) => return Err(e),
                Err(e) => warn!("Endpoint {} failed: {}", endpoint, e),
            }
        }

        Err(CareLinkError::AllEndpointsFailed { tried })
    }

    async fn ble(
        &self,
        dispatcher: Dispatcher<'_>,
        role: Role,
        patient_id: Option<String>,
        username: Option<&str>,
    ) -> Result<Step> {
        let settings = dispatcher
            .get(self.endpoints.country_settings.as_str())
            .await?;
        let endpoint = periodic_endpoint(&settings).ok_or(CareLinkError::NoBleEndpoint)?;

        let patient_id = match patient_id {
            Some(id) => Some(id),
            None => {
                let profile = dispatcher.get(self.endpoints.me.as_str()).await?;
                profile_patient_id(&profile.body)
            }
        };

        let mut body = json!({
            "username": username,
            "role": role.request_role(),
        });
        if let Some(id) = patient_id {
            body["patientId"] = Value::String(id);
        }

        let response = dispatcher.post_json(endpoint.as_str(), body).await?;
        if !response.is_ok() || response.is_empty_body() {
            return Err(CareLinkError::EmptyBleResponse);
        }
        Ok(Step::Done(TelemetrySnapshot::new(
            response.body,
            SnapshotSource::BlePeriodic { endpoint },
            role,
        )))
    }
}

/// Endpoint variants to try, in order: the template as given, the version
/// segment replaced by `v5`, then by `v11`, then a literal `v6` upgraded to
/// `v11`. Duplicates are dropped, keeping the first occurrence.
pub fn version_candidates(template: &str) -> Vec<String> {
    let variants = [
        template.to_string(),
        VERSION_SEGMENT.replace(template, "/v5/").into_owned(),
        VERSION_SEGMENT.replace(template, "/v11/").into_owned(),
        template.replace("/v6/", "/v11/"),
    ];

    let mut candidates: Vec<String> = Vec::with_capacity(variants.len());
    for variant in variants {
        if !candidates.contains(&variant) {
            candidates.push(variant);
        }
    }
    candidates
}

fn periodic_endpoint(settings: &ApiResponse) -> Option<String> {
    settings
        .body
        .get(PERIODIC_ENDPOINT_FIELD)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|endpoint| !endpoint.is_empty())
        .map(str::to_string)
}

/// Id of the first linked patient. Accepts a bare array or `{"patients": [..]}`.
fn first_linked_patient(body: &Value) -> Option<String> {
    let patients = body
        .as_array()
        .or_else(|| body.get("patients").and_then(Value::as_array))?;
    let first = patients.first()?;
    first
        .get("username")
        .or_else(|| first.get("patientId"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn profile_patient_id(profile: &Value) -> Option<String> {
    profile
        .get("patientId")
        .or_else(|| profile.get("id"))
        .and_then(|id| match id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
