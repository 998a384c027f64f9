use chrono::{DateTime, TimeZone, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::{
    geo,
    id::{HasId, Id},
};

use crate::{
    identity::Role,
    provider::Provider,
    unit::{EmergencyUnit, UnitType},
    ExampleData,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ServiceType {
    FirstAid,
    GroundAmbulance,
    AirAmbulance,
}

impl ServiceType {
    /// Unit types suited to the service, best first.
    pub fn suitable_unit_types(self) -> &'static [UnitType] {
        match self {
            ServiceType::FirstAid => &[UnitType::MotorbikeMedic, UnitType::Ground],
            ServiceType::GroundAmbulance => &[UnitType::Ground],
            ServiceType::AirAmbulance => &[UnitType::Air],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum IncidentStatus {
    Pending,
    Dispatched,
    Resolved,
    Cancelled,
}

impl IncidentStatus {
    /// Statuses only move forward: Pending -> Dispatched -> Resolved, or
    /// Pending/Dispatched -> Cancelled.
    pub fn can_transition_to(self, next: IncidentStatus) -> bool {
        use IncidentStatus::*;
        matches!(
            (self, next),
            (Pending, Dispatched)
                | (Pending, Cancelled)
                | (Dispatched, Resolved)
                | (Dispatched, Cancelled)
        )
    }
}

/// A point fix taken when the request was made.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        geo::is_valid_coordinate(self.latitude, self.longitude)
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyRequest {
    pub service_type: ServiceType,
    pub patient_name: String,
    pub location: Location,
    pub situation_description: Option<String>,
    pub blood_group: Option<String>,
    pub allergies: Option<String>,
    pub status: IncidentStatus,
    pub requester_id: Option<String>,
    pub requester_role: Role,
    pub assigned_unit_id: Option<Id<EmergencyUnit>>,
    pub assigned_provider_id: Option<Id<Provider>>,
    pub created_at: DateTime<Utc>,
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl HasId for EmergencyRequest {
    type IdType = String;
}

impl ExampleData for EmergencyRequest {
    fn example_data() -> Self {
        Self {
            service_type: ServiceType::GroundAmbulance,
            patient_name: "Wanjiru Kamau".to_owned(),
            location: Location::new(-1.283, 36.823),
            situation_description: Some("Fell from a ladder, conscious.".to_owned()),
            blood_group: Some("O+".to_owned()),
            allergies: Some("Penicillin".to_owned()),
            status: IncidentStatus::Pending,
            requester_id: Some("patient-17".to_owned()),
            requester_role: Role::Patient,
            assigned_unit_id: None,
            assigned_provider_id: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 4, 9, 30, 0).unwrap(),
            status_changed_at: None,
        }
    }
}

/// Everything the person reporting the emergency fills in. The location is
/// acquired separately.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntakeForm {
    pub service_type: ServiceType,
    pub patient_name: String,
    pub situation_description: Option<String>,
    pub blood_group: Option<String>,
    pub allergies: Option<String>,
    /// Repeating a submission with the same key yields the same incident.
    pub submission_key: Option<String>,
}

impl IntakeForm {
    pub fn new<S: Into<String>>(service_type: ServiceType, patient_name: S) -> Self {
        Self {
            service_type,
            patient_name: patient_name.into(),
            situation_description: None,
            blood_group: None,
            allergies: None,
            submission_key: None,
        }
    }
}

impl ExampleData for IntakeForm {
    fn example_data() -> Self {
        Self {
            service_type: ServiceType::AirAmbulance,
            patient_name: "Otieno Ouma".to_owned(),
            situation_description: Some("Hiker with a leg fracture on a ridge.".to_owned()),
            blood_group: None,
            allergies: None,
            submission_key: Some("b9d1f2c0-form-1".to_owned()),
        }
    }
}
