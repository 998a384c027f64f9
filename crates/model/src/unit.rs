use chrono::{DateTime, TimeZone, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{incident::EmergencyRequest, provider::Provider, ExampleData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum UnitType {
    Ground,
    Air,
    MotorbikeMedic,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum UnitStatus {
    Available,
    EnRoute,
    AtScene,
    Transporting,
    AtHospital,
    Unavailable,
}

impl UnitStatus {
    pub const ALL: [UnitStatus; 6] = [
        UnitStatus::Available,
        UnitStatus::EnRoute,
        UnitStatus::AtScene,
        UnitStatus::Transporting,
        UnitStatus::AtHospital,
        UnitStatus::Unavailable,
    ];

    /// Statuses owned by the dispatch coordinator while a unit works an incident.
    pub fn is_on_mission(self) -> bool {
        matches!(
            self,
            UnitStatus::EnRoute
                | UnitStatus::AtScene
                | UnitStatus::Transporting
                | UnitStatus::AtHospital
        )
    }

    /// Statuses a provider may set by hand through the fleet registry.
    pub fn is_off_mission(self) -> bool {
        !self.is_on_mission()
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyUnit {
    pub provider_id: Id<Provider>,
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    pub license_plate: String,
    pub capacity: u32,
    /// minutes
    pub response_time: u32,
    pub has_life_support: bool,
    pub status: UnitStatus,
    pub stationed_location: String,
    pub current_incident_id: Option<Id<EmergencyRequest>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HasId for EmergencyUnit {
    type IdType = String;
}

impl ExampleData for EmergencyUnit {
    fn example_data() -> Self {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        Self {
            provider_id: Id::new("P1".to_owned()),
            unit_type: UnitType::Ground,
            license_plate: "KAA 123A".to_owned(),
            capacity: 2,
            response_time: 10,
            has_life_support: false,
            status: UnitStatus::Available,
            stationed_location: "HQ".to_owned(),
            current_incident_id: None,
            created_at,
            updated_at: created_at,
        }
    }
}

/// Fields a provider fills in when registering a unit. Numbers are signed so
/// nonsensical input reaches validation instead of failing to parse.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewUnit {
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    pub license_plate: String,
    pub capacity: i64,
    pub response_time: i64,
    #[serde(default)]
    pub has_life_support: bool,
    #[serde(default = "default_status")]
    pub status: UnitStatus,
    pub stationed_location: String,
}

fn default_status() -> UnitStatus {
    UnitStatus::Available
}

impl ExampleData for NewUnit {
    fn example_data() -> Self {
        Self {
            unit_type: UnitType::Air,
            license_plate: "5Y-AMR".to_owned(),
            capacity: 1,
            response_time: 25,
            has_life_support: true,
            status: UnitStatus::Available,
            stationed_location: "Wilson Airport".to_owned(),
        }
    }
}

/// A partial update. Absent fields are left untouched.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnitPatch {
    #[serde(rename = "type")]
    pub unit_type: Option<UnitType>,
    pub license_plate: Option<String>,
    pub capacity: Option<i64>,
    pub response_time: Option<i64>,
    pub has_life_support: Option<bool>,
    pub status: Option<UnitStatus>,
    pub stationed_location: Option<String>,
}

impl UnitPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
