use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::incident::{EmergencyRequest, Location, ServiceType};

pub const FALLBACK_SUMMARY: &str = "Could not load AI summary";
pub const FALLBACK_HOSPITAL: &str = "N/A";

/// Advisory output of the reasoning service. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriageSuggestion {
    pub summary: String,
    pub nearest_hospital: String,
    pub law_enforcement_needed: bool,
}

impl TriageSuggestion {
    /// Placeholder shown when the reasoning service could not be reached.
    pub fn fallback() -> Self {
        Self {
            summary: FALLBACK_SUMMARY.to_owned(),
            nearest_hospital: FALLBACK_HOSPITAL.to_owned(),
            law_enforcement_needed: false,
        }
    }
}

/// The public fields of an incident sent to the reasoning service. Requester
/// identity and assignment details stay behind.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriageRequest {
    pub service_type: ServiceType,
    pub patient_name: String,
    pub location: Location,
    pub situation_description: Option<String>,
    pub blood_group: Option<String>,
    pub allergies: Option<String>,
}

impl From<&EmergencyRequest> for TriageRequest {
    fn from(incident: &EmergencyRequest) -> Self {
        Self {
            service_type: incident.service_type,
            patient_name: incident.patient_name.clone(),
            location: incident.location,
            situation_description: incident.situation_description.clone(),
            blood_group: incident.blood_group.clone(),
            allergies: incident.allergies.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExampleData;

    #[test]
    fn fallback_matches_placeholder_text() {
        let fallback = TriageSuggestion::fallback();
        assert_eq!(fallback.summary, "Could not load AI summary");
        assert_eq!(fallback.nearest_hospital, "N/A");
        assert!(!fallback.law_enforcement_needed);
    }

    #[test]
    fn request_omits_requester_identity() {
        let request = TriageRequest::from(&EmergencyRequest::example_data());
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("requesterId").is_none());
        assert!(json.get("status").is_none());
        assert_eq!(json["bloodGroup"], "O+");
    }

    #[test]
    fn parses_service_response() {
        let suggestion: TriageSuggestion = serde_json::from_str(
            r#"{"summary":"Fall injury","nearestHospital":"Kenyatta National Hospital","lawEnforcementNeeded":true}"#,
        )
        .unwrap();
        assert!(suggestion.law_enforcement_needed);
        assert_eq!(suggestion.nearest_hospital, "Kenyatta National Hospital");
    }
}
