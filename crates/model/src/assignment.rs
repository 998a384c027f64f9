use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{incident::EmergencyRequest, provider::Provider, unit::EmergencyUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AssignmentOutcome {
    Resolved,
    Cancelled,
}

/// Links an incident to the unit sent to it. Keyed by the incident id, so an
/// incident can only ever hold one assignment.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub incident_id: Id<EmergencyRequest>,
    pub unit_id: Id<EmergencyUnit>,
    pub provider_id: Id<Provider>,
    pub dispatched_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub outcome: Option<AssignmentOutcome>,
}

impl HasId for Assignment {
    type IdType = String;
}
