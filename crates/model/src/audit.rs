use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::HasId;

use crate::dispatch::DispatchEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AuditAction {
    IncidentSubmitted,
    UnitAdded,
    UnitUpdated,
    UnitDeleted,
    Dispatched,
    Arrived,
    TransportStarted,
    Delivered,
    Completed,
    Cancelled,
}

impl From<DispatchEvent> for AuditAction {
    fn from(event: DispatchEvent) -> Self {
        match event {
            DispatchEvent::Dispatch => AuditAction::Dispatched,
            DispatchEvent::Arrive => AuditAction::Arrived,
            DispatchEvent::Transport => AuditAction::TransportStarted,
            DispatchEvent::Deliver => AuditAction::Delivered,
            DispatchEvent::Complete => AuditAction::Completed,
            DispatchEvent::Cancel => AuditAction::Cancelled,
        }
    }
}

/// One line of the write-only audit trail.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub action: AuditAction,
    pub actor: Option<String>,
    /// Path of the document the action was applied to.
    pub subject: String,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl HasId for AuditEntry {
    type IdType = String;
}
