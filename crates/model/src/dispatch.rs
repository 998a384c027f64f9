//! The incident/unit state machine driven by the dispatch coordinator.
//!
//! ```text
//! incident: Pending --dispatch--> Dispatched --complete--> Resolved
//!           Pending|Dispatched --cancel--> Cancelled
//! unit:     Available --dispatch--> EnRoute --arrive--> AtScene
//!           AtScene --transport--> Transporting --deliver--> AtHospital
//!           AtScene|AtHospital --complete--> Available
//!           EnRoute|AtScene --cancel--> Available
//! ```

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{incident::IncidentStatus, unit::UnitStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum DispatchEvent {
    Dispatch,
    Arrive,
    Transport,
    Deliver,
    Complete,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub incident: IncidentStatus,
    /// `None` when the event does not involve a unit (cancelling a pending
    /// incident).
    pub unit: Option<UnitStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    Incident {
        event: DispatchEvent,
        current: IncidentStatus,
    },
    Unit {
        event: DispatchEvent,
        current: UnitStatus,
    },
    UnitMissing {
        event: DispatchEvent,
    },
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::Incident { event, current } => {
                write!(f, "can not {} an incident that is {:?}", event, current)
            }
            TransitionError::Unit { event, current } => {
                write!(f, "can not {} with a unit that is {:?}", event, current)
            }
            TransitionError::UnitMissing { event } => {
                write!(f, "can not {} without an assigned unit", event)
            }
        }
    }
}

impl std::error::Error for TransitionError {}

impl fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DispatchEvent {
    pub const ALL: [DispatchEvent; 6] = [
        DispatchEvent::Dispatch,
        DispatchEvent::Arrive,
        DispatchEvent::Transport,
        DispatchEvent::Deliver,
        DispatchEvent::Complete,
        DispatchEvent::Cancel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchEvent::Dispatch => "dispatch",
            DispatchEvent::Arrive => "arrive",
            DispatchEvent::Transport => "transport",
            DispatchEvent::Deliver => "deliver",
            DispatchEvent::Complete => "complete",
            DispatchEvent::Cancel => "cancel",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == name)
    }

    /// Incident statuses the event may be applied to.
    pub fn incident_sources(self) -> &'static [IncidentStatus] {
        use IncidentStatus::*;
        match self {
            DispatchEvent::Dispatch => &[Pending],
            DispatchEvent::Arrive
            | DispatchEvent::Transport
            | DispatchEvent::Deliver
            | DispatchEvent::Complete => &[Dispatched],
            DispatchEvent::Cancel => &[Pending, Dispatched],
        }
    }

    /// Unit statuses the event may be applied to.
    pub fn unit_sources(self) -> &'static [UnitStatus] {
        use UnitStatus::*;
        match self {
            DispatchEvent::Dispatch => &[Available],
            DispatchEvent::Arrive => &[EnRoute],
            DispatchEvent::Transport => &[AtScene],
            DispatchEvent::Deliver => &[Transporting],
            DispatchEvent::Complete => &[AtScene, AtHospital],
            DispatchEvent::Cancel => &[EnRoute, AtScene],
        }
    }

    pub fn incident_target(self, current: IncidentStatus) -> IncidentStatus {
        match self {
            DispatchEvent::Dispatch => IncidentStatus::Dispatched,
            DispatchEvent::Complete => IncidentStatus::Resolved,
            DispatchEvent::Cancel => IncidentStatus::Cancelled,
            _ => current,
        }
    }

    pub fn unit_target(self) -> UnitStatus {
        match self {
            DispatchEvent::Dispatch => UnitStatus::EnRoute,
            DispatchEvent::Arrive => UnitStatus::AtScene,
            DispatchEvent::Transport => UnitStatus::Transporting,
            DispatchEvent::Deliver => UnitStatus::AtHospital,
            DispatchEvent::Complete | DispatchEvent::Cancel => UnitStatus::Available,
        }
    }

    /// Whether the event moves a unit when applied to an incident in `current`.
    pub fn involves_unit(self, current: IncidentStatus) -> bool {
        !(self == DispatchEvent::Cancel && current == IncidentStatus::Pending)
    }

    /// Checks the event against the current statuses and returns the statuses
    /// both records end up in.
    pub fn apply(
        self,
        incident: IncidentStatus,
        unit: Option<UnitStatus>,
    ) -> Result<Transition, TransitionError> {
        if !self.incident_sources().contains(&incident) {
            return Err(TransitionError::Incident {
                event: self,
                current: incident,
            });
        }
        let unit = if self.involves_unit(incident) {
            let current = unit.ok_or(TransitionError::UnitMissing { event: self })?;
            if !self.unit_sources().contains(&current) {
                return Err(TransitionError::Unit {
                    event: self,
                    current,
                });
            }
            Some(self.unit_target())
        } else {
            None
        };
        Ok(Transition {
            incident: self.incident_target(incident),
            unit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mission_walks_through_every_status() {
        let mut incident = IncidentStatus::Pending;
        let mut unit = UnitStatus::Available;
        let mut seen = vec![];
        for event in [
            DispatchEvent::Dispatch,
            DispatchEvent::Arrive,
            DispatchEvent::Transport,
            DispatchEvent::Deliver,
            DispatchEvent::Complete,
        ] {
            let transition = event.apply(incident, Some(unit)).unwrap();
            incident = transition.incident;
            unit = transition.unit.unwrap();
            seen.push(unit);
        }
        assert_eq!(incident, IncidentStatus::Resolved);
        assert_eq!(
            seen,
            vec![
                UnitStatus::EnRoute,
                UnitStatus::AtScene,
                UnitStatus::Transporting,
                UnitStatus::AtHospital,
                UnitStatus::Available,
            ]
        );
    }

    #[test]
    fn dispatch_requires_available_unit() {
        let result =
            DispatchEvent::Dispatch.apply(IncidentStatus::Pending, Some(UnitStatus::Unavailable));
        assert_eq!(
            result,
            Err(TransitionError::Unit {
                event: DispatchEvent::Dispatch,
                current: UnitStatus::Unavailable
            })
        );
    }

    #[test]
    fn dispatch_requires_pending_incident() {
        let result =
            DispatchEvent::Dispatch.apply(IncidentStatus::Dispatched, Some(UnitStatus::Available));
        assert!(matches!(result, Err(TransitionError::Incident { .. })));
    }

    #[test]
    fn cancelling_pending_incident_leaves_units_alone() {
        let transition = DispatchEvent::Cancel
            .apply(IncidentStatus::Pending, None)
            .unwrap();
        assert_eq!(transition.incident, IncidentStatus::Cancelled);
        assert_eq!(transition.unit, None);
    }

    #[test]
    fn cancelling_dispatched_incident_frees_unit() {
        let transition = DispatchEvent::Cancel
            .apply(IncidentStatus::Dispatched, Some(UnitStatus::EnRoute))
            .unwrap();
        assert_eq!(transition.unit, Some(UnitStatus::Available));
        assert_eq!(
            DispatchEvent::Cancel.apply(IncidentStatus::Dispatched, None),
            Err(TransitionError::UnitMissing {
                event: DispatchEvent::Cancel
            })
        );
        assert!(DispatchEvent::Cancel
            .apply(IncidentStatus::Dispatched, Some(UnitStatus::Transporting))
            .is_err());
    }

    #[test]
    fn terminal_incidents_accept_no_event() {
        for event in DispatchEvent::ALL {
            for status in [IncidentStatus::Resolved, IncidentStatus::Cancelled] {
                assert!(event.apply(status, Some(UnitStatus::AtScene)).is_err());
            }
        }
    }

    #[test]
    fn every_incident_change_moves_forward() {
        for event in DispatchEvent::ALL {
            for &from in event.incident_sources() {
                let to = event.incident_target(from);
                assert!(to == from || from.can_transition_to(to), "{event} {from:?}");
            }
        }
    }

    #[test]
    fn event_names_round_trip() {
        for event in DispatchEvent::ALL {
            assert_eq!(DispatchEvent::from_name(event.as_str()), Some(event));
        }
        assert_eq!(DispatchEvent::from_name("teleport"), None);
    }
}
