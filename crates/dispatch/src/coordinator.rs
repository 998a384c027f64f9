use chrono::Utc;
use document_store::{to_document, DocumentStore, Filter, Precondition, Query, WriteBatch};
use itertools::Itertools;
use model::{
    assignment::{Assignment, AssignmentOutcome},
    dispatch::{DispatchEvent, Transition},
    incident::EmergencyRequest,
    unit::{EmergencyUnit, UnitStatus},
    WithId,
};
use serde_json::{json, Value};
use utility::id::Id;

use crate::{
    client::{self, assignment_path, decode_all, incident_path, unit_path, units_collection},
    not_found_to_none, ProviderClient, RequestError, RequestResult,
};

impl<S> ProviderClient<S>
where
    S: DocumentStore,
{
    /// Sends an available unit of this provider to a pending incident.
    pub async fn dispatch(
        &self,
        incident: &Id<EmergencyRequest>,
        unit: &Id<EmergencyUnit>,
    ) -> RequestResult<Transition> {
        self.apply(DispatchEvent::Dispatch, incident, Some(unit))
            .await
    }

    pub async fn arrive(&self, incident: &Id<EmergencyRequest>) -> RequestResult<Transition> {
        self.apply(DispatchEvent::Arrive, incident, None).await
    }

    pub async fn transport(&self, incident: &Id<EmergencyRequest>) -> RequestResult<Transition> {
        self.apply(DispatchEvent::Transport, incident, None).await
    }

    pub async fn deliver(&self, incident: &Id<EmergencyRequest>) -> RequestResult<Transition> {
        self.apply(DispatchEvent::Deliver, incident, None).await
    }

    /// Resolves the incident and frees the unit.
    pub async fn complete(&self, incident: &Id<EmergencyRequest>) -> RequestResult<Transition> {
        self.apply(DispatchEvent::Complete, incident, None).await
    }

    /// Cancels the incident. A unit already sent becomes available again.
    ///
    /// Pending incidents are not owned by any provider yet, so every
    /// provider's dispatcher may cancel them. Once dispatched, only the
    /// provider of the assigned unit may.
    pub async fn cancel(&self, incident: &Id<EmergencyRequest>) -> RequestResult<Transition> {
        self.apply(DispatchEvent::Cancel, incident, None).await
    }

    /// Applies `event` to the incident and its unit in one conditional batch.
    ///
    /// `unit` names the unit to send and is only read for `Dispatch`, every
    /// later event works with the unit assigned to the incident. The batch
    /// only applies if both records are still in the statuses read here, so
    /// of two racing operators exactly one succeeds and the other gets a
    /// precondition error.
    ///
    /// Events after `Dispatch` are reserved to the provider the incident was
    /// assigned to. An unassigned incident is open to every provider.
    pub async fn apply(
        &self,
        event: DispatchEvent,
        incident_id: &Id<EmergencyRequest>,
        unit: Option<&Id<EmergencyUnit>>,
    ) -> RequestResult<Transition> {
        let incident_path = incident_path(incident_id);
        let incident = self
            .client
            .read::<EmergencyRequest>(&incident_path)
            .await?
            .content;

        let unit_id = match event {
            DispatchEvent::Dispatch => unit.cloned(),
            _ => {
                let owned_by_other = incident
                    .assigned_provider_id
                    .as_ref()
                    .is_some_and(|owner| *owner != self.provider);
                if owned_by_other {
                    log::warn!(
                        "provider {} tried to {} incident {} of provider {:?}",
                        self.provider,
                        event,
                        incident_id,
                        incident.assigned_provider_id
                    );
                    return Err(RequestError::Forbidden);
                }
                incident.assigned_unit_id.clone()
            }
        };

        let unit = match (&unit_id, event.involves_unit(incident.status)) {
            (Some(unit_id), true) => {
                let read = not_found_to_none(
                    self.client
                        .read::<EmergencyUnit>(&unit_path(&self.provider, unit_id))
                        .await,
                )?;
                match (read, event) {
                    (None, DispatchEvent::Dispatch) => return Err(RequestError::NotFound),
                    (read, _) => read.map(|unit| unit.content),
                }
            }
            _ => None,
        };

        let transition = match event.apply(incident.status, unit.as_ref().map(|unit| unit.status)) {
            Ok(transition) => transition,
            Err(why) => {
                log::warn!("{} of incident {} refused: {}", event, incident_id, why);
                return Err(why.into());
            }
        };

        let now = client::json(&Utc::now())?;
        let mut incident_patch = json!({
            "status": client::json(&transition.incident)?,
            "statusChangedAt": now.clone(),
        });
        let mut batch = WriteBatch::new().require(Precondition::field_equals(
            incident_path.clone(),
            "status",
            client::json(&incident.status)?,
        ));

        if let (Some(target), Some(unit_id), Some(current)) =
            (transition.unit, unit_id.as_ref(), unit.as_ref())
        {
            let unit_path = unit_path(&self.provider, unit_id);
            let assignment_path = assignment_path(incident_id);
            batch = batch.require(Precondition::field_equals(
                unit_path.clone(),
                "status",
                client::json(&current.status)?,
            ));

            let mut unit_patch = json!({
                "status": client::json(&target)?,
                "updatedAt": now.clone(),
            });
            match event {
                DispatchEvent::Dispatch => {
                    batch = batch
                        .require(Precondition::NotExists(assignment_path.clone()))
                        .create(
                            assignment_path,
                            to_document(&Assignment {
                                incident_id: incident_id.clone(),
                                unit_id: unit_id.clone(),
                                provider_id: self.provider.clone(),
                                dispatched_at: Utc::now(),
                                closed_at: None,
                                outcome: None,
                            })?,
                        );
                    incident_patch["assignedUnitId"] = client::json(unit_id)?;
                    incident_patch["assignedProviderId"] = client::json(&self.provider)?;
                    unit_patch["currentIncidentId"] = client::json(incident_id)?;
                }
                _ => {
                    batch = batch.require(Precondition::field_equals(
                        unit_path.clone(),
                        "currentIncidentId",
                        client::json(incident_id)?,
                    ));
                    if target == UnitStatus::Available {
                        unit_patch["currentIncidentId"] = Value::Null;
                        let outcome = match event {
                            DispatchEvent::Complete => AssignmentOutcome::Resolved,
                            _ => AssignmentOutcome::Cancelled,
                        };
                        batch = batch.update(
                            assignment_path,
                            client::document(json!({
                                "closedAt": now.clone(),
                                "outcome": client::json(&outcome)?,
                            }))?,
                        );
                    }
                }
            }
            batch = batch.update(unit_path, client::document(unit_patch)?);
        }
        batch = batch.update(incident_path.clone(), client::document(incident_patch)?);

        if let Err(why) = self.store().commit(batch).await {
            log::warn!(
                "{} of incident {} lost against a concurrent change: {}",
                event,
                incident_id,
                why
            );
            return Err(why.into());
        }

        log::info!(
            "provider {}: {} incident {} ({:?} -> {:?}), unit {:?} -> {:?}",
            self.provider,
            event,
            incident_id,
            incident.status,
            transition.incident,
            unit_id,
            transition.unit
        );
        self.client
            .audit(
                event.into(),
                Some(&self.user),
                &incident_path,
                unit_id.map(|unit| format!("unit {}", unit)),
            )
            .await;
        Ok(transition)
    }

    /// Available units of this provider to send to the incident. Units whose
    /// type suits the requested service come first, then the quickest.
    pub async fn candidate_units(
        &self,
        incident: &Id<EmergencyRequest>,
    ) -> RequestResult<Vec<WithId<EmergencyUnit>>> {
        let incident = self
            .client
            .read::<EmergencyRequest>(&incident_path(incident))
            .await?
            .content;
        let suitable = incident.service_type.suitable_unit_types();
        let query = Query::new(units_collection(&self.provider)).filter(Filter::eq(
            "status",
            client::json(&UnitStatus::Available)?,
        ));
        let units = decode_all::<EmergencyUnit>(self.store().query(query).await?);
        Ok(units
            .into_iter()
            .sorted_by_key(|unit| {
                (
                    !suitable.contains(&unit.content.unit_type),
                    unit.content.response_time,
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{intake::ReportedLocation, Client, PreconditionError};
    use document_store::MemoryStore;
    use model::{
        assignment::AssignmentOutcome,
        dispatch::TransitionError,
        identity::{CurrentUser, Role},
        incident::{IncidentStatus, IntakeForm, Location, ServiceType},
        unit::{NewUnit, UnitType},
    };

    struct Setup {
        client: Client<MemoryStore>,
        fleet: ProviderClient<MemoryStore>,
    }

    impl Setup {
        fn new() -> Self {
            let client = Client::new(MemoryStore::start());
            let fleet = client
                .provider(&CurrentUser::new("P1", Role::Dispatcher), Id::new("P1".to_owned()))
                .unwrap();
            Self { client, fleet }
        }

        async fn incident(&self, service_type: ServiceType) -> Id<EmergencyRequest> {
            self.client
                .submit(
                    &CurrentUser::new("patient-1", Role::Patient),
                    &ReportedLocation::fix(Location::new(-1.28, 36.82)),
                    IntakeForm::new(service_type, "Wanjiku"),
                )
                .await
                .unwrap()
        }

        async fn unit(&self, unit_type: UnitType, response_time: i64) -> Id<EmergencyUnit> {
            self.fleet
                .add_unit(NewUnit {
                    unit_type,
                    license_plate: format!("KBX {response_time}"),
                    capacity: 2,
                    response_time,
                    has_life_support: false,
                    status: UnitStatus::Available,
                    stationed_location: "HQ".to_owned(),
                })
                .await
                .unwrap()
        }

        async fn statuses(
            &self,
            incident: &Id<EmergencyRequest>,
            unit: &Id<EmergencyUnit>,
        ) -> (IncidentStatus, UnitStatus) {
            let incident = self
                .client
                .read::<EmergencyRequest>(&incident_path(incident))
                .await
                .unwrap()
                .content;
            let unit = self.fleet.unit(unit).await.unwrap().content;
            (incident.status, unit.status)
        }
    }

    #[tokio::test]
    async fn dispatch_links_incident_and_unit() {
        let setup = Setup::new();
        let incident = setup.incident(ServiceType::GroundAmbulance).await;
        let unit = setup.unit(UnitType::Ground, 8).await;

        let transition = setup.fleet.dispatch(&incident, &unit).await.unwrap();
        assert_eq!(transition.incident, IncidentStatus::Dispatched);
        assert_eq!(transition.unit, Some(UnitStatus::EnRoute));

        let stored = setup
            .client
            .read::<EmergencyRequest>(&incident_path(&incident))
            .await
            .unwrap()
            .content;
        assert_eq!(stored.assigned_unit_id.as_ref(), Some(&unit));
        assert!(stored.status_changed_at.is_some());
        let stored_unit = setup.fleet.unit(&unit).await.unwrap().content;
        assert_eq!(stored_unit.current_incident_id.as_ref(), Some(&incident));
        let assignment = setup.client.assignment(&incident).await.unwrap().content;
        assert_eq!(assignment.unit_id, unit);
        assert_eq!(assignment.outcome, None);
    }

    #[tokio::test]
    async fn full_mission_frees_the_unit() {
        let setup = Setup::new();
        let incident = setup.incident(ServiceType::GroundAmbulance).await;
        let unit = setup.unit(UnitType::Ground, 8).await;

        setup.fleet.dispatch(&incident, &unit).await.unwrap();
        setup.fleet.arrive(&incident).await.unwrap();
        setup.fleet.transport(&incident).await.unwrap();
        setup.fleet.deliver(&incident).await.unwrap();
        assert_eq!(
            setup.statuses(&incident, &unit).await,
            (IncidentStatus::Dispatched, UnitStatus::AtHospital)
        );
        setup.fleet.complete(&incident).await.unwrap();
        assert_eq!(
            setup.statuses(&incident, &unit).await,
            (IncidentStatus::Resolved, UnitStatus::Available)
        );

        let freed = setup.fleet.unit(&unit).await.unwrap().content;
        assert_eq!(freed.current_incident_id, None);
        let assignment = setup.client.assignment(&incident).await.unwrap().content;
        assert_eq!(assignment.outcome, Some(AssignmentOutcome::Resolved));
        assert!(assignment.closed_at.is_some());
    }

    #[tokio::test]
    async fn busy_unit_can_not_be_dispatched() {
        let setup = Setup::new();
        let first = setup.incident(ServiceType::GroundAmbulance).await;
        let second = setup.incident(ServiceType::GroundAmbulance).await;
        let unit = setup.unit(UnitType::Ground, 8).await;

        setup.fleet.dispatch(&first, &unit).await.unwrap();
        let result = setup.fleet.dispatch(&second, &unit).await;
        assert!(matches!(
            result,
            Err(RequestError::Precondition(PreconditionError::Transition(
                TransitionError::Unit {
                    current: UnitStatus::EnRoute,
                    ..
                }
            )))
        ));
        assert_eq!(
            setup.statuses(&second, &unit).await,
            (IncidentStatus::Pending, UnitStatus::EnRoute)
        );
    }

    #[tokio::test]
    async fn racing_dispatches_have_one_winner() {
        let setup = Setup::new();
        let incident = setup.incident(ServiceType::GroundAmbulance).await;
        let a = setup.unit(UnitType::Ground, 8).await;
        let b = setup.unit(UnitType::Ground, 9).await;

        let (first, second) = tokio::join!(
            setup.fleet.dispatch(&incident, &a),
            setup.fleet.dispatch(&incident, &b)
        );
        assert_eq!(
            [first.is_ok(), second.is_ok()]
                .into_iter()
                .filter(|won| *won)
                .count(),
            1
        );

        let statuses = [
            setup.fleet.unit(&a).await.unwrap().content.status,
            setup.fleet.unit(&b).await.unwrap().content.status,
        ];
        assert_eq!(
            statuses
                .iter()
                .filter(|status| **status == UnitStatus::EnRoute)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn racing_incidents_get_the_unit_once() {
        let setup = Setup::new();
        let first = setup.incident(ServiceType::GroundAmbulance).await;
        let second = setup.incident(ServiceType::GroundAmbulance).await;
        let unit = setup.unit(UnitType::Ground, 8).await;

        let (a, b) = tokio::join!(
            setup.fleet.dispatch(&first, &unit),
            setup.fleet.dispatch(&second, &unit)
        );
        assert!(a.is_ok() != b.is_ok());
        let dispatched = setup
            .fleet
            .unit(&unit)
            .await
            .unwrap()
            .content
            .current_incident_id
            .unwrap();
        assert!(dispatched == first || dispatched == second);
    }

    #[tokio::test]
    async fn cancel_pending_touches_only_the_incident() {
        let setup = Setup::new();
        let incident = setup.incident(ServiceType::FirstAid).await;
        let transition = setup.fleet.cancel(&incident).await.unwrap();
        assert_eq!(transition.incident, IncidentStatus::Cancelled);
        assert_eq!(transition.unit, None);
        assert!(matches!(
            setup.client.assignment(&incident).await,
            Err(RequestError::NotFound)
        ));
    }

    #[tokio::test]
    async fn cancel_after_dispatch_returns_the_unit() {
        let setup = Setup::new();
        let incident = setup.incident(ServiceType::GroundAmbulance).await;
        let unit = setup.unit(UnitType::Ground, 8).await;
        setup.fleet.dispatch(&incident, &unit).await.unwrap();
        setup.fleet.cancel(&incident).await.unwrap();
        assert_eq!(
            setup.statuses(&incident, &unit).await,
            (IncidentStatus::Cancelled, UnitStatus::Available)
        );
        let assignment = setup.client.assignment(&incident).await.unwrap().content;
        assert_eq!(assignment.outcome, Some(AssignmentOutcome::Cancelled));
    }

    #[tokio::test]
    async fn terminal_incidents_stay_terminal() {
        let setup = Setup::new();
        let incident = setup.incident(ServiceType::FirstAid).await;
        let unit = setup.unit(UnitType::MotorbikeMedic, 4).await;
        setup.fleet.cancel(&incident).await.unwrap();
        assert!(matches!(
            setup.fleet.dispatch(&incident, &unit).await,
            Err(RequestError::Precondition(PreconditionError::Transition(
                TransitionError::Incident { .. }
            )))
        ));
        assert!(setup.fleet.cancel(&incident).await.is_err());
    }

    #[tokio::test]
    async fn other_providers_can_not_drive_the_mission() {
        let setup = Setup::new();
        let incident = setup.incident(ServiceType::GroundAmbulance).await;
        let unit = setup.unit(UnitType::Ground, 8).await;
        setup.fleet.dispatch(&incident, &unit).await.unwrap();

        let other = setup
            .client
            .provider(&CurrentUser::new("P2", Role::Dispatcher), Id::new("P2".to_owned()))
            .unwrap();
        assert!(matches!(
            other.arrive(&incident).await,
            Err(RequestError::Forbidden)
        ));
        assert!(matches!(
            other.cancel(&incident).await,
            Err(RequestError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn dispatching_an_unknown_unit_is_not_found() {
        let setup = Setup::new();
        let incident = setup.incident(ServiceType::GroundAmbulance).await;
        assert!(matches!(
            setup
                .fleet
                .dispatch(&incident, &Id::new("ghost".to_owned()))
                .await,
            Err(RequestError::NotFound)
        ));
    }

    #[tokio::test]
    async fn candidates_prefer_suitable_then_quick_units() {
        let setup = Setup::new();
        let incident = setup.incident(ServiceType::FirstAid).await;
        let air = setup.unit(UnitType::Air, 2).await;
        let slow_ground = setup.unit(UnitType::Ground, 20).await;
        let bike = setup.unit(UnitType::MotorbikeMedic, 5).await;
        let busy = setup.unit(UnitType::Ground, 1).await;
        let other = setup.incident(ServiceType::GroundAmbulance).await;
        setup.fleet.dispatch(&other, &busy).await.unwrap();

        let candidates = setup
            .fleet
            .candidate_units(&incident)
            .await
            .unwrap()
            .into_iter()
            .map(|unit| unit.id)
            .collect::<Vec<_>>();
        assert_eq!(candidates, vec![bike, slow_ground, air]);
    }
}
