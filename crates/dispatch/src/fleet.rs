use chrono::Utc;
use document_store::{
    to_document, Direction, DocumentStore, Precondition, Query, StoreError, WriteBatch,
};
use model::{
    audit::AuditAction,
    unit::{EmergencyUnit, NewUnit, UnitPatch, UnitStatus},
    WithId,
};
use serde_json::Value;
use utility::id::Id;

use crate::{
    client::{decode_all, json, unit_path, units_collection},
    LiveView, PreconditionError, ProviderClient, RequestError, RequestResult, ValidationError,
};

fn positive_number(field: &'static str, value: i64) -> Result<u32, ValidationError> {
    if value < 1 {
        return Err(ValidationError::new(field, "must be at least 1"));
    }
    u32::try_from(value).map_err(|_| ValidationError::new(field, "is too large"))
}

fn required_text(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        Err(ValidationError::new(field, "must not be empty"))
    } else {
        Ok(value.to_owned())
    }
}

fn registry_status(status: UnitStatus) -> Result<UnitStatus, ValidationError> {
    if status.is_off_mission() {
        Ok(status)
    } else {
        Err(ValidationError::new(
            "status",
            format!("{:?} is set by dispatching, not by hand", status),
        ))
    }
}

/// Validated and normalized form of a `NewUnit`.
struct CheckedUnit {
    capacity: u32,
    response_time: u32,
    license_plate: String,
    stationed_location: String,
    status: UnitStatus,
}

fn check_new_unit(unit: &NewUnit) -> Result<CheckedUnit, ValidationError> {
    Ok(CheckedUnit {
        capacity: positive_number("capacity", unit.capacity)?,
        response_time: positive_number("responseTime", unit.response_time)?,
        license_plate: required_text("licensePlate", &unit.license_plate)?,
        stationed_location: required_text("stationedLocation", &unit.stationed_location)?,
        status: registry_status(unit.status)?,
    })
}

/// Validates a patch and trims its text fields.
pub fn check_patch(patch: UnitPatch) -> Result<UnitPatch, ValidationError> {
    if patch.is_empty() {
        return Err(ValidationError::new("patch", "names no field to change"));
    }
    if let Some(capacity) = patch.capacity {
        positive_number("capacity", capacity)?;
    }
    if let Some(response_time) = patch.response_time {
        positive_number("responseTime", response_time)?;
    }
    if let Some(status) = patch.status {
        registry_status(status)?;
    }
    Ok(UnitPatch {
        license_plate: patch
            .license_plate
            .as_deref()
            .map(|plate| required_text("licensePlate", plate))
            .transpose()?,
        stationed_location: patch
            .stationed_location
            .as_deref()
            .map(|location| required_text("stationedLocation", location))
            .transpose()?,
        ..patch
    })
}

impl<S> ProviderClient<S>
where
    S: DocumentStore,
{
    fn units_query(&self) -> Query {
        Query::new(units_collection(&self.provider)).order_by("createdAt", Direction::Descending)
    }

    /// Live list of the provider's units, newest first.
    pub async fn units(&self) -> RequestResult<LiveView<EmergencyUnit>> {
        Ok(LiveView::new(self.store().subscribe(self.units_query()).await?))
    }

    /// The provider's units as they are now, newest first.
    pub async fn unit_list(&self) -> RequestResult<Vec<WithId<EmergencyUnit>>> {
        Ok(decode_all(self.store().query(self.units_query()).await?))
    }

    pub async fn unit(&self, id: &Id<EmergencyUnit>) -> RequestResult<WithId<EmergencyUnit>> {
        self.client.read(&unit_path(&self.provider, id)).await
    }

    pub async fn add_unit(&self, unit: NewUnit) -> RequestResult<Id<EmergencyUnit>> {
        let checked = match check_new_unit(&unit) {
            Ok(checked) => checked,
            Err(why) => {
                log::warn!("unit for provider {} rejected: {}", self.provider, why);
                return Err(why.into());
            }
        };
        let now = Utc::now();
        let unit = EmergencyUnit {
            provider_id: self.provider.clone(),
            unit_type: unit.unit_type,
            license_plate: checked.license_plate,
            capacity: checked.capacity,
            response_time: checked.response_time,
            has_life_support: unit.has_life_support,
            status: checked.status,
            stationed_location: checked.stationed_location,
            current_incident_id: None,
            created_at: now,
            updated_at: now,
        };
        let path = self
            .store()
            .add(&units_collection(&self.provider), to_document(&unit)?)
            .await?;
        log::info!(
            "provider {} registered unit {} ({})",
            self.provider,
            path.id,
            unit.license_plate
        );
        self.client
            .audit(
                AuditAction::UnitAdded,
                Some(&self.user),
                &path,
                Some(unit.license_plate),
            )
            .await;
        Ok(Id::new(path.id))
    }

    /// Merges the given fields into the unit and refreshes `updatedAt`.
    ///
    /// A status may only be set while the unit is not on a mission.
    pub async fn update_unit(&self, id: &Id<EmergencyUnit>, patch: UnitPatch) -> RequestResult<()> {
        let patch = match check_patch(patch) {
            Ok(patch) => patch,
            Err(why) => {
                log::warn!("update of unit {} rejected: {}", id, why);
                return Err(why.into());
            }
        };
        let path = unit_path(&self.provider, id);
        let mut document = to_document(&patch)?;
        document.insert("updatedAt".to_owned(), json(&Utc::now())?);

        let mut batch = WriteBatch::new().require(Precondition::Exists(path.clone()));
        if patch.status.is_some() {
            let off_mission = UnitStatus::ALL
                .into_iter()
                .filter(|status| status.is_off_mission())
                .map(|status| json(&status))
                .collect::<RequestResult<Vec<Value>>>()?;
            batch = batch.require(Precondition::field_in(path.clone(), "status", off_mission));
        }

        match self.store().commit(batch.update(path.clone(), document)).await {
            Ok(()) => {}
            Err(StoreError::PreconditionFailed { reason, .. }) => {
                if self.store().get(&path).await?.is_none() {
                    return Err(RequestError::NotFound);
                }
                log::warn!("status of unit {} not changed: {}", id, reason);
                return Err(PreconditionError::UnitOnMission(id.clone()).into());
            }
            Err(why) => return Err(why.into()),
        }

        log::info!("provider {} updated unit {}", self.provider, id);
        self.client
            .audit(
                AuditAction::UnitUpdated,
                Some(&self.user),
                &path,
                serde_json::to_string(&patch).ok(),
            )
            .await;
        Ok(())
    }

    /// Removes the unit for good. Units on a mission can not be removed.
    pub async fn delete_unit(&self, id: &Id<EmergencyUnit>) -> RequestResult<()> {
        let path = unit_path(&self.provider, id);
        let unit = self.unit(id).await?.content;
        if unit.status.is_on_mission() {
            log::warn!("unit {} is {:?} and can not be removed", id, unit.status);
            return Err(PreconditionError::UnitOnMission(id.clone()).into());
        }

        let batch = WriteBatch::new()
            .require(Precondition::field_equals(
                path.clone(),
                "status",
                json(&unit.status)?,
            ))
            .delete(path.clone());
        match self.store().commit(batch).await {
            Ok(()) => {}
            Err(StoreError::PreconditionFailed { .. }) => {
                return match self.store().get(&path).await? {
                    None => Err(RequestError::NotFound),
                    Some(_) => Err(PreconditionError::UnitOnMission(id.clone()).into()),
                };
            }
            Err(why) => return Err(why.into()),
        }

        log::info!("provider {} removed unit {}", self.provider, id);
        self.client
            .audit(
                AuditAction::UnitDeleted,
                Some(&self.user),
                &path,
                Some(unit.license_plate),
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Client;
    use document_store::MemoryStore;
    use model::{
        identity::{CurrentUser, Role},
        unit::UnitType,
        ExampleData,
    };

    fn fleet() -> ProviderClient<MemoryStore> {
        let client = Client::new(MemoryStore::start());
        client
            .provider(&CurrentUser::new("P1", Role::Dispatcher), Id::new("P1".to_owned()))
            .unwrap()
    }

    fn ground_unit() -> NewUnit {
        NewUnit {
            unit_type: UnitType::Ground,
            license_plate: "KAA 123A".to_owned(),
            capacity: 2,
            response_time: 10,
            has_life_support: false,
            status: UnitStatus::Available,
            stationed_location: "HQ".to_owned(),
        }
    }

    #[tokio::test]
    async fn add_unit_stamps_creation_time() {
        let fleet = fleet();
        let id = fleet.add_unit(ground_unit()).await.unwrap();
        let unit = fleet.unit(&id).await.unwrap().content;
        assert_eq!(unit.provider_id, Id::new("P1".to_owned()));
        assert_eq!(unit.license_plate, "KAA 123A");
        assert_eq!(unit.capacity, 2);
        assert_eq!(unit.created_at, unit.updated_at);
        assert_eq!(unit.current_incident_id, None);
    }

    #[tokio::test]
    async fn add_unit_validates_fields() {
        let fleet = fleet();
        let cases = [
            (NewUnit { capacity: 0, ..ground_unit() }, "capacity"),
            (NewUnit { response_time: -4, ..ground_unit() }, "responseTime"),
            (
                NewUnit { license_plate: "  ".to_owned(), ..ground_unit() },
                "licensePlate",
            ),
            (
                NewUnit { stationed_location: String::new(), ..ground_unit() },
                "stationedLocation",
            ),
            (
                NewUnit { status: UnitStatus::EnRoute, ..ground_unit() },
                "status",
            ),
        ];
        for (unit, field) in cases {
            match fleet.add_unit(unit).await {
                Err(RequestError::Validation(why)) => assert_eq!(why.field, field),
                other => panic!("expected {field} to be rejected, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn units_are_listed_newest_first() {
        let fleet = fleet();
        let first = fleet.add_unit(ground_unit()).await.unwrap();
        let second = fleet.add_unit(NewUnit::example_data()).await.unwrap();
        let view = fleet.units().await.unwrap();
        let ids = view
            .current()
            .into_iter()
            .map(|unit| unit.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn unit_list_reads_once_without_subscribing() {
        let fleet = fleet();
        let first = fleet.add_unit(ground_unit()).await.unwrap();
        let second = fleet.add_unit(NewUnit::example_data()).await.unwrap();

        let ids = fleet
            .unit_list()
            .await
            .unwrap()
            .into_iter()
            .map(|unit| unit.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![second, first]);
        assert_eq!(fleet.store().subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn live_list_follows_changes() {
        let fleet = fleet();
        let mut view = fleet.units().await.unwrap();
        assert!(view.current().is_empty());

        let id = fleet.add_unit(ground_unit()).await.unwrap();
        let listed = view.changed().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);

        fleet.delete_unit(&id).await.unwrap();
        assert!(view.changed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_merges_and_refreshes_timestamp() {
        let fleet = fleet();
        let id = fleet.add_unit(ground_unit()).await.unwrap();
        let before = fleet.unit(&id).await.unwrap().content;

        let patch = UnitPatch {
            capacity: Some(4),
            status: Some(UnitStatus::Unavailable),
            ..Default::default()
        };
        fleet.update_unit(&id, patch).await.unwrap();

        let after = fleet.unit(&id).await.unwrap().content;
        assert_eq!(after.capacity, 4);
        assert_eq!(after.status, UnitStatus::Unavailable);
        assert_eq!(after.license_plate, before.license_plate);
        assert!(after.updated_at >= before.updated_at);
        assert_eq!(after.created_at, before.created_at);
    }

    #[tokio::test]
    async fn update_of_missing_unit_is_not_found() {
        let fleet = fleet();
        let patch = UnitPatch {
            capacity: Some(3),
            ..Default::default()
        };
        let result = fleet.update_unit(&Id::new("nope".to_owned()), patch).await;
        assert!(matches!(result, Err(RequestError::NotFound)));
    }

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let fleet = fleet();
        let id = fleet.add_unit(ground_unit()).await.unwrap();
        let before = fleet.unit(&id).await.unwrap().content;
        match fleet.update_unit(&id, UnitPatch::default()).await {
            Err(RequestError::Validation(why)) => assert_eq!(why.field, "patch"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fleet.unit(&id).await.unwrap().content, before);
    }

    #[tokio::test]
    async fn mission_status_can_not_be_set_by_hand() {
        let fleet = fleet();
        let id = fleet.add_unit(ground_unit()).await.unwrap();
        let patch = UnitPatch {
            status: Some(UnitStatus::AtScene),
            ..Default::default()
        };
        assert!(matches!(
            fleet.update_unit(&id, patch).await,
            Err(RequestError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unit_on_mission_keeps_its_status() {
        let fleet = fleet();
        let id = fleet.add_unit(ground_unit()).await.unwrap();
        let path = unit_path(fleet.provider_id(), &id);
        fleet
            .store()
            .update(
                &path,
                to_document(&serde_json::json!({ "status": "EnRoute" })).unwrap(),
            )
            .await
            .unwrap();

        let patch = UnitPatch {
            status: Some(UnitStatus::Available),
            ..Default::default()
        };
        assert!(matches!(
            fleet.update_unit(&id, patch).await,
            Err(RequestError::Precondition(PreconditionError::UnitOnMission(_)))
        ));
        assert!(matches!(
            fleet.delete_unit(&id).await,
            Err(RequestError::Precondition(PreconditionError::UnitOnMission(_)))
        ));
        assert_eq!(
            fleet.unit(&id).await.unwrap().content.status,
            UnitStatus::EnRoute
        );
    }

    #[tokio::test]
    async fn delete_of_missing_unit_is_not_found() {
        let fleet = fleet();
        assert!(matches!(
            fleet.delete_unit(&Id::new("gone".to_owned())).await,
            Err(RequestError::NotFound)
        ));
    }

    #[tokio::test]
    async fn fleets_are_separated_by_provider() {
        let client = Client::new(MemoryStore::start());
        let p1 = client
            .provider(&CurrentUser::new("P1", Role::Dispatcher), Id::new("P1".to_owned()))
            .unwrap();
        let p2 = client
            .provider(&CurrentUser::new("P2", Role::Dispatcher), Id::new("P2".to_owned()))
            .unwrap();
        p1.add_unit(ground_unit()).await.unwrap();
        assert!(p2.units().await.unwrap().current().is_empty());
    }
}
