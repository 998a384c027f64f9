use async_trait::async_trait;
use chrono::Utc;
use document_store::{to_document, DocumentStore, StoreError, WriteBatch};
use model::{
    audit::AuditAction,
    identity::CurrentUser,
    incident::{EmergencyRequest, IncidentStatus, IntakeForm, Location},
};
use utility::id::{is_valid_key, Id};

use crate::{
    client::{incident_path, incidents_collection},
    Client, LocationError, PreconditionError, RequestResult, ValidationError,
};

/// Source of the reporter's position, usually the device's location API.
#[async_trait]
pub trait Geolocation: Send + Sync {
    async fn locate(&self) -> Result<Location, LocationError>;
}

/// A fix (or the failure to get one) the reporting device already produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportedLocation(pub Result<Location, LocationError>);

impl ReportedLocation {
    pub fn fix(location: Location) -> Self {
        Self(Ok(location))
    }

    pub fn failed(why: LocationError) -> Self {
        Self(Err(why))
    }
}

#[async_trait]
impl Geolocation for ReportedLocation {
    async fn locate(&self) -> Result<Location, LocationError> {
        self.0
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

pub fn validate_form(form: &IntakeForm) -> Result<(), ValidationError> {
    if form.patient_name.trim().is_empty() {
        return Err(ValidationError::new(
            "patientName",
            "the patient has to be identified",
        ));
    }
    if let Some(key) = &form.submission_key {
        if !is_valid_key(key) {
            return Err(ValidationError::new(
                "submissionKey",
                "may only contain letters, digits, '-' or '_'",
            ));
        }
    }
    Ok(())
}

pub fn validate_location(location: Location) -> Result<Location, LocationError> {
    if location.is_valid() {
        Ok(location)
    } else {
        Err(LocationError::Invalid {
            latitude: location.latitude,
            longitude: location.longitude,
        })
    }
}

impl<S> Client<S>
where
    S: DocumentStore,
{
    /// Reports a new emergency. The incident is stored as `Pending`.
    ///
    /// Location failures are reported as `RequestError::Location`, distinct
    /// from invalid form input and from store failures. Nothing is written
    /// unless everything checks out.
    pub async fn submit<G>(
        &self,
        requester: &CurrentUser,
        geolocation: &G,
        form: IntakeForm,
    ) -> RequestResult<Id<EmergencyRequest>>
    where
        G: Geolocation + ?Sized,
    {
        let location = match geolocation.locate().await.and_then(validate_location) {
            Ok(location) => location,
            Err(why) => {
                log::warn!("incident from {} blocked: {}", requester.id, why);
                return Err(why.into());
            }
        };
        if let Err(why) = validate_form(&form) {
            log::warn!("incident from {} rejected: {}", requester.id, why);
            return Err(why.into());
        }

        let incident = EmergencyRequest {
            service_type: form.service_type,
            patient_name: form.patient_name.trim().to_owned(),
            location,
            situation_description: non_blank(form.situation_description),
            blood_group: non_blank(form.blood_group),
            allergies: non_blank(form.allergies),
            status: IncidentStatus::Pending,
            requester_id: Some(requester.id.clone()),
            requester_role: requester.role,
            assigned_unit_id: None,
            assigned_provider_id: None,
            created_at: Utc::now(),
            status_changed_at: None,
        };
        let document = to_document(&incident)?;

        let path = match form.submission_key {
            Some(key) => {
                let id = Id::<EmergencyRequest>::from_key(&requester.id, &key).ok_or_else(|| {
                    ValidationError::new("submissionKey", "may only contain letters, digits, '-' or '_'")
                })?;
                let path = incident_path(&id);
                match self
                    .store
                    .commit(WriteBatch::new().create(path.clone(), document))
                    .await
                {
                    Ok(()) => path,
                    Err(StoreError::AlreadyExists(_)) => {
                        let existing = self.read::<EmergencyRequest>(&path).await?;
                        if existing.content.requester_id.as_deref() != Some(requester.id.as_str()) {
                            log::warn!(
                                "submission key of {} collides with incident {}",
                                requester.id,
                                id
                            );
                            return Err(PreconditionError::Conflict {
                                subject: format!("incident {}", id),
                                reason: "submission key already used by another requester"
                                    .to_owned(),
                            }
                            .into());
                        }
                        log::info!("repeated submission {} from {}", id, requester.id);
                        return Ok(id);
                    }
                    Err(why) => return Err(why.into()),
                }
            }
            None => self.store.add(&incidents_collection(), document).await?,
        };

        log::info!(
            "incident {} ({:?}) submitted by {}",
            path.id,
            incident.service_type,
            requester.id
        );
        self.audit(
            AuditAction::IncidentSubmitted,
            Some(requester),
            &path,
            Some(format!("{:?}", incident.service_type)),
        )
        .await;
        Ok(Id::new(path.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestError;
    use document_store::MemoryStore;
    use model::{identity::Role, incident::ServiceType, ExampleData};

    fn patient() -> CurrentUser {
        CurrentUser::new("patient-1", Role::Patient)
    }

    fn nairobi() -> ReportedLocation {
        ReportedLocation::fix(Location::new(-1.283, 36.823))
    }

    #[tokio::test]
    async fn submit_creates_pending_incident() {
        let client = Client::new(MemoryStore::start());
        let before = Utc::now();
        let mut form = IntakeForm::new(ServiceType::FirstAid, "  Amina Yusuf ");
        form.blood_group = Some("  ".to_owned());
        form.allergies = Some("latex".to_owned());

        let id = client.submit(&patient(), &nairobi(), form).await.unwrap();
        let after = Utc::now();

        let incident = client
            .read::<EmergencyRequest>(&incident_path(&id))
            .await
            .unwrap()
            .content;
        assert_eq!(incident.status, IncidentStatus::Pending);
        assert_eq!(incident.patient_name, "Amina Yusuf");
        assert_eq!(incident.blood_group, None);
        assert_eq!(incident.allergies.as_deref(), Some("latex"));
        assert_eq!(incident.requester_role, Role::Patient);
        assert!(incident.created_at >= before && incident.created_at <= after);
    }

    #[tokio::test]
    async fn location_failure_is_reported_separately() {
        let client = Client::new(MemoryStore::start());
        let form = IntakeForm::new(ServiceType::GroundAmbulance, "Juma");
        let result = client
            .submit(
                &patient(),
                &ReportedLocation::failed(LocationError::PermissionDenied),
                form,
            )
            .await;
        assert!(matches!(
            result,
            Err(RequestError::Location(LocationError::PermissionDenied))
        ));
        let stored = client
            .store
            .query(document_store::Query::new(incidents_collection()))
            .await
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_fix_is_a_location_error() {
        let client = Client::new(MemoryStore::start());
        let form = IntakeForm::new(ServiceType::GroundAmbulance, "Juma");
        let result = client
            .submit(
                &patient(),
                &ReportedLocation::fix(Location::new(123.0, 36.8)),
                form,
            )
            .await;
        assert!(matches!(
            result,
            Err(RequestError::Location(LocationError::Invalid { .. }))
        ));
    }

    #[tokio::test]
    async fn missing_patient_is_a_validation_error() {
        let client = Client::new(MemoryStore::start());
        let form = IntakeForm::new(ServiceType::GroundAmbulance, "   ");
        let result = client.submit(&patient(), &nairobi(), form).await;
        match result {
            Err(RequestError::Validation(why)) => assert_eq!(why.field, "patientName"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_submission_key_yields_one_incident() {
        let client = Client::new(MemoryStore::start());
        let mut form = IntakeForm::new(ServiceType::AirAmbulance, "Otieno");
        form.submission_key = Some("tap-7f3a".to_owned());

        let first = client
            .submit(&patient(), &nairobi(), form.clone())
            .await
            .unwrap();
        let second = client.submit(&patient(), &nairobi(), form).await.unwrap();
        assert_eq!(first, second);

        let stored = client
            .store
            .query(document_store::Query::new(incidents_collection()))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn same_key_from_two_requesters_yields_two_incidents() {
        let client = Client::new(MemoryStore::start());
        let mut first_form = IntakeForm::new(ServiceType::AirAmbulance, "Otieno");
        first_form.submission_key = Some("form1".to_owned());
        let mut second_form = IntakeForm::new(ServiceType::FirstAid, "Wairimu");
        second_form.submission_key = Some("form1".to_owned());

        let first = client
            .submit(&patient(), &nairobi(), first_form)
            .await
            .unwrap();
        let other = CurrentUser::new("patient-2", Role::Patient);
        let second = client
            .submit(&other, &nairobi(), second_form)
            .await
            .unwrap();
        assert_ne!(first, second);

        let stored = client
            .store
            .query(document_store::Query::new(incidents_collection()))
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        let second = client
            .read::<EmergencyRequest>(&incident_path(&second))
            .await
            .unwrap()
            .content;
        assert_eq!(second.requester_id.as_deref(), Some("patient-2"));
        assert_eq!(second.patient_name, "Wairimu");
    }

    #[tokio::test]
    async fn keys_with_unsafe_characters_are_rejected() {
        let client = Client::new(MemoryStore::start());
        let mut form = IntakeForm::new(ServiceType::AirAmbulance, "Otieno");
        form.submission_key = Some("form/1".to_owned());

        match client.submit(&patient(), &nairobi(), form).await {
            Err(RequestError::Validation(why)) => assert_eq!(why.field, "submissionKey"),
            other => panic!("unexpected {other:?}"),
        }
        let stored = client
            .store
            .query(document_store::Query::new(incidents_collection()))
            .await
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn key_taken_by_another_requester_is_a_conflict() {
        let client = Client::new(MemoryStore::start());
        let id = Id::<EmergencyRequest>::from_key("patient-1", "form1").unwrap();
        let foreign = EmergencyRequest {
            requester_id: Some("patient-9".to_owned()),
            ..EmergencyRequest::example_data()
        };
        client
            .store
            .commit(WriteBatch::new().create(incident_path(&id), to_document(&foreign).unwrap()))
            .await
            .unwrap();

        let mut form = IntakeForm::new(ServiceType::GroundAmbulance, "Otieno");
        form.submission_key = Some("form1".to_owned());
        assert!(matches!(
            client.submit(&patient(), &nairobi(), form).await,
            Err(RequestError::Precondition(PreconditionError::Conflict { .. }))
        ));
    }

    #[tokio::test]
    async fn duplicate_clicks_without_key_create_two_incidents() {
        let client = Client::new(MemoryStore::start());
        let form = IntakeForm::new(ServiceType::FirstAid, "Achieng");
        let first = client
            .submit(&patient(), &nairobi(), form.clone())
            .await
            .unwrap();
        let second = client.submit(&patient(), &nairobi(), form).await.unwrap();
        assert_ne!(first, second);
    }
}
