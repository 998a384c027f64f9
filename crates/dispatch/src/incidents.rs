use document_store::{Direction, DocumentStore, Filter, Query};
use model::{
    identity::{CurrentUser, Role},
    incident::{EmergencyRequest, IncidentStatus},
    WithId,
};
use utility::id::Id;

use crate::{
    client::{decode_all, incident_path, incidents_collection, json},
    Client, LiveView, RequestError, RequestResult,
};

/// Dispatchers and admins see every incident, everybody else only the ones
/// they reported.
fn sees_everything(viewer: &CurrentUser) -> bool {
    matches!(viewer.role, Role::Dispatcher | Role::Admin)
}

impl<S> Client<S>
where
    S: DocumentStore,
{
    fn incident_query(
        &self,
        viewer: &CurrentUser,
        status: Option<IncidentStatus>,
    ) -> RequestResult<Query> {
        let mut query =
            Query::new(incidents_collection()).order_by("createdAt", Direction::Descending);
        if let Some(status) = status {
            query = query.filter(Filter::eq("status", json(&status)?));
        }
        if !sees_everything(viewer) {
            query = query.filter(Filter::eq("requesterId", viewer.id.clone()));
        }
        Ok(query)
    }

    /// Live list of incidents, newest first.
    pub async fn incidents(
        &self,
        viewer: &CurrentUser,
        status: Option<IncidentStatus>,
    ) -> RequestResult<LiveView<EmergencyRequest>> {
        let query = self.incident_query(viewer, status)?;
        Ok(LiveView::new(self.store.subscribe(query).await?))
    }

    /// One-shot read of the same list.
    pub async fn incident_list(
        &self,
        viewer: &CurrentUser,
        status: Option<IncidentStatus>,
    ) -> RequestResult<Vec<WithId<EmergencyRequest>>> {
        let query = self.incident_query(viewer, status)?;
        Ok(decode_all(self.store.query(query).await?))
    }

    pub async fn incident(
        &self,
        viewer: &CurrentUser,
        id: &Id<EmergencyRequest>,
    ) -> RequestResult<WithId<EmergencyRequest>> {
        let incident = self.read::<EmergencyRequest>(&incident_path(id)).await?;
        if !sees_everything(viewer)
            && incident.content.requester_id.as_deref() != Some(viewer.id.as_str())
        {
            return Err(RequestError::Forbidden);
        }
        Ok(incident)
    }
}
