use std::marker::PhantomData;

use document_store::{
    to_document, CollectionPath, Document, DocumentPath, DocumentSnapshot, DocumentStore,
    Subscription,
};
use futures::{Stream, StreamExt};
use model::{
    assignment::Assignment, identity::CurrentUser, incident::EmergencyRequest,
    provider::Provider, unit::EmergencyUnit, WithId,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use utility::id::{HasId, Id};

use crate::{RequestError, RequestResult};

pub const EMERGENCY_REQUESTS: &str = "emergency_requests";
pub const PROVIDERS: &str = "providers";
pub const UNITS: &str = "units";
pub const ASSIGNMENTS: &str = "assignments";
pub const AUDIT_LOG: &str = "audit_log";

pub fn incidents_collection() -> CollectionPath {
    CollectionPath::new(EMERGENCY_REQUESTS)
}

pub fn incident_path(id: &Id<EmergencyRequest>) -> DocumentPath {
    incidents_collection().doc(id.raw())
}

pub fn units_collection(provider: &Id<Provider>) -> CollectionPath {
    CollectionPath::nested(PROVIDERS, provider.raw_ref::<str>(), UNITS)
}

pub fn unit_path(provider: &Id<Provider>, unit: &Id<EmergencyUnit>) -> DocumentPath {
    units_collection(provider).doc(unit.raw())
}

pub fn assignments_collection() -> CollectionPath {
    CollectionPath::new(ASSIGNMENTS)
}

pub fn assignment_path(incident: &Id<EmergencyRequest>) -> DocumentPath {
    assignments_collection().doc(incident.raw())
}

/// Entry point to the emergency dispatch core. Cheap to clone, every clone
/// talks to the same store.
#[derive(Debug, Clone)]
pub struct Client<S>
where
    S: DocumentStore,
{
    pub store: S,
}

impl<S> Client<S>
where
    S: DocumentStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Opens the operations of one provider's fleet. Only the provider's own
    /// dispatcher account gets in.
    pub fn provider(
        &self,
        user: &CurrentUser,
        provider: Id<Provider>,
    ) -> RequestResult<ProviderClient<S>> {
        if !user.acts_for(&provider) {
            log::warn!(
                "user {} ({}) tried to access the fleet of provider {}",
                user.id,
                user.role,
                provider
            );
            return Err(RequestError::Forbidden);
        }
        Ok(ProviderClient {
            client: self.clone(),
            provider,
            user: user.clone(),
        })
    }

    pub(crate) async fn read<T>(&self, path: &DocumentPath) -> RequestResult<WithId<T>>
    where
        T: DeserializeOwned + HasId<IdType = String>,
    {
        self.store
            .get(path)
            .await?
            .ok_or(RequestError::NotFound)
            .and_then(|snapshot| decode(&snapshot))
    }

    pub async fn assignment(
        &self,
        incident: &Id<EmergencyRequest>,
    ) -> RequestResult<WithId<Assignment>> {
        self.read(&assignment_path(incident)).await
    }
}

/// Operations scoped to the fleet of a single provider.
#[derive(Debug, Clone)]
pub struct ProviderClient<S>
where
    S: DocumentStore,
{
    pub(crate) client: Client<S>,
    pub(crate) provider: Id<Provider>,
    pub(crate) user: CurrentUser,
}

impl<S> ProviderClient<S>
where
    S: DocumentStore,
{
    pub fn provider_id(&self) -> &Id<Provider> {
        &self.provider
    }

    pub fn user(&self) -> &CurrentUser {
        &self.user
    }

    pub(crate) fn store(&self) -> &S {
        &self.client.store
    }
}

pub(crate) fn decode<T>(snapshot: &DocumentSnapshot) -> RequestResult<WithId<T>>
where
    T: DeserializeOwned + HasId<IdType = String>,
{
    Ok(WithId::new(Id::new(snapshot.id().to_owned()), snapshot.decode()?))
}

/// Decodes a query result, leaving out documents that do not match the
/// expected shape.
pub(crate) fn decode_all<T>(snapshots: Vec<DocumentSnapshot>) -> Vec<WithId<T>>
where
    T: DeserializeOwned + HasId<IdType = String>,
{
    snapshots
        .iter()
        .filter_map(|snapshot| match decode(snapshot) {
            Ok(value) => Some(value),
            Err(why) => {
                log::warn!("skipping malformed document {}: {}", snapshot.path, why);
                None
            }
        })
        .collect()
}

pub(crate) fn document(value: Value) -> RequestResult<Document> {
    Ok(to_document(&value)?)
}

pub(crate) fn json<T: Serialize>(value: &T) -> RequestResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// A typed live query. Each value is the complete current result.
#[derive(Debug)]
pub struct LiveView<T> {
    subscription: Subscription,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> LiveView<T>
where
    T: DeserializeOwned + HasId<IdType = String> + 'static,
{
    pub(crate) fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            _phantom: PhantomData,
        }
    }

    pub fn current(&self) -> Vec<WithId<T>> {
        decode_all(self.subscription.current())
    }

    /// Waits until the result changes and returns the new result.
    pub async fn changed(&mut self) -> RequestResult<Vec<WithId<T>>> {
        Ok(decode_all(self.subscription.changed().await?))
    }

    pub fn into_stream(self) -> impl Stream<Item = Vec<WithId<T>>> {
        self.subscription.into_stream().map(decode_all::<T>)
    }
}
