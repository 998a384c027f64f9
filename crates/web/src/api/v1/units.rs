use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Path, State},
    http::{Method, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Extension, Json, Router,
};
use dispatch::{Client, ProviderClient, RequestResult};
use document_store::MemoryStore;
use futures::stream::Stream;
use model::{
    identity::CurrentUser,
    unit::{EmergencyUnit, NewUnit, UnitPatch},
    WithId,
};
use serde::Serialize;
use tokio_stream::StreamExt as _;
use utility::{id::Id, let_also::LetAlso};

use crate::{
    common::{schema, HateoasResult, RouteErrorResponse, RouteResult, VecResponse},
    hateoas,
    middleware::{base_url::BaseUrl, identity::Identity},
    WebState,
};

macro_rules! resource {
    ($($arg:tt)*) => {
        crate::api::v1::resource!("/providers{}", format_args!($($arg)*))
    };
}
pub(crate) use resource;

pub(crate) fn routes() -> Router<WebState> {
    Router::new()
        .route("/:provider_id/units/schema", get(schema::<EmergencyUnit>))
        .route("/:provider_id/units/live", get(live_units))
        .route(
            "/:provider_id/units/candidates/:incident_id",
            get(get_candidates),
        )
        .route(
            "/:provider_id/units/:unit_id",
            get(get_unit).patch(update_unit).delete(delete_unit),
        )
        .route("/:provider_id/units", get(get_units).post(add_unit))
}

pub(crate) fn fleet(
    client: &Client<MemoryStore>,
    user: &CurrentUser,
    provider_id: String,
) -> RequestResult<ProviderClient<MemoryStore>> {
    client.provider(user, Id::new(provider_id))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FleetEvent {
    units: Vec<WithId<EmergencyUnit>>,
}

async fn get_units(
    OriginalUri(original_uri): OriginalUri,
    Path(provider_id): Path<String>,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<VecResponse<hateoas::Response<WithId<EmergencyUnit>>>> {
    let units = async {
        fleet(&dispatch_client, &user, provider_id)?
            .unit_list()
            .await
    };
    units
        .await
        .map(|units| {
            units
                .into_iter()
                .map(|unit| unit_hateoas(unit, base_url.clone()))
                .collect::<Vec<_>>()
                .let_owned(|data| VecResponse::new(data).hateoas().json())
        })
        .map_err(|why: dispatch::RequestError| {
            RouteErrorResponse::from(why)
                .with_method(&Method::GET)
                .with_uri(original_uri.path())
        })
}

/// The fleet as server sent events. Every change of the unit list is pushed
/// as a whole, starting with the current list.
async fn live_units(
    OriginalUri(original_uri): OriginalUri,
    Path(provider_id): Path<String>,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
) -> RouteResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let error = |why: dispatch::RequestError| {
        RouteErrorResponse::from(why)
            .with_method(&Method::GET)
            .with_uri(original_uri.path())
    };
    let fleet = fleet(&dispatch_client, &user, provider_id).map_err(error)?;
    let view = fleet.units().await.map_err(error)?;
    log::info!(
        "user {} follows the fleet of provider {}",
        user.id,
        fleet.provider_id()
    );

    let stream = view
        .into_stream()
        .map(|units| Event::default().event("units").json_data(FleetEvent { units }));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn get_unit(
    OriginalUri(original_uri): OriginalUri,
    Path((provider_id, unit_id)): Path<(String, String)>,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<WithId<EmergencyUnit>> {
    let unit = async {
        fleet(&dispatch_client, &user, provider_id)?
            .unit(&Id::new(unit_id))
            .await
    };
    unit.await
        .map(|unit| unit_hateoas(unit, base_url).json())
        .map_err(|why| {
            RouteErrorResponse::from(why)
                .with_method(&Method::GET)
                .with_uri(original_uri.path())
        })
}

async fn add_unit(
    OriginalUri(original_uri): OriginalUri,
    Path(provider_id): Path<String>,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(unit): Json<NewUnit>,
) -> RouteResult<(StatusCode, Json<hateoas::Response<WithId<EmergencyUnit>>>)> {
    let added = async {
        let fleet = fleet(&dispatch_client, &user, provider_id)?;
        let id = fleet.add_unit(unit).await?;
        fleet.unit(&id).await
    };
    added
        .await
        .map(|unit| (StatusCode::CREATED, unit_hateoas(unit, base_url).json()))
        .map_err(|why| {
            RouteErrorResponse::from(why)
                .with_method(&Method::POST)
                .with_uri(original_uri.path())
        })
}

async fn update_unit(
    OriginalUri(original_uri): OriginalUri,
    Path((provider_id, unit_id)): Path<(String, String)>,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(patch): Json<UnitPatch>,
) -> HateoasResult<WithId<EmergencyUnit>> {
    let updated = async {
        let fleet = fleet(&dispatch_client, &user, provider_id)?;
        let id = Id::new(unit_id);
        fleet.update_unit(&id, patch).await?;
        fleet.unit(&id).await
    };
    updated
        .await
        .map(|unit| unit_hateoas(unit, base_url).json())
        .map_err(|why| {
            RouteErrorResponse::from(why)
                .with_method(&Method::PATCH)
                .with_uri(original_uri.path())
        })
}

async fn delete_unit(
    OriginalUri(original_uri): OriginalUri,
    Path((provider_id, unit_id)): Path<(String, String)>,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
) -> RouteResult<StatusCode> {
    let deleted = async {
        fleet(&dispatch_client, &user, provider_id)?
            .delete_unit(&Id::new(unit_id))
            .await
    };
    deleted
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|why| {
            RouteErrorResponse::from(why)
                .with_method(&Method::DELETE)
                .with_uri(original_uri.path())
        })
}

/// Available units for an incident, the best suited first.
async fn get_candidates(
    OriginalUri(original_uri): OriginalUri,
    Path((provider_id, incident_id)): Path<(String, String)>,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<VecResponse<hateoas::Response<WithId<EmergencyUnit>>>> {
    let candidates = async {
        fleet(&dispatch_client, &user, provider_id)?
            .candidate_units(&Id::new(incident_id))
            .await
    };
    candidates
        .await
        .map(|units| {
            units
                .into_iter()
                .map(|unit| unit_hateoas(unit, base_url.clone()))
                .collect::<Vec<_>>()
                .let_owned(|data| VecResponse::new(data).hateoas().json())
        })
        .map_err(|why| {
            RouteErrorResponse::from(why)
                .with_method(&Method::GET)
                .with_uri(original_uri.path())
        })
}

pub(crate) fn unit_hateoas(
    unit: WithId<EmergencyUnit>,
    base_url: Arc<BaseUrl>,
) -> hateoas::Response<WithId<EmergencyUnit>> {
    let provider = unit.content.provider_id.raw();
    let id = unit.id.raw();
    let incident = unit
        .content
        .current_incident_id
        .as_ref()
        .map(|incident| super::incidents::resource!("/{}", incident.raw()));
    hateoas::Response::builder(unit, base_url)
        .link("self", resource!("/{}/units/{}", provider, id))
        .link("fleet", resource!("/{}/units", provider))
        .link_option("incident", incident)
        .build()
}
