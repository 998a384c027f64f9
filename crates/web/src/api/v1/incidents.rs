use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::{Method, StatusCode},
    routing::{get, on},
    Extension, Json, Router,
};
use dispatch::{client::incident_path, intake::ReportedLocation, LocationError};
use model::{
    audit::AuditEntry,
    incident::{EmergencyRequest, IncidentStatus, IntakeForm, Location},
    triage::TriageSuggestion,
    WithId,
};
use serde::{Deserialize, Serialize};
use utility::{id::Id, let_also::LetAlso};

use crate::{
    common::{
        route_not_found, schema, HateoasResult, RouteErrorResponse, RouteResult, VecResponse,
        METHOD_FILTER_ALL,
    },
    hateoas,
    middleware::{base_url::BaseUrl, identity::Identity},
    WebState,
};

macro_rules! resource {
    ($($arg:tt)*) => {
        crate::api::v1::resource!("/incidents{}", format_args!($($arg)*))
    };
}
pub(crate) use resource;

pub(crate) fn routes(state: WebState) -> Router {
    Router::new()
        .route("/schema", get(schema::<EmergencyRequest>))
        .route("/form/schema", get(schema::<IntakeForm>))
        .route("/triage", get(get_pending_triage))
        .route("/:id", get(get_incident))
        .route("/:id/triage", get(get_incident_triage))
        .route("/:id/audit", get(get_incident_audit))
        .route("/", get(get_incidents).post(submit_incident))
        .with_state(state)
        .fallback_service(on(METHOD_FILTER_ALL, route_not_found))
}

/// Why the reporting device has no position.
#[derive(Debug, Clone, Copy, Deserialize)]
enum DeviceLocationError {
    PermissionDenied,
    Unavailable,
    Timeout,
}

impl From<DeviceLocationError> for LocationError {
    fn from(value: DeviceLocationError) -> Self {
        match value {
            DeviceLocationError::PermissionDenied => LocationError::PermissionDenied,
            DeviceLocationError::Unavailable => LocationError::Unavailable,
            DeviceLocationError::Timeout => LocationError::Timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionDto {
    #[serde(flatten)]
    form: IntakeForm,
    location: Option<Location>,
    location_error: Option<DeviceLocationError>,
}

impl SubmissionDto {
    fn reported_location(&self) -> ReportedLocation {
        match (self.location, self.location_error) {
            (_, Some(why)) => ReportedLocation::failed(why.into()),
            (Some(location), None) => ReportedLocation::fix(location),
            (None, None) => ReportedLocation::failed(LocationError::Unavailable),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedDto {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IncidentsQuery {
    status: Option<IncidentStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriageQuery {
    /// Ask the service again instead of answering from the cache.
    #[serde(default)]
    refresh: bool,
    /// Fail instead of answering with the placeholder.
    #[serde(default)]
    strict: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriageDto {
    incident_id: String,
    #[serde(flatten)]
    suggestion: TriageSuggestion,
}

async fn submit_incident(
    OriginalUri(original_uri): OriginalUri,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(submission): Json<SubmissionDto>,
) -> RouteResult<(StatusCode, Json<hateoas::Response<CreatedDto>>)> {
    let location = submission.reported_location();
    let id = dispatch_client
        .submit(&user, &location, submission.form)
        .await
        .map_err(|why| {
            RouteErrorResponse::from(why)
                .with_method(&Method::POST)
                .with_uri(original_uri.path())
        })?;

    let response = hateoas::Response::builder(CreatedDto { id: id.raw() }, base_url)
        .link("self", resource!("/{}", id.raw()))
        .link("triage", resource!("/{}/triage", id.raw()))
        .build();
    Ok((StatusCode::CREATED, response.json()))
}

async fn get_incidents(
    OriginalUri(original_uri): OriginalUri,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
    Query(params): Query<IncidentsQuery>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<VecResponse<hateoas::Response<WithId<EmergencyRequest>>>> {
    dispatch_client
        .incident_list(&user, params.status)
        .await
        .map(|incidents| {
            incidents
                .into_iter()
                .map(|incident| incident_hateoas(incident, base_url.clone()))
                .collect::<Vec<_>>()
                .let_owned(|data| VecResponse::new(data).hateoas().json())
        })
        .map_err(|why| {
            RouteErrorResponse::from(why)
                .with_method(&Method::GET)
                .with_uri(original_uri.path())
        })
}

async fn get_incident(
    OriginalUri(original_uri): OriginalUri,
    Path(id): Path<String>,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<WithId<EmergencyRequest>> {
    dispatch_client
        .incident(&user, &Id::new(id))
        .await
        .map(|incident| incident_hateoas(incident, base_url).json())
        .map_err(|why| {
            RouteErrorResponse::from(why)
                .with_method(&Method::GET)
                .with_uri(original_uri.path())
        })
}

async fn get_incident_triage(
    original_uri: OriginalUri,
    Path(id): Path<String>,
    Identity(user): Identity,
    State(WebState {
        dispatch_client,
        triage,
    }): State<WebState>,
    Query(params): Query<TriageQuery>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<TriageDto> {
    let error = |why: dispatch::RequestError| {
        RouteErrorResponse::from(why).with_request(&Method::GET, &original_uri)
    };
    let incident = dispatch_client
        .incident(&user, &Id::new(id))
        .await
        .map_err(error)?;
    if params.refresh {
        triage.forget(&incident.id).await;
    }

    let suggestion = if params.strict {
        triage
            .try_suggest(&incident)
            .await
            .map_err(|why| error(why.into()))?
    } else {
        triage.suggest(&incident).await
    };

    let id = incident.id.raw();
    Ok(hateoas::Response::builder(
        TriageDto {
            incident_id: id.clone(),
            suggestion,
        },
        base_url,
    )
    .link("self", resource!("/{}/triage", id))
    .link("refresh", resource!("/{}/triage?refresh=true", id))
    .link("incident", resource!("/{}", id))
    .build()
    .json())
}

/// Suggestions for every pending incident the user can see, requested
/// concurrently.
async fn get_pending_triage(
    OriginalUri(original_uri): OriginalUri,
    Identity(user): Identity,
    State(WebState {
        dispatch_client,
        triage,
    }): State<WebState>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<VecResponse<hateoas::Response<TriageDto>>> {
    let pending = dispatch_client
        .incident_list(&user, Some(IncidentStatus::Pending))
        .await
        .map_err(|why| {
            RouteErrorResponse::from(why)
                .with_method(&Method::GET)
                .with_uri(original_uri.path())
        })?;

    Ok(triage
        .suggest_all(&pending)
        .await
        .into_iter()
        .map(|(id, suggestion)| {
            hateoas::Response::builder(
                TriageDto {
                    incident_id: id.raw(),
                    suggestion,
                },
                base_url.clone(),
            )
            .link("incident", resource!("/{}", id.raw()))
            .build()
        })
        .collect::<Vec<_>>()
        .let_owned(|data| VecResponse::new(data).hateoas().json()))
}

async fn get_incident_audit(
    OriginalUri(original_uri): OriginalUri,
    Path(id): Path<String>,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
) -> RouteResult<Json<VecResponse<WithId<AuditEntry>>>> {
    let id = Id::<EmergencyRequest>::new(id);
    let trail = async {
        dispatch_client.incident(&user, &id).await?;
        dispatch_client.audit_trail(&incident_path(&id)).await
    };
    trail
        .await
        .map(|entries| VecResponse::new(entries).json())
        .map_err(|why| {
            RouteErrorResponse::from(why)
                .with_method(&Method::GET)
                .with_uri(original_uri.path())
        })
}

pub(crate) fn incident_hateoas(
    incident: WithId<EmergencyRequest>,
    base_url: Arc<BaseUrl>,
) -> hateoas::Response<WithId<EmergencyRequest>> {
    let id = incident.id.raw();
    let unit = match (
        &incident.content.assigned_provider_id,
        &incident.content.assigned_unit_id,
    ) {
        (Some(provider), Some(unit)) => Some(super::units::resource!(
            "/{}/units/{}",
            provider.raw(),
            unit.raw()
        )),
        _ => None,
    };
    hateoas::Response::builder(incident, base_url)
        .link("self", resource!("/{}", id))
        .link("triage", resource!("/{}/triage", id))
        .link("audit", resource!("/{}/audit", id))
        .link_option("unit", unit)
        .build()
}
