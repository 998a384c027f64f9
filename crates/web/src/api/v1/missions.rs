use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Path, State},
    http::Method,
    routing::{get, post},
    Extension, Json, Router,
};
use dispatch::RequestError;
use model::{
    assignment::Assignment,
    dispatch::{DispatchEvent, Transition},
    incident::{EmergencyRequest, IncidentStatus},
    unit::UnitStatus,
    WithId,
};
use serde::{Deserialize, Serialize};
use utility::id::Id;

use crate::{
    common::{HateoasResult, RouteErrorResponse},
    hateoas,
    middleware::{base_url::BaseUrl, identity::Identity},
    WebState,
};

use super::{incidents, units::fleet};

pub(crate) fn routes() -> Router<WebState> {
    Router::new()
        .route("/:provider_id/dispatch", post(dispatch_unit))
        .route(
            "/:provider_id/incidents/:incident_id/assignment",
            get(get_assignment),
        )
        .route(
            "/:provider_id/incidents/:incident_id/:event",
            post(apply_event),
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DispatchDto {
    incident_id: String,
    unit_id: String,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransitionDto {
    incident_id: String,
    event: DispatchEvent,
    incident_status: IncidentStatus,
    unit_status: Option<UnitStatus>,
}

impl TransitionDto {
    fn new(incident: &Id<EmergencyRequest>, event: DispatchEvent, transition: Transition) -> Self {
        Self {
            incident_id: incident.raw(),
            event,
            incident_status: transition.incident,
            unit_status: transition.unit,
        }
    }
}

async fn dispatch_unit(
    OriginalUri(original_uri): OriginalUri,
    Path(provider_id): Path<String>,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
    Json(request): Json<DispatchDto>,
) -> HateoasResult<TransitionDto> {
    let incident = Id::new(request.incident_id);
    let transition = async {
        fleet(&dispatch_client, &user, provider_id.clone())?
            .dispatch(&incident, &Id::new(request.unit_id))
            .await
    };
    transition
        .await
        .map(|transition| {
            transition_hateoas(
                TransitionDto::new(&incident, DispatchEvent::Dispatch, transition),
                &provider_id,
                base_url,
            )
            .json()
        })
        .map_err(|why| {
            RouteErrorResponse::from(why)
                .with_method(&Method::POST)
                .with_uri(original_uri.path())
        })
}

/// Moves a mission along. Dispatching has its own route since it needs a
/// unit.
async fn apply_event(
    OriginalUri(original_uri): OriginalUri,
    Path((provider_id, incident_id, event)): Path<(String, String, String)>,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<TransitionDto> {
    let event = match DispatchEvent::from_name(&event) {
        Some(DispatchEvent::Dispatch) | None => {
            return Err(RouteErrorResponse::not_found(
                &Method::POST,
                original_uri.path(),
            ));
        }
        Some(event) => event,
    };

    let incident = Id::new(incident_id);
    let transition = async {
        fleet(&dispatch_client, &user, provider_id.clone())?
            .apply(event, &incident, None)
            .await
    };
    transition
        .await
        .map(|transition| {
            transition_hateoas(
                TransitionDto::new(&incident, event, transition),
                &provider_id,
                base_url,
            )
            .json()
        })
        .map_err(|why| {
            RouteErrorResponse::from(why)
                .with_method(&Method::POST)
                .with_uri(original_uri.path())
        })
}

async fn get_assignment(
    OriginalUri(original_uri): OriginalUri,
    Path((provider_id, incident_id)): Path<(String, String)>,
    Identity(user): Identity,
    State(WebState { dispatch_client, .. }): State<WebState>,
    Extension(base_url): Extension<Arc<BaseUrl>>,
) -> HateoasResult<WithId<Assignment>> {
    let assignment = async {
        let fleet = fleet(&dispatch_client, &user, provider_id.clone())?;
        let assignment = dispatch_client.assignment(&Id::new(incident_id)).await?;
        if assignment.content.provider_id != *fleet.provider_id() {
            return Err(RequestError::Forbidden);
        }
        Ok(assignment)
    };
    assignment
        .await
        .map(|assignment| {
            let incident = assignment.content.incident_id.raw();
            let unit = assignment.content.unit_id.raw();
            hateoas::Response::builder(assignment, base_url)
                .link(
                    "self",
                    super::units::resource!("/{}/incidents/{}/assignment", provider_id, incident),
                )
                .link("incident", incidents::resource!("/{}", incident))
                .link(
                    "unit",
                    super::units::resource!("/{}/units/{}", provider_id, unit),
                )
                .build()
                .json()
        })
        .map_err(|why| {
            RouteErrorResponse::from(why)
                .with_method(&Method::GET)
                .with_uri(original_uri.path())
        })
}

fn transition_hateoas(
    transition: TransitionDto,
    provider_id: &str,
    base_url: Arc<BaseUrl>,
) -> hateoas::Response<TransitionDto> {
    let incident = transition.incident_id.clone();
    let next = [
        DispatchEvent::Arrive,
        DispatchEvent::Transport,
        DispatchEvent::Deliver,
        DispatchEvent::Complete,
        DispatchEvent::Cancel,
    ]
    .into_iter()
    .filter(|event| event.incident_sources().contains(&transition.incident_status))
    .filter(|event| {
        transition
            .unit_status
            .map_or(true, |unit| event.unit_sources().contains(&unit))
    })
    .collect::<Vec<_>>();

    next.into_iter().fold(
        hateoas::Response::builder(transition, base_url)
            .link("incident", incidents::resource!("/{}", incident))
            .link(
                "assignment",
                super::units::resource!("/{}/incidents/{}/assignment", provider_id, incident),
            ),
        |builder, event| {
            builder.action(
                event.as_str(),
                super::units::resource!("/{}/incidents/{}/{}", provider_id, incident, event),
                &Method::POST,
            )
        },
    )
    .build()
}
