use axum::{
    extract::{OriginalUri, Query, Request},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::MethodFilter,
    Json,
};
use dispatch::RequestError;
use document_store::StoreError;
use model::ExampleData;
use schemars::{schema_for, schema_for_value, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::hateoas;

pub type RouteResult<O> = Result<O, RouteErrorResponse>;
pub type HateoasResult<O> = RouteResult<Json<hateoas::Response<O>>>;

/// A `MethodFilter` that matches all http methods.
pub(crate) const METHOD_FILTER_ALL: MethodFilter = MethodFilter::GET
    .or(MethodFilter::POST)
    .or(MethodFilter::PATCH)
    .or(MethodFilter::PUT)
    .or(MethodFilter::DELETE);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VecResponse<T> {
    pub data: Vec<T>,
}

impl<T> VecResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data }
    }

    pub fn hateoas(self) -> hateoas::Response<Self> {
        hateoas::Response::new(self)
    }

    pub fn json(self) -> Json<Self> {
        Json(self)
    }
}

// - Services returning commonly used responses -

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SchemaParams {
    #[serde(default = "Default::default")]
    example_data: bool,
}

pub(crate) async fn schema<T: ExampleData + JsonSchema + Serialize>(
    Query(params): Query<SchemaParams>,
) -> impl IntoResponse {
    if params.example_data {
        Json(schema_for_value!(T::example_data()))
    } else {
        Json(schema_for!(T))
    }
}

pub(crate) async fn route_not_implemented(
    OriginalUri(original_uri): OriginalUri,
    req: Request,
) -> impl IntoResponse {
    RouteErrorResponse::not_implemented(req.method(), original_uri.path())
}

pub(crate) async fn route_not_found(
    OriginalUri(original_uri): OriginalUri,
    req: Request,
) -> impl IntoResponse {
    RouteErrorResponse::not_found(req.method(), original_uri.path())
}

// - Commonly used responeses -

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteErrorResponse {
    #[serde(skip)]
    pub status_code: StatusCode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_uri: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_information: Option<String>,
}

impl RouteErrorResponse {
    pub fn new(status_code: StatusCode) -> Self {
        Self {
            status_code,
            http_method: None,
            requested_uri: None,
            message: None,
            detailed_information: None,
        }
    }

    pub fn not_implemented(method: &Method, uri: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_IMPLEMENTED)
            .with_method(method)
            .with_uri(uri)
            .with_default_message()
    }

    pub fn not_found(method: &Method, uri: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND)
            .with_method(method)
            .with_uri(uri)
            .with_default_message()
    }

    pub fn with_method(mut self, method: &Method) -> Self {
        self.http_method = Some(method.to_string());
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.requested_uri = Some(uri.into());
        self
    }

    /// Attaches the method and path of the request that failed.
    pub fn with_request(self, method: &Method, uri: &OriginalUri) -> Self {
        self.with_method(method).with_uri(uri.0.path())
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_default_message(self) -> Self {
        let message = self
            .status_code
            .canonical_reason()
            .unwrap_or("unknown error");
        self.with_message(message)
    }

    pub fn with_detailed_information(mut self, message: impl Into<String>) -> Self {
        self.detailed_information = Some(message.into());
        self
    }
}

impl From<RequestError> for RouteErrorResponse {
    fn from(value: RequestError) -> Self {
        match value {
            RequestError::NotFound => Self::new(StatusCode::NOT_FOUND)
                .with_message("The requested item does not exist."),
            RequestError::Forbidden => Self::new(StatusCode::FORBIDDEN)
                .with_message("You are not allowed to access this item."),
            RequestError::Validation(why) => Self::new(StatusCode::UNPROCESSABLE_ENTITY)
                .with_message(format!("Invalid value for `{}`.", why.field))
                .with_detailed_information(why.message),
            RequestError::Location(why) => Self::new(StatusCode::UNPROCESSABLE_ENTITY)
                .with_message("The location of the emergency could not be determined.")
                .with_detailed_information(why.to_string()),
            RequestError::Precondition(why) => Self::new(StatusCode::CONFLICT)
                .with_message("The records changed, refresh and select again.")
                .with_detailed_information(why.to_string()),
            RequestError::Triage(why) => Self::new(StatusCode::BAD_GATEWAY)
                .with_message("No triage suggestion available.")
                .with_detailed_information(why.to_string()),
            RequestError::Store(StoreError::Unavailable(why)) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE)
                    .with_default_message()
                    .with_detailed_information(why)
            }
            RequestError::Store(other) => Self::new(StatusCode::INTERNAL_SERVER_ERROR)
                .with_message(format!("{}", other)),
        }
    }
}

impl IntoResponse for RouteErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (self.status_code, Json(self)).into_response()
    }
}
