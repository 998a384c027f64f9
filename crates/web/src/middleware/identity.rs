//! The identity provider sits in front of the API and hands the
//! authenticated user over in the `x-user-id` and `x-user-role` headers.

use std::iter;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use axum_extra::TypedHeader;
use headers::{Header, HeaderName, HeaderValue};
use model::identity::{CurrentUser, Role};

use crate::common::RouteErrorResponse;

static X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
static X_USER_ROLE: HeaderName = HeaderName::from_static("x-user-role");

fn single_value<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let value = values
        .next()
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(headers::Error::invalid)?;
    match values.next() {
        Some(_) => Err(headers::Error::invalid()),
        None => Ok(value),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl Header for UserId {
    fn name() -> &'static HeaderName {
        &X_USER_ID
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        single_value(values).map(|value| UserId(value.to_owned()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(value) = HeaderValue::from_str(&self.0) {
            values.extend(iter::once(value));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRole(pub Role);

impl Header for UserRole {
    fn name() -> &'static HeaderName {
        &X_USER_ROLE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        single_value(values)?
            .parse::<Role>()
            .map(UserRole)
            .map_err(|_| headers::Error::invalid())
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        values.extend(iter::once(HeaderValue::from_static(self.0.as_str())));
    }
}

/// Extracts the current user from the identity headers. Requests without
/// them are rejected with `401`.
#[derive(Debug, Clone)]
pub struct Identity(pub CurrentUser);

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = RouteErrorResponse;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let id = TypedHeader::<UserId>::from_request_parts(parts, state).await;
        let role = TypedHeader::<UserRole>::from_request_parts(parts, state).await;
        match (id, role) {
            (Ok(TypedHeader(UserId(id))), Ok(TypedHeader(UserRole(role)))) => {
                Ok(Identity(CurrentUser::new(id, role)))
            }
            (Err(why), _) | (_, Err(why)) => Err(RouteErrorResponse::new(StatusCode::UNAUTHORIZED)
                .with_method(&parts.method)
                .with_uri(parts.uri.path())
                .with_message("Missing or invalid identity headers.")
                .with_detailed_information(why.to_string())),
        }
    }
}
