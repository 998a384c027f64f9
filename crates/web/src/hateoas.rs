use std::sync::Arc;

use axum::{http::Method, Json};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::middleware::base_url::BaseUrl;

/// A related resource, or with a `method` an operation the client may
/// perform next (e.g. moving a mission along).
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Link {
    pub rel: String,
    pub href: String,
    pub method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Response<T> {
    #[serde(flatten)]
    pub content: T,
    pub links: Vec<Link>,
}

impl<T> Response<T> {
    pub fn new(content: T) -> Self {
        Self {
            content,
            links: vec![],
        }
    }

    pub fn builder(content: T, base_url: Arc<BaseUrl>) -> ResponseBuilder<T> {
        ResponseBuilder {
            response: Response::new(content),
            base_url,
        }
    }

    pub fn json(self) -> Json<Self> {
        Json(self)
    }
}

/// Collects links relative to the API root and makes them absolute.
pub struct ResponseBuilder<T> {
    response: Response<T>,
    base_url: Arc<BaseUrl>,
}

impl<T> ResponseBuilder<T> {
    fn push(
        mut self,
        rel: impl Into<String>,
        path: impl Into<String>,
        method: Option<&Method>,
    ) -> Self {
        let href = self.base_url.full_url(path);
        self.response.links.push(Link {
            rel: rel.into(),
            href,
            method: method.map(Method::to_string),
        });
        self
    }

    pub fn link(self, rel: impl Into<String>, path: impl Into<String>) -> Self {
        self.push(rel, path, None)
    }

    /// Links only if there is something to link to, e.g. the unit of an
    /// incident that was not dispatched yet.
    pub fn link_option(self, rel: impl Into<String>, path: Option<impl Into<String>>) -> Self {
        match path {
            Some(path) => self.link(rel, path),
            None => self,
        }
    }

    pub fn action(self, rel: impl Into<String>, path: impl Into<String>, method: &Method) -> Self {
        self.push(rel, path, Some(method))
    }

    pub fn build(self) -> Response<T> {
        self.response
    }
}
