use std::sync::Arc;

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::IntoResponse};

/// Public address of the API as seen by the client, honouring reverse proxy
/// headers. Used to build absolute links.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseUrl {
    proto: String,
    host: String,
    prefix: String,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

impl BaseUrl {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            proto: header(headers, "x-forwarded-proto")
                .unwrap_or("http")
                .to_owned(),
            host: header(headers, "x-forwarded-host")
                .or_else(|| header(headers, "host"))
                .unwrap_or("localhost")
                .to_owned(),
            prefix: header(headers, "x-forwarded-prefix")
                .unwrap_or("")
                .trim_end_matches('/')
                .to_owned(),
        }
    }

    pub fn full_url<S: Into<String>>(&self, path: S) -> String {
        format!("{}://{}{}{}", self.proto, self.host, self.prefix, path.into())
    }
}

pub async fn base_url_middleware(mut req: Request, next: Next) -> impl IntoResponse {
    let base_url = BaseUrl::from_headers(req.headers());
    req.extensions_mut().insert(Arc::new(base_url));
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn proxy_headers_win_over_host() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("10.0.0.4:8080"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("dispatch.example.org"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        headers.insert("x-forwarded-prefix", HeaderValue::from_static("/ems/"));
        assert_eq!(
            BaseUrl::from_headers(&headers).full_url("/api/v1/incidents"),
            "https://dispatch.example.org/ems/api/v1/incidents"
        );
    }

    #[test]
    fn falls_back_to_plain_host() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("localhost:8080"));
        assert_eq!(
            BaseUrl::from_headers(&headers).full_url("/api/ping"),
            "http://localhost:8080/api/ping"
        );
    }
}
