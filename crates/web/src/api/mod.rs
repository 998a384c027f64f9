use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, on},
    Json, Router,
};
use serde_json::json;

pub mod v1;

use crate::{
    common::{route_not_found, METHOD_FILTER_ALL},
    WebState,
};

macro_rules! resource {
    ($($arg:tt)*) => {
        format!("/api{}", format_args!($($arg)*))
    };
}
pub(crate) use resource;

pub fn routes(state: WebState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .nest_service("/v1", v1::routes(state.clone()))
        .with_state(state)
        .fallback_service(on(METHOD_FILTER_ALL, route_not_found))
}

/// Answers `pong!` while the document store is reachable.
async fn ping(State(WebState { dispatch_client, .. }): State<WebState>) -> impl IntoResponse {
    match dispatch_client.store.subscriber_count().await {
        Ok(subscriptions) => (
            StatusCode::OK,
            Json(json!({
                "message": "pong!",
                "liveSubscriptions": subscriptions,
            })),
        ),
        Err(why) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "message": format!("document store unavailable: {}", why),
            })),
        ),
    }
}
