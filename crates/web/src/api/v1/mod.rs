use axum::{
    routing::{get, on},
    Router,
};

use crate::{
    common::{route_not_found, route_not_implemented, METHOD_FILTER_ALL},
    middleware::base_url::base_url_middleware,
    WebState,
};

mod incidents;
mod missions;
mod units;

macro_rules! resource {
    ($($arg:tt)*) => {
        crate::api::resource!("/v1{}", format_args!($($arg)*))
    };
}
pub(crate) use resource;

/// `base_url_middleware` is layered here once and covers the nested routers.
pub(crate) fn routes(state: WebState) -> Router {
    Router::new()
        .route("/", get(route_not_implemented))
        .nest_service("/incidents", incidents::routes(state.clone()))
        .nest_service("/providers", providers_routes(state.clone()))
        .layer(axum::middleware::from_fn(base_url_middleware))
        .with_state(state)
        .fallback_service(on(METHOD_FILTER_ALL, route_not_found))
}

/// Everything below `/providers/:providerId`, only open to the provider's
/// own dispatcher account.
fn providers_routes(state: WebState) -> Router {
    Router::new()
        .merge(units::routes())
        .merge(missions::routes())
        .with_state(state)
        .fallback_service(on(METHOD_FILTER_ALL, route_not_found))
}
