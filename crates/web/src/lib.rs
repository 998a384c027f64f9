pub use crate::common::RouteResult;

use std::{env, net::SocketAddr, sync::Arc};

use axum::{extract::FromRef, Router};
use dispatch::{triage::TriageAdvisor, Client};
use document_store::MemoryStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod common;
pub mod hateoas;
pub mod middleware;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

#[derive(Clone, FromRef)]
pub struct WebState {
    pub dispatch_client: Client<MemoryStore>,
    pub triage: Arc<TriageAdvisor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebConfig {
    pub bind_address: SocketAddr,
}

impl WebConfig {
    /// Reads `DISPATCH_BIND_ADDRESS`.
    pub fn from_env() -> Result<Self, String> {
        let raw = env::var("DISPATCH_BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_owned());
        raw.parse()
            .map(|bind_address| Self { bind_address })
            .map_err(|why| format!("DISPATCH_BIND_ADDRESS={}: {}", raw, why))
    }
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .nest_service("/api", api::routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Serves the API until `shutdown` is cancelled.
pub async fn start_web_server(
    state: WebState,
    config: &WebConfig,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.bind_address).await?;
    log::info!("listening on {}", config.bind_address);
    serve(listener, state, shutdown).await
}

pub async fn serve(
    listener: TcpListener,
    state: WebState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    log::info!("web server stopped");
    Ok(())
}
