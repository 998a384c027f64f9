use std::{io, sync::Arc};

use dispatch::{
    triage::{TriageAdvisor, TriageConfig},
    Client,
};
use document_store::MemoryStore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use web::{start_web_server, WebConfig, WebState};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    // request traces of the http layer
    let subscriber = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env());
    if let Err(why) = tracing::subscriber::set_global_default(subscriber) {
        log::warn!("request tracing disabled: {}", why);
    }

    let config = WebConfig::from_env().map_err(|why| io::Error::new(io::ErrorKind::InvalidInput, why))?;
    let triage = TriageAdvisor::from_config(&TriageConfig::from_env());

    // store
    let store = MemoryStore::start();

    // shutdown on ctrl-c
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(why) = tokio::signal::ctrl_c().await {
                log::error!("could not listen for ctrl-c: {}", why);
                return;
            }
            log::info!("shutting down");
            shutdown.cancel();
        }
    });

    // web server
    start_web_server(
        WebState {
            dispatch_client: Client::new(store),
            triage: Arc::new(triage),
        },
        &config,
        shutdown,
    )
    .await
}
