//! Binary entrypoint. Grounded on `skynet-gateway::main` — tracing init,
//! config load, router assembly, `axum::serve`.

mod app;
mod connection_registry;
mod demo;
mod http;
mod panel;
mod ws;

use std::net::SocketAddr;

use conduit_core::ConduitConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ConduitConfig::load(None)?;
    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;

    let node_id = uuid::Uuid::new_v4().to_string();
    let state = app::AppState::new(config, node_id)?;
    let router = app::build_router(state);

    tracing::info!(%addr, "conduit-gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
