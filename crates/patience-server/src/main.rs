//! Patience engine server.

use patience_core::{EngineConfig, FileStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod protocol;
mod server;
mod worker;

use server::ServerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse address from env or use default
    let addr: SocketAddr = std::env::var("SERVER_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".into())
        .parse()?;

    let state_file =
        std::env::var("PATIENCE_STATE_FILE").unwrap_or_else(|_| "patience-state.json".into());
    let store = FileStore::open(&state_file)?;
    info!("Starting Patience server with state in {}...", state_file);

    let state = Arc::new(ServerState::new(Arc::new(store), EngineConfig::from_env()));

    server::run_server(addr, state).await
}
