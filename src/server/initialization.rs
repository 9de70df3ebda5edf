// src/server/initialization.rs

//! Builds the coordinator's component set and binds the edge API listener
//! before the main run loop starts.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::AppState;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::{EnvFilter, Registry, reload};

/// Initializes every component in coordinator order (persistence, audit
/// log, bus client, presence tracker, consultation engine, RFID adapter,
/// auth manager, admin operations — see [`AppState::initialize`]) and
/// binds the edge API's listening socket.
pub async fn setup(
    config: Config,
    log_reload: Arc<reload::Handle<EnvFilter, Registry>>,
) -> Result<ServerContext> {
    let (shutdown_tx, _) = broadcast::channel(16);

    let bind_host = config.server.host.clone();
    let bind_port = config.server.edge_api_port;
    let listener = TcpListener::bind((bind_host.as_str(), bind_port))
        .await
        .with_context(|| format!("failed to bind edge API on {bind_host}:{bind_port}"))?;
    info!("edge API listening on {bind_host}:{bind_port}");

    let state = AppState::initialize(config, &shutdown_tx)
        .await
        .context("failed to initialize coordinator components")?;

    Ok(ServerContext {
        state,
        log_reload,
        listener: Some(listener),
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}
