// src/server/context.rs

use crate::core::state::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing_subscriber::{EnvFilter, Registry, reload};

/// Holds everything required to run the edge API and the coordinator's
/// background tasks until shutdown.
pub struct ServerContext {
    pub state: Arc<AppState>,
    pub log_reload: Arc<reload::Handle<EnvFilter, Registry>>,
    pub listener: Option<TcpListener>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<()>,
}
