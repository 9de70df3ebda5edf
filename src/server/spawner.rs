// src/server/spawner.rs

//! Spawns the edge API HTTP/WebSocket server, the coordinator's one
//! externally-reachable background task. Everything else (bus routing,
//! the consultation sweeper, the RFID adapter) is already running by the
//! time `AppState::initialize` returns.

use super::context::ServerContext;
use super::edge_api::{self, EdgeApiState};
use anyhow::{Context, Result};
use tracing::error;

pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let listener = ctx
        .listener
        .take()
        .context("edge API listener was already taken")?;
    let app = edge_api::router(EdgeApiState {
        app: ctx.state.clone(),
        log_reload: ctx.log_reload.clone(),
    });
    let mut shutdown_rx = ctx.shutdown_tx.subscribe();

    ctx.background_tasks.spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await;
        if let Err(e) = result {
            error!("edge API server exited with error: {e}");
        }
    });

    Ok(())
}
