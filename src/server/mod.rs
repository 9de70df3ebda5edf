// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, Registry, reload};

mod context;
mod edge_api;
mod initialization;
mod spawner;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Boots every coordinator component and the edge API, then runs until a
/// shutdown signal arrives. Shutdown is reverse order with a bounded
/// deadline: the shutdown broadcast tells every long-running task to stop,
/// and the edge API's `JoinSet` is drained with a timeout so one wedged
/// task can't hang the process indefinitely.
pub async fn run(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, Registry>>,
) -> Result<()> {
    let mut ctx = initialization::setup(config, log_reload_handle).await?;
    spawner::spawn_all(&mut ctx).await?;

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping");

    let _ = ctx.shutdown_tx.send(());

    let drain = async {
        while ctx.background_tasks.join_next().await.is_some() {}
    };
    if tokio::time::timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
        tracing::warn!(
            "background tasks did not shut down within {SHUTDOWN_DEADLINE:?}, exiting anyway"
        );
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
