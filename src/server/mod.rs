// src/server/mod.rs

use crate::config::Config;
use crate::core::state::{LogReloadHandle, ServerState};
use anyhow::{Result, anyhow};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

mod connection_loop;
mod context;
mod dialer;
mod initialization;
mod io_pool;
mod metrics_server;
mod spawner;

pub use dialer::WorkerDialer;
pub use io_pool::IoPool;

/// The main gateway startup function, orchestrating all setup phases. Returns once a
/// SIGINT or SIGTERM has been handled and everything has shut down.
pub async fn run(config: Config, log_reload_handle: Option<LogReloadHandle>) -> Result<()> {
    let shutdown = shutdown_signal()?;

    // 1. Initialize gateway state, listener and the I/O pool.
    let mut server_context = initialization::setup(config, log_reload_handle).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context);

    // 3. Start the main connection acceptance loop. This runs until shutdown.
    connection_loop::run(server_context, shutdown).await;

    Ok(())
}

fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("Failed to register SIGINT handler: {}", e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("Failed to register SIGTERM handler: {}", e))?;
    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received."),
            _ = sigterm.recv() => info!("SIGTERM received."),
        }
    })
}

/// A gateway running in the background of the current runtime, stopped through
/// [`ServerHandle::shutdown`] instead of a signal.
pub struct ServerHandle {
    pub state: Arc<ServerState>,
    pub local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Runs the graceful shutdown sequence and waits for it to complete.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

/// Starts a gateway without installing signal handlers.
pub async fn spawn(config: Config) -> Result<ServerHandle> {
    let mut server_context = initialization::setup(config, None).await?;
    spawner::spawn_all(&mut server_context);

    let state = server_context.state.clone();
    let local_addr = server_context.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(connection_loop::run(server_context, async move {
        let _ = shutdown_rx.await;
    }));

    Ok(ServerHandle {
        state,
        local_addr,
        shutdown_tx,
        task,
    })
}
