// src/server/initialization.rs

//! Builds the gateway's shared state, binds the listener and starts the I/O pool.

use super::context::ServerContext;
use super::io_pool::IoPool;
use crate::config::{Config, DiscoveryMode};
use crate::core::state::{LogReloadHandle, ServerState};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all gateway components before starting the main loop.
pub async fn setup(
    config: Config,
    log_reload_handle: Option<LogReloadHandle>,
) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    let local_addr = listener.local_addr()?;
    info!("Tilegate gateway listening on {}", local_addr);

    let connection_permits = Arc::new(Semaphore::new(config.max_clients));
    let io_pool = Arc::new(IoPool::start(config.io_workers)?);

    let state = ServerState::initialize(config, log_reload_handle);
    info!("Gateway state initialized.");

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        connection_permits,
        io_pool,
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!(
        "Gateway configured with {} I/O workers, max {} clients, {}-byte frames.",
        config.io_workers, config.max_clients, config.max_frame_size
    );
    info!(
        "Idle sessions expire after {:?} (swept every {:?}).",
        config.liveness.idle_timeout, config.liveness.sweep_interval
    );
    match config.workers.discovery {
        DiscoveryMode::Registration => info!("Workers register by dialing the gateway."),
        DiscoveryMode::Static => info!(
            "Static worker discovery: dialing {} worker(s).",
            config.workers.addrs.len()
        ),
    }
    if config.console_secret.is_none() {
        warn!("WARNING: No 'console_secret' is set. Any peer can register as an admin console.");
    }
}
