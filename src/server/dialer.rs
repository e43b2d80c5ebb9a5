// src/server/dialer.rs

//! Static worker discovery: the gateway dials each configured worker listener and
//! keeps the link up.

use super::io_pool::IoPool;
use crate::connection::ConnectionHandler;
use crate::core::GatewayError;
use crate::core::reconnect::{ReconnectBackoff, connect_with_timeout};
use crate::core::state::ServerState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// A link that stayed up at least this long counts as healthy and resets the backoff.
const STABLE_LINK: Duration = Duration::from_secs(30);

/// Keeps one outbound link to a worker listener alive.
///
/// A dialed connection takes the same path as an accepted one; the worker registers
/// itself with its first frame.
pub struct WorkerDialer {
    addr: String,
    state: Arc<ServerState>,
    io_pool: Arc<IoPool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerDialer {
    pub fn new(
        addr: String,
        state: Arc<ServerState>,
        io_pool: Arc<IoPool>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            addr,
            state,
            io_pool,
            shutdown_tx,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Worker dialer started for {}.", self.addr);
        let mut backoff = ReconnectBackoff::default();

        loop {
            tokio::select! {
                result = self.link_cycle() => {
                    match result {
                        Ok(uptime) if uptime >= STABLE_LINK => {
                            info!("Link to worker at {} closed. Redialing...", self.addr);
                            backoff.reset();
                        }
                        Ok(_) => {
                            info!("Link to worker at {} closed early. Redialing...", self.addr)
                        }
                        Err(e) => warn!("Dial to worker at {} failed: {}", self.addr, e),
                    }

                    let wait_time = backoff.next_delay();
                    debug!("Will redial {} in {:?}", self.addr, wait_time);
                    tokio::select! {
                        _ = tokio::time::sleep(wait_time) => {}
                        _ = shutdown_rx.recv() => {
                            info!("Worker dialer for {} shutting down during backoff.", self.addr);
                            return;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Worker dialer for {} shutting down.", self.addr);
                    return;
                }
            }
        }
    }

    /// Dials once and runs the link to completion on an I/O worker. Returns how long
    /// the link was up.
    async fn link_cycle(&self) -> Result<Duration, GatewayError> {
        let timeout = self.state.config.workers.connect_timeout;
        debug!("Dialing worker at {} (timeout {:?}).", self.addr, timeout);
        let stream = connect_with_timeout(&self.addr, timeout).await?;
        let peer = stream.peer_addr()?;
        let socket = stream.into_std()?;
        info!("Connected to worker listener at {}.", peer);

        let started = Instant::now();
        let handler = ConnectionHandler::new(
            socket,
            peer,
            self.state.clone(),
            self.shutdown_tx.subscribe(),
        );
        let link = self.io_pool.next_handle().spawn(handler.run());
        match link.await {
            Ok(result) => result?,
            Err(e) => {
                return Err(GatewayError::Internal(format!(
                    "worker link task failed: {e}"
                )));
            }
        }
        Ok(started.elapsed())
    }
}
