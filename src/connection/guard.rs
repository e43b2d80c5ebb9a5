// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use crate::core::handler::handoff;
use crate::core::metrics;
use crate::core::protocol::KickReason;
use crate::core::state::{ServerState, SessionHandle, SessionRole};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Ensures a connection is unregistered exactly once, however its task ends:
/// peer EOF, socket error, eviction, idle expiry, shutdown, or the task being
/// dropped before it ever ran.
pub struct ConnectionGuard {
    state: Arc<ServerState>,
    handle: SessionHandle,
}

impl ConnectionGuard {
    pub(crate) fn new(state: Arc<ServerState>, handle: SessionHandle) -> Self {
        metrics::CONNECTED_SESSIONS.inc();
        Self { state, handle }
    }
}

impl Drop for ConnectionGuard {
    /// Removes the connection from the client map and from its role registry (only
    /// if the registry still points at this connection), then releases a player's
    /// worker.
    fn drop(&mut self) {
        metrics::CONNECTED_SESSIONS.dec();
        let conn_id = self.handle.conn_id();
        debug!(
            "ConnectionGuard dropping, cleaning up connection {} from {}",
            conn_id,
            self.handle.addr()
        );

        // Mark the handle closed first so nothing enqueues onto a dead session.
        self.handle.close(None);
        self.state.clients.remove(&conn_id);

        let Some(identity) = self.handle.identity() else {
            return;
        };
        match self.handle.role() {
            SessionRole::Player => {
                if handoff::drop_player(&self.state, identity, &self.handle, KickReason::Disconnect)
                {
                    info!("Player {} disconnected.", identity);
                }
            }
            SessionRole::Worker => {
                if self.state.workers.remove_if_current(identity, conn_id) {
                    info!("Worker {} disconnected.", identity);
                    metrics::REGISTERED_WORKERS.set(self.state.workers.len() as f64);
                    self.state.prune_console_routes(Instant::now());
                }
            }
            SessionRole::AdminConsole => {
                self.state.consoles.remove_if_current(identity, conn_id);
                self.state.prune_console_routes(Instant::now());
            }
            SessionRole::Unclassified => {}
        }
    }
}
