// src/core/tasks/liveness.rs

use crate::core::handler::handoff;
use crate::core::metrics;
use crate::core::protocol::{Envelope, KickReason, StatusCode};
use crate::core::state::{ServerState, SessionHandle, SessionRole};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions closed because their expiry deadline had passed.
    pub expired: usize,
    /// Registry entries removed because their connection had already closed.
    pub reaped: usize,
    /// Console relays dropped because the console went away.
    pub routes_pruned: usize,
}

/// A task that periodically closes idle sessions and removes registry entries for
/// connections that have gone away.
pub struct LivenessMonitorTask {
    state: Arc<ServerState>,
}

impl LivenessMonitorTask {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let period = self.state.config.liveness.sweep_interval;
        info!(
            "Liveness monitor started. Sweep interval: {:?}, idle timeout: {:?}",
            period, self.state.config.liveness.idle_timeout
        );
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.sweep(Instant::now());
                    if report != SweepReport::default() {
                        debug!("Liveness sweep: {:?}", report);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Liveness monitor shutting down.");
                    return;
                }
            }
        }
    }

    /// Runs one sweep as of `now`.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let expired: Vec<SessionHandle> = self
            .state
            .clients
            .iter()
            .filter(|entry| !entry.is_closed() && entry.activity().is_expired(now))
            .map(|entry| entry.value().clone())
            .collect();

        for handle in &expired {
            self.expire(handle);
        }
        if !expired.is_empty() {
            metrics::EXPIRED_SESSIONS_TOTAL.inc_by(expired.len() as f64);
            self.state.stats.add_expired(expired.len() as u64);
        }

        SweepReport {
            expired: expired.len(),
            reaped: self.reap_closed(),
            routes_pruned: self.state.prune_console_routes(now),
        }
    }

    fn expire(&self, handle: &SessionHandle) {
        match (handle.role(), handle.identity()) {
            (SessionRole::Player, Some(identity)) => {
                info!(
                    "Player {} idle since {:?}; closing {}.",
                    identity,
                    handle.activity().last_activity(),
                    handle.addr()
                );
                if !handoff::drop_player(&self.state, identity, handle, KickReason::Idle) {
                    handle.close(Some(Envelope::kickout(identity, KickReason::Idle)));
                }
            }
            (role, _) => {
                debug!(
                    "Closing idle {} connection {} from {}.",
                    role,
                    handle.conn_id(),
                    handle.addr()
                );
                handle.close(Some(Envelope::status(
                    StatusCode::NotRegistered,
                    "no registration before the idle timeout",
                )));
            }
        }
    }

    /// Removes entries for closed connections from every registry. A player removed
    /// here is released from its worker, since its own cleanup will no longer find
    /// itself registered.
    fn reap_closed(&self) -> usize {
        let players = self.state.players.reap_closed();
        for (identity, _) in &players {
            let released =
                handoff::release_affinity(&self.state, *identity, KickReason::Disconnect);
            if let Err(e) = released {
                warn!("Failed to release worker for player {}: {}", identity, e);
            }
        }
        let workers = self.state.workers.reap_closed();
        for (worker, _) in &workers {
            info!("Worker {} link is gone; removed from the pool.", worker);
        }
        let consoles = self.state.consoles.reap_closed();

        if !players.is_empty() || !workers.is_empty() {
            metrics::REGISTERED_PLAYERS.set(self.state.players.len() as f64);
            metrics::REGISTERED_WORKERS.set(self.state.workers.len() as f64);
        }
        players.len() + workers.len() + consoles.len()
    }
}
