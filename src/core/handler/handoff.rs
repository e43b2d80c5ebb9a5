// src/core/handler/handoff.rs

//! Worker assignment and release.
//!
//! Every path that moves a player away from a worker goes through `notify_release`
//! before any traffic is forwarded anywhere else, so the old worker always sees the
//! kick-out ahead of the new worker seeing the player.

use crate::core::GatewayError;
use crate::core::metrics;
use crate::core::protocol::{Envelope, KickReason};
use crate::core::state::{ServerState, SessionHandle};
use tracing::{debug, info, warn};

fn reason_label(reason: KickReason) -> &'static str {
    match reason {
        KickReason::Reassigned => "reassigned",
        KickReason::DuplicateLogin => "duplicate_login",
        KickReason::Disconnect => "disconnect",
        KickReason::Idle => "idle",
        KickReason::Console => "console",
    }
}

/// Enqueues a kick-out for `player` on `worker`. Returns false if the worker has no
/// live session, in which case there is nothing to release.
pub fn notify_release(state: &ServerState, player: i64, worker: i64, reason: KickReason) -> bool {
    let Some(link) = state.workers.lookup_live(worker) else {
        debug!(
            "Worker {} is gone; skipping release of player {}.",
            worker, player
        );
        return false;
    };
    let sent = link.send(Envelope::kickout(player, reason));
    if sent {
        metrics::KICKOUTS_TOTAL
            .with_label_values(&[reason_label(reason)])
            .inc();
    }
    sent
}

/// Resolves the worker that should receive `player`'s next game envelope.
///
/// `current` is the player's present assignment. With `forced` set, the player is
/// moved to that worker: the old worker (if live and different) gets a
/// `Kickout{Reassigned}` first, then the new assignment is persisted. Without it,
/// the live current worker is kept, or a random one is picked and persisted.
///
/// The caller forwards to the returned handle only after this returns, which is
/// what orders the release ahead of the first forwarded envelope.
pub fn assign_worker(
    state: &ServerState,
    player: i64,
    current: Option<i64>,
    forced: Option<i64>,
) -> Result<(i64, SessionHandle), GatewayError> {
    if let Some(target) = forced {
        let link = state
            .workers
            .lookup_live(target)
            .ok_or(GatewayError::TargetOffline(target))?;
        if current == Some(target) {
            return Ok((target, link));
        }
        if let Some(old) = current {
            notify_release(state, player, old, KickReason::Reassigned);
            metrics::HANDOFFS_TOTAL.inc();
            state.stats.increment_total_handoffs();
            info!(
                "Player {} handed off from worker {} to worker {}.",
                player, old, target
            );
        }
        state.store.save_affinity(player, Some(target))?;
        return Ok((target, link));
    }

    if let Some(worker) = current
        && let Some(link) = state.workers.lookup_live(worker)
    {
        return Ok((worker, link));
    }

    let (worker, link) = state
        .workers
        .pick_random()
        .ok_or(GatewayError::NoWorkerAvailable)?;
    match current {
        Some(stale) => debug!(
            "Worker {} for player {} is gone; reassigned to {}.",
            stale, player, worker
        ),
        None => debug!("Player {} assigned to worker {}.", player, worker),
    }
    state.store.save_affinity(player, Some(worker))?;
    Ok((worker, link))
}

/// Releases `player` from whatever worker the store says holds them and clears the
/// assignment. Returns the released worker, if any.
pub fn release_affinity(
    state: &ServerState,
    player: i64,
    reason: KickReason,
) -> Result<Option<i64>, GatewayError> {
    let Some(worker) = state.store.load_affinity(player)? else {
        return Ok(None);
    };
    notify_release(state, player, worker, reason);
    state.store.save_affinity(player, None)?;
    Ok(Some(worker))
}

/// Drops a player session from the gateway: unregisters it (if it is still the
/// registered session for `identity`), releases its worker, and closes it with a
/// kick-out notice. Returns false if a newer session already owns the identity,
/// in which case nothing is released.
pub fn drop_player(
    state: &ServerState,
    identity: i64,
    handle: &SessionHandle,
    reason: KickReason,
) -> bool {
    if !state.players.remove_if_current(identity, handle.conn_id()) {
        return false;
    }
    metrics::REGISTERED_PLAYERS.set(state.players.len() as f64);
    if let Err(e) = release_affinity(state, identity, reason) {
        warn!("Failed to release worker for player {}: {}", identity, e);
    }
    handle.close(Some(Envelope::kickout(identity, reason)));
    true
}
