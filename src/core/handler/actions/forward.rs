// src/core/handler/actions/forward.rs

use crate::connection::SessionState;
use crate::core::GatewayError;
use crate::core::handler::handoff;
use crate::core::handler::router::RouteResponse;
use crate::core::protocol::{EnterRoom, Envelope};
use crate::core::state::ServerState;
use std::sync::Arc;
use tracing::debug;

/// Forwards a player's envelope to their worker, tagged with the player identity.
/// `forced` moves the player to that worker first.
///
/// `conn_id` is the player's connection. If a newer login replaced it while the
/// worker was being assigned, nothing is forwarded: the newer session owns the
/// player from here on.
pub fn to_worker(
    envelope: Envelope,
    player: i64,
    conn_id: u64,
    forced: Option<i64>,
    session: &mut SessionState,
    state: &Arc<ServerState>,
) -> Result<RouteResponse, GatewayError> {
    let (worker, link) = handoff::assign_worker(state, player, session.worker, forced)?;
    session.worker = Some(worker);
    if !state.players.is_current(player, conn_id) {
        debug!(
            "Connection {} lost player {} during assignment; not forwarding.",
            conn_id, player
        );
        return Ok(RouteResponse::NoOp);
    }
    if !link.send(envelope.addressed_to(player)) {
        return Err(GatewayError::TargetOffline(worker));
    }
    Ok(RouteResponse::NoOp)
}

/// Room ids name the hosting worker, so entering a room may move the player.
/// Ids below one stride carry no worker and follow the normal assignment.
pub fn enter_room(
    envelope: Envelope,
    player: i64,
    conn_id: u64,
    session: &mut SessionState,
    state: &Arc<ServerState>,
) -> Result<RouteResponse, GatewayError> {
    let room: EnterRoom = envelope.decode_record()?;
    let forced = Some(room.worker_id()).filter(|worker| *worker > 0);
    to_worker(envelope, player, conn_id, forced, session, state)
}

/// Delivers a worker's envelope to the player named in `addressee`, with the tag
/// stripped. An offline player is not an error: the envelope is dropped.
pub fn to_player(
    mut envelope: Envelope,
    worker: i64,
    state: &Arc<ServerState>,
) -> Result<RouteResponse, GatewayError> {
    let player = envelope.addressee.take().ok_or_else(|| {
        GatewayError::BadRequest("worker envelope without an addressee".into())
    })?;
    match state.players.lookup_live(player) {
        Some(session) => {
            session.send(envelope);
        }
        None => debug!(
            "Dropping kind {} from worker {} for offline player {}.",
            envelope.kind, worker, player
        ),
    }
    Ok(RouteResponse::NoOp)
}

/// Sends an envelope to every logged-in player. Returns how many accepted it.
pub fn broadcast_to_players(mut envelope: Envelope, state: &Arc<ServerState>) -> usize {
    envelope.addressee = None;
    envelope.correlation = None;
    state.players.broadcast(&envelope)
}
