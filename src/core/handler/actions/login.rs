// src/core/handler/actions/login.rs

use crate::connection::SessionState;
use crate::core::GatewayError;
use crate::core::handler::handoff;
use crate::core::handler::router::RouteResponse;
use crate::core::metrics;
use crate::core::protocol::{
    Envelope, EnvelopeKind, KickReason, LoginReply, LoginRequest, StatusCode,
};
use crate::core::state::{ServerState, SessionHandle, SessionRole};
use std::sync::Arc;
use tracing::info;

pub fn handle_login(
    envelope: &Envelope,
    handle: &SessionHandle,
    session: &mut SessionState,
    state: &Arc<ServerState>,
) -> Result<RouteResponse, GatewayError> {
    let login: LoginRequest = envelope.decode_record()?;
    let identity = state.store.resolve_identity(&login)?;
    if !handle.classify(SessionRole::Player, identity) {
        return Err(GatewayError::AlreadyRegistered(handle.role().to_string()));
    }
    session.role = SessionRole::Player;
    session.identity = Some(identity);

    if let Some(evicted) = state.players.register(identity, handle.clone()) {
        // The evicted session was already closed with a duplicate-login notice by the
        // registry. Its worker is told before this session can route anything.
        let released = handoff::release_affinity(state, identity, KickReason::DuplicateLogin)?;
        info!(
            "Player {} logged in again; closed connection {} and released worker {:?}.",
            identity,
            evicted.conn_id(),
            released
        );
    }
    session.worker = state.store.load_affinity(identity)?;
    metrics::REGISTERED_PLAYERS.set(state.players.len() as f64);

    info!(
        "Player {} ('{}') logged in from {}.",
        identity,
        login.account,
        handle.addr()
    );
    let reply = Envelope::with_record(EnvelopeKind::LoginReply, &LoginReply { identity })?;
    Ok(RouteResponse::Single(reply))
}

/// Persists the snapshot carried by the logout (if any), then drops the session.
pub fn handle_logout(
    envelope: &Envelope,
    identity: i64,
    handle: &SessionHandle,
    state: &Arc<ServerState>,
) -> Result<RouteResponse, GatewayError> {
    if !envelope.payload.is_empty() {
        state.store.save_dirty(identity, &envelope.payload)?;
    }
    info!("Player {} logged out.", identity);
    // The first farewell wins, so the player sees the status rather than a kick-out.
    handle.close(Some(Envelope::status(StatusCode::Ok, "logged out")));
    handoff::drop_player(state, identity, handle, KickReason::Disconnect);
    Ok(RouteResponse::NoOp)
}
