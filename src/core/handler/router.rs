// src/core/handler/router.rs

//! The central component for routing decoded envelopes.
//!
//! The `Router` is the session state machine: it looks at the role of the session an
//! envelope arrived on and decides whether to handle it locally (registration,
//! heartbeat, logout, gateway console commands), forward it to a worker, forward it
//! to a player, or broadcast it.

use super::actions;
use crate::connection::SessionState;
use crate::core::GatewayError;
use crate::core::metrics;
use crate::core::protocol::{Envelope, EnvelopeKind, StatusCode};
use crate::core::state::{ServerState, SessionHandle, SessionRole};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// What the connection handler should write back on the originating session.
#[derive(Debug, PartialEq)]
pub enum RouteResponse {
    /// A single reply envelope.
    Single(Envelope),
    /// Nothing to write back (forwarded, broadcast, or dropped).
    NoOp,
}

/// Routes one envelope on behalf of one session.
pub struct Router<'a> {
    state: Arc<ServerState>,
    handle: &'a SessionHandle,
    session: &'a mut SessionState,
}

impl<'a> Router<'a> {
    pub fn new(
        state: Arc<ServerState>,
        handle: &'a SessionHandle,
        session: &'a mut SessionState,
    ) -> Self {
        Self {
            state,
            handle,
            session,
        }
    }

    /// Dispatches `envelope` according to the session's role. Never awaits: every
    /// outcome is a registry lookup plus a non-blocking enqueue.
    ///
    /// Errors are soft unless they are transport errors; the connection handler turns
    /// them into a `Status` reply (or, for an unknown kind, a log line).
    pub fn route(&mut self, envelope: Envelope) -> Result<RouteResponse, GatewayError> {
        let start_time = Instant::now();
        let role = self.session.role;
        let label = role.to_string();
        metrics::ENVELOPES_IN_TOTAL
            .with_label_values(&[label.as_str()])
            .inc();
        self.state.stats.increment_total_envelopes();

        let kind = envelope.kind()?;
        if matches!(role, SessionRole::Player | SessionRole::Unclassified) {
            self.handle.activity().touch(self.state.idle_window());
        }

        let result = match role {
            SessionRole::Unclassified => self.route_unclassified(kind, envelope),
            SessionRole::Player => self.route_player(kind, envelope),
            SessionRole::Worker => self.route_worker(kind, envelope),
            SessionRole::AdminConsole => self.route_console(kind, envelope),
        };

        metrics::ROUTE_LATENCY_SECONDS.observe(start_time.elapsed().as_secs_f64());
        result
    }

    fn route_unclassified(
        &mut self,
        kind: EnvelopeKind,
        envelope: Envelope,
    ) -> Result<RouteResponse, GatewayError> {
        match kind {
            EnvelopeKind::Login => {
                actions::login::handle_login(&envelope, self.handle, self.session, &self.state)
            }
            EnvelopeKind::WorkerRegister => actions::registration::handle_worker_register(
                &envelope,
                self.handle,
                self.session,
                &self.state,
            ),
            EnvelopeKind::ConsoleRegister => actions::registration::handle_console_register(
                &envelope,
                self.handle,
                self.session,
                &self.state,
            ),
            other => {
                debug!(
                    "Connection {} sent {} before registering.",
                    self.handle.conn_id(),
                    other
                );
                Err(GatewayError::NotRegistered)
            }
        }
    }

    fn route_player(
        &mut self,
        kind: EnvelopeKind,
        envelope: Envelope,
    ) -> Result<RouteResponse, GatewayError> {
        let identity = self.registered_identity()?;
        if !self.is_current_session(identity) {
            return Ok(self.drop_stale(kind));
        }
        let conn_id = self.handle.conn_id();
        match kind {
            EnvelopeKind::Heartbeat => Ok(RouteResponse::Single(Envelope::heartbeat())),
            EnvelopeKind::GameAction => actions::forward::to_worker(
                envelope,
                identity,
                conn_id,
                None,
                self.session,
                &self.state,
            ),
            EnvelopeKind::EnterRoom => actions::forward::enter_room(
                envelope,
                identity,
                conn_id,
                self.session,
                &self.state,
            ),
            EnvelopeKind::Logout => {
                actions::login::handle_logout(&envelope, identity, self.handle, &self.state)
            }
            k if k.is_registration() => Err(self.already_registered()),
            other => Err(GatewayError::BadRequest(format!(
                "players may not send {other}"
            ))),
        }
    }

    fn route_worker(
        &mut self,
        kind: EnvelopeKind,
        envelope: Envelope,
    ) -> Result<RouteResponse, GatewayError> {
        let worker_id = self.registered_identity()?;
        if !self.is_current_session(worker_id) {
            return Ok(self.drop_stale(kind));
        }
        match kind {
            EnvelopeKind::Heartbeat => Ok(RouteResponse::Single(Envelope::heartbeat())),
            EnvelopeKind::GameAction | EnvelopeKind::EnterRoom | EnvelopeKind::Status => {
                actions::forward::to_player(envelope, worker_id, &self.state)
            }
            EnvelopeKind::Broadcast => {
                actions::forward::broadcast_to_players(envelope, &self.state);
                Ok(RouteResponse::NoOp)
            }
            EnvelopeKind::ConsoleReply => {
                actions::console::relay_reply(envelope, worker_id, &self.state)
            }
            k if k.is_registration() => Err(self.already_registered()),
            other => Err(GatewayError::BadRequest(format!(
                "workers may not send {other}"
            ))),
        }
    }

    fn route_console(
        &mut self,
        kind: EnvelopeKind,
        envelope: Envelope,
    ) -> Result<RouteResponse, GatewayError> {
        let console_id = self.registered_identity()?;
        if !self.is_current_session(console_id) {
            return Ok(self.drop_stale(kind));
        }
        match kind {
            EnvelopeKind::Heartbeat => Ok(RouteResponse::Single(Envelope::heartbeat())),
            EnvelopeKind::ConsoleCommand => {
                actions::console::handle_command(envelope, self.handle, &self.state)
            }
            EnvelopeKind::Broadcast => {
                let correlation = envelope.correlation;
                let delivered = actions::forward::broadcast_to_players(envelope, &self.state);
                let mut reply =
                    Envelope::status(StatusCode::Ok, format!("delivered to {delivered} players"));
                reply.correlation = correlation;
                Ok(RouteResponse::Single(reply))
            }
            k if k.is_registration() => Err(self.already_registered()),
            other => Err(GatewayError::BadRequest(format!(
                "consoles may not send {other}"
            ))),
        }
    }

    fn registered_identity(&self) -> Result<i64, GatewayError> {
        self.session.identity.ok_or(GatewayError::NotRegistered)
    }

    /// An evicted or closing session may still have frames in flight behind the
    /// one that closed it. Those must not reach workers, players or the store.
    fn is_current_session(&self, identity: i64) -> bool {
        !self.handle.is_closed()
            && self
                .state
                .registry_for(self.session.role)
                .is_some_and(|registry| registry.is_current(identity, self.handle.conn_id()))
    }

    fn drop_stale(&self, kind: EnvelopeKind) -> RouteResponse {
        debug!(
            "Dropping {} from connection {}: no longer the registered {} session.",
            kind,
            self.handle.conn_id(),
            self.session.role
        );
        RouteResponse::NoOp
    }

    fn already_registered(&self) -> GatewayError {
        GatewayError::AlreadyRegistered(self.session.role.to_string())
    }
}
