// src/core/handler/actions/console.rs

//! Console commands: relay to workers by correlation id, or run on the gateway.

use crate::core::GatewayError;
use crate::core::handler::handoff;
use crate::core::handler::router::RouteResponse;
use crate::core::protocol::{ConsoleCommand, ConsoleReply, Envelope, EnvelopeKind, KickReason};
use crate::core::state::{ConsoleRoute, ServerState, SessionHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::EnvFilter;

/// Handles a `ConsoleCommand`. An addressee of `None` or `0` means the gateway itself;
/// anything else names the worker to relay to.
pub fn handle_command(
    envelope: Envelope,
    console: &SessionHandle,
    state: &Arc<ServerState>,
) -> Result<RouteResponse, GatewayError> {
    let request = envelope.correlation;
    let Some(worker) = envelope.addressee.filter(|id| *id != 0) else {
        let command: ConsoleCommand = envelope.decode_record()?;
        info!("Console {} ran '{}'.", console.conn_id(), command.command);
        let reply = execute_local(&command.command, state);
        let mut reply = Envelope::with_record(EnvelopeKind::ConsoleReply, &reply)?;
        reply.correlation = request;
        return Ok(RouteResponse::Single(reply));
    };

    let link = state
        .workers
        .lookup_live(worker)
        .ok_or(GatewayError::TargetOffline(worker))?;
    let correlation = state.next_correlation();
    state.console_routes.insert(
        correlation,
        ConsoleRoute {
            console_conn_id: console.conn_id(),
            console_request: request,
            worker_id: worker,
            issued_at: Instant::now(),
        },
    );
    let mut forwarded = envelope;
    forwarded.addressee = None;
    forwarded.correlation = Some(correlation);
    if !link.send(forwarded) {
        state.console_routes.remove(&correlation);
        return Err(GatewayError::TargetOffline(worker));
    }
    debug!(
        "Relayed console command to worker {} as correlation {}.",
        worker, correlation
    );
    Ok(RouteResponse::NoOp)
}

/// Routes a worker's `ConsoleReply` back to the console that asked, restoring the
/// console's own request id.
pub fn relay_reply(
    mut envelope: Envelope,
    worker: i64,
    state: &Arc<ServerState>,
) -> Result<RouteResponse, GatewayError> {
    let correlation = envelope.correlation.ok_or_else(|| {
        GatewayError::BadRequest("console reply without a correlation id".into())
    })?;
    let Some((_, route)) = state
        .console_routes
        .remove_if(&correlation, |_, route| route.worker_id == worker)
    else {
        debug!(
            "No pending console request {} for worker {}; dropping reply.",
            correlation, worker
        );
        return Ok(RouteResponse::NoOp);
    };
    match state.consoles.lookup_live(route.console_conn_id as i64) {
        Some(console) => {
            envelope.correlation = route.console_request;
            envelope.addressee = Some(worker);
            console.send(envelope);
        }
        None => debug!(
            "Console {} left before worker {} replied.",
            route.console_conn_id, worker
        ),
    }
    Ok(RouteResponse::NoOp)
}

fn ok(output: impl Into<String>) -> ConsoleReply {
    ConsoleReply {
        ok: true,
        output: output.into(),
    }
}

fn fail(output: impl Into<String>) -> ConsoleReply {
    ConsoleReply {
        ok: false,
        output: output.into(),
    }
}

/// Runs a gateway-local console command.
pub fn execute_local(line: &str, state: &ServerState) -> ConsoleReply {
    let mut parts = line.trim().splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or("").to_ascii_lowercase();
    let arg = parts.next().map(str::trim).unwrap_or("");

    match verb.as_str() {
        "online" => ok(format!(
            "players={} workers={} consoles={}",
            state.players.len(),
            state.workers.len(),
            state.consoles.len()
        )),
        "workers" => ok(state
            .workers
            .identities()
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",")),
        "kick" => match arg.parse::<i64>() {
            Ok(player) => match state.players.lookup(player) {
                Some(session)
                    if handoff::drop_player(state, player, &session, KickReason::Console) =>
                {
                    info!("Player {} kicked from the console.", player);
                    ok(format!("kicked {player}"))
                }
                _ => fail(format!("player {player} is offline")),
            },
            Err(_) => fail("usage: kick <player>"),
        },
        "broadcast" if !arg.is_empty() => {
            let notice = Envelope::new(EnvelopeKind::Broadcast, arg.as_bytes().to_vec());
            let delivered = state.players.broadcast(&notice);
            ok(format!("delivered to {delivered} players"))
        }
        "broadcast" => fail("usage: broadcast <text>"),
        "stats" => ok(format!(
            "connections={} envelopes={} handoffs={} expired={}",
            state.stats.get_total_connections(),
            state.stats.get_total_envelopes(),
            state.stats.get_total_handoffs(),
            state.stats.get_total_expired()
        )),
        "loglevel" => set_log_level(arg, state),
        "config" => match toml::to_string(&*state.config) {
            Ok(dump) => ok(dump),
            Err(e) => fail(format!("failed to render config: {e}")),
        },
        "" => fail("empty command"),
        other => fail(format!("unknown command '{other}'")),
    }
}

fn set_log_level(directive: &str, state: &ServerState) -> ConsoleReply {
    if directive.is_empty() {
        return fail("usage: loglevel <filter>");
    }
    let Some(reload_handle) = &state.log_reload_handle else {
        return fail("log level is not reloadable in this process");
    };
    match EnvFilter::try_new(directive) {
        Ok(new_filter) => match reload_handle.reload(new_filter) {
            Ok(()) => {
                info!("Log level dynamically changed to '{}'", directive);
                ok(format!("log level set to '{directive}'"))
            }
            Err(e) => {
                error!("Failed to reload log level: {}", e);
                fail(format!("failed to reload log level: {e}"))
            }
        },
        Err(e) => {
            warn!("Rejected log filter '{}': {}", directive, e);
            fail(format!("invalid log filter directive: {e}"))
        }
    }
}
