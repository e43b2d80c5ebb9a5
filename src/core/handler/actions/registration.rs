// src/core/handler/actions/registration.rs

use crate::connection::SessionState;
use crate::core::GatewayError;
use crate::core::handler::router::RouteResponse;
use crate::core::metrics;
use crate::core::protocol::{ConsoleRegister, Envelope, EnvelopeKind, WorkerRegister};
use crate::core::state::{ServerState, SessionHandle, SessionRole};
use std::sync::Arc;
use tracing::{info, warn};

pub fn handle_worker_register(
    envelope: &Envelope,
    handle: &SessionHandle,
    session: &mut SessionState,
    state: &Arc<ServerState>,
) -> Result<RouteResponse, GatewayError> {
    let register: WorkerRegister = envelope.decode_record()?;
    if register.worker_id <= 0 {
        return Err(GatewayError::BadRequest(format!(
            "invalid worker id {}",
            register.worker_id
        )));
    }
    if !handle.classify(SessionRole::Worker, register.worker_id) {
        return Err(GatewayError::AlreadyRegistered(handle.role().to_string()));
    }
    session.role = SessionRole::Worker;
    session.identity = Some(register.worker_id);
    // Worker links are long-lived and may be quiet for minutes.
    handle.activity().clear_deadline();

    if let Some(previous) = state.workers.register(register.worker_id, handle.clone()) {
        warn!(
            "Worker {} registered again from {}; dropped the link from {}.",
            register.worker_id,
            handle.addr(),
            previous.addr()
        );
    }
    metrics::REGISTERED_WORKERS.set(state.workers.len() as f64);
    info!(
        "Worker {} registered from {}.",
        register.worker_id,
        handle.addr()
    );

    let ack = Envelope::with_record(EnvelopeKind::WorkerRegisterAck, &register)?;
    Ok(RouteResponse::Single(ack))
}

pub fn handle_console_register(
    envelope: &Envelope,
    handle: &SessionHandle,
    session: &mut SessionState,
    state: &Arc<ServerState>,
) -> Result<RouteResponse, GatewayError> {
    let register: ConsoleRegister = envelope.decode_record()?;
    if let Some(secret) = &state.config.console_secret
        && register.secret != *secret
    {
        warn!("Rejected console registration from {}.", handle.addr());
        return Err(GatewayError::Unauthorized("console secret mismatch".into()));
    }

    let console_id = handle.conn_id() as i64;
    if !handle.classify(SessionRole::AdminConsole, console_id) {
        return Err(GatewayError::AlreadyRegistered(handle.role().to_string()));
    }
    session.role = SessionRole::AdminConsole;
    session.identity = Some(console_id);
    handle.activity().clear_deadline();
    state.consoles.register(console_id, handle.clone());
    info!("Console attached from {}.", handle.addr());

    Ok(RouteResponse::Single(Envelope::new(
        EnvelopeKind::ConsoleRegisterAck,
        Vec::new(),
    )))
}
