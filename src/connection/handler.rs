// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of one connection.

use super::guard::ConnectionGuard;
use super::session::SessionState;
use crate::core::GatewayError;
use crate::core::handler::router::{RouteResponse, Router};
use crate::core::metrics;
use crate::core::protocol::{Envelope, EnvelopeCodec, InboundFrame, KickReason, StatusCode};
use crate::core::state::{ServerState, SessionHandle, SessionRole};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{Instrument, debug, info_span, trace, warn};

type EnvelopeStream = Framed<TcpStream, EnvelopeCodec>;

/// Owns one socket and drives it: read frame, route, write replies, drain the
/// outbound queue, until the peer goes away or someone asks the session to close.
///
/// The handler is built on the accepting runtime and run on the I/O worker the
/// connection is pinned to; the socket is only registered with a reactor in `run`.
pub struct ConnectionHandler {
    socket: Option<std::net::TcpStream>,
    addr: SocketAddr,
    state: Arc<ServerState>,
    handle: SessionHandle,
    outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    global_shutdown_rx: broadcast::Receiver<()>,
    session: SessionState,
    _guard: ConnectionGuard,
}

impl ConnectionHandler {
    /// Allocates a connection id and session handle and records the connection in
    /// the client map. New sessions get an idle deadline until they register.
    pub fn new(
        socket: std::net::TcpStream,
        addr: SocketAddr,
        state: Arc<ServerState>,
        global_shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let conn_id = state.next_conn_id();
        let (handle, outbound_rx) = SessionHandle::new(conn_id, addr, state.idle_window());
        state.clients.insert(conn_id, handle.clone());
        state.stats.increment_total_connections();
        metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

        let guard = ConnectionGuard::new(state.clone(), handle.clone());
        Self {
            socket: Some(socket),
            addr,
            state,
            handle,
            outbound_rx,
            global_shutdown_rx,
            session: SessionState::new(),
            _guard: guard,
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Runs the connection to completion. Must be called from within the runtime the
    /// connection should be pinned to.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        let span = info_span!(
            "connection",
            conn.id = %self.handle.conn_id(),
            peer.addr = %self.addr,
        );
        async move {
            let socket = self
                .socket
                .take()
                .ok_or_else(|| GatewayError::Internal("connection socket already taken".into()))?;
            let socket = TcpStream::from_std(socket)?;
            socket.set_nodelay(true)?;
            let mut framed = Framed::new(
                socket,
                EnvelopeCodec::new(self.state.config.max_frame_size),
            );
            self.serve(&mut framed).await
        }
        .instrument(span)
        .await
    }

    async fn serve(&mut self, framed: &mut EnvelopeStream) -> Result<(), GatewayError> {
        let closed = self.handle.close_token();
        loop {
            tokio::select! {
                // Shutdown and close requests take priority over pending traffic.
                biased;
                _ = self.global_shutdown_rx.recv() => {
                    debug!("Connection received global shutdown signal.");
                    let notice = match (self.session.role, self.session.identity) {
                        (SessionRole::Player, Some(identity)) => {
                            Envelope::kickout(identity, KickReason::Disconnect)
                        }
                        _ => Envelope::status(StatusCode::ServerBusy, "gateway is shutting down"),
                    };
                    let _ = framed.send(notice).await;
                    break;
                }
                _ = closed.cancelled() => {
                    if let Some(farewell) = self.handle.take_farewell() {
                        debug!("Session closed; sending farewell kind {}.", farewell.kind);
                        let _ = framed.send(farewell).await;
                    }
                    break;
                }
                Some(envelope) = self.outbound_rx.recv() => {
                    self.drain_outbound(framed, envelope).await?;
                }
                frame = framed.next() => match frame {
                    Some(Ok(InboundFrame::Envelope(envelope))) => {
                        trace!("Received envelope: {:?}", envelope);
                        self.dispatch(framed, envelope).await?;
                    }
                    Some(Ok(InboundFrame::Malformed { len, reason })) => {
                        metrics::MALFORMED_FRAMES_TOTAL.inc();
                        warn!("Discarding malformed frame of {} bytes: {}", len, reason);
                    }
                    Some(Err(GatewayError::FrameTooLarge { len, max })) => {
                        metrics::OVERSIZED_FRAMES_TOTAL.inc();
                        warn!("Peer declared a {}-byte frame (max {}); closing.", len, max);
                        break;
                    }
                    Some(Err(e)) => {
                        if is_normal_disconnect(&e) {
                            debug!("Connection closed by peer: {}", e);
                        } else {
                            warn!("Connection error: {}", e);
                        }
                        break;
                    }
                    None => {
                        debug!("Connection closed by peer.");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    /// Routes one inbound envelope and writes the direct reply, if any.
    async fn dispatch(
        &mut self,
        framed: &mut EnvelopeStream,
        envelope: Envelope,
    ) -> Result<(), GatewayError> {
        let correlation = envelope.correlation;
        let mut router = Router::new(self.state.clone(), &self.handle, &mut self.session);
        match router.route(envelope) {
            Ok(RouteResponse::Single(reply)) => self.write(framed, reply).await,
            Ok(RouteResponse::NoOp) => Ok(()),
            Err(GatewayError::UnknownKind(kind)) => {
                warn!("Dropping envelope of unknown kind {}.", kind);
                Ok(())
            }
            Err(e) if e.is_soft() => {
                debug!("Routing failed: {}", e);
                let mut status = Envelope::status(e.status_code(), e.to_string());
                status.correlation = correlation;
                self.write(framed, status).await
            }
            Err(e) => Err(e),
        }
    }

    async fn write(
        &mut self,
        framed: &mut EnvelopeStream,
        envelope: Envelope,
    ) -> Result<(), GatewayError> {
        match framed.send(envelope).await {
            Ok(()) => {
                metrics::ENVELOPES_OUT_TOTAL.inc();
                Ok(())
            }
            Err(GatewayError::FrameTooLarge { len, max }) => {
                warn!("Dropping outbound envelope of {} bytes (max {}).", len, max);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Writes `first` and everything else already queued, then flushes once.
    async fn drain_outbound(
        &mut self,
        framed: &mut EnvelopeStream,
        first: Envelope,
    ) -> Result<(), GatewayError> {
        let mut next = Some(first);
        let mut written = 0u64;
        while let Some(envelope) = next {
            match framed.feed(envelope).await {
                Ok(()) => written += 1,
                Err(GatewayError::FrameTooLarge { len, max }) => {
                    warn!("Dropping queued envelope of {} bytes (max {}).", len, max);
                }
                Err(e) => return Err(e),
            }
            next = self.outbound_rx.try_recv().ok();
        }
        framed.flush().await?;
        metrics::ENVELOPES_OUT_TOTAL.inc_by(written as f64);
        Ok(())
    }
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &GatewayError) -> bool {
    matches!(e, GatewayError::Io(arc_err) if matches!(
        arc_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}
