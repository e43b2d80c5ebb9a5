// src/worker/node.rs

//! The worker side of the gateway link.

use super::engine::GameEngine;
use crate::config::WorkerNodeConfig;
use crate::core::GatewayError;
use crate::core::protocol::{
    ConsoleCommand, ConsoleReply, Envelope, EnvelopeCodec, EnvelopeKind, InboundFrame, Kickout,
    Status, WorkerRegister,
};
use crate::core::reconnect::{ReconnectBackoff, connect_with_timeout};
use anyhow::{Result, anyhow};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tracing::{Instrument, debug, info, info_span, warn};

type LinkStream = Framed<TcpStream, EnvelopeCodec>;

/// How a registered link ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkEnd {
    Shutdown,
    Closed,
}

/// A worker node: registers with the gateway and feeds routed traffic into a
/// [`GameEngine`].
#[derive(Clone)]
pub struct WorkerNode {
    config: Arc<WorkerNodeConfig>,
    engine: Arc<dyn GameEngine>,
}

impl WorkerNode {
    pub fn new(config: WorkerNodeConfig, engine: Arc<dyn GameEngine>) -> Self {
        Self {
            config: Arc::new(config),
            engine,
        }
    }

    pub fn worker_id(&self) -> i64 {
        self.config.worker_id
    }

    /// Runs in whichever mode the configuration selects until shutdown.
    pub async fn run(self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match (self.config.gateway_addr.clone(), self.config.listen.clone()) {
            (Some(addr), _) => {
                self.connect(&addr, shutdown_rx).await;
                Ok(())
            }
            (None, Some(bind)) => self.listen(&bind, shutdown_rx).await,
            (None, None) => Err(anyhow!("worker node has neither gateway_addr nor listen")),
        }
    }

    /// Dials the gateway and keeps the link registered, redialing with backoff
    /// whenever it drops.
    pub async fn connect(&self, addr: &str, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Worker {} dialing gateway at {}.", self.worker_id(), addr);
        let mut backoff = ReconnectBackoff::default();

        loop {
            let attempt = async {
                let stream = connect_with_timeout(addr, self.config.connect_timeout).await?;
                self.serve_link(stream, &mut shutdown_rx).await
            };
            match attempt.await {
                Ok(LinkEnd::Shutdown) => {
                    info!("Worker {} shutting down.", self.worker_id());
                    return;
                }
                Ok(LinkEnd::Closed) => {
                    info!("Gateway link closed. Reconnecting...");
                    backoff.reset();
                }
                Err(e) => warn!("Gateway link failed: {}. Reconnecting...", e),
            }

            let wait_time = backoff.next_delay();
            info!("Will try to reconnect to the gateway in {wait_time:?}");
            tokio::select! {
                _ = tokio::time::sleep(wait_time) => {}
                _ = shutdown_rx.recv() => {
                    info!("Worker {} shutting down during backoff.", self.worker_id());
                    return;
                }
            }
        }
    }

    /// Binds `bind` and serves every gateway that dials in.
    pub async fn listen(&self, bind: &str, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| anyhow!("Failed to bind worker listener on {}: {}", bind, e))?;
        self.listen_on(listener, shutdown_rx).await;
        Ok(())
    }

    /// Serves gateway dials on an already bound listener.
    pub async fn listen_on(&self, listener: TcpListener, mut shutdown_rx: broadcast::Receiver<()>) {
        if let Ok(addr) = listener.local_addr() {
            info!("Worker {} accepting gateway links on {}.", self.worker_id(), addr);
        }
        let mut links = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                res = listener.accept() => match res {
                    Ok((stream, addr)) => {
                        info!("Gateway dialed in from {}.", addr);
                        let node = self.clone();
                        let mut link_shutdown = shutdown_rx.resubscribe();
                        links.spawn(async move {
                            if let Err(e) = node.serve_link(stream, &mut link_shutdown).await {
                                warn!("Gateway link from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => warn!("Failed to accept gateway link: {}", e),
                },
                Some(_) = links.join_next() => {}
            }
        }

        info!("Worker {} listener shutting down.", self.worker_id());
        links.shutdown().await;
    }

    /// Registers over `stream` and then serves it until it closes or shutdown.
    async fn serve_link(
        &self,
        stream: TcpStream,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<LinkEnd, GatewayError> {
        let peer = stream.peer_addr()?;
        let span = info_span!("worker_link", worker.id = self.worker_id(), gateway.addr = %peer);
        async move {
            stream.set_nodelay(true)?;
            let mut framed = Framed::new(stream, EnvelopeCodec::new(self.config.max_frame_size));
            self.register(&mut framed).await?;
            info!("Registered with the gateway.");
            Ok(self.serve_registered(&mut framed, shutdown_rx).await)
        }
        .instrument(span)
        .await
    }

    async fn register(&self, framed: &mut LinkStream) -> Result<(), GatewayError> {
        let register = Envelope::with_record(
            EnvelopeKind::WorkerRegister,
            &WorkerRegister {
                worker_id: self.worker_id(),
            },
        )?;
        framed.send(register).await?;

        let answer = tokio::time::timeout(self.config.connect_timeout, framed.next())
            .await
            .map_err(|_| GatewayError::ConnectTimeout("worker registration".into()))?;
        match answer {
            Some(Ok(InboundFrame::Envelope(envelope))) => match envelope.kind()? {
                EnvelopeKind::WorkerRegisterAck => Ok(()),
                EnvelopeKind::Status => {
                    let status: Status = envelope.decode_record()?;
                    Err(GatewayError::Unauthorized(format!(
                        "registration refused ({:?}): {}",
                        status.code, status.detail
                    )))
                }
                other => Err(GatewayError::BadRequest(format!(
                    "expected WorkerRegisterAck, got {other}"
                ))),
            },
            Some(Ok(InboundFrame::Malformed { reason, .. })) => {
                Err(GatewayError::MalformedEnvelope(reason))
            }
            Some(Err(e)) => Err(e),
            None => Err(GatewayError::Io(Arc::new(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )))),
        }
    }

    async fn serve_registered(
        &self,
        framed: &mut LinkStream,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> LinkEnd {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return LinkEnd::Shutdown,
                frame = framed.next() => match frame {
                    Some(Ok(InboundFrame::Envelope(envelope))) => {
                        if let Err(e) = self.dispatch(framed, envelope).await {
                            if !e.is_soft() {
                                warn!("Gateway link write failed: {}", e);
                                return LinkEnd::Closed;
                            }
                            warn!("Dropping envelope from the gateway: {}", e);
                        }
                    }
                    Some(Ok(InboundFrame::Malformed { len, reason })) => {
                        warn!(
                            "Discarding malformed {}-byte frame from the gateway: {}",
                            len, reason
                        );
                    }
                    Some(Err(e)) => {
                        warn!("Gateway link error: {}", e);
                        return LinkEnd::Closed;
                    }
                    None => return LinkEnd::Closed,
                },
            }
        }
    }

    async fn dispatch(
        &self,
        framed: &mut LinkStream,
        envelope: Envelope,
    ) -> Result<(), GatewayError> {
        let kind = envelope.kind()?;
        match kind {
            EnvelopeKind::GameAction | EnvelopeKind::EnterRoom => {
                let Some(player) = envelope.addressee else {
                    return Err(GatewayError::BadRequest(format!("{kind} without a player")));
                };
                let replies = self.engine.handle_envelope(player, kind, &envelope.payload);
                if replies.is_empty() {
                    return Ok(());
                }
                for reply in replies {
                    framed
                        .feed(Envelope::new(reply.kind, reply.payload).addressed_to(player))
                        .await?;
                }
                framed.flush().await
            }
            EnvelopeKind::Kickout => {
                let kick: Kickout = envelope.decode_record()?;
                debug!("Gateway released player {} ({:?}).", kick.player, kick.reason);
                self.engine.release(kick.player, kick.reason);
                Ok(())
            }
            EnvelopeKind::ConsoleCommand => {
                let command: ConsoleCommand = envelope.decode_record()?;
                info!("Console command: '{}'", command.command);
                let reply: ConsoleReply = self.engine.console(&command.command);
                let mut reply = Envelope::with_record(EnvelopeKind::ConsoleReply, &reply)?;
                reply.correlation = envelope.correlation;
                framed.send(reply).await
            }
            EnvelopeKind::Heartbeat => framed.send(Envelope::heartbeat()).await,
            EnvelopeKind::Status => {
                let status: Status = envelope.decode_record()?;
                debug!("Gateway status {:?}: {}", status.code, status.detail);
                Ok(())
            }
            other => {
                debug!("Ignoring {} from the gateway.", other);
                Ok(())
            }
        }
    }
}
