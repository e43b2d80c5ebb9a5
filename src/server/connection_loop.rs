// src/server/connection_loop.rs

//! Contains the main gateway loop for accepting connections and handling graceful
//! shutdown.

use super::context::ServerContext;
use crate::connection::ConnectionHandler;
use crate::core::metrics;
use crate::core::protocol::{Envelope, EnvelopeCodec, StatusCode};
use futures::SinkExt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::codec::FramedWrite;
use tracing::{debug, error, info, warn};

/// How long connected peers get to receive their shutdown notice.
const CLIENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const BACKGROUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const BUSY_NOTICE_TIMEOUT: Duration = Duration::from_secs(1);

/// The main gateway loop. Runs until `shutdown` resolves or a background task fails.
pub async fn run(mut ctx: ServerContext, shutdown: impl Future<Output = ()>) {
    let mut client_tasks: JoinSet<()> = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Shutdown requested, initiating graceful shutdown.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => match res {
                Ok((socket, addr)) => accept(&ctx, &mut client_tasks, socket, addr),
                Err(e) => error!("Failed to accept connection: {}", e),
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        debug!("No task was listening for the shutdown signal.");
    }

    if tokio::time::timeout(CLIENT_DRAIN_TIMEOUT, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for connections to close; aborting the rest.");
    }
    client_tasks.shutdown().await;
    info!("All client connections closed.");

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(BACKGROUND_DRAIN_TIMEOUT, async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };

    ctx.io_pool.shutdown().await;
    info!("Gateway shutdown complete.");
}

/// Admits a new connection if a permit is free and pins it to an I/O worker.
fn accept(
    ctx: &ServerContext,
    client_tasks: &mut JoinSet<()>,
    socket: TcpStream,
    addr: SocketAddr,
) {
    let Ok(permit) = ctx.connection_permits.clone().try_acquire_owned() else {
        metrics::CONNECTIONS_REJECTED_TOTAL.inc();
        warn!(
            "Rejecting connection from {}: max_clients ({}) reached.",
            addr, ctx.state.config.max_clients
        );
        let max_frame_size = ctx.state.config.max_frame_size;
        client_tasks.spawn(reject_busy(socket, addr, max_frame_size));
        return;
    };

    let socket = match socket.into_std() {
        Ok(socket) => socket,
        Err(e) => {
            warn!("Failed to detach socket from {}: {}", addr, e);
            return;
        }
    };
    debug!("Accepted new connection from: {}", addr);

    let handler = ConnectionHandler::new(
        socket,
        addr,
        ctx.state.clone(),
        ctx.shutdown_tx.subscribe(),
    );
    client_tasks.spawn_on(
        async move {
            let _permit = permit;
            if let Err(e) = handler.run().await {
                warn!("Connection from {} terminated unexpectedly: {}", addr, e);
            }
        },
        ctx.io_pool.next_handle(),
    );
}

/// Tells a peer the gateway is full, then drops the socket.
async fn reject_busy(socket: TcpStream, addr: SocketAddr, max_frame_size: usize) {
    let mut sink = FramedWrite::new(socket, EnvelopeCodec::new(max_frame_size));
    let notice = Envelope::status(StatusCode::ServerBusy, "gateway is at max_clients");
    match tokio::time::timeout(BUSY_NOTICE_TIMEOUT, sink.send(notice)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Failed to send busy notice to {}: {}", addr, e),
        Err(_) => debug!("Timed out sending busy notice to {}.", addr),
    }
}
