// src/server/spawner.rs

//! Spawns all of the gateway's long-running background tasks.

use super::context::ServerContext;
use super::dialer::WorkerDialer;
use super::metrics_server;
use crate::config::DiscoveryMode;
use crate::core::tasks::liveness::LivenessMonitorTask;
use tracing::info;

/// Spawns all background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) {
    let server_state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;
    let config = &server_state.config;

    // --- Metrics Server ---
    if config.metrics.enabled {
        let metrics_state = server_state.clone();
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx_metrics).await
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Liveness ---
    let liveness = LivenessMonitorTask::new(server_state.clone());
    let shutdown_rx_liveness = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        liveness.run(shutdown_rx_liveness).await;
        Ok(())
    });

    // --- Static worker links ---
    if config.workers.discovery == DiscoveryMode::Static {
        for addr in &config.workers.addrs {
            let dialer = WorkerDialer::new(
                addr.clone(),
                server_state.clone(),
                ctx.io_pool.clone(),
                shutdown_tx.clone(),
            );
            let shutdown_rx_dialer = shutdown_tx.subscribe();
            background_tasks.spawn(async move {
                dialer.run(shutdown_rx_dialer).await;
                Ok(())
            });
        }
    }

    info!("All background tasks have been spawned.");
}
