// src/main.rs

//! The main entry point for the Tilegate gateway and worker binaries.

use anyhow::Result;
use std::env;
use std::sync::Arc;
use tilegate::config::{Config, WorkerNodeConfig};
use tilegate::server;
use tilegate::worker::{EchoEngine, WorkerNode};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("Tilegate version {VERSION}");
        return Ok(());
    }

    if args.len() > 1 && args[1] == "--worker" {
        // --- Worker Mode ---
        if args.len() != 3 {
            eprintln!("Usage: tilegate --worker /path/to/worker.toml");
            std::process::exit(1);
        }
        let config_path = &args[2];
        let config = match WorkerNodeConfig::from_file(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load worker configuration from \"{config_path}\": {e:#}");
                std::process::exit(1);
            }
        };

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .compact()
            .with_ansi(true)
            .init();

        info!("Starting Tilegate worker {}...", config.worker_id);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let node = WorkerNode::new(config, Arc::new(EchoEngine::new()));
        let mut node_task = tokio::spawn(node.run(shutdown_rx));

        let outcome = tokio::select! {
            res = &mut node_task => res,
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("Failed to listen for ctrl-c: {}", e);
                }
                info!("Interrupt received, stopping worker.");
                let _ = shutdown_tx.send(());
                node_task.await
            }
        };
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Worker runtime error: {}", e);
                return Err(e);
            }
            Err(e) => {
                error!("Worker task panicked: {}", e);
                return Err(e.into());
            }
        }
    } else {
        // --- Gateway Mode ---

        // It can be provided via a --config flag; otherwise, it defaults to "config.toml".
        let config_path = args
            .iter()
            .position(|arg| arg == "--config")
            .and_then(|i| args.get(i + 1))
            .map(|s| s.as_str())
            .unwrap_or("config.toml");

        let mut config = match Config::from_file(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
                std::process::exit(1);
            }
        };

        if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
            if let Some(port_str) = args.get(port_index + 1) {
                match port_str.parse::<u16>() {
                    Ok(port) => config.port = port,
                    Err(_) => {
                        eprintln!("Invalid port number: {port_str}");
                        std::process::exit(1);
                    }
                }
            } else {
                eprintln!("--port flag requires a value");
                std::process::exit(1);
            }
            if let Err(e) = config.validate() {
                eprintln!("Invalid configuration: {e}");
                std::process::exit(1);
            }
        }

        // Get initial log level from env var or config.
        let initial_log_level =
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());

        // Reloadable so the `loglevel` console command can change it at runtime.
        let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(true),
            )
            .init();

        let reload_handle = Arc::new(reload_handle);

        if let Err(e) = server::run(config, Some(reload_handle)).await {
            error!("Server runtime error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}
