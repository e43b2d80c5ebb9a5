// src/config.rs

//! Manages gateway and worker-node configuration: loading, resolving dynamic values,
//! and validation.

use crate::core::protocol::codec::DEFAULT_MAX_FRAME_SIZE;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::{info, warn};

/// Idle-expiry settings for player sessions.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LivenessConfig {
    /// A player session with no inbound traffic for this long is closed by the next sweep.
    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    pub idle_timeout: Duration,
    /// How often the liveness monitor runs.
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(45)
}
fn default_sweep_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// How the gateway learns about its workers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Workers dial the gateway and register themselves.
    #[default]
    Registration,
    /// The gateway dials every address in `workers.addrs`.
    Static,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkersConfig {
    #[serde(default)]
    pub discovery: DiscoveryMode,
    /// Worker listener addresses, used with `discovery = "static"`.
    #[serde(default)]
    pub addrs: Vec<String>,
    /// Outbound dials that do not complete the handshake within this window are aborted.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(3)
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryMode::default(),
            addrs: Vec::new(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    7480
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    /// `0` means one I/O worker per CPU.
    #[serde(default)]
    io_workers: usize,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default = "default_max_frame_size")]
    max_frame_size: usize,
    #[serde(default)]
    console_secret: Option<String>,
    #[serde(default)]
    liveness: LivenessConfig,
    #[serde(default)]
    workers: WorkersConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7400
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    10000
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

/// Represents the final, validated, and resolved gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub io_workers: usize,
    pub max_clients: usize,
    pub max_frame_size: usize,
    #[serde(skip_serializing)]
    pub console_secret: Option<String>,
    pub liveness: LivenessConfig,
    pub workers: WorkersConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            io_workers: resolve_io_workers(0),
            max_clients: default_max_clients(),
            max_frame_size: default_max_frame_size(),
            console_secret: None,
            liveness: LivenessConfig::default(),
            workers: WorkersConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Parses, resolves and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            io_workers: resolve_io_workers(raw_config.io_workers),
            max_clients: raw_config.max_clients,
            max_frame_size: raw_config.max_frame_size,
            console_secret: raw_config.console_secret,
            liveness: raw_config.liveness,
            workers: raw_config.workers,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.io_workers == 0 {
            return Err(anyhow!("io_workers cannot be 0"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.max_frame_size == 0 || self.max_frame_size > u16::MAX as usize {
            return Err(anyhow!(
                "max_frame_size must be between 1 and {} (16-bit length prefix)",
                u16::MAX
            ));
        }
        if self.max_frame_size < 64 {
            warn!(
                "very small max_frame_size ({} bytes); login envelopes may not fit.",
                self.max_frame_size
            );
        }
        if self.liveness.idle_timeout.is_zero() {
            return Err(anyhow!("liveness.idle_timeout cannot be 0"));
        }
        if self.liveness.sweep_interval.is_zero() {
            return Err(anyhow!("liveness.sweep_interval cannot be 0"));
        }
        if self.liveness.sweep_interval > self.liveness.idle_timeout {
            warn!(
                "liveness.sweep_interval ({:?}) is longer than idle_timeout ({:?}); \
                 idle sessions will linger past their deadline.",
                self.liveness.sweep_interval, self.liveness.idle_timeout
            );
        }
        if self.workers.connect_timeout.is_zero() {
            return Err(anyhow!("workers.connect_timeout cannot be 0"));
        }
        if self.workers.discovery == DiscoveryMode::Static && self.workers.addrs.is_empty() {
            return Err(anyhow!(
                "workers.addrs cannot be empty when workers.discovery is \"static\""
            ));
        }
        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}

/// Resolves `io_workers = 0` to the number of available CPUs.
fn resolve_io_workers(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    let cpus = num_cpus::get();
    info!("io_workers not set; using {} (one per CPU).", cpus);
    cpus
}

/// Configuration of a worker node (the game-logic side of the link).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerNodeConfig {
    pub worker_id: i64,
    /// Gateway address to dial. Mutually exclusive with `listen`.
    #[serde(default)]
    pub gateway_addr: Option<String>,
    /// Address to accept gateway dials on (static discovery).
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl WorkerNodeConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read worker config file at '{path}'"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid worker config in '{path}'"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: WorkerNodeConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.worker_id <= 0 {
            return Err(anyhow!("worker_id must be positive"));
        }
        match (&self.gateway_addr, &self.listen) {
            (Some(_), Some(_)) => Err(anyhow!(
                "set either gateway_addr or listen, not both"
            )),
            (None, None) => Err(anyhow!("one of gateway_addr or listen is required")),
            _ => Ok(()),
        }?;
        if self.max_frame_size == 0 || self.max_frame_size > u16::MAX as usize {
            return Err(anyhow!("max_frame_size must be between 1 and {}", u16::MAX));
        }
        Ok(())
    }
}
