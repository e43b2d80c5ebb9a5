// src/core/state/core.rs

//! Defines the central `ServerState` struct, holding all shared gateway-wide state.

use super::client::*;
use super::stats::StatsState;
use crate::config::Config;
use crate::core::protocol::{Envelope, KickReason, StatusCode};
use crate::core::registry::SessionRegistry;
use crate::core::store::{MemoryPlayerStore, PlayerStore};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::{Registry, filter::EnvFilter, reload};

/// A handle to the logging filter, allowing the log level to be changed at runtime.
pub type LogReloadHandle = Arc<reload::Handle<EnvFilter, Registry>>;

/// Where a relayed console command came from, keyed by the gateway-assigned
/// correlation id the worker will echo back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleRoute {
    pub console_conn_id: u64,
    /// The console's own correlation id, restored on the reply.
    pub console_request: Option<u64>,
    pub worker_id: i64,
    pub issued_at: Instant,
}

/// The central struct holding all shared, gateway-wide state.
///
/// Wrapped in an `Arc` and handed to every connection task and background task.
#[derive(Debug)]
pub struct ServerState {
    pub config: Arc<Config>,
    /// Every live connection, classified or not.
    pub clients: ClientMap,
    /// Player identity → session.
    pub players: SessionRegistry,
    /// Worker id → session.
    pub workers: SessionRegistry,
    /// Console sessions, keyed by connection id.
    pub consoles: SessionRegistry,
    /// In-flight console relays.
    pub console_routes: DashMap<u64, ConsoleRoute>,
    pub store: Arc<dyn PlayerStore>,
    pub log_reload_handle: Option<LogReloadHandle>,
    pub stats: StatsState,
    next_conn_id: AtomicU64,
    next_correlation: AtomicU64,
}

fn player_eviction_notice(identity: i64) -> Option<Envelope> {
    Some(Envelope::kickout(identity, KickReason::DuplicateLogin))
}

fn worker_eviction_notice(_worker_id: i64) -> Option<Envelope> {
    Some(Envelope::status(
        StatusCode::AlreadyRegistered,
        "replaced by a newer registration for this worker id",
    ))
}

impl ServerState {
    /// Builds the gateway state with the in-process player store.
    pub fn initialize(config: Config, log_reload_handle: Option<LogReloadHandle>) -> Arc<Self> {
        Self::with_store(config, Arc::new(MemoryPlayerStore::new()), log_reload_handle)
    }

    pub fn with_store(
        config: Config,
        store: Arc<dyn PlayerStore>,
        log_reload_handle: Option<LogReloadHandle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            clients: Arc::new(DashMap::new()),
            players: SessionRegistry::new("player", player_eviction_notice),
            workers: SessionRegistry::new("worker", worker_eviction_notice),
            consoles: SessionRegistry::new("console", |_| None),
            console_routes: DashMap::new(),
            store,
            log_reload_handle,
            stats: StatsState::new(),
            next_conn_id: AtomicU64::new(1),
            next_correlation: AtomicU64::new(1),
        })
    }

    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// A fresh correlation id for a relayed console command.
    pub fn next_correlation(&self) -> u64 {
        self.next_correlation.fetch_add(1, Ordering::Relaxed)
    }

    /// The registry a classified session lives in.
    pub fn registry_for(&self, role: SessionRole) -> Option<&SessionRegistry> {
        match role {
            SessionRole::Player => Some(&self.players),
            SessionRole::Worker => Some(&self.workers),
            SessionRole::AdminConsole => Some(&self.consoles),
            SessionRole::Unclassified => None,
        }
    }

    /// The idle window applied to player and unclassified sessions.
    pub fn idle_window(&self) -> Option<Duration> {
        Some(self.config.liveness.idle_timeout)
    }

    /// Drops console relays that can no longer complete: the console or the worker
    /// is gone, or the worker has not replied within one idle timeout. Returns how
    /// many were dropped.
    pub fn prune_console_routes(&self, now: Instant) -> usize {
        let reply_window = self.config.liveness.idle_timeout;
        let before = self.console_routes.len();
        self.console_routes.retain(|_, route| {
            self.consoles
                .lookup_live(route.console_conn_id as i64)
                .is_some()
                && self.workers.lookup_live(route.worker_id).is_some()
                && now.saturating_duration_since(route.issued_at) < reply_window
        });
        before.saturating_sub(self.console_routes.len())
    }
}
