// src/core/state/stats.rs

//! Contains state definitions and logic for gateway statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals since startup. Exposed through the console `stats` command and
/// mirrored into the Prometheus counters.
#[derive(Debug, Default)]
pub struct StatsState {
    total_connections: AtomicU64,
    total_envelopes: AtomicU64,
    total_handoffs: AtomicU64,
    total_expired: AtomicU64,
}

impl StatsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_total_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Counts one routed inbound envelope.
    pub fn increment_total_envelopes(&self) {
        self.total_envelopes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_envelopes(&self) -> u64 {
        self.total_envelopes.load(Ordering::Relaxed)
    }

    pub fn increment_total_handoffs(&self) {
        self.total_handoffs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_handoffs(&self) -> u64 {
        self.total_handoffs.load(Ordering::Relaxed)
    }

    pub fn add_expired(&self, count: u64) {
        self.total_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn get_total_expired(&self) -> u64 {
        self.total_expired.load(Ordering::Relaxed)
    }
}
