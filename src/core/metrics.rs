// src/core/metrics.rs

//! Defines and registers Prometheus metrics for gateway monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// The number of open connections, classified or not.
    pub static ref CONNECTED_SESSIONS: Gauge =
        register_gauge!("tilegate_connected_sessions", "Number of currently open sessions.").unwrap();
    /// The number of registered player sessions.
    pub static ref REGISTERED_PLAYERS: Gauge =
        register_gauge!("tilegate_registered_players", "Number of logged-in players.").unwrap();
    /// The number of registered worker links.
    pub static ref REGISTERED_WORKERS: Gauge =
        register_gauge!("tilegate_registered_workers", "Number of registered workers.").unwrap();

    // --- Counters ---
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("tilegate_connections_received_total", "Total number of connections accepted.").unwrap();
    pub static ref CONNECTIONS_REJECTED_TOTAL: Counter =
        register_counter!("tilegate_connections_rejected_total", "Connections refused because max_clients was reached.").unwrap();
    /// Inbound envelopes, labeled by the role of the sending session.
    pub static ref ENVELOPES_IN_TOTAL: CounterVec =
        register_counter_vec!("tilegate_envelopes_in_total", "Envelopes received, labeled by sender role.", &["role"]).unwrap();
    pub static ref ENVELOPES_OUT_TOTAL: Counter =
        register_counter!("tilegate_envelopes_out_total", "Envelopes written to sockets.").unwrap();
    pub static ref MALFORMED_FRAMES_TOTAL: Counter =
        register_counter!("tilegate_malformed_frames_total", "Frames whose body failed to decode.").unwrap();
    pub static ref OVERSIZED_FRAMES_TOTAL: Counter =
        register_counter!("tilegate_oversized_frames_total", "Connections closed for declaring an oversized frame.").unwrap();
    /// Kickouts issued, labeled by reason.
    pub static ref KICKOUTS_TOTAL: CounterVec =
        register_counter_vec!("tilegate_kickouts_total", "Kickout notices sent, labeled by reason.", &["reason"]).unwrap();
    pub static ref HANDOFFS_TOTAL: Counter =
        register_counter!("tilegate_handoffs_total", "Players moved from one worker to another.").unwrap();
    pub static ref EXPIRED_SESSIONS_TOTAL: Counter =
        register_counter!("tilegate_expired_sessions_total", "Sessions closed by the liveness monitor.").unwrap();

    // --- Histograms ---
    /// Time spent routing one inbound envelope.
    pub static ref ROUTE_LATENCY_SECONDS: Histogram =
        register_histogram!("tilegate_route_latency_seconds", "Latency of envelope routing in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
