// src/connection/session.rs

//! Defines the routing state private to a single connection task.

use crate::core::state::SessionRole;

/// Per-connection state read and written only by the owning connection task.
///
/// The shared half of a session (queue, close signal, activity clock) lives on its
/// `SessionHandle`; this struct carries what the router needs between frames.
#[derive(Debug)]
pub struct SessionState {
    pub role: SessionRole,
    /// Player identity, worker id, or (for consoles) the connection id.
    pub identity: Option<i64>,
    /// For players: the worker currently holding their game state, as last persisted.
    pub worker: Option<i64>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            role: SessionRole::Unclassified,
            identity: None,
            worker: None,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
