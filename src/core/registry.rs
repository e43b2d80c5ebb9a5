// src/core/registry.rs

//! The identity → session maps that enforce one live session per identity.
//!
//! Each role gets its own `SessionRegistry` with its own mutex, so a worker id and a
//! player id can never collide and player churn never contends with worker lookups.
//! When an operation has to touch two registries it locks players before workers
//! before consoles.

use crate::core::protocol::Envelope;
use crate::core::state::SessionHandle;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use tracing::{debug, info};

/// Builds the notice written to a session that is evicted by a newer registration.
pub type EvictionNotice = fn(identity: i64) -> Option<Envelope>;

#[derive(Debug)]
pub struct SessionRegistry {
    name: &'static str,
    entries: Mutex<HashMap<i64, SessionHandle>>,
    eviction_notice: EvictionNotice,
}

impl SessionRegistry {
    pub fn new(name: &'static str, eviction_notice: EvictionNotice) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            eviction_notice,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Inserts `handle` under `identity`, evicting and closing whatever session held
    /// the identity before. The evicted handle is returned.
    ///
    /// Replacement happens under the map lock, so concurrent registrations for the
    /// same identity are linearized: the last writer wins and every earlier session
    /// is closed.
    pub fn register(&self, identity: i64, handle: SessionHandle) -> Option<SessionHandle> {
        let previous = self.entries.lock().insert(identity, handle.clone());
        let evicted = previous.filter(|old| !old.same_connection(&handle))?;
        info!(
            "{} {} re-registered from {}; evicting connection {} ({}).",
            self.name,
            identity,
            handle.addr(),
            evicted.conn_id(),
            evicted.addr()
        );
        evicted.close((self.eviction_notice)(identity));
        Some(evicted)
    }

    pub fn lookup(&self, identity: i64) -> Option<SessionHandle> {
        self.entries.lock().get(&identity).cloned()
    }

    /// Like `lookup`, but skips entries whose connection is already closing.
    pub fn lookup_live(&self, identity: i64) -> Option<SessionHandle> {
        self.lookup(identity).filter(|handle| !handle.is_closed())
    }

    pub fn remove(&self, identity: i64) -> Option<SessionHandle> {
        self.entries.lock().remove(&identity)
    }

    /// Removes the entry only if it still belongs to connection `conn_id`. Used by
    /// connection cleanup so a closing session never unregisters its replacement.
    pub fn remove_if_current(&self, identity: i64, conn_id: u64) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(&identity) {
            Some(handle) if handle.conn_id() == conn_id => {
                entries.remove(&identity);
                true
            }
            _ => false,
        }
    }

    /// True if `identity` is registered to connection `conn_id`.
    pub fn is_current(&self, identity: i64, conn_id: u64) -> bool {
        self.entries
            .lock()
            .get(&identity)
            .is_some_and(|handle| handle.conn_id() == conn_id)
    }

    /// A point-in-time copy of the map.
    pub fn snapshot(&self) -> Vec<(i64, SessionHandle)> {
        self.entries
            .lock()
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect()
    }

    /// Enqueues `envelope` on every live session and returns how many accepted it.
    ///
    /// Iterates a snapshot, so the lock is never held while enqueueing. Sessions
    /// removed or closed after the snapshot was taken are skipped.
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        let mut delivered = 0;
        for (identity, handle) in self.snapshot() {
            if handle.is_closed() || !self.is_current(identity, handle.conn_id()) {
                continue;
            }
            if handle.send(envelope.clone()) {
                delivered += 1;
            }
        }
        debug!("Broadcast to {} {} sessions.", delivered, self.name);
        delivered
    }

    /// Picks a live entry uniformly at random.
    pub fn pick_random(&self) -> Option<(i64, SessionHandle)> {
        let mut rng = rand::rngs::SmallRng::from_entropy();
        self.entries
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_closed())
            .choose(&mut rng)
            .map(|(id, handle)| (*id, handle.clone()))
    }

    /// Drops every entry whose connection has closed and returns them.
    pub fn reap_closed(&self) -> Vec<(i64, SessionHandle)> {
        let mut entries = self.entries.lock();
        let dead: Vec<i64> = entries
            .iter()
            .filter(|(_, handle)| handle.is_closed())
            .map(|(id, _)| *id)
            .collect();
        dead.into_iter()
            .filter_map(|id| entries.remove(&id).map(|handle| (id, handle)))
            .collect()
    }

    pub fn identities(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.entries.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
