// src/core/store.rs

//! The persistence boundary: identity resolution, worker affinity and dirty player
//! snapshots.
//!
//! The real deployment backs this with a key-value store. Calls are synchronous and
//! are expected to be cheap (a local cache in front of the store).

use crate::core::GatewayError;
use crate::core::protocol::LoginRequest;
use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

pub trait PlayerStore: Send + Sync + Debug {
    /// Maps login credentials to a player identity.
    fn resolve_identity(&self, login: &LoginRequest) -> Result<i64, GatewayError>;

    /// The worker currently holding this player's game state, if any.
    fn load_affinity(&self, identity: i64) -> Result<Option<i64>, GatewayError>;

    /// Persists (or clears, with `None`) the player's worker assignment.
    fn save_affinity(&self, identity: i64, worker: Option<i64>) -> Result<(), GatewayError>;

    /// Persists an opaque player snapshot.
    fn save_dirty(&self, identity: i64, blob: &[u8]) -> Result<(), GatewayError>;
}

/// First identity handed out by [`MemoryPlayerStore`].
pub const FIRST_PLAYER_IDENTITY: i64 = 10_000;

#[derive(Debug)]
struct Account {
    identity: i64,
    token: String,
}

/// An in-process `PlayerStore`. Unknown accounts are created on first login.
#[derive(Debug)]
pub struct MemoryPlayerStore {
    accounts: DashMap<String, Account>,
    affinity: DashMap<i64, i64>,
    snapshots: DashMap<i64, Vec<u8>>,
    next_identity: AtomicI64,
}

impl Default for MemoryPlayerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlayerStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            affinity: DashMap::new(),
            snapshots: DashMap::new(),
            next_identity: AtomicI64::new(FIRST_PLAYER_IDENTITY),
        }
    }

    pub fn snapshot(&self, identity: i64) -> Option<Vec<u8>> {
        self.snapshots.get(&identity).map(|blob| blob.clone())
    }
}

impl PlayerStore for MemoryPlayerStore {
    fn resolve_identity(&self, login: &LoginRequest) -> Result<i64, GatewayError> {
        if login.account.trim().is_empty() {
            return Err(GatewayError::BadRequest("empty account name".into()));
        }
        // The entry API keeps lookup-or-create atomic for concurrent first logins.
        let account = self
            .accounts
            .entry(login.account.clone())
            .or_insert_with(|| {
                let identity = self.next_identity.fetch_add(1, Ordering::Relaxed);
                debug!("Created account '{}' as {}.", login.account, identity);
                Account {
                    identity,
                    token: login.token.clone(),
                }
            });
        if account.token != login.token {
            return Err(GatewayError::Unauthorized(format!(
                "bad credentials for '{}'",
                login.account
            )));
        }
        Ok(account.identity)
    }

    fn load_affinity(&self, identity: i64) -> Result<Option<i64>, GatewayError> {
        Ok(self.affinity.get(&identity).map(|worker| *worker))
    }

    fn save_affinity(&self, identity: i64, worker: Option<i64>) -> Result<(), GatewayError> {
        match worker {
            Some(worker) => {
                self.affinity.insert(identity, worker);
            }
            None => {
                self.affinity.remove(&identity);
            }
        }
        Ok(())
    }

    fn save_dirty(&self, identity: i64, blob: &[u8]) -> Result<(), GatewayError> {
        self.snapshots.insert(identity, blob.to_vec());
        Ok(())
    }
}
