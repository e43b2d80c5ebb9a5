// src/worker/engine.rs

//! The seam between a worker link and the game logic behind it.

use crate::core::protocol::{ConsoleReply, EnterRoom, Envelope, EnvelopeKind, KickReason};
use dashmap::DashMap;
use tracing::{debug, info};

/// One envelope the engine wants sent back to the player it is handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: EnvelopeKind,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn new(kind: EnvelopeKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }
}

/// Game logic hosted by a worker node.
///
/// Calls for one link arrive in frame order from a single task. Implementations
/// must not block; long work belongs on the engine's own tasks.
pub trait GameEngine: Send + Sync + 'static {
    /// Handles a `GameAction` or `EnterRoom` on behalf of `player`. Every returned
    /// reply is sent back addressed to that player.
    fn handle_envelope(&self, player: i64, kind: EnvelopeKind, payload: &[u8]) -> Vec<Reply>;

    /// The gateway no longer routes `player` here. Drop whatever is held for them.
    fn release(&self, player: i64, reason: KickReason);

    /// Runs an operator command relayed from an admin console.
    fn console(&self, command: &str) -> ConsoleReply;
}

/// A minimal engine: echoes game actions, seats players on `EnterRoom` and forgets
/// them on release.
#[derive(Debug, Default)]
pub struct EchoEngine {
    seats: DashMap<i64, i64>,
}

impl EchoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The room `player` is seated in, if any.
    pub fn seat_of(&self, player: i64) -> Option<i64> {
        self.seats.get(&player).map(|room| *room)
    }

    pub fn seated(&self) -> usize {
        self.seats.len()
    }
}

impl GameEngine for EchoEngine {
    fn handle_envelope(&self, player: i64, kind: EnvelopeKind, payload: &[u8]) -> Vec<Reply> {
        match kind {
            EnvelopeKind::GameAction => vec![Reply::new(kind, payload.to_vec())],
            EnvelopeKind::EnterRoom => {
                let probe = Envelope::new(kind, payload.to_vec());
                match probe.decode_record::<EnterRoom>() {
                    Ok(enter) => {
                        self.seats.insert(player, enter.room_id);
                        debug!("Player {} seated in room {}.", player, enter.room_id);
                        vec![Reply::new(kind, payload.to_vec())]
                    }
                    Err(e) => {
                        debug!("Ignoring EnterRoom from {} with a bad payload: {}", player, e);
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        }
    }

    fn release(&self, player: i64, reason: KickReason) {
        if self.seats.remove(&player).is_some() {
            info!("Player {} released ({:?}).", player, reason);
        }
    }

    fn console(&self, command: &str) -> ConsoleReply {
        match command.trim() {
            "seats" => {
                let mut seats: Vec<String> = self
                    .seats
                    .iter()
                    .map(|entry| format!("{}@{}", entry.key(), entry.value()))
                    .collect();
                seats.sort();
                ConsoleReply {
                    ok: true,
                    output: seats.join(","),
                }
            }
            "players" => ConsoleReply {
                ok: true,
                output: self.seats.len().to_string(),
            },
            other => ConsoleReply {
                ok: false,
                output: format!("unknown command '{other}'"),
            },
        }
    }
}
