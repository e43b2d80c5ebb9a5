// src/worker/mod.rs

//! The game-server side of the gateway link: a node that registers as a worker and a
//! pluggable engine that handles the traffic routed to it.

mod engine;
mod node;

pub use engine::{EchoEngine, GameEngine, Reply};
pub use node::WorkerNode;
