// src/connection/mod.rs

//! Manages the lifecycle of a single TCP connection: framing, routing, the outbound
//! queue, and cleanup.

mod guard;
mod handler;
mod session;

pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
pub use session::SessionState;
