// src/core/mod.rs

//! The session, registry and routing core of the gateway.

pub mod errors;
pub mod handler;
pub mod metrics;
pub mod protocol;
pub mod reconnect;
pub mod registry;
pub mod state;
pub mod store;
pub mod tasks;

pub use errors::GatewayError;
pub use protocol::{Envelope, EnvelopeKind};
