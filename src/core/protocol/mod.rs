// src/core/protocol/mod.rs

pub mod codec;
pub mod envelope;
pub use codec::{EnvelopeCodec, InboundFrame};
pub use envelope::*;
