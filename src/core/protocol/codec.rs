// src/core/protocol/codec.rs

//! Implements the length-prefixed frame format and the corresponding `Encoder` and
//! `Decoder` for network communication.
//!
//! Wire layout: `u16 big-endian length | envelope bytes[length]`.

use super::envelope::Envelope;
use crate::core::GatewayError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// The default maximum frame size (32 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 32 * 1024;

/// One complete frame pulled off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Envelope(Envelope),
    /// The frame was complete but its body did not decode. The bytes are already
    /// consumed, the connection stays usable.
    Malformed { len: usize, reason: String },
}

/// A `tokio_util::codec` implementation for encoding and decoding envelopes.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_frame_size: usize,
}

impl EnvelopeCodec {
    /// `max_frame_size` is clamped to what the 16-bit length prefix can express.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(u16::MAX as usize),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = GatewayError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.to_bytes()?;
        if body.len() > self.max_frame_size {
            return Err(GatewayError::FrameTooLarge {
                len: body.len(),
                max: self.max_frame_size,
            });
        }
        dst.reserve(LENGTH_PREFIX_LEN + body.len());
        dst.put_u16(body.len() as u16);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

impl Decoder for EnvelopeCodec {
    type Item = InboundFrame;
    type Error = GatewayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let len = u16::from_be_bytes([src[0], src[1]]) as usize;
        // An oversized declaration is fatal for the connection: nothing after it can
        // be trusted to be aligned on a frame boundary.
        if len > self.max_frame_size {
            return Err(GatewayError::FrameTooLarge {
                len,
                max: self.max_frame_size,
            });
        }

        if src.len() < LENGTH_PREFIX_LEN + len {
            src.reserve(LENGTH_PREFIX_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_LEN);
        let body = src.split_to(len);
        match Envelope::from_bytes(&body) {
            Ok(envelope) => Ok(Some(InboundFrame::Envelope(envelope))),
            Err(e) => Ok(Some(InboundFrame::Malformed {
                len,
                reason: e.to_string(),
            })),
        }
    }
}
