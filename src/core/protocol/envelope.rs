// src/core/protocol/envelope.rs

//! The decoded unit of the wire protocol and the typed payload records it carries.

use crate::core::GatewayError;
use bincode::config;
use std::fmt;

/// Room ids encode the worker that hosts them: `worker_id = room_id / ROOM_ID_STRIDE`.
pub const ROOM_ID_STRIDE: i64 = 1_000_000;

/// Upper bound on what decoding one envelope or record may allocate. Nothing inside
/// a frame can be longer than the frame itself, whose length prefix is 16 bits.
const DECODE_LIMIT: usize = u16::MAX as usize;

/// Length fields are claimed before any bytes are read, so decoding always runs
/// with a limit.
fn decode_config() -> impl config::Config {
    config::standard().with_limit::<DECODE_LIMIT>()
}

/// A single envelope as it appears inside a frame.
///
/// `kind` stays a raw integer so that an envelope of a kind this build does not know
/// still decodes; it is resolved through [`Envelope::kind`] at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Envelope {
    pub kind: u16,
    /// The player (or worker) identity this envelope is about, when it crosses the
    /// gateway/worker boundary.
    pub addressee: Option<i64>,
    /// Console correlation id.
    pub correlation: Option<u64>,
    pub payload: Vec<u8>,
}

/// Every envelope kind the gateway, workers and consoles understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EnvelopeKind {
    Login = 1,
    LoginReply = 2,
    WorkerRegister = 3,
    WorkerRegisterAck = 4,
    ConsoleRegister = 5,
    ConsoleRegisterAck = 6,
    Heartbeat = 7,
    GameAction = 8,
    EnterRoom = 9,
    Kickout = 10,
    Status = 11,
    Broadcast = 12,
    ConsoleCommand = 13,
    ConsoleReply = 14,
    Logout = 15,
}

impl EnvelopeKind {
    /// True for the three envelopes allowed on an unclassified session.
    pub fn is_registration(self) -> bool {
        matches!(
            self,
            EnvelopeKind::Login | EnvelopeKind::WorkerRegister | EnvelopeKind::ConsoleRegister
        )
    }
}

impl TryFrom<u16> for EnvelopeKind {
    type Error = GatewayError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let kind = match value {
            1 => EnvelopeKind::Login,
            2 => EnvelopeKind::LoginReply,
            3 => EnvelopeKind::WorkerRegister,
            4 => EnvelopeKind::WorkerRegisterAck,
            5 => EnvelopeKind::ConsoleRegister,
            6 => EnvelopeKind::ConsoleRegisterAck,
            7 => EnvelopeKind::Heartbeat,
            8 => EnvelopeKind::GameAction,
            9 => EnvelopeKind::EnterRoom,
            10 => EnvelopeKind::Kickout,
            11 => EnvelopeKind::Status,
            12 => EnvelopeKind::Broadcast,
            13 => EnvelopeKind::ConsoleCommand,
            14 => EnvelopeKind::ConsoleReply,
            15 => EnvelopeKind::Logout,
            other => return Err(GatewayError::UnknownKind(other)),
        };
        Ok(kind)
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A payload record that can be carried inside an envelope.
pub trait Record: bincode::Encode + bincode::Decode<()> {}

impl<T: bincode::Encode + bincode::Decode<()>> Record for T {}

/// Credentials presented by a game client.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct LoginRequest {
    pub account: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct LoginReply {
    pub identity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct WorkerRegister {
    pub worker_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct ConsoleRegister {
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct EnterRoom {
    pub room_id: i64,
}

impl EnterRoom {
    /// The worker that hosts this room.
    pub fn worker_id(&self) -> i64 {
        self.room_id / ROOM_ID_STRIDE
    }
}

/// Why a player is being released from a worker or dropped from the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum KickReason {
    Reassigned,
    DuplicateLogin,
    Disconnect,
    Idle,
    Console,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Kickout {
    pub player: i64,
    pub reason: KickReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum StatusCode {
    Ok,
    NotRegistered,
    AlreadyRegistered,
    TargetOffline,
    NoWorkerAvailable,
    BadRequest,
    Unauthorized,
    ServerBusy,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Status {
    pub code: StatusCode,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct ConsoleCommand {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct ConsoleReply {
    pub ok: bool,
    pub output: String,
}

impl Envelope {
    /// An envelope with an opaque payload and no addressing.
    pub fn new(kind: EnvelopeKind, payload: Vec<u8>) -> Self {
        Self {
            kind: kind as u16,
            addressee: None,
            correlation: None,
            payload,
        }
    }

    /// An envelope whose payload is the bincode encoding of `record`.
    pub fn with_record<R: Record>(kind: EnvelopeKind, record: &R) -> Result<Self, GatewayError> {
        let payload = bincode::encode_to_vec(record, config::standard())?;
        Ok(Self::new(kind, payload))
    }

    pub fn heartbeat() -> Self {
        Self::new(EnvelopeKind::Heartbeat, Vec::new())
    }

    pub fn status(code: StatusCode, detail: impl Into<String>) -> Self {
        let status = Status {
            code,
            detail: detail.into(),
        };
        // A status record is a small enum plus a string; encoding cannot fail.
        let payload = bincode::encode_to_vec(&status, config::standard()).unwrap_or_default();
        Self::new(EnvelopeKind::Status, payload)
    }

    pub fn kickout(player: i64, reason: KickReason) -> Self {
        let payload = bincode::encode_to_vec(Kickout { player, reason }, config::standard())
            .unwrap_or_default();
        Self::new(EnvelopeKind::Kickout, payload).addressed_to(player)
    }

    /// Sets the addressee tag.
    pub fn addressed_to(mut self, identity: i64) -> Self {
        self.addressee = Some(identity);
        self
    }

    pub fn correlated(mut self, correlation: u64) -> Self {
        self.correlation = Some(correlation);
        self
    }

    /// Resolves the raw wire kind.
    pub fn kind(&self) -> Result<EnvelopeKind, GatewayError> {
        EnvelopeKind::try_from(self.kind)
    }

    /// Decodes the payload as `R`, rejecting trailing bytes.
    pub fn decode_record<R: Record>(&self) -> Result<R, GatewayError> {
        let (record, read) = bincode::decode_from_slice::<R, _>(&self.payload, decode_config())?;
        if read != self.payload.len() {
            return Err(GatewayError::MalformedEnvelope(format!(
                "{} trailing bytes after payload record",
                self.payload.len() - read
            )));
        }
        Ok(record)
    }

    /// Encodes the envelope body (without the length prefix).
    pub fn to_bytes(&self) -> Result<Vec<u8>, GatewayError> {
        Ok(bincode::encode_to_vec(self, config::standard())?)
    }

    /// Decodes an envelope body (without the length prefix).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GatewayError> {
        let (envelope, read) = bincode::decode_from_slice::<Self, _>(bytes, decode_config())?;
        if read != bytes.len() {
            return Err(GatewayError::MalformedEnvelope(format!(
                "{} trailing bytes after envelope",
                bytes.len() - read
            )));
        }
        Ok(envelope)
    }
}
