// src/core/errors.rs

//! Defines the primary error type for the gateway and the worker link.

use crate::core::protocol::StatusCode;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure the session/routing core can hit.
///
/// Transport and protocol variants never leave the connection handler. Routing
/// variants are turned into a `Status` envelope for the originating session.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("frame of {len} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unknown envelope kind {0}")]
    UnknownKind(u16),

    #[error("session is not registered")]
    NotRegistered,

    #[error("session is already registered as {0}")]
    AlreadyRegistered(String),

    #[error("target {0} is offline")]
    TargetOffline(i64),

    #[error("no worker available")]
    NoWorkerAvailable,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("server busy")]
    ServerBusy,

    #[error("store error: {0}")]
    Store(String),

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Maps the error onto the status code reported back to a peer.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotRegistered => StatusCode::NotRegistered,
            GatewayError::AlreadyRegistered(_) => StatusCode::AlreadyRegistered,
            GatewayError::TargetOffline(_) => StatusCode::TargetOffline,
            GatewayError::NoWorkerAvailable => StatusCode::NoWorkerAvailable,
            GatewayError::Unauthorized(_) => StatusCode::Unauthorized,
            GatewayError::ServerBusy => StatusCode::ServerBusy,
            GatewayError::MalformedEnvelope(_)
            | GatewayError::UnknownKind(_)
            | GatewayError::BadRequest(_) => StatusCode::BadRequest,
            _ => StatusCode::Internal,
        }
    }

    /// True for errors that should be answered with a status envelope rather than
    /// tearing the connection down.
    pub fn is_soft(&self) -> bool {
        !matches!(
            self,
            GatewayError::Io(_) | GatewayError::FrameTooLarge { .. }
        )
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for GatewayError {
    fn clone(&self) -> Self {
        match self {
            GatewayError::Io(e) => GatewayError::Io(Arc::clone(e)),
            GatewayError::FrameTooLarge { len, max } => GatewayError::FrameTooLarge {
                len: *len,
                max: *max,
            },
            GatewayError::MalformedEnvelope(s) => GatewayError::MalformedEnvelope(s.clone()),
            GatewayError::UnknownKind(k) => GatewayError::UnknownKind(*k),
            GatewayError::NotRegistered => GatewayError::NotRegistered,
            GatewayError::AlreadyRegistered(s) => GatewayError::AlreadyRegistered(s.clone()),
            GatewayError::TargetOffline(id) => GatewayError::TargetOffline(*id),
            GatewayError::NoWorkerAvailable => GatewayError::NoWorkerAvailable,
            GatewayError::Unauthorized(s) => GatewayError::Unauthorized(s.clone()),
            GatewayError::BadRequest(s) => GatewayError::BadRequest(s.clone()),
            GatewayError::ServerBusy => GatewayError::ServerBusy,
            GatewayError::Store(s) => GatewayError::Store(s.clone()),
            GatewayError::ConnectTimeout(s) => GatewayError::ConnectTimeout(s.clone()),
            GatewayError::Internal(s) => GatewayError::Internal(s.clone()),
        }
    }
}

impl PartialEq for GatewayError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (GatewayError::Io(e1), GatewayError::Io(e2)) => e1.to_string() == e2.to_string(),
            (
                GatewayError::FrameTooLarge { len: l1, max: m1 },
                GatewayError::FrameTooLarge { len: l2, max: m2 },
            ) => l1 == l2 && m1 == m2,
            (GatewayError::MalformedEnvelope(s1), GatewayError::MalformedEnvelope(s2)) => s1 == s2,
            (GatewayError::UnknownKind(k1), GatewayError::UnknownKind(k2)) => k1 == k2,
            (GatewayError::AlreadyRegistered(s1), GatewayError::AlreadyRegistered(s2)) => s1 == s2,
            (GatewayError::TargetOffline(a), GatewayError::TargetOffline(b)) => a == b,
            (GatewayError::Unauthorized(s1), GatewayError::Unauthorized(s2)) => s1 == s2,
            (GatewayError::BadRequest(s1), GatewayError::BadRequest(s2)) => s1 == s2,
            (GatewayError::Store(s1), GatewayError::Store(s2)) => s1 == s2,
            (GatewayError::ConnectTimeout(s1), GatewayError::ConnectTimeout(s2)) => s1 == s2,
            (GatewayError::Internal(s1), GatewayError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Io(Arc::new(e))
    }
}

impl From<bincode::error::DecodeError> for GatewayError {
    fn from(e: bincode::error::DecodeError) -> Self {
        GatewayError::MalformedEnvelope(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for GatewayError {
    fn from(e: bincode::error::EncodeError) -> Self {
        GatewayError::Internal(format!("envelope encoding failed: {e}"))
    }
}

impl From<std::string::FromUtf8Error> for GatewayError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        GatewayError::BadRequest(format!("invalid utf-8: {e}"))
    }
}
