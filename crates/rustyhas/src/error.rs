//! Error types for the rustyhas library
//!
//! This module defines the error type returned by the local API of the
//! Hearing Access server and client.

use crate::att::AttErrorCode;
use crate::has::codec::CodecError;
use crate::has::transport::TransportError;
use thiserror::Error;

/// Errors returned by the Hearing Access server and client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HasError {
    #[error("ATT error: {0}")]
    Att(AttErrorCode),

    #[error("Not connected")]
    NotConnected,

    #[error("Another procedure is in progress")]
    Busy,

    #[error("Preset not found")]
    NotFound,

    #[error("Not supported by the remote device")]
    NotSupported,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Hearing Access Service already registered")]
    AlreadyRegistered,

    #[error("No free peer slot")]
    NoResources,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Malformed control point message: {0}")]
    Codec(#[from] CodecError),
}

impl From<AttErrorCode> for HasError {
    fn from(code: AttErrorCode) -> Self {
        HasError::Att(code)
    }
}

impl HasError {
    /// ATT error code reported to a peer for this error
    pub fn to_att_code(&self) -> AttErrorCode {
        match self {
            HasError::Att(code) => *code,
            HasError::NotFound => AttErrorCode::OutOfRange,
            HasError::Busy => AttErrorCode::ProcedureInProgress,
            HasError::NoResources => AttErrorCode::InsufficientResources,
            HasError::Codec(err) => err.to_error_code(),
            HasError::Transport(TransportError::Att(code)) => *code,
            HasError::Transport(TransportError::InsufficientResources) => {
                AttErrorCode::InsufficientResources
            }
            HasError::Transport(TransportError::ImproperConfiguration) => {
                AttErrorCode::CccImproperlyConfigured
            }
            _ => AttErrorCode::Unlikely,
        }
    }
}

/// Result type for Hearing Access operations
pub type HasResult<T> = Result<T, HasError>;
