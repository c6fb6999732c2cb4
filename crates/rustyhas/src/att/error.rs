//! Error codes carried in ATT Error Responses
use super::constants::*;
use crate::has::constants::*;

/// ATT error codes as returned to a peer.
///
/// Besides the core ATT codes this covers the Hearing Access Service
/// application errors (0x80..=0x84) and the common profile errors the
/// Preset Control Point can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttErrorCode {
    /// Invalid handle
    InvalidHandle,
    /// Read not permitted
    ReadNotPermitted,
    /// Write not permitted
    WriteNotPermitted,
    /// Invalid PDU
    InvalidPdu,
    /// Insufficient authentication
    InsufficientAuthentication,
    /// Request not supported
    RequestNotSupported,
    /// Invalid offset
    InvalidOffset,
    /// Attribute not found
    AttributeNotFound,
    /// Attribute not long
    AttributeNotLong,
    /// Invalid attribute value length
    InvalidAttributeValueLength,
    /// Unlikely error
    Unlikely,
    /// Insufficient encryption
    InsufficientEncryption,
    /// Insufficient resources
    InsufficientResources,
    /// Value not allowed
    ValueNotAllowed,
    /// HAS: opcode not supported
    InvalidOpcode,
    /// HAS: preset name cannot be written
    WriteNameNotAllowed,
    /// HAS: preset synchronization not supported
    PresetSyncNotSupported,
    /// HAS: operation cannot be performed at this time
    OperationNotPossible,
    /// HAS: parameter length is invalid
    InvalidParameterLength,
    /// Client Characteristic Configuration Descriptor improperly configured
    CccImproperlyConfigured,
    /// Procedure already in progress
    ProcedureInProgress,
    /// Out of range
    OutOfRange,
    /// Other application error
    ApplicationError(u8),
    /// Other common profile error
    CommonProfileError(u8),
    /// Unknown error code
    Unknown(u8),
}

impl From<u8> for AttErrorCode {
    fn from(code: u8) -> Self {
        match code {
            ATT_ERROR_INVALID_HANDLE => AttErrorCode::InvalidHandle,
            ATT_ERROR_READ_NOT_PERMITTED => AttErrorCode::ReadNotPermitted,
            ATT_ERROR_WRITE_NOT_PERMITTED => AttErrorCode::WriteNotPermitted,
            ATT_ERROR_INVALID_PDU => AttErrorCode::InvalidPdu,
            ATT_ERROR_INSUFFICIENT_AUTHENTICATION => AttErrorCode::InsufficientAuthentication,
            ATT_ERROR_REQUEST_NOT_SUPPORTED => AttErrorCode::RequestNotSupported,
            ATT_ERROR_INVALID_OFFSET => AttErrorCode::InvalidOffset,
            ATT_ERROR_ATTRIBUTE_NOT_FOUND => AttErrorCode::AttributeNotFound,
            ATT_ERROR_ATTRIBUTE_NOT_LONG => AttErrorCode::AttributeNotLong,
            ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH => AttErrorCode::InvalidAttributeValueLength,
            ATT_ERROR_UNLIKELY => AttErrorCode::Unlikely,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION => AttErrorCode::InsufficientEncryption,
            ATT_ERROR_INSUFFICIENT_RESOURCES => AttErrorCode::InsufficientResources,
            ATT_ERROR_VALUE_NOT_ALLOWED => AttErrorCode::ValueNotAllowed,
            HAS_ERR_INVALID_OPCODE => AttErrorCode::InvalidOpcode,
            HAS_ERR_WRITE_NAME_NOT_ALLOWED => AttErrorCode::WriteNameNotAllowed,
            HAS_ERR_PRESET_SYNC_NOT_SUPP => AttErrorCode::PresetSyncNotSupported,
            HAS_ERR_OPERATION_NOT_POSSIBLE => AttErrorCode::OperationNotPossible,
            HAS_ERR_INVALID_PARAM_LEN => AttErrorCode::InvalidParameterLength,
            ATT_ERROR_CCC_IMPROPER_CONF => AttErrorCode::CccImproperlyConfigured,
            ATT_ERROR_PROCEDURE_IN_PROGRESS => AttErrorCode::ProcedureInProgress,
            ATT_ERROR_OUT_OF_RANGE => AttErrorCode::OutOfRange,
            c if (ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END)
                .contains(&c) =>
            {
                AttErrorCode::ApplicationError(c)
            }
            c if c >= ATT_ERROR_COMMON_PROFILE_ERROR_START => AttErrorCode::CommonProfileError(c),
            _ => AttErrorCode::Unknown(code),
        }
    }
}

impl From<AttErrorCode> for u8 {
    fn from(code: AttErrorCode) -> u8 {
        match code {
            AttErrorCode::InvalidHandle => ATT_ERROR_INVALID_HANDLE,
            AttErrorCode::ReadNotPermitted => ATT_ERROR_READ_NOT_PERMITTED,
            AttErrorCode::WriteNotPermitted => ATT_ERROR_WRITE_NOT_PERMITTED,
            AttErrorCode::InvalidPdu => ATT_ERROR_INVALID_PDU,
            AttErrorCode::InsufficientAuthentication => ATT_ERROR_INSUFFICIENT_AUTHENTICATION,
            AttErrorCode::RequestNotSupported => ATT_ERROR_REQUEST_NOT_SUPPORTED,
            AttErrorCode::InvalidOffset => ATT_ERROR_INVALID_OFFSET,
            AttErrorCode::AttributeNotFound => ATT_ERROR_ATTRIBUTE_NOT_FOUND,
            AttErrorCode::AttributeNotLong => ATT_ERROR_ATTRIBUTE_NOT_LONG,
            AttErrorCode::InvalidAttributeValueLength => ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH,
            AttErrorCode::Unlikely => ATT_ERROR_UNLIKELY,
            AttErrorCode::InsufficientEncryption => ATT_ERROR_INSUFFICIENT_ENCRYPTION,
            AttErrorCode::InsufficientResources => ATT_ERROR_INSUFFICIENT_RESOURCES,
            AttErrorCode::ValueNotAllowed => ATT_ERROR_VALUE_NOT_ALLOWED,
            AttErrorCode::InvalidOpcode => HAS_ERR_INVALID_OPCODE,
            AttErrorCode::WriteNameNotAllowed => HAS_ERR_WRITE_NAME_NOT_ALLOWED,
            AttErrorCode::PresetSyncNotSupported => HAS_ERR_PRESET_SYNC_NOT_SUPP,
            AttErrorCode::OperationNotPossible => HAS_ERR_OPERATION_NOT_POSSIBLE,
            AttErrorCode::InvalidParameterLength => HAS_ERR_INVALID_PARAM_LEN,
            AttErrorCode::CccImproperlyConfigured => ATT_ERROR_CCC_IMPROPER_CONF,
            AttErrorCode::ProcedureInProgress => ATT_ERROR_PROCEDURE_IN_PROGRESS,
            AttErrorCode::OutOfRange => ATT_ERROR_OUT_OF_RANGE,
            AttErrorCode::ApplicationError(code) => code,
            AttErrorCode::CommonProfileError(code) => code,
            AttErrorCode::Unknown(code) => code,
        }
    }
}

impl AttErrorCode {
    /// Whether the code is one of the Hearing Access Service application errors
    pub fn is_has_error(&self) -> bool {
        matches!(
            self,
            AttErrorCode::InvalidOpcode
                | AttErrorCode::WriteNameNotAllowed
                | AttErrorCode::PresetSyncNotSupported
                | AttErrorCode::OperationNotPossible
                | AttErrorCode::InvalidParameterLength
        )
    }
}

impl std::fmt::Display for AttErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code: u8 = (*self).into();
        write!(f, "{:?} (0x{:02x})", self, code)
    }
}

/// ATT Result type
pub type AttResult<T> = Result<T, AttErrorCode>;
