//! ATT Protocol constants used by the Hearing Access profile

// ATT error codes
pub const ATT_ERROR_INVALID_HANDLE: u8 = 0x01;
pub const ATT_ERROR_READ_NOT_PERMITTED: u8 = 0x02;
pub const ATT_ERROR_WRITE_NOT_PERMITTED: u8 = 0x03;
pub const ATT_ERROR_INVALID_PDU: u8 = 0x04;
pub const ATT_ERROR_INSUFFICIENT_AUTHENTICATION: u8 = 0x05;
pub const ATT_ERROR_REQUEST_NOT_SUPPORTED: u8 = 0x06;
pub const ATT_ERROR_INVALID_OFFSET: u8 = 0x07;
pub const ATT_ERROR_ATTRIBUTE_NOT_FOUND: u8 = 0x0A;
pub const ATT_ERROR_ATTRIBUTE_NOT_LONG: u8 = 0x0B;
pub const ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH: u8 = 0x0D;
pub const ATT_ERROR_UNLIKELY: u8 = 0x0E;
pub const ATT_ERROR_INSUFFICIENT_ENCRYPTION: u8 = 0x0F;
pub const ATT_ERROR_INSUFFICIENT_RESOURCES: u8 = 0x11;
pub const ATT_ERROR_VALUE_NOT_ALLOWED: u8 = 0x13;
pub const ATT_ERROR_APPLICATION_ERROR_START: u8 = 0x80;
pub const ATT_ERROR_APPLICATION_ERROR_END: u8 = 0x9F;
pub const ATT_ERROR_COMMON_PROFILE_ERROR_START: u8 = 0xE0;

// Common profile and service error codes
pub const ATT_ERROR_CCC_IMPROPER_CONF: u8 = 0xFD;
pub const ATT_ERROR_PROCEDURE_IN_PROGRESS: u8 = 0xFE;
pub const ATT_ERROR_OUT_OF_RANGE: u8 = 0xFF;

// Opcode (1) + handle (2) in front of every notification/indication value
pub const ATT_MTU_HEADER_SIZE: usize = 3;

// Client Characteristic Configuration values
pub const CCC_VALUE_NONE: u16 = 0x0000;
pub const CCC_VALUE_NOTIFY: u16 = 0x0001;
pub const CCC_VALUE_INDICATE: u16 = 0x0002;
