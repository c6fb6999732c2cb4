//! Hearing Access Service constants

use crate::gatt::Uuid;
use std::time::Duration;

// Service and characteristic UUIDs
pub const HAS_SERVICE_UUID: Uuid = Uuid::from_u16(0x1854);
pub const HAS_HEARING_AID_FEATURES_UUID: Uuid = Uuid::from_u16(0x2BDA);
pub const HAS_PRESET_CONTROL_POINT_UUID: Uuid = Uuid::from_u16(0x2BDB);
pub const HAS_ACTIVE_PRESET_INDEX_UUID: Uuid = Uuid::from_u16(0x2BDC);

// Preset Control Point opcodes
pub const HAS_OP_READ_PRESET_REQ: u8 = 0x01;
pub const HAS_OP_READ_PRESET_RSP: u8 = 0x02;
pub const HAS_OP_PRESET_CHANGED: u8 = 0x03;
pub const HAS_OP_WRITE_PRESET_NAME: u8 = 0x04;
pub const HAS_OP_SET_ACTIVE_PRESET: u8 = 0x05;
pub const HAS_OP_SET_NEXT_PRESET: u8 = 0x06;
pub const HAS_OP_SET_PREV_PRESET: u8 = 0x07;
pub const HAS_OP_SET_ACTIVE_PRESET_SYNC: u8 = 0x08;
pub const HAS_OP_SET_NEXT_PRESET_SYNC: u8 = 0x09;
pub const HAS_OP_SET_PREV_PRESET_SYNC: u8 = 0x0A;

// Preset Changed change ids
pub const HAS_CHANGE_ID_GENERIC_UPDATE: u8 = 0x00;
pub const HAS_CHANGE_ID_PRESET_DELETED: u8 = 0x01;
pub const HAS_CHANGE_ID_PRESET_AVAILABLE: u8 = 0x02;
pub const HAS_CHANGE_ID_PRESET_UNAVAILABLE: u8 = 0x03;

// Application error codes
pub const HAS_ERR_INVALID_OPCODE: u8 = 0x80;
pub const HAS_ERR_WRITE_NAME_NOT_ALLOWED: u8 = 0x81;
pub const HAS_ERR_PRESET_SYNC_NOT_SUPP: u8 = 0x82;
pub const HAS_ERR_OPERATION_NOT_POSSIBLE: u8 = 0x83;
pub const HAS_ERR_INVALID_PARAM_LEN: u8 = 0x84;

// Preset record limits
pub const PRESET_INDEX_NONE: u8 = 0x00;
pub const PRESET_INDEX_MAX: u8 = 0xFF;
pub const PRESET_NAME_MIN: usize = 1;
pub const PRESET_NAME_MAX: usize = 40;

/// Minimum ATT MTU a client must support to read presets
pub const HAS_ATT_MTU_MIN: u16 = 49;

/// Delay before the first Control Point message of a batch is sent
pub const CP_WORK_DELAY: Duration = Duration::from_millis(10);

// Fixed Control Point message sizes (opcode included)
pub const CP_HDR_LEN: usize = 1;
pub const CP_READ_PRESET_REQ_LEN: usize = CP_HDR_LEN + 2;
pub const CP_READ_PRESET_RSP_MIN_LEN: usize = CP_HDR_LEN + 3;
pub const CP_PRESET_CHANGED_MIN_LEN: usize = CP_HDR_LEN + 2;
pub const CP_GENERIC_UPDATE_MIN_LEN: usize = CP_PRESET_CHANGED_MIN_LEN + 3;
pub const CP_WRITE_PRESET_NAME_MIN_LEN: usize = CP_HDR_LEN + 1;
pub const CP_SET_ACTIVE_PRESET_LEN: usize = CP_HDR_LEN + 1;

/// Largest Control Point message this implementation emits
pub const CP_MAX_LEN: usize = CP_GENERIC_UPDATE_MIN_LEN + PRESET_NAME_MAX;

/// Human readable opcode name for logging
pub fn op_str(op: u8) -> &'static str {
    match op {
        HAS_OP_READ_PRESET_REQ => "Read preset request",
        HAS_OP_READ_PRESET_RSP => "Read preset response",
        HAS_OP_PRESET_CHANGED => "Preset changed",
        HAS_OP_WRITE_PRESET_NAME => "Write preset name",
        HAS_OP_SET_ACTIVE_PRESET => "Set active preset",
        HAS_OP_SET_NEXT_PRESET => "Set next preset",
        HAS_OP_SET_PREV_PRESET => "Set previous preset",
        HAS_OP_SET_ACTIVE_PRESET_SYNC => "Set active preset (synchronized)",
        HAS_OP_SET_NEXT_PRESET_SYNC => "Set next preset (synchronized)",
        HAS_OP_SET_PREV_PRESET_SYNC => "Set previous preset (synchronized)",
        _ => "Unknown",
    }
}
