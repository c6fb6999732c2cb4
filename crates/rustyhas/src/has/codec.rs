//! Preset Control Point wire codec
//!
//! Every Control Point message is a one byte opcode followed by an
//! opcode specific payload. All fields are single bytes; preset names are
//! carried as an unterminated tail that runs to the end of the message.

use super::constants::*;
use super::preset::PresetProperties;
use crate::att::AttErrorCode;
use byteorder::ReadBytesExt;
use std::io::Cursor;
use thiserror::Error;

/// Errors raised while decoding a Control Point message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("empty control point message")]
    Empty,

    #[error("invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),

    #[error("invalid length {actual} for opcode 0x{opcode:02x}, expected at least {expected}")]
    InvalidLength {
        opcode: u8,
        expected: usize,
        actual: usize,
    },

    #[error("invalid change id 0x{0:02x}")]
    InvalidChangeId(u8),

    #[error("preset name is not valid UTF-8")]
    InvalidName,
}

impl CodecError {
    /// Error code reported to the peer that sent the message
    pub fn to_error_code(&self) -> AttErrorCode {
        match self {
            CodecError::Empty => AttErrorCode::InvalidAttributeValueLength,
            CodecError::InvalidOpcode(_) => AttErrorCode::InvalidOpcode,
            CodecError::InvalidLength { .. } => AttErrorCode::InvalidParameterLength,
            CodecError::InvalidChangeId(_) => AttErrorCode::InvalidPdu,
            CodecError::InvalidName => AttErrorCode::ValueNotAllowed,
        }
    }
}

/// Kind of change reported in a Preset Changed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    GenericUpdate,
    Deleted,
    Available,
    Unavailable,
}

impl ChangeKind {
    /// Wire value of the change id
    pub fn id(self) -> u8 {
        match self {
            ChangeKind::GenericUpdate => HAS_CHANGE_ID_GENERIC_UPDATE,
            ChangeKind::Deleted => HAS_CHANGE_ID_PRESET_DELETED,
            ChangeKind::Available => HAS_CHANGE_ID_PRESET_AVAILABLE,
            ChangeKind::Unavailable => HAS_CHANGE_ID_PRESET_UNAVAILABLE,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            HAS_CHANGE_ID_GENERIC_UPDATE => Some(ChangeKind::GenericUpdate),
            HAS_CHANGE_ID_PRESET_DELETED => Some(ChangeKind::Deleted),
            HAS_CHANGE_ID_PRESET_AVAILABLE => Some(ChangeKind::Available),
            HAS_CHANGE_ID_PRESET_UNAVAILABLE => Some(ChangeKind::Unavailable),
            _ => None,
        }
    }
}

/// Change-kind specific tail of a Preset Changed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresetChange {
    GenericUpdate {
        prev_index: u8,
        index: u8,
        properties: PresetProperties,
        name: String,
    },
    Deleted {
        index: u8,
    },
    Available {
        index: u8,
    },
    Unavailable {
        index: u8,
    },
}

impl PresetChange {
    pub fn kind(&self) -> ChangeKind {
        match self {
            PresetChange::GenericUpdate { .. } => ChangeKind::GenericUpdate,
            PresetChange::Deleted { .. } => ChangeKind::Deleted,
            PresetChange::Available { .. } => ChangeKind::Available,
            PresetChange::Unavailable { .. } => ChangeKind::Unavailable,
        }
    }

    /// Index of the preset the change refers to
    pub fn index(&self) -> u8 {
        match self {
            PresetChange::GenericUpdate { index, .. }
            | PresetChange::Deleted { index }
            | PresetChange::Available { index }
            | PresetChange::Unavailable { index } => *index,
        }
    }
}

/// A decoded Preset Control Point message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPointMessage {
    ReadPresetRequest {
        start_index: u8,
        count: u8,
    },
    ReadPresetResponse {
        is_last: bool,
        index: u8,
        properties: PresetProperties,
        name: String,
    },
    PresetChanged {
        is_last: bool,
        change: PresetChange,
    },
    WritePresetName {
        index: u8,
        name: String,
    },
    SetActivePreset {
        index: u8,
        sync: bool,
    },
    SetNextPreset {
        sync: bool,
    },
    SetPrevPreset {
        sync: bool,
    },
}

impl ControlPointMessage {
    /// Opcode this message is sent with
    pub fn opcode(&self) -> u8 {
        match self {
            ControlPointMessage::ReadPresetRequest { .. } => HAS_OP_READ_PRESET_REQ,
            ControlPointMessage::ReadPresetResponse { .. } => HAS_OP_READ_PRESET_RSP,
            ControlPointMessage::PresetChanged { .. } => HAS_OP_PRESET_CHANGED,
            ControlPointMessage::WritePresetName { .. } => HAS_OP_WRITE_PRESET_NAME,
            ControlPointMessage::SetActivePreset { sync: false, .. } => HAS_OP_SET_ACTIVE_PRESET,
            ControlPointMessage::SetActivePreset { sync: true, .. } => {
                HAS_OP_SET_ACTIVE_PRESET_SYNC
            }
            ControlPointMessage::SetNextPreset { sync: false } => HAS_OP_SET_NEXT_PRESET,
            ControlPointMessage::SetNextPreset { sync: true } => HAS_OP_SET_NEXT_PRESET_SYNC,
            ControlPointMessage::SetPrevPreset { sync: false } => HAS_OP_SET_PREV_PRESET,
            ControlPointMessage::SetPrevPreset { sync: true } => HAS_OP_SET_PREV_PRESET_SYNC,
        }
    }

    /// Serialize the message without any length limit
    pub fn encode(&self) -> Vec<u8> {
        self.encode_with_limit(usize::MAX)
    }

    /// Serialize the message, truncating the name tail so that the result
    /// fits in `max_len` bytes. Fixed fields are never truncated.
    pub fn encode_with_limit(&self, max_len: usize) -> Vec<u8> {
        let mut packet = Vec::with_capacity(CP_MAX_LEN);

        packet.push(self.opcode());

        match self {
            ControlPointMessage::ReadPresetRequest { start_index, count } => {
                packet.push(*start_index);
                packet.push(*count);
            }
            ControlPointMessage::ReadPresetResponse {
                is_last,
                index,
                properties,
                name,
            } => {
                packet.push(*is_last as u8);
                packet.push(*index);
                packet.push(properties.bits());
                push_name(&mut packet, name, max_len);
            }
            ControlPointMessage::PresetChanged { is_last, change } => {
                packet.push(change.kind().id());
                packet.push(*is_last as u8);

                match change {
                    PresetChange::GenericUpdate {
                        prev_index,
                        index,
                        properties,
                        name,
                    } => {
                        packet.push(*prev_index);
                        packet.push(*index);
                        packet.push(properties.bits());
                        push_name(&mut packet, name, max_len);
                    }
                    PresetChange::Deleted { index }
                    | PresetChange::Available { index }
                    | PresetChange::Unavailable { index } => packet.push(*index),
                }
            }
            ControlPointMessage::WritePresetName { index, name } => {
                packet.push(*index);
                push_name(&mut packet, name, max_len);
            }
            ControlPointMessage::SetActivePreset { index, .. } => packet.push(*index),
            ControlPointMessage::SetNextPreset { .. } | ControlPointMessage::SetPrevPreset { .. } => {}
        }

        packet
    }

    /// Parse a message. The fixed-size prefix of each opcode is length
    /// checked before any variable tail is read.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(data);
        let opcode = cursor.read_u8().map_err(|_| CodecError::Empty)?;

        let message = match opcode {
            HAS_OP_READ_PRESET_REQ => {
                require_len(opcode, data, CP_READ_PRESET_REQ_LEN)?;
                ControlPointMessage::ReadPresetRequest {
                    start_index: next_u8(&mut cursor, opcode)?,
                    count: next_u8(&mut cursor, opcode)?,
                }
            }
            HAS_OP_READ_PRESET_RSP => {
                require_len(opcode, data, CP_READ_PRESET_RSP_MIN_LEN)?;
                let is_last = next_u8(&mut cursor, opcode)? != 0;
                let index = next_u8(&mut cursor, opcode)?;
                let properties =
                    PresetProperties::from_bits_truncate(next_u8(&mut cursor, opcode)?);
                ControlPointMessage::ReadPresetResponse {
                    is_last,
                    index,
                    properties,
                    name: received_name(&data[CP_READ_PRESET_RSP_MIN_LEN..]),
                }
            }
            HAS_OP_PRESET_CHANGED => {
                require_len(opcode, data, CP_PRESET_CHANGED_MIN_LEN)?;
                let change_id = next_u8(&mut cursor, opcode)?;
                let is_last = next_u8(&mut cursor, opcode)? != 0;
                let kind =
                    ChangeKind::from_id(change_id).ok_or(CodecError::InvalidChangeId(change_id))?;

                let change = match kind {
                    ChangeKind::GenericUpdate => {
                        require_len(opcode, data, CP_GENERIC_UPDATE_MIN_LEN)?;
                        let prev_index = next_u8(&mut cursor, opcode)?;
                        let index = next_u8(&mut cursor, opcode)?;
                        let properties = PresetProperties::from_bits_truncate(next_u8(&mut cursor, opcode)?);
                        PresetChange::GenericUpdate {
                            prev_index,
                            index,
                            properties,
                            name: received_name(&data[CP_GENERIC_UPDATE_MIN_LEN..]),
                        }
                    }
                    _ => {
                        require_len(opcode, data, CP_PRESET_CHANGED_MIN_LEN + 1)?;
                        let index = next_u8(&mut cursor, opcode)?;
                        match kind {
                            ChangeKind::Deleted => PresetChange::Deleted { index },
                            ChangeKind::Available => PresetChange::Available { index },
                            _ => PresetChange::Unavailable { index },
                        }
                    }
                };

                ControlPointMessage::PresetChanged { is_last, change }
            }
            HAS_OP_WRITE_PRESET_NAME => {
                require_len(opcode, data, CP_WRITE_PRESET_NAME_MIN_LEN)?;
                let index = next_u8(&mut cursor, opcode)?;
                // Not clamped: the server validates the name length
                let name = std::str::from_utf8(&data[CP_WRITE_PRESET_NAME_MIN_LEN..])
                    .map_err(|_| CodecError::InvalidName)?;
                ControlPointMessage::WritePresetName {
                    index,
                    name: name.to_string(),
                }
            }
            HAS_OP_SET_ACTIVE_PRESET | HAS_OP_SET_ACTIVE_PRESET_SYNC => {
                require_len(opcode, data, CP_SET_ACTIVE_PRESET_LEN)?;
                ControlPointMessage::SetActivePreset {
                    index: next_u8(&mut cursor, opcode)?,
                    sync: opcode == HAS_OP_SET_ACTIVE_PRESET_SYNC,
                }
            }
            HAS_OP_SET_NEXT_PRESET | HAS_OP_SET_NEXT_PRESET_SYNC => ControlPointMessage::SetNextPreset {
                sync: opcode == HAS_OP_SET_NEXT_PRESET_SYNC,
            },
            HAS_OP_SET_PREV_PRESET | HAS_OP_SET_PREV_PRESET_SYNC => ControlPointMessage::SetPrevPreset {
                sync: opcode == HAS_OP_SET_PREV_PRESET_SYNC,
            },
            _ => return Err(CodecError::InvalidOpcode(opcode)),
        };

        Ok(message)
    }
}

fn require_len(opcode: u8, data: &[u8], expected: usize) -> Result<(), CodecError> {
    if data.len() < expected {
        return Err(CodecError::InvalidLength {
            opcode,
            expected,
            actual: data.len(),
        });
    }

    Ok(())
}

/// Next single byte field. Lengths are checked up front, so running out
/// here still reports where the message ended.
fn next_u8(cursor: &mut Cursor<&[u8]>, opcode: u8) -> Result<u8, CodecError> {
    let expected = cursor.position() as usize + 1;
    let actual = cursor.get_ref().len();
    cursor.read_u8().map_err(|_| CodecError::InvalidLength {
        opcode,
        expected,
        actual,
    })
}

fn push_name(packet: &mut Vec<u8>, name: &str, max_len: usize) {
    let budget = max_len.saturating_sub(packet.len());
    packet.extend_from_slice(truncate_utf8(name, budget).as_bytes());
}

/// Names received from a peer are clamped to the maximum preset name length
/// after decoding, so the cut never splits a character
fn received_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    truncate_utf8(&name, PRESET_NAME_MAX).to_string()
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char boundary
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }

    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}
