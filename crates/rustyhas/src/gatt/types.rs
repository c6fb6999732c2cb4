//! Common types for GATT operations
//!
//! This module defines the common types used for GATT operations.

use crate::att::constants::{CCC_VALUE_INDICATE, CCC_VALUE_NONE, CCC_VALUE_NOTIFY};
use std::fmt;

/// UUID for GATT attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uuid {
    /// 16-bit UUID
    Uuid16(u16),
    /// 128-bit UUID (little-endian byte order)
    Uuid128([u8; 16]),
}

impl Uuid {
    /// Convert raw bytes to UUID based on length
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => Some(Uuid::Uuid16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            16 => {
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(bytes);
                Some(Uuid::Uuid128(uuid))
            }
            _ => None,
        }
    }

    /// Create a UUID from a 16-bit value
    pub const fn from_u16(uuid: u16) -> Self {
        Uuid::Uuid16(uuid)
    }

    /// Get the bytes representation of this UUID
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            Uuid::Uuid16(uuid) => uuid.to_le_bytes().to_vec(),
            Uuid::Uuid128(uuid) => uuid.to_vec(),
        }
    }

    /// Get the 16-bit UUID value if this is a 16-bit UUID
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Uuid::Uuid16(uuid) => Some(*uuid),
            _ => None,
        }
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uuid::Uuid16(uuid) => write!(f, "{:04x}", uuid),
            Uuid::Uuid128(uuid) => {
                write!(
                    f,
                    "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
                    uuid[15], uuid[14], uuid[13], uuid[12],
                    uuid[11], uuid[10],
                    uuid[9], uuid[8],
                    uuid[7], uuid[6],
                    uuid[5], uuid[4], uuid[3], uuid[2], uuid[1], uuid[0]
                )
            }
        }
    }
}

bitflags::bitflags! {
    /// Characteristic properties as defined in the Bluetooth specification
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CharacteristicProperty: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

impl CharacteristicProperty {
    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn can_notify(&self) -> bool {
        self.contains(Self::NOTIFY)
    }

    pub fn can_indicate(&self) -> bool {
        self.contains(Self::INDICATE)
    }
}

/// A discovered GATT characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    /// Characteristic UUID
    pub uuid: Uuid,
    /// Declaration handle
    pub declaration_handle: u16,
    /// Value handle
    pub value_handle: u16,
    /// Characteristic properties
    pub properties: CharacteristicProperty,
}

/// Value of a Client Characteristic Configuration descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CccValue {
    /// Notifications and indications disabled
    Disabled,
    /// Notifications enabled
    Notify,
    /// Indications enabled
    Indicate,
}

impl CccValue {
    /// Parse a raw CCC value. Values with both or unknown bits set are rejected.
    pub fn from_raw(value: u16) -> Option<Self> {
        match value {
            CCC_VALUE_NONE => Some(CccValue::Disabled),
            CCC_VALUE_NOTIFY => Some(CccValue::Notify),
            CCC_VALUE_INDICATE => Some(CccValue::Indicate),
            _ => None,
        }
    }

    /// Raw descriptor value
    pub fn raw(&self) -> u16 {
        match self {
            CccValue::Disabled => CCC_VALUE_NONE,
            CccValue::Notify => CCC_VALUE_NOTIFY,
            CccValue::Indicate => CCC_VALUE_INDICATE,
        }
    }
}
