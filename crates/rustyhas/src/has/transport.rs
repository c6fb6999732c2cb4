//! Attribute protocol collaborators
//!
//! The profile does not own connections or the ATT bearer. The transport
//! performs the GATT procedures and reports their completion back through
//! the `HasServer`/`HasClient` entry points.

use crate::att::AttErrorCode;
use crate::gatt::{CccValue, Uuid};
use std::fmt;
use thiserror::Error;

/// Connection handle owned by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnHandle(pub u16);

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Characteristics exposed by the Hearing Access Service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HasCharacteristic {
    /// Hearing Aid Features
    Features,
    /// Hearing Aid Preset Control Point
    ControlPoint,
    /// Active Preset Index
    ActivePresetIndex,
}

impl HasCharacteristic {
    pub fn uuid(&self) -> Uuid {
        match self {
            HasCharacteristic::Features => super::constants::HAS_HEARING_AID_FEATURES_UUID,
            HasCharacteristic::ControlPoint => super::constants::HAS_PRESET_CONTROL_POINT_UUID,
            HasCharacteristic::ActivePresetIndex => super::constants::HAS_ACTIVE_PRESET_INDEX_UUID,
        }
    }
}

/// Errors reported synchronously by the transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("transport busy")]
    Busy,

    #[error("insufficient resources")]
    InsufficientResources,

    #[error("improperly configured")]
    ImproperConfiguration,

    #[error("ATT error: {0}")]
    Att(AttErrorCode),
}

/// Server side GATT primitives
///
/// `notify` and `indicate` only queue the value. The transport must call
/// `HasServer::control_point_tx_done` once a Control Point notification has
/// been sent or an indication confirmed.
pub trait ServerTransport: Send + Sync {
    fn is_connected(&self, conn: ConnHandle) -> bool;

    fn is_bonded(&self, conn: ConnHandle) -> bool;

    /// Negotiated ATT MTU
    fn mtu(&self, conn: ConnHandle) -> u16;

    /// Whether the peer has the characteristic configured for `mode`
    fn is_subscribed(&self, conn: ConnHandle, characteristic: HasCharacteristic, mode: CccValue) -> bool;

    fn notify(
        &self,
        conn: ConnHandle,
        characteristic: HasCharacteristic,
        value: &[u8],
    ) -> Result<(), TransportError>;

    fn indicate(
        &self,
        conn: ConnHandle,
        characteristic: HasCharacteristic,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Notify every subscribed peer
    fn notify_all(&self, characteristic: HasCharacteristic, value: &[u8]) -> Result<(), TransportError>;
}

/// Client side GATT procedures
///
/// Every call starts a procedure and returns immediately. Completion is
/// reported through the matching `HasClient` entry point:
///
/// | procedure | completion |
/// |---|---|
/// | `discover_characteristic` | `characteristic_discovered` |
/// | `read`, `read_by_uuid` | `read_complete` |
/// | `subscribe` | `subscribe_complete` |
/// | `write` | `write_complete` |
pub trait ClientTransport: Send + Sync {
    fn is_connected(&self, conn: ConnHandle) -> bool;

    /// Discover a characteristic of the Hearing Access Service by UUID
    fn discover_characteristic(&self, conn: ConnHandle, uuid: Uuid) -> Result<(), TransportError>;

    fn read(&self, conn: ConnHandle, handle: u16) -> Result<(), TransportError>;

    fn read_by_uuid(&self, conn: ConnHandle, uuid: Uuid) -> Result<(), TransportError>;

    /// Write the CCC descriptor of the characteristic at `value_handle`
    fn subscribe(&self, conn: ConnHandle, value_handle: u16, value: CccValue) -> Result<(), TransportError>;

    fn write(&self, conn: ConnHandle, handle: u16, data: &[u8]) -> Result<(), TransportError>;
}
