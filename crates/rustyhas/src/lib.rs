//! RustyHAS - Bluetooth LE Hearing Access Service
//!
//! This library implements both roles of the Hearing Access profile on top of
//! an ATT bearer supplied by the caller: a server exposing a hearing aid's
//! presets through the Hearing Aid Features, Preset Control Point and Active
//! Preset Index characteristics, and a client that discovers and controls
//! them on a remote device.

pub mod att;
pub mod error;
pub mod gatt;
pub mod has;

// Re-export common types for convenience
pub use att::{AttErrorCode, AttResult, SecurityLevel};
pub use error::{HasError, HasResult};
pub use gatt::{CccValue, Characteristic, CharacteristicProperty, Uuid};
pub use has::{
    ClientTransport, ConnHandle, ControlPointMessage, HasClient, HasClientCallbacks,
    HasClientConfig, HasFeatures, HasInfo, HasServer, HasServerConfig, HearingAidType, Preset,
    PresetOps, PresetProperties, PresetRecord, ServerTransport, TransportError,
};
