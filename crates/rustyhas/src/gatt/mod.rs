//! GATT (Generic Attribute Profile) types
//!
//! Characteristic discovery records, properties and UUIDs shared by the
//! Hearing Access server and client.

pub mod types;

pub use types::{CccValue, Characteristic, CharacteristicProperty, Uuid};
