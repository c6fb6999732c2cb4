//! Hearing Access Service (HAS)
//!
//! Server and client roles of the Hearing Access profile: a store of named
//! preset records, the Preset Control Point used to read, rename and
//! activate them, and the scheduler that paces Control Point messages to
//! every subscribed peer.

pub mod bitmap;
pub mod client;
pub mod codec;
pub mod constants;
mod control_point;
pub mod peer;
pub mod preset;
pub mod server;
pub mod transport;
pub mod types;
pub mod work;

pub use self::client::{
    HasClient, HasClientCallbacks, HasClientConfig, HasHandles, HasInfo, PresetReadCallback,
    PresetReadParams, PresetRecord, ReadControl,
};
pub use self::codec::{ChangeKind, CodecError, ControlPointMessage, PresetChange};
pub use self::preset::{Preset, PresetProperties, PresetStore};
pub use self::server::{HasServer, HasServerConfig, PresetOps};
pub use self::transport::{
    ClientTransport, ConnHandle, HasCharacteristic, ServerTransport, TransportError,
};
pub use self::types::{HasFeatures, HearingAidType};
pub use self::work::{DelayedWork, WorkQueue, WorkSignal};

#[cfg(test)]
mod tests;
