//! Hearing Access Service server
//!
//! `HasServer` owns the preset store, the features value, the active preset
//! and one [`Peer`] record per potential bonded client. The ATT bearer lives
//! outside this crate and drives the server through the connection events
//! and characteristic callbacks below.

use super::bitmap::PeerFlag;
use super::codec::ChangeKind;
use super::constants::*;
use super::peer::Peer;
use super::preset::{Preset, PresetStore};
use super::transport::{ConnHandle, HasCharacteristic, ServerTransport};
use super::types::{HasFeatures, HearingAidType};
use super::work::{WorkQueue, WorkSignal};
use crate::att::{AttErrorCode, AttResult, SecurityLevel};
use crate::error::{HasError, HasResult};
use crate::gatt::CccValue;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Hearing Access server configuration
#[derive(Debug, Clone)]
pub struct HasServerConfig {
    /// Number of peer records (bonded clients served concurrently)
    pub max_peers: usize,
    /// Maximum number of preset records
    pub max_presets: usize,
    /// Hearing aid type reported in the features value
    pub hearing_aid_type: HearingAidType,
    /// Synchronized preset operations are supported
    pub preset_sync_support: bool,
    /// Preset records differ from the other device of the set
    pub independent_presets: bool,
    /// The preset list may change at runtime
    pub dynamic_presets: bool,
    /// Preset names can be changed at runtime
    pub dynamic_names: bool,
    /// Coalescing delay before a batch of Control Point messages
    pub cp_work_delay: Duration,
}

impl Default for HasServerConfig {
    fn default() -> Self {
        Self {
            max_peers: 2,
            max_presets: 8,
            hearing_aid_type: HearingAidType::Binaural,
            preset_sync_support: false,
            independent_presets: false,
            dynamic_presets: false,
            dynamic_names: true,
            cp_work_delay: CP_WORK_DELAY,
        }
    }
}

/// Application hooks invoked by the server
pub trait PresetOps: Send + Sync {
    /// Switch to the preset at `index`. The server only commits the new
    /// active preset once this returns `Ok`.
    fn active_set(&self, index: u8, sync: bool) -> HasResult<()>;

    /// A preset name was changed
    fn name_changed(&self, _index: u8, _name: &str) {}
}

/// A Hearing Access Service server instance
pub struct HasServer<T: ServerTransport> {
    pub(super) config: HasServerConfig,
    pub(super) transport: Arc<T>,
    pub(super) features: RwLock<HasFeatures>,
    pub(super) active_index: AtomicU8,
    pub(super) store: RwLock<PresetStore>,
    pub(super) ops: RwLock<Option<Arc<dyn PresetOps>>>,
    pub(super) peers: Box<[Peer]>,
    signal: Arc<WorkSignal>,
}

impl<T: ServerTransport> HasServer<T> {
    /// Create a server. Presets are added with [`HasServer::register`].
    pub fn new(transport: Arc<T>, config: HasServerConfig) -> Self {
        let mut features = HasFeatures::with_type(config.hearing_aid_type);
        if config.preset_sync_support {
            features |= HasFeatures::PRESET_SYNC;
        }
        if config.independent_presets {
            features |= HasFeatures::INDEPENDENT_PRESETS;
        }
        if config.dynamic_presets {
            features |= HasFeatures::DYNAMIC_PRESETS;
        }

        let signal = Arc::new(WorkSignal::new());
        let peers = (0..config.max_peers)
            .map(|_| Peer::new(config.max_presets, signal.clone()))
            .collect();

        Self {
            store: RwLock::new(PresetStore::new(config.max_presets)),
            config,
            transport,
            features: RwLock::new(features),
            active_index: AtomicU8::new(PRESET_INDEX_NONE),
            ops: RwLock::new(None),
            peers,
            signal,
        }
    }

    pub fn config(&self) -> &HasServerConfig {
        &self.config
    }

    /// Register the preset records and the application hooks
    pub fn register(&self, presets: Vec<Preset>, ops: Arc<dyn PresetOps>) -> HasResult<()> {
        let mut registered = self.ops.write().unwrap();
        if registered.is_some() {
            return Err(HasError::AlreadyRegistered);
        }

        if presets.is_empty() {
            return Err(HasError::InvalidArgument("no presets".to_string()));
        }

        let mut store = PresetStore::new(self.config.max_presets);
        let mut writable = false;
        for preset in presets {
            writable |= preset.is_writable();
            store.insert_sorted(preset)?;
        }

        if writable && self.config.dynamic_names {
            self.features.write().unwrap().insert(HasFeatures::WRITABLE_PRESETS);
        }

        info!("Registered {} presets", store.len());

        *self.store.write().unwrap() = store;
        *registered = Some(ops);

        Ok(())
    }

    pub fn features(&self) -> HasFeatures {
        *self.features.read().unwrap()
    }

    /// Currently active preset, if any
    pub fn active_preset(&self) -> Option<u8> {
        match self.active_index.load(Ordering::Acquire) {
            PRESET_INDEX_NONE => None,
            index => Some(index),
        }
    }

    /// Snapshot of all preset records, hidden ones included
    pub fn presets(&self) -> Vec<Preset> {
        self.store.read().unwrap().iter().cloned().collect()
    }

    pub fn preset(&self, index: u8) -> HasResult<Preset> {
        self.store.read().unwrap().lookup(index).cloned()
    }

    /// Make `index` the active preset and notify subscribed peers.
    ///
    /// This is the application reporting a switch it already made, so the
    /// preset hooks are not called.
    pub fn set_active_preset(&self, index: u8) -> HasResult<()> {
        if index != PRESET_INDEX_NONE {
            self.store.read().unwrap().lookup(index)?;
        }

        self.commit_active_preset(index);
        Ok(())
    }

    pub fn clear_active_preset(&self) -> HasResult<()> {
        self.set_active_preset(PRESET_INDEX_NONE)
    }

    /// Activate the next available preset, wrapping around
    pub fn set_next_preset(&self) -> HasResult<()> {
        let index = self.find_next_preset()?;
        self.set_active_preset(index)
    }

    /// Activate the previous available preset, wrapping around
    pub fn set_prev_preset(&self) -> HasResult<()> {
        let index = self.find_prev_preset()?;
        self.set_active_preset(index)
    }

    /// Show or hide a preset. Hiding a preset is reported to peers as a
    /// deletion; the record itself is kept.
    pub fn set_visibility(&self, index: u8, visible: bool) -> HasResult<()> {
        let slot = {
            let mut store = self.store.write().unwrap();
            if !store.set_visibility(index, visible)? {
                return Ok(());
            }
            store.slot_of(index)
        };

        debug!("Preset {} {}", index, if visible { "shown" } else { "hidden" });

        if let Some(slot) = slot {
            let kind = if visible {
                ChangeKind::GenericUpdate
            } else {
                ChangeKind::Deleted
            };
            self.preset_changed(slot, kind);
        }

        Ok(())
    }

    /// Set or clear the AVAILABLE property of a preset
    pub fn set_availability(&self, index: u8, available: bool) -> HasResult<()> {
        let slot = {
            let mut store = self.store.write().unwrap();
            if !store.set_availability(index, available)? {
                return Ok(());
            }
            // Hidden presets are not reported
            store
                .lookup(index)
                .ok()
                .filter(|p| p.is_visible())
                .and_then(|_| store.slot_of(index))
        };

        debug!(
            "Preset {} {}",
            index,
            if available { "available" } else { "unavailable" }
        );

        if let Some(slot) = slot {
            let kind = if available {
                ChangeKind::Available
            } else {
                ChangeKind::Unavailable
            };
            self.preset_changed(slot, kind);
        }

        Ok(())
    }

    /// Rename a preset
    pub fn set_name(&self, index: u8, name: &str) -> HasResult<()> {
        if !self.config.dynamic_names {
            return Err(HasError::Att(AttErrorCode::WriteNameNotAllowed));
        }

        let (slot, visible) = {
            let mut store = self.store.write().unwrap();
            if !store.set_name(index, name)? {
                return Ok(());
            }
            let visible = store.lookup(index).map(|p| p.is_visible()).unwrap_or(false);
            (store.slot_of(index), visible)
        };

        debug!("Preset {} renamed to {:?}", index, name);

        if let Some(slot) = slot {
            // Peers learn the new name with the next Generic Update, even
            // one sent when a hidden preset is shown again
            for peer in self.peers.iter() {
                peer.name_aware.clear(slot);
            }
            if visible {
                self.preset_changed(slot, ChangeKind::GenericUpdate);
            }
        }

        let ops = self.ops.read().unwrap().clone();
        if let Some(ops) = ops {
            ops.name_changed(index, name);
        }

        Ok(())
    }

    pub(super) fn find_next_preset(&self) -> HasResult<u8> {
        let active = self.active_index.load(Ordering::Acquire);
        self.store
            .read()
            .unwrap()
            .next_available(active)
            .map(|p| p.index)
            .ok_or(HasError::Att(AttErrorCode::OperationNotPossible))
    }

    pub(super) fn find_prev_preset(&self) -> HasResult<u8> {
        let active = self.active_index.load(Ordering::Acquire);
        self.store
            .read()
            .unwrap()
            .prev_available(active)
            .map(|p| p.index)
            .ok_or(HasError::Att(AttErrorCode::OperationNotPossible))
    }

    pub(super) fn commit_active_preset(&self, index: u8) {
        let prev = self.active_index.swap(index, Ordering::AcqRel);
        if prev == index {
            return;
        }

        info!("Active preset changed {} -> {}", prev, index);

        if let Err(e) = self
            .transport
            .notify_all(HasCharacteristic::ActivePresetIndex, &[index])
        {
            warn!("Failed to notify active preset index: {}", e);
        }
    }

    pub(super) fn find_peer(&self, conn: ConnHandle) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.is_for(conn))
    }

    /// Find the record for `conn`, claiming a free one if needed
    pub(super) fn get_or_alloc_peer(&self, conn: ConnHandle) -> Option<&Peer> {
        if let Some(peer) = self.find_peer(conn) {
            return Some(peer);
        }

        let peer = self.peers.iter().find(|peer| peer.claim(conn));
        if peer.is_some() {
            debug!("New peer record for {}", conn);
        }
        peer
    }

    /// A connection was established
    pub fn connected(&self, conn: ConnHandle) {
        debug!("Connected {}", conn);

        if !self.transport.is_bonded(conn) {
            return;
        }

        let peer = match self.get_or_alloc_peer(conn) {
            Some(peer) => peer,
            None => {
                error!("Failed to allocate peer record for {}", conn);
                return;
            }
        };

        // Bonded peers get every visible preset as a Generic Update. The
        // subscription state is not known yet, that check is done once the
        // link is encrypted.
        let store = self.store.read().unwrap();
        for index in store.foreach_in_range(1, PRESET_INDEX_MAX, 0, Preset::is_visible) {
            if let Some(slot) = store.slot_of(index) {
                peer.set_change(slot, ChangeKind::GenericUpdate);
            }
        }
    }

    /// The connection was torn down
    pub fn disconnected(&self, conn: ConnHandle) {
        debug!("Disconnected {}", conn);

        if let Some(peer) = self.find_peer(conn) {
            peer.work.cancel_sync();
            peer.release();
        }
    }

    /// The link security level changed
    pub fn security_changed(&self, conn: ConnHandle, level: SecurityLevel) {
        debug!("Security changed {} level {:?}", conn, level);

        let peer = match self.get_or_alloc_peer(conn) {
            Some(peer) => peer,
            None => {
                error!("Failed to allocate peer record for {}", conn);
                return;
            }
        };

        if !level.is_encrypted() {
            return;
        }

        if peer.flags.test_and_insert(PeerFlag::ENCRYPTED) {
            return;
        }

        if self.transport.mtu(conn) >= HAS_ATT_MTU_MIN {
            peer.flags.insert(PeerFlag::MTU_VALID);
        }

        // Restore subscriptions stored for the bond
        let transport = &self.transport;
        if transport.is_subscribed(conn, HasCharacteristic::ControlPoint, CccValue::Indicate) {
            peer.flags.insert(PeerFlag::CP_IND_ENABLED);
        }
        if transport.is_subscribed(conn, HasCharacteristic::ControlPoint, CccValue::Notify) {
            peer.flags.insert(PeerFlag::CP_NTF_ENABLED);
        }

        if !peer.is_subscribed() {
            peer.pending.clear_all();
        } else if peer.has_pending_changes() && peer.flags.contains(PeerFlag::MTU_VALID) {
            self.control_point_submit(peer, self.config.cp_work_delay);
        }
    }

    /// The ATT MTU of the connection was updated
    pub fn att_mtu_updated(&self, conn: ConnHandle, tx_mtu: u16) {
        debug!("MTU updated {} tx {}", conn, tx_mtu);

        let peer = match self.find_peer(conn) {
            Some(peer) => peer,
            None => return,
        };

        if tx_mtu < HAS_ATT_MTU_MIN {
            return;
        }

        if !peer.flags.test_and_insert(PeerFlag::MTU_VALID)
            && peer.has_pending_changes()
            && peer
                .flags
                .contains(PeerFlag::ENCRYPTED | PeerFlag::CP_IND_ENABLED)
        {
            self.control_point_submit(peer, self.config.cp_work_delay);
        }
    }

    /// Read of the Hearing Aid Features characteristic
    pub fn read_features(&self, conn: ConnHandle, offset: u16) -> AttResult<Vec<u8>> {
        debug!("Read features {} offset {}", conn, offset);

        if offset > 0 {
            return Err(AttErrorCode::AttributeNotLong);
        }

        Ok(vec![self.features().bits()])
    }

    /// Read of the Active Preset Index characteristic
    pub fn read_active_preset_index(&self, conn: ConnHandle, offset: u16) -> AttResult<Vec<u8>> {
        debug!("Read active preset index {} offset {}", conn, offset);

        if offset > 0 {
            return Err(AttErrorCode::AttributeNotLong);
        }

        Ok(vec![self.active_index.load(Ordering::Acquire)])
    }

    /// Signal used to wake a worker when Control Point work is scheduled
    pub fn work_signal(&self) -> Arc<WorkSignal> {
        self.signal.clone()
    }
}

impl<T: ServerTransport + 'static> HasServer<T> {
    /// Run Control Point work on a dedicated thread
    pub fn start_work_queue(self: &Arc<Self>) -> std::io::Result<WorkQueue> {
        let server = Arc::clone(self);
        WorkQueue::start("has-cp-tx", self.work_signal(), move |now| {
            server.run_due_work(now)
        })
    }
}
