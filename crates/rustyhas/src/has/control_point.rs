//! Preset Control Point, server side
//!
//! Incoming writes are validated against the peer record and dispatched by
//! opcode. Outgoing Read Preset Responses and Preset Changed messages are
//! sent from a per-peer work item with at most one message in flight: the
//! `CP_BUSY` flag is taken when work is submitted and released when the
//! transport reports the message done.

use super::bitmap::PeerFlag;
use super::codec::{ChangeKind, ControlPointMessage, PresetChange};
use super::constants::*;
use super::peer::{Peer, ReadCursor};
use super::preset::Preset;
use super::server::HasServer;
use super::transport::{ConnHandle, HasCharacteristic, ServerTransport, TransportError};
use crate::att::{AttErrorCode, AttResult, ATT_MTU_HEADER_SIZE};
use crate::error::HasError;
use crate::gatt::CccValue;
use log::{debug, trace, warn};
use std::time::{Duration, Instant};

impl<T: ServerTransport> HasServer<T> {
    /// Write of the Control Point CCC descriptor
    pub fn control_point_ccc_write(&self, conn: ConnHandle, value: u16) -> AttResult<usize> {
        debug!("Control point CCC write {} value 0x{:04x}", conn, value);

        match CccValue::from_raw(value) {
            Some(CccValue::Disabled) => {
                if let Some(peer) = self.find_peer(conn) {
                    peer.flags
                        .remove(PeerFlag::CP_IND_ENABLED | PeerFlag::CP_NTF_ENABLED);
                }
            }
            Some(mode) => {
                let peer = self
                    .get_or_alloc_peer(conn)
                    .ok_or(AttErrorCode::InsufficientResources)?;
                let flag = if mode == CccValue::Indicate {
                    PeerFlag::CP_IND_ENABLED
                } else {
                    PeerFlag::CP_NTF_ENABLED
                };
                peer.flags.insert(flag);
            }
            None => return Err(AttErrorCode::ValueNotAllowed),
        }

        Ok(std::mem::size_of::<u16>())
    }

    /// Write to the Control Point. Returns the number of bytes consumed.
    pub fn control_point_write(&self, conn: ConnHandle, data: &[u8], offset: u16) -> AttResult<usize> {
        let peer = self.find_peer(conn).ok_or(AttErrorCode::Unlikely)?;

        if offset > 0 {
            return Err(AttErrorCode::InvalidOffset);
        }

        let opcode = *data.first().ok_or(AttErrorCode::InvalidAttributeValueLength)?;

        debug!("Control point rx {} op {} (0x{:02x})", conn, op_str(opcode), opcode);
        trace!("Control point rx {}: {}", conn, hex::encode(data));

        let result = self.dispatch(peer, opcode, data);
        if let Err(code) = result {
            debug!("Control point op 0x{:02x} failed: {}", opcode, code);
        }

        result.map(|_| data.len())
    }

    fn dispatch(&self, peer: &Peer, opcode: u8, data: &[u8]) -> AttResult<()> {
        let sync = matches!(
            opcode,
            HAS_OP_SET_ACTIVE_PRESET_SYNC | HAS_OP_SET_NEXT_PRESET_SYNC | HAS_OP_SET_PREV_PRESET_SYNC
        );

        match opcode {
            HAS_OP_READ_PRESET_REQ => {
                self.require_indications(peer)?;
                self.require_mtu(peer)?;
            }
            HAS_OP_WRITE_PRESET_NAME => {
                if !self.config.dynamic_names {
                    return Err(AttErrorCode::WriteNameNotAllowed);
                }
                self.require_indications(peer)?;
                self.require_mtu(peer)?;
            }
            HAS_OP_SET_ACTIVE_PRESET => self.require_indications(peer)?,
            HAS_OP_SET_NEXT_PRESET | HAS_OP_SET_PREV_PRESET => {}
            _ if sync => {
                if !self.config.preset_sync_support {
                    return Err(AttErrorCode::PresetSyncNotSupported);
                }
                if opcode == HAS_OP_SET_ACTIVE_PRESET_SYNC {
                    self.require_indications(peer)?;
                }
            }
            // Responses and notifications are server to client only
            _ => return Err(AttErrorCode::InvalidOpcode),
        }

        let message = ControlPointMessage::decode(data).map_err(|e| e.to_error_code())?;

        match message {
            ControlPointMessage::ReadPresetRequest { start_index, count } => {
                self.handle_read_preset_req(peer, start_index, count)
            }
            ControlPointMessage::WritePresetName { index, name } => {
                self.set_name(index, &name).map_err(|e| e.to_att_code())
            }
            ControlPointMessage::SetActivePreset { index, sync } => {
                self.handle_set_active_preset(index, sync)
            }
            ControlPointMessage::SetNextPreset { sync } => {
                let index = self.find_next_preset().map_err(|e| e.to_att_code())?;
                self.call_active_set(index, sync)
            }
            ControlPointMessage::SetPrevPreset { sync } => {
                let index = self.find_prev_preset().map_err(|e| e.to_att_code())?;
                self.call_active_set(index, sync)
            }
            _ => Err(AttErrorCode::InvalidOpcode),
        }
    }

    fn require_indications(&self, peer: &Peer) -> AttResult<()> {
        if !peer.flags.contains(PeerFlag::CP_IND_ENABLED) {
            return Err(AttErrorCode::CccImproperlyConfigured);
        }
        Ok(())
    }

    fn require_mtu(&self, peer: &Peer) -> AttResult<()> {
        // The response may not fit otherwise
        if !peer.flags.contains(PeerFlag::MTU_VALID) {
            return Err(AttErrorCode::InsufficientResources);
        }
        Ok(())
    }

    fn handle_read_preset_req(&self, peer: &Peer, start_index: u8, count: u8) -> AttResult<()> {
        debug!("Read presets start {} count {}", start_index, count);

        if peer.is_read_pending() {
            return Err(AttErrorCode::OperationNotPossible);
        }

        let (first, remaining) = {
            let store = self.store.read().unwrap();
            let first = store
                .foreach_in_range(start_index, PRESET_INDEX_MAX, 1, Preset::is_visible)
                .first()
                .and_then(|&index| store.slot_of(index));
            let remaining = if count == 0 { store.len() } else { count as usize };
            (first, remaining)
        };

        let first = first.ok_or(AttErrorCode::OutOfRange)?;

        let cursor = ReadCursor {
            next: Some(first),
            remaining,
        };
        if !peer.start_read(cursor) {
            return Err(AttErrorCode::OperationNotPossible);
        }

        self.control_point_submit(peer, self.config.cp_work_delay);
        Ok(())
    }

    fn handle_set_active_preset(&self, index: u8, sync: bool) -> AttResult<()> {
        {
            let store = self.store.read().unwrap();
            let preset = store
                .lookup(index)
                .ok()
                .filter(|p| p.is_visible())
                .ok_or(AttErrorCode::OutOfRange)?;

            if !preset.is_available() {
                return Err(AttErrorCode::OperationNotPossible);
            }
        }

        self.call_active_set(index, sync)
    }

    /// Ask the application to switch presets and commit on success
    fn call_active_set(&self, index: u8, sync: bool) -> AttResult<()> {
        let ops = self
            .ops
            .read()
            .unwrap()
            .clone()
            .ok_or(AttErrorCode::OperationNotPossible)?;

        if let Err(e) = ops.active_set(index, sync) {
            warn!("Failed to set active preset {}: {}", index, e);
            return Err(AttErrorCode::OperationNotPossible);
        }

        self.commit_active_preset(index);
        Ok(())
    }

    /// Record a change of the preset at `slot` for every subscribed peer
    pub(super) fn preset_changed(&self, slot: usize, kind: ChangeKind) {
        debug!("Preset slot {} changed: {:?}", slot, kind);

        for peer in self.peers.iter() {
            if !peer.is_subscribed() {
                continue;
            }

            match peer.conn() {
                Some(conn) if self.transport.is_connected(conn) => {}
                _ => continue,
            }

            peer.reconcile_change(slot, kind);

            if peer.has_pending_changes() {
                self.control_point_submit(peer, self.config.cp_work_delay);
            } else if !peer.is_read_pending() && peer.work.cancel() {
                // Only a message that was never sent releases the peer
                peer.flags.remove(PeerFlag::CP_BUSY);
            }
        }
    }

    pub(super) fn control_point_submit(&self, peer: &Peer, delay: Duration) {
        if !peer.flags.test_and_insert(PeerFlag::CP_BUSY) {
            peer.work.reschedule(delay);
        }
    }

    /// The transport finished sending a Control Point message to `conn`
    /// (notification sent or indication confirmed)
    pub fn control_point_tx_done(&self, conn: ConnHandle) {
        trace!("Control point tx done {}", conn);

        let peer = match self.find_peer(conn) {
            Some(peer) => peer,
            None => return,
        };

        peer.flags.remove(PeerFlag::CP_BUSY);

        if peer.has_pending_changes() || peer.is_read_pending() {
            self.control_point_submit(peer, Duration::ZERO);
        }
    }

    /// Run every Control Point work item due at `now`. Returns the next
    /// deadline, if any work is scheduled.
    pub fn run_due_work(&self, now: Instant) -> Option<Instant> {
        for peer in self.peers.iter() {
            if peer.work.begin_if_due(now) {
                self.control_point_process(peer);
                peer.work.finish();
            }
        }

        self.next_work_deadline()
    }

    /// Earliest deadline over all peers
    pub fn next_work_deadline(&self) -> Option<Instant> {
        self.peers.iter().filter_map(|peer| peer.work.deadline()).min()
    }

    fn control_point_process(&self, peer: &Peer) {
        let conn = match peer.conn() {
            Some(conn) if self.transport.is_connected(conn) => conn,
            _ => {
                // Nobody to send to, drop any read in progress
                peer.set_read_cursor(None);
                peer.flags.remove(PeerFlag::CP_BUSY);
                return;
            }
        };

        let sent = if peer.is_read_pending() {
            self.send_read_preset_rsp(conn, peer)
        } else if peer.has_pending_changes() {
            self.send_preset_changed(conn, peer)
        } else {
            None
        };

        if sent.is_none() {
            peer.flags.remove(PeerFlag::CP_BUSY);
        }
    }

    /// Send the next Read Preset Response. Returns the slot sent.
    fn send_read_preset_rsp(&self, conn: ConnHandle, peer: &Peer) -> Option<usize> {
        let cursor = peer.read_cursor()?;
        let slot = cursor.next?;

        let (preset, next, newly_aware) = {
            let store = self.store.read().unwrap();
            let preset = store.get(slot)?.clone();
            let newly_aware = !peer.name_aware.test_and_set(slot);
            let next = if cursor.remaining > 1 && preset.index < PRESET_INDEX_MAX {
                // Looked up per response so presets hidden mid-read are skipped
                store
                    .foreach_in_range(preset.index + 1, PRESET_INDEX_MAX, 1, Preset::is_visible)
                    .first()
                    .and_then(|&index| store.slot_of(index))
            } else {
                None
            };
            (preset, next, newly_aware)
        };

        peer.set_read_cursor(Some(ReadCursor {
            next,
            remaining: cursor.remaining - 1,
        }));

        let is_last = next.is_none();
        debug!("Read preset rsp {} index {} is_last {}", conn, preset.index, is_last);

        let message = ControlPointMessage::ReadPresetResponse {
            is_last,
            index: preset.index,
            properties: preset.properties,
            name: preset.name,
        };

        match self.control_point_tx(conn, peer, &message) {
            Ok(()) => Some(slot),
            Err(e) => {
                warn!("Failed to send read preset response to {}: {}", conn, e);
                if newly_aware {
                    peer.name_aware.clear(slot);
                }
                None
            }
        }
    }

    /// Send the Preset Changed message for the lowest pending slot
    fn send_preset_changed(&self, conn: ConnHandle, peer: &Peer) -> Option<usize> {
        let slot = peer.pending.first_set()?;
        let kind = peer.take_change(slot)?;
        let is_last = !peer.has_pending_changes();

        let (change, newly_aware) = {
            let store = self.store.read().unwrap();
            let preset = match store.get(slot) {
                Some(preset) => preset,
                None => {
                    peer.restore_change(slot, kind);
                    return None;
                }
            };

            match kind {
                ChangeKind::GenericUpdate => {
                    let prev_index = store
                        .rfind_in_range(1, preset.index.saturating_sub(1), Preset::is_visible)
                        .map(|p| p.index)
                        .unwrap_or(PRESET_INDEX_NONE);

                    // Marked while the name is pinned by the store lock so
                    // that a rename racing with this send clears it again
                    let newly_aware = !peer.name_aware.test_and_set(slot);

                    let change = PresetChange::GenericUpdate {
                        prev_index,
                        index: preset.index,
                        properties: preset.properties,
                        name: preset.name.clone(),
                    };
                    (change, newly_aware)
                }
                ChangeKind::Deleted => (
                    PresetChange::Deleted {
                        index: preset.index,
                    },
                    false,
                ),
                ChangeKind::Available => (
                    PresetChange::Available {
                        index: preset.index,
                    },
                    false,
                ),
                ChangeKind::Unavailable => (
                    PresetChange::Unavailable {
                        index: preset.index,
                    },
                    false,
                ),
            }
        };

        debug!(
            "Preset changed {} index {} {:?} is_last {}",
            conn,
            change.index(),
            kind,
            is_last
        );

        let message = ControlPointMessage::PresetChanged { is_last, change };

        match self.control_point_tx(conn, peer, &message) {
            Ok(()) => Some(slot),
            Err(e) => {
                warn!("Failed to send preset changed to {}: {}", conn, e);
                if newly_aware {
                    peer.name_aware.clear(slot);
                }
                peer.restore_change(slot, kind);
                None
            }
        }
    }

    fn control_point_tx(
        &self,
        conn: ConnHandle,
        peer: &Peer,
        message: &ControlPointMessage,
    ) -> Result<(), HasError> {
        let limit = (self.transport.mtu(conn) as usize).saturating_sub(ATT_MTU_HEADER_SIZE);
        let pdu = message.encode_with_limit(limit);

        trace!("Control point tx {}: {}", conn, hex::encode(&pdu));

        let result = if peer.flags.contains(PeerFlag::CP_NTF_ENABLED) {
            self.transport
                .notify(conn, HasCharacteristic::ControlPoint, &pdu)
        } else if peer.flags.contains(PeerFlag::CP_IND_ENABLED) {
            self.transport
                .indicate(conn, HasCharacteristic::ControlPoint, &pdu)
        } else {
            Err(TransportError::ImproperConfiguration)
        };

        result.map_err(HasError::from)
    }
}
