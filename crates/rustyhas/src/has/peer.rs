//! Per-peer Control Point state held by the server
//!
//! One record exists per potential bonded connection. The record only
//! refers to the connection through its handle; the transport owns it.

use super::bitmap::{AtomicBitmap, PeerFlag, PeerFlags};
use super::codec::ChangeKind;
use super::transport::ConnHandle;
use super::work::{DelayedWork, WorkSignal};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Progress of a multi-preset read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCursor {
    /// Slot of the next preset to send
    pub next: Option<usize>,
    /// Number of responses still allowed, including `next`
    pub remaining: usize,
}

impl ReadCursor {
    pub fn is_pending(&self) -> bool {
        self.next.is_some() && self.remaining > 0
    }
}

/// Server side state of one peer
#[derive(Debug)]
pub struct Peer {
    conn: Mutex<Option<ConnHandle>>,
    pub flags: PeerFlags,
    /// Slots with a Preset Changed message pending
    pub pending: AtomicBitmap,
    change_kind: Box<[AtomicU8]>,
    /// Serializes updates of `pending` with `change_kind`
    changes: Mutex<()>,
    /// Slots whose current name this peer has been sent
    pub name_aware: AtomicBitmap,
    read: Mutex<Option<ReadCursor>>,
    pub work: DelayedWork,
}

impl Peer {
    pub fn new(max_presets: usize, signal: Arc<WorkSignal>) -> Self {
        Self {
            conn: Mutex::new(None),
            flags: PeerFlags::new(),
            pending: AtomicBitmap::new(max_presets),
            change_kind: (0..max_presets).map(|_| AtomicU8::new(0)).collect(),
            changes: Mutex::new(()),
            name_aware: AtomicBitmap::new(max_presets),
            read: Mutex::new(None),
            work: DelayedWork::new(signal),
        }
    }

    pub fn conn(&self) -> Option<ConnHandle> {
        *self.conn.lock().unwrap()
    }

    pub fn is_for(&self, conn: ConnHandle) -> bool {
        self.conn() == Some(conn)
    }

    /// Take this slot for `conn` if it is free
    pub fn claim(&self, conn: ConnHandle) -> bool {
        let mut slot = self.conn.lock().unwrap();
        if slot.is_some() {
            return false;
        }

        *slot = Some(conn);
        true
    }

    /// Reset the record so the slot can be reused. Work must already be
    /// cancelled.
    pub fn release(&self) {
        self.flags.clear();
        {
            let _guard = self.changes.lock().unwrap();
            self.pending.clear_all();
        }
        self.name_aware.clear_all();
        *self.read.lock().unwrap() = None;
        *self.conn.lock().unwrap() = None;
    }

    /// Peer has enabled Control Point notifications or indications
    pub fn is_subscribed(&self) -> bool {
        self.flags
            .intersects(PeerFlag::CP_IND_ENABLED | PeerFlag::CP_NTF_ENABLED)
    }

    pub fn change_kind(&self, slot: usize) -> ChangeKind {
        self.change_kind
            .get(slot)
            .and_then(|kind| ChangeKind::from_id(kind.load(Ordering::Acquire)))
            .unwrap_or(ChangeKind::GenericUpdate)
    }

    /// Mark a change of `kind` pending for `slot`
    pub fn set_change(&self, slot: usize, kind: ChangeKind) {
        let _guard = self.changes.lock().unwrap();
        self.store_change(slot, kind);
    }

    fn store_change(&self, slot: usize, kind: ChangeKind) {
        if let Some(stored) = self.change_kind.get(slot) {
            stored.store(kind.id(), Ordering::Release);
            self.pending.set(slot);
        }
    }

    /// Remove the pending change of `slot` for sending.
    ///
    /// Once taken the change is no longer pending, so anything reported
    /// for the slot meanwhile is queued as a new change instead of being
    /// folded into the one on the air.
    pub fn take_change(&self, slot: usize) -> Option<ChangeKind> {
        let _guard = self.changes.lock().unwrap();
        if !self.pending.test_and_clear(slot) {
            return None;
        }
        self.change_kind
            .get(slot)
            .and_then(|kind| ChangeKind::from_id(kind.load(Ordering::Acquire)))
    }

    /// Put back a change that could not be sent, unless a newer one was
    /// queued in the meantime
    pub fn restore_change(&self, slot: usize, kind: ChangeKind) {
        let _guard = self.changes.lock().unwrap();
        if !self.pending.test(slot) {
            self.store_change(slot, kind);
        }
    }

    pub fn has_pending_changes(&self) -> bool {
        self.pending.any()
    }

    /// Fold a new change into whatever is already pending for `slot`.
    ///
    /// A toggle that flips back before it was sent cancels out, and so
    /// does a hide followed by a show (or the reverse) when the peer already
    /// knows the current name.
    pub fn reconcile_change(&self, slot: usize, kind: ChangeKind) {
        let _guard = self.changes.lock().unwrap();
        if !self.pending.test(slot) {
            self.store_change(slot, kind);
            return;
        }

        let pending = self.change_kind(slot);
        let name_aware = self.name_aware.test(slot);

        match kind {
            ChangeKind::GenericUpdate => {
                if pending == ChangeKind::Deleted && name_aware {
                    self.pending.clear(slot);
                } else {
                    self.store_change(slot, kind);
                }
            }
            ChangeKind::Deleted => {
                if pending == ChangeKind::GenericUpdate && name_aware {
                    self.pending.clear(slot);
                } else {
                    self.store_change(slot, kind);
                }
            }
            ChangeKind::Available => {
                if pending == ChangeKind::Unavailable {
                    self.pending.clear(slot);
                }
            }
            ChangeKind::Unavailable => {
                if pending == ChangeKind::Available {
                    self.pending.clear(slot);
                }
            }
        }
    }

    pub fn read_cursor(&self) -> Option<ReadCursor> {
        *self.read.lock().unwrap()
    }

    pub fn is_read_pending(&self) -> bool {
        self.read_cursor().map(|c| c.is_pending()).unwrap_or(false)
    }

    /// Install a read cursor unless a read is already in progress
    pub fn start_read(&self, cursor: ReadCursor) -> bool {
        let mut read = self.read.lock().unwrap();
        if read.map(|c| c.is_pending()).unwrap_or(false) {
            return false;
        }

        *read = Some(cursor);
        true
    }

    pub fn set_read_cursor(&self, cursor: Option<ReadCursor>) {
        *self.read.lock().unwrap() = cursor.filter(|c| c.is_pending());
    }
}
