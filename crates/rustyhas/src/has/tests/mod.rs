//! Unit tests for the Hearing Access server and client

mod server;

use super::transport::{
    ClientTransport, ConnHandle, HasCharacteristic, ServerTransport, TransportError,
};
use crate::gatt::{CccValue, Uuid};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

/// How a value was sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxKind {
    Notify,
    Indicate,
}

/// Mock ATT bearer for the server role
struct MockServerTransport {
    connected: Mutex<HashSet<ConnHandle>>,
    bonded: Mutex<HashSet<ConnHandle>>,
    subscribed: Mutex<HashMap<ConnHandle, CccValue>>,
    mtu: AtomicU16,
    fail_tx: AtomicBool,
    /// Next send reports on the first channel, then waits on the second
    hold_tx: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    sent: Mutex<Vec<(ConnHandle, TxKind, Vec<u8>)>>,
    broadcasts: Mutex<Vec<(HasCharacteristic, Vec<u8>)>>,
}

impl MockServerTransport {
    fn new() -> Self {
        Self {
            connected: Mutex::new(HashSet::new()),
            bonded: Mutex::new(HashSet::new()),
            subscribed: Mutex::new(HashMap::new()),
            mtu: AtomicU16::new(64),
            fail_tx: AtomicBool::new(false),
            hold_tx: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
        }
    }

    fn connect(&self, conn: ConnHandle, bonded: bool) {
        self.connected.lock().unwrap().insert(conn);
        if bonded {
            self.bonded.lock().unwrap().insert(conn);
        }
    }

    fn drop_link(&self, conn: ConnHandle) {
        self.connected.lock().unwrap().remove(&conn);
    }

    fn set_stored_subscription(&self, conn: ConnHandle, value: CccValue) {
        self.subscribed.lock().unwrap().insert(conn, value);
    }

    fn set_mtu(&self, mtu: u16) {
        self.mtu.store(mtu, Ordering::SeqCst);
    }

    fn set_fail_tx(&self, fail: bool) {
        self.fail_tx.store(fail, Ordering::SeqCst);
    }

    /// Block the next send until released. Returns a receiver signalled
    /// once the send has started and a sender that lets it finish.
    fn hold_next_tx(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.hold_tx.lock().unwrap() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    /// Remove and return everything sent to `conn`
    fn take_sent(&self, conn: ConnHandle) -> Vec<(TxKind, Vec<u8>)> {
        let mut sent = self.sent.lock().unwrap();
        let (mine, rest): (Vec<_>, Vec<_>) = sent.drain(..).partition(|(c, _, _)| *c == conn);
        *sent = rest;
        mine.into_iter().map(|(_, kind, data)| (kind, data)).collect()
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn take_broadcasts(&self) -> Vec<(HasCharacteristic, Vec<u8>)> {
        self.broadcasts.lock().unwrap().drain(..).collect()
    }

    fn record(&self, conn: ConnHandle, kind: TxKind, value: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected(conn) {
            return Err(TransportError::NotConnected);
        }
        if self.fail_tx.load(Ordering::SeqCst) {
            return Err(TransportError::Busy);
        }

        let hold = self.hold_tx.lock().unwrap().take();
        if let Some((entered, release)) = hold {
            entered.send(()).unwrap();
            release.recv().unwrap();
        }

        self.sent.lock().unwrap().push((conn, kind, value.to_vec()));
        Ok(())
    }
}

impl ServerTransport for MockServerTransport {
    fn is_connected(&self, conn: ConnHandle) -> bool {
        self.connected.lock().unwrap().contains(&conn)
    }

    fn is_bonded(&self, conn: ConnHandle) -> bool {
        self.bonded.lock().unwrap().contains(&conn)
    }

    fn mtu(&self, _conn: ConnHandle) -> u16 {
        self.mtu.load(Ordering::SeqCst)
    }

    fn is_subscribed(&self, conn: ConnHandle, characteristic: HasCharacteristic, mode: CccValue) -> bool {
        characteristic == HasCharacteristic::ControlPoint
            && self.subscribed.lock().unwrap().get(&conn) == Some(&mode)
    }

    fn notify(
        &self,
        conn: ConnHandle,
        characteristic: HasCharacteristic,
        value: &[u8],
    ) -> Result<(), TransportError> {
        assert_eq!(characteristic, HasCharacteristic::ControlPoint);
        self.record(conn, TxKind::Notify, value)
    }

    fn indicate(
        &self,
        conn: ConnHandle,
        characteristic: HasCharacteristic,
        value: &[u8],
    ) -> Result<(), TransportError> {
        assert_eq!(characteristic, HasCharacteristic::ControlPoint);
        self.record(conn, TxKind::Indicate, value)
    }

    fn notify_all(&self, characteristic: HasCharacteristic, value: &[u8]) -> Result<(), TransportError> {
        self.broadcasts
            .lock()
            .unwrap()
            .push((characteristic, value.to_vec()));
        Ok(())
    }
}

/// GATT procedure started by the client
#[derive(Debug, Clone, PartialEq, Eq)]
enum Request {
    Discover(Uuid),
    Read(u16),
    ReadByUuid(Uuid),
    Subscribe(u16, CccValue),
    Write(u16, Vec<u8>),
}

/// Mock GATT client bearer recording the procedures it was asked to start
struct MockClientTransport {
    connected: Mutex<HashSet<ConnHandle>>,
    requests: Mutex<Vec<(ConnHandle, Request)>>,
    fail_next: AtomicBool,
}

impl MockClientTransport {
    fn new() -> Self {
        Self {
            connected: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    fn connect(&self, conn: ConnHandle) {
        self.connected.lock().unwrap().insert(conn);
    }

    fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn take_requests(&self) -> Vec<Request> {
        self.requests
            .lock()
            .unwrap()
            .drain(..)
            .map(|(_, request)| request)
            .collect()
    }

    fn last_request(&self) -> Option<Request> {
        self.requests.lock().unwrap().last().map(|(_, r)| r.clone())
    }

    fn start(&self, conn: ConnHandle, request: Request) -> Result<(), TransportError> {
        if !self.connected.lock().unwrap().contains(&conn) {
            return Err(TransportError::NotConnected);
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TransportError::InsufficientResources);
        }

        self.requests.lock().unwrap().push((conn, request));
        Ok(())
    }
}

impl ClientTransport for MockClientTransport {
    fn is_connected(&self, conn: ConnHandle) -> bool {
        self.connected.lock().unwrap().contains(&conn)
    }

    fn discover_characteristic(&self, conn: ConnHandle, uuid: Uuid) -> Result<(), TransportError> {
        self.start(conn, Request::Discover(uuid))
    }

    fn read(&self, conn: ConnHandle, handle: u16) -> Result<(), TransportError> {
        self.start(conn, Request::Read(handle))
    }

    fn read_by_uuid(&self, conn: ConnHandle, uuid: Uuid) -> Result<(), TransportError> {
        self.start(conn, Request::ReadByUuid(uuid))
    }

    fn subscribe(&self, conn: ConnHandle, value_handle: u16, value: CccValue) -> Result<(), TransportError> {
        self.start(conn, Request::Subscribe(value_handle, value))
    }

    fn write(&self, conn: ConnHandle, handle: u16, data: &[u8]) -> Result<(), TransportError> {
        self.start(conn, Request::Write(handle, data.to_vec()))
    }
}
