//! Hearing Access Service client
//!
//! Discovery is a chain of GATT procedures. Each step is started from the
//! completion of the previous one, which the transport reports through the
//! `*_complete` / `characteristic_discovered` entry points. A per-connection
//! busy flag allows a single outstanding procedure; a second request fails
//! with [`HasError::Busy`] instead of being queued.

use super::codec::{ControlPointMessage, PresetChange};
use super::constants::*;
use super::preset::{validate_name, PresetProperties};
use super::transport::{ClientTransport, ConnHandle};
use super::types::{HasFeatures, HearingAidType};
use crate::att::AttErrorCode;
use crate::error::{HasError, HasResult};
use crate::gatt::{CccValue, Characteristic, Uuid};
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Hearing Access client configuration
#[derive(Debug, Clone)]
pub struct HasClientConfig {
    /// Maximum number of connections tracked at once
    pub max_connections: usize,
}

impl Default for HasClientConfig {
    fn default() -> Self {
        Self { max_connections: 2 }
    }
}

/// Value handles found during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HasHandles {
    pub features: Option<u16>,
    pub control_point: Option<u16>,
    pub active_preset_index: Option<u16>,
}

/// Result of a successful discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasInfo {
    pub hearing_aid_type: Option<HearingAidType>,
    pub features: HasFeatures,
    pub active_index: Option<u8>,
    pub handles: HasHandles,
}

impl HasInfo {
    /// The remote exposes a Preset Control Point
    pub fn control_point_supported(&self) -> bool {
        self.handles.control_point.is_some()
    }
}

/// A preset record as reported by the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetRecord {
    pub index: u8,
    pub properties: PresetProperties,
    pub name: String,
}

/// Which presets to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetReadParams {
    /// Read a single preset. Any other index in the response ends the read
    /// with [`HasError::NotFound`].
    ByIndex(u8),
    /// Read up to `count` presets starting at `start_index`. A count of 0
    /// reads all of them.
    ByCount { start_index: u8, count: u8 },
}

/// Returned by a read callback to continue or end the read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadControl {
    Continue,
    Stop,
}

/// Per-preset callback of a read. Called with `Ok(Some(record))` for each
/// preset, then once with `Ok(None)` when the read is complete, or with an
/// error.
pub type PresetReadCallback =
    Box<dyn FnMut(HasResult<Option<PresetRecord>>) -> ReadControl + Send + 'static>;

/// Application callbacks of the client
pub trait HasClientCallbacks: Send + Sync {
    /// Discovery finished
    fn discover(&self, conn: ConnHandle, result: HasResult<HasInfo>);

    /// The active preset was read or changed, or an activation failed
    fn active_preset(&self, conn: ConnHandle, result: HasResult<u8>);

    /// A preset was added or its record changed
    fn preset_generic_update(
        &self,
        _conn: ConnHandle,
        _prev_index: u8,
        _record: PresetRecord,
        _is_last: bool,
    ) {
    }

    /// A preset was removed
    fn preset_deleted(&self, _conn: ConnHandle, _index: u8, _is_last: bool) {}

    /// A preset became available or unavailable
    fn preset_availability(&self, _conn: ConnHandle, _index: u8, _available: bool, _is_last: bool) {}
}

/// GATT procedure in flight on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Procedure {
    DiscoverFeatures,
    SubscribeFeatures,
    ReadFeatures,
    DiscoverControlPoint,
    SubscribeControlPoint,
    ReadActivePresetIndex,
    SubscribeActivePresetIndex,
    ReadActivePreset,
    ActiveSetWrite,
    ReadPresetsWrite,
    WriteNameWrite,
}

/// Next GATT procedure to start, computed under the lock
enum Step {
    Discover(Uuid),
    Read(u16),
    ReadByUuid(Uuid),
    Subscribe(u16, CccValue),
    Complete(HasResult<HasInfo>),
}

struct ReadContext {
    by_index: Option<u8>,
    callback: PresetReadCallback,
}

struct ClientConn {
    handles: HasHandles,
    features: HasFeatures,
    active_index: u8,
    busy: bool,
    procedure: Option<Procedure>,
    /// A read is in progress until its final callback. The context is
    /// taken out of `read` while its callback runs.
    reading: bool,
    read: Option<ReadContext>,
}

impl ClientConn {
    fn new() -> Self {
        Self {
            handles: HasHandles::default(),
            features: HasFeatures::empty(),
            active_index: PRESET_INDEX_NONE,
            busy: false,
            procedure: None,
            reading: false,
            read: None,
        }
    }

    fn info(&self) -> HasInfo {
        HasInfo {
            hearing_aid_type: self.features.hearing_aid_type(),
            features: self.features,
            active_index: (self.active_index != PRESET_INDEX_NONE).then_some(self.active_index),
            handles: self.handles,
        }
    }
}

/// A Hearing Access Service client
pub struct HasClient<T: ClientTransport> {
    config: HasClientConfig,
    transport: Arc<T>,
    callbacks: Arc<dyn HasClientCallbacks>,
    conns: Mutex<HashMap<ConnHandle, ClientConn>>,
}

impl<T: ClientTransport> HasClient<T> {
    pub fn new(
        transport: Arc<T>,
        callbacks: Arc<dyn HasClientCallbacks>,
        config: HasClientConfig,
    ) -> Self {
        Self {
            config,
            transport,
            callbacks,
            conns: Mutex::new(HashMap::new()),
        }
    }

    /// Start discovery of the Hearing Access Service on `conn`
    pub fn discover(&self, conn: ConnHandle) -> HasResult<()> {
        debug!("Discover {}", conn);

        if !self.transport.is_connected(conn) {
            return Err(HasError::NotConnected);
        }

        {
            let mut conns = self.conns.lock().unwrap();
            if !conns.contains_key(&conn) && conns.len() >= self.config.max_connections {
                return Err(HasError::NoResources);
            }

            let client = conns.entry(conn).or_insert_with(ClientConn::new);
            if client.busy {
                return Err(HasError::Busy);
            }

            client.busy = true;
            client.handles = HasHandles::default();
            client.procedure = Some(Procedure::DiscoverFeatures);
        }

        if let Err(e) = self
            .transport
            .discover_characteristic(conn, HAS_HEARING_AID_FEATURES_UUID)
        {
            self.release(conn);
            return Err(e.into());
        }

        Ok(())
    }

    /// Completion of a characteristic discovery. `Ok(None)` means the
    /// characteristic does not exist.
    pub fn characteristic_discovered(
        &self,
        conn: ConnHandle,
        result: Result<Option<Characteristic>, AttErrorCode>,
    ) {
        trace!("Characteristic discovered {}: {:?}", conn, result);

        let step = {
            let mut conns = self.conns.lock().unwrap();
            let client = match conns.get_mut(&conn) {
                Some(client) => client,
                None => return,
            };

            match (client.procedure, result) {
                (Some(Procedure::DiscoverFeatures), Ok(Some(chrc))) => {
                    client.handles.features = Some(chrc.value_handle);
                    if chrc.properties.can_notify() {
                        client.procedure = Some(Procedure::SubscribeFeatures);
                        Step::Subscribe(chrc.value_handle, CccValue::Notify)
                    } else {
                        client.procedure = Some(Procedure::ReadFeatures);
                        Step::Read(chrc.value_handle)
                    }
                }
                (Some(Procedure::DiscoverFeatures), Ok(None)) => {
                    Step::Complete(Err(HasError::NotSupported))
                }
                (Some(Procedure::DiscoverControlPoint), Ok(Some(chrc))) => {
                    client.handles.control_point = Some(chrc.value_handle);
                    client.procedure = Some(Procedure::SubscribeControlPoint);
                    Step::Subscribe(chrc.value_handle, CccValue::Indicate)
                }
                (Some(Procedure::DiscoverControlPoint), Ok(None))
                | (Some(Procedure::DiscoverControlPoint), Err(AttErrorCode::AttributeNotFound)) => {
                    info!("HAS Control Point not found on {}", conn);
                    Step::Complete(Ok(client.info()))
                }
                (Some(Procedure::DiscoverFeatures), Err(code))
                | (Some(Procedure::DiscoverControlPoint), Err(code)) => {
                    Step::Complete(Err(HasError::Att(code)))
                }
                (procedure, _) => {
                    warn!("Unexpected discovery result in {:?}", procedure);
                    return;
                }
            }
        };

        self.run_step(conn, step);
    }

    /// Completion of a CCC write
    pub fn subscribe_complete(&self, conn: ConnHandle, result: Result<(), AttErrorCode>) {
        trace!("Subscribe complete {}: {:?}", conn, result);

        let step = {
            let mut conns = self.conns.lock().unwrap();
            let client = match conns.get_mut(&conn) {
                Some(client) => client,
                None => return,
            };

            if let Err(code) = result {
                Step::Complete(Err(HasError::Att(code)))
            } else {
                match client.procedure {
                    Some(Procedure::SubscribeFeatures) => match client.handles.features {
                        Some(handle) => {
                            client.procedure = Some(Procedure::ReadFeatures);
                            Step::Read(handle)
                        }
                        None => Step::Complete(Err(HasError::Att(AttErrorCode::Unlikely))),
                    },
                    Some(Procedure::SubscribeControlPoint) => {
                        client.procedure = Some(Procedure::ReadActivePresetIndex);
                        Step::ReadByUuid(HAS_ACTIVE_PRESET_INDEX_UUID)
                    }
                    Some(Procedure::SubscribeActivePresetIndex) => Step::Complete(Ok(client.info())),
                    procedure => {
                        warn!("Unexpected subscribe completion in {:?}", procedure);
                        return;
                    }
                }
            }
        };

        self.run_step(conn, step);
    }

    /// Completion of a read. `handle` is the handle the value was read from.
    pub fn read_complete(&self, conn: ConnHandle, handle: u16, result: Result<&[u8], AttErrorCode>) {
        trace!("Read complete {} handle 0x{:04x}: {:?}", conn, handle, result);

        let value = match result {
            Ok(data) => data.first().copied().ok_or(HasError::Att(
                AttErrorCode::InvalidAttributeValueLength,
            )),
            Err(code) => Err(HasError::Att(code)),
        };

        let step = {
            let mut conns = self.conns.lock().unwrap();
            let client = match conns.get_mut(&conn) {
                Some(client) => client,
                None => return,
            };

            match client.procedure {
                Some(Procedure::ReadFeatures) => match value {
                    Ok(features) => {
                        client.features = HasFeatures::from_bits_retain(features);
                        debug!("Features 0x{:02x}", features);
                        client.procedure = Some(Procedure::DiscoverControlPoint);
                        Step::Discover(HAS_PRESET_CONTROL_POINT_UUID)
                    }
                    Err(e) => Step::Complete(Err(e)),
                },
                Some(Procedure::ReadActivePresetIndex) => match value {
                    Ok(index) => {
                        client.active_index = index;
                        client.handles.active_preset_index = Some(handle);
                        client.procedure = Some(Procedure::SubscribeActivePresetIndex);
                        Step::Subscribe(handle, CccValue::Notify)
                    }
                    Err(e) => Step::Complete(Err(e)),
                },
                Some(Procedure::ReadActivePreset) => {
                    client.busy = false;
                    client.procedure = None;
                    if let Ok(index) = value {
                        client.active_index = index;
                    }
                    drop(conns);

                    self.callbacks.active_preset(conn, value);
                    return;
                }
                procedure => {
                    warn!("Unexpected read completion in {:?}", procedure);
                    return;
                }
            }
        };

        self.run_step(conn, step);
    }

    fn run_step(&self, conn: ConnHandle, step: Step) {
        let started = match step {
            Step::Discover(uuid) => self.transport.discover_characteristic(conn, uuid),
            Step::Read(handle) => self.transport.read(conn, handle),
            Step::ReadByUuid(uuid) => self.transport.read_by_uuid(conn, uuid),
            Step::Subscribe(handle, value) => self.transport.subscribe(conn, handle, value),
            Step::Complete(result) => {
                self.discovery_complete(conn, result);
                return;
            }
        };

        if let Err(e) = started {
            self.discovery_complete(conn, Err(e.into()));
        }
    }

    fn discovery_complete(&self, conn: ConnHandle, result: HasResult<HasInfo>) {
        match &result {
            Ok(info) => info!(
                "Discovered HAS on {}: type {:?} features {:?}",
                conn, info.hearing_aid_type, info.features
            ),
            Err(e) => warn!("HAS discovery on {} failed: {}", conn, e),
        }

        self.release(conn);
        self.callbacks.discover(conn, result);
    }

    fn release(&self, conn: ConnHandle) {
        if let Some(client) = self.conns.lock().unwrap().get_mut(&conn) {
            client.busy = false;
            client.procedure = None;
        }
    }

    /// Last known features of the remote
    pub fn features(&self, conn: ConnHandle) -> HasResult<HasFeatures> {
        self.conns
            .lock()
            .unwrap()
            .get(&conn)
            .map(|client| client.features)
            .ok_or(HasError::NotConnected)
    }

    /// Last known active preset of the remote
    pub fn active_preset(&self, conn: ConnHandle) -> HasResult<Option<u8>> {
        self.conns
            .lock()
            .unwrap()
            .get(&conn)
            .map(|client| (client.active_index != PRESET_INDEX_NONE).then_some(client.active_index))
            .ok_or(HasError::NotConnected)
    }

    /// Read the Active Preset Index. The result is reported through
    /// [`HasClientCallbacks::active_preset`].
    pub fn active_preset_get(&self, conn: ConnHandle) -> HasResult<()> {
        if !self.transport.is_connected(conn) {
            return Err(HasError::NotConnected);
        }

        let handle = {
            let mut conns = self.conns.lock().unwrap();
            let client = conns.get_mut(&conn).ok_or(HasError::NotConnected)?;
            if client.busy {
                return Err(HasError::Busy);
            }

            let handle = client
                .handles
                .active_preset_index
                .ok_or(HasError::NotSupported)?;

            client.busy = true;
            client.procedure = Some(Procedure::ReadActivePreset);
            handle
        };

        if let Err(e) = self.transport.read(conn, handle) {
            self.release(conn);
            return Err(e.into());
        }

        Ok(())
    }

    /// Ask the remote to activate the preset at `index`
    pub fn set_active_preset(&self, conn: ConnHandle, index: u8) -> HasResult<()> {
        if index == PRESET_INDEX_NONE {
            return Err(HasError::InvalidArgument(
                "preset index 0x00 is reserved".to_string(),
            ));
        }

        let sync = self.uses_preset_sync(conn)?;
        let message = ControlPointMessage::SetActivePreset { index, sync };
        self.control_point_write(conn, Procedure::ActiveSetWrite, &message, None)
    }

    /// Ask the remote to activate its next preset
    pub fn set_next_preset(&self, conn: ConnHandle) -> HasResult<()> {
        let sync = self.uses_preset_sync(conn)?;
        let message = ControlPointMessage::SetNextPreset { sync };
        self.control_point_write(conn, Procedure::ActiveSetWrite, &message, None)
    }

    /// Ask the remote to activate its previous preset
    pub fn set_prev_preset(&self, conn: ConnHandle) -> HasResult<()> {
        let sync = self.uses_preset_sync(conn)?;
        let message = ControlPointMessage::SetPrevPreset { sync };
        self.control_point_write(conn, Procedure::ActiveSetWrite, &message, None)
    }

    /// Read preset records. `callback` is driven by the Read Preset
    /// Response indications that follow.
    pub fn read_presets(
        &self,
        conn: ConnHandle,
        params: PresetReadParams,
        callback: PresetReadCallback,
    ) -> HasResult<()> {
        let (by_index, message) = match params {
            PresetReadParams::ByIndex(index) => (
                Some(index),
                ControlPointMessage::ReadPresetRequest {
                    start_index: index,
                    count: 1,
                },
            ),
            PresetReadParams::ByCount { start_index, count } => (
                None,
                ControlPointMessage::ReadPresetRequest { start_index, count },
            ),
        };

        let context = ReadContext { by_index, callback };
        self.control_point_write(conn, Procedure::ReadPresetsWrite, &message, Some(context))
    }

    /// Rename a preset on the remote
    pub fn write_preset_name(&self, conn: ConnHandle, index: u8, name: &str) -> HasResult<()> {
        if validate_name(name).is_err() {
            return Err(HasError::InvalidArgument(format!(
                "name length {} out of bounds",
                name.len()
            )));
        }

        let message = ControlPointMessage::WritePresetName {
            index,
            name: name.to_string(),
        };
        self.control_point_write(conn, Procedure::WriteNameWrite, &message, None)
    }

    fn uses_preset_sync(&self, conn: ConnHandle) -> HasResult<bool> {
        Ok(self.features(conn)?.uses_preset_sync())
    }

    fn control_point_write(
        &self,
        conn: ConnHandle,
        procedure: Procedure,
        message: &ControlPointMessage,
        read: Option<ReadContext>,
    ) -> HasResult<()> {
        if !self.transport.is_connected(conn) {
            return Err(HasError::NotConnected);
        }

        let handle = {
            let mut conns = self.conns.lock().unwrap();
            let client = conns.get_mut(&conn).ok_or(HasError::NotConnected)?;
            let handle = client.handles.control_point.ok_or(HasError::NotSupported)?;

            if client.busy || (read.is_some() && client.reading) {
                return Err(HasError::Busy);
            }

            client.busy = true;
            client.procedure = Some(procedure);
            if read.is_some() {
                client.reading = true;
                client.read = read;
            }
            handle
        };

        let pdu = message.encode();
        debug!("Control point tx {} op {}", conn, op_str(message.opcode()));
        trace!("Control point tx {}: {}", conn, hex::encode(&pdu));

        if let Err(e) = self.transport.write(conn, handle, &pdu) {
            let mut conns = self.conns.lock().unwrap();
            if let Some(client) = conns.get_mut(&conn) {
                client.busy = false;
                client.procedure = None;
                if procedure == Procedure::ReadPresetsWrite {
                    client.reading = false;
                    client.read = None;
                }
            }
            return Err(e.into());
        }

        Ok(())
    }

    /// Completion of a Control Point write
    pub fn write_complete(&self, conn: ConnHandle, result: Result<(), AttErrorCode>) {
        trace!("Write complete {}: {:?}", conn, result);

        let (procedure, read) = {
            let mut conns = self.conns.lock().unwrap();
            let client = match conns.get_mut(&conn) {
                Some(client) => client,
                None => return,
            };

            let procedure = client.procedure.take();
            client.busy = false;

            // A rejected read request gets no responses
            let read = match (procedure, result) {
                (Some(Procedure::ReadPresetsWrite), Err(_)) => {
                    client.reading = false;
                    client.read.take()
                }
                _ => None,
            };
            (procedure, read)
        };

        let code = match result {
            Ok(()) => return,
            Err(code) => code,
        };

        debug!("Control point write {:?} failed: {}", procedure, code);

        match procedure {
            Some(Procedure::ActiveSetWrite) | Some(Procedure::WriteNameWrite) => {
                self.callbacks.active_preset(conn, Err(HasError::Att(code)));
            }
            Some(Procedure::ReadPresetsWrite) => {
                if let Some(mut read) = read {
                    (read.callback)(Err(HasError::Att(code)));
                }
            }
            _ => {}
        }
    }

    /// A notification or indication was received
    pub fn notification_received(&self, conn: ConnHandle, handle: u16, data: &[u8]) {
        trace!("Notification {} handle 0x{:04x}: {}", conn, handle, hex::encode(data));

        let handles = match self.conns.lock().unwrap().get(&conn) {
            Some(client) => client.handles,
            None => return,
        };

        if Some(handle) == handles.control_point {
            self.control_point_rx(conn, data);
        } else if Some(handle) == handles.active_preset_index {
            self.active_preset_index_changed(conn, data);
        } else if Some(handle) == handles.features {
            if let Some(&features) = data.first() {
                debug!("Features changed 0x{:02x}", features);
                if let Some(client) = self.conns.lock().unwrap().get_mut(&conn) {
                    client.features = HasFeatures::from_bits_retain(features);
                }
            }
        }
    }

    fn active_preset_index_changed(&self, conn: ConnHandle, data: &[u8]) {
        let index = match data.first() {
            Some(&index) => index,
            None => return,
        };

        let changed = {
            let mut conns = self.conns.lock().unwrap();
            match conns.get_mut(&conn) {
                Some(client) if client.active_index != index => {
                    client.active_index = index;
                    true
                }
                _ => false,
            }
        };

        if changed {
            debug!("Active preset {} on {}", index, conn);
            self.callbacks.active_preset(conn, Ok(index));
        }
    }

    fn control_point_rx(&self, conn: ConnHandle, data: &[u8]) {
        let message = match ControlPointMessage::decode(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Discarding control point message: {}", e);
                return;
            }
        };

        match message {
            ControlPointMessage::ReadPresetResponse {
                is_last,
                index,
                properties,
                name,
            } => {
                let record = PresetRecord {
                    index,
                    properties,
                    name,
                };
                self.read_preset_rsp(conn, is_last, record);
            }
            ControlPointMessage::PresetChanged { is_last, change } => {
                self.preset_changed(conn, is_last, change);
            }
            other => debug!("Ignoring control point op {}", op_str(other.opcode())),
        }
    }

    fn read_preset_rsp(&self, conn: ConnHandle, is_last: bool, record: PresetRecord) {
        let mut read = {
            let mut conns = self.conns.lock().unwrap();
            let client = match conns.get_mut(&conn) {
                Some(client) => client,
                None => return,
            };

            match client.read.take() {
                Some(read) => read,
                None if client.reading => {
                    warn!("Read preset response {} while the previous one is handled", conn);
                    return;
                }
                None => {
                    debug!("Read preset response without a read in progress");
                    return;
                }
            }
        };

        let mismatch = read.by_index.filter(|&index| index != record.index).is_some();
        let control = if mismatch {
            ReadControl::Stop
        } else {
            (read.callback)(Ok(Some(record)))
        };
        let done = mismatch || is_last || read.by_index.is_some() || control == ReadControl::Stop;

        let disconnected = {
            let mut conns = self.conns.lock().unwrap();
            match conns.get_mut(&conn) {
                Some(client) if done => {
                    client.reading = false;
                    false
                }
                Some(client) => {
                    // Keep the context for the next response
                    client.read = Some(read);
                    return;
                }
                None => true,
            }
        };

        let result = if mismatch {
            Err(HasError::NotFound)
        } else if disconnected && !done {
            // The link went down while the callback ran
            Err(HasError::NotConnected)
        } else {
            Ok(None)
        };
        (read.callback)(result);
    }

    fn preset_changed(&self, conn: ConnHandle, is_last: bool, change: PresetChange) {
        debug!("Preset changed {} {:?} is_last {}", conn, change.kind(), is_last);

        match change {
            PresetChange::GenericUpdate {
                prev_index,
                index,
                properties,
                name,
            } => {
                let record = PresetRecord {
                    index,
                    properties,
                    name,
                };
                self.callbacks
                    .preset_generic_update(conn, prev_index, record, is_last);
            }
            PresetChange::Deleted { index } => {
                self.callbacks.preset_deleted(conn, index, is_last);
            }
            PresetChange::Available { index } => {
                self.callbacks.preset_availability(conn, index, true, is_last);
            }
            PresetChange::Unavailable { index } => {
                self.callbacks.preset_availability(conn, index, false, is_last);
            }
        }
    }

    /// The connection was torn down
    pub fn disconnected(&self, conn: ConnHandle) {
        debug!("Disconnected {}", conn);

        let client = match self.conns.lock().unwrap().remove(&conn) {
            Some(client) => client,
            None => return,
        };

        if let Some(mut read) = client.read {
            (read.callback)(Err(HasError::NotConnected));
        }

        let discovering = matches!(
            client.procedure,
            Some(Procedure::DiscoverFeatures)
                | Some(Procedure::SubscribeFeatures)
                | Some(Procedure::ReadFeatures)
                | Some(Procedure::DiscoverControlPoint)
                | Some(Procedure::SubscribeControlPoint)
                | Some(Procedure::ReadActivePresetIndex)
                | Some(Procedure::SubscribeActivePresetIndex)
        );
        if discovering {
            self.callbacks.discover(conn, Err(HasError::NotConnected));
        }
    }
}
