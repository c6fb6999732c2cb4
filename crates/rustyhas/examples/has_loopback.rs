//! Example connecting a Hearing Access client to a server in-process
//!
//! Both roles talk through a loopback link that queues every GATT procedure
//! and delivers it from a single pump loop, the way a real ATT bearer would.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rustyhas::att::{AttErrorCode, SecurityLevel};
use rustyhas::error::HasResult;
use rustyhas::gatt::{CccValue, Characteristic, CharacteristicProperty, Uuid};
use rustyhas::has::constants::*;
use rustyhas::has::{
    ClientTransport, ConnHandle, HasCharacteristic, HasClient, HasClientCallbacks,
    HasClientConfig, HasInfo, HasServer, HasServerConfig, Preset, PresetOps, PresetProperties,
    PresetReadParams, PresetRecord, ReadControl, ServerTransport, TransportError,
};

const CONN: ConnHandle = ConnHandle(0x0040);

const FEATURES_HANDLE: u16 = 0x0003;
const CP_HANDLE: u16 = 0x0006;
const ACTIVE_HANDLE: u16 = 0x0009;

/// A GATT procedure travelling over the loopback link
enum Pdu {
    Discover(Uuid),
    Read(u16),
    ReadByUuid(Uuid),
    Subscribe(u16, CccValue),
    Write(u16, Vec<u8>),
    Notification(u16, Vec<u8>),
}

#[derive(Default)]
struct Link {
    queue: Mutex<VecDeque<Pdu>>,
}

impl Link {
    fn push(&self, pdu: Pdu) -> Result<(), TransportError> {
        self.queue.lock().unwrap().push_back(pdu);
        Ok(())
    }

    fn pop(&self) -> Option<Pdu> {
        self.queue.lock().unwrap().pop_front()
    }
}

fn handle_of(characteristic: HasCharacteristic) -> u16 {
    match characteristic {
        HasCharacteristic::Features => FEATURES_HANDLE,
        HasCharacteristic::ControlPoint => CP_HANDLE,
        HasCharacteristic::ActivePresetIndex => ACTIVE_HANDLE,
    }
}

struct ServerSide(Arc<Link>);

impl ServerTransport for ServerSide {
    fn is_connected(&self, conn: ConnHandle) -> bool {
        conn == CONN
    }

    fn is_bonded(&self, _conn: ConnHandle) -> bool {
        true
    }

    fn mtu(&self, _conn: ConnHandle) -> u16 {
        64
    }

    fn is_subscribed(&self, _conn: ConnHandle, _chrc: HasCharacteristic, _mode: CccValue) -> bool {
        false
    }

    fn notify(&self, _conn: ConnHandle, chrc: HasCharacteristic, value: &[u8]) -> Result<(), TransportError> {
        self.0.push(Pdu::Notification(handle_of(chrc), value.to_vec()))
    }

    fn indicate(&self, _conn: ConnHandle, chrc: HasCharacteristic, value: &[u8]) -> Result<(), TransportError> {
        self.0.push(Pdu::Notification(handle_of(chrc), value.to_vec()))
    }

    fn notify_all(&self, chrc: HasCharacteristic, value: &[u8]) -> Result<(), TransportError> {
        self.0.push(Pdu::Notification(handle_of(chrc), value.to_vec()))
    }
}

struct ClientSide(Arc<Link>);

impl ClientTransport for ClientSide {
    fn is_connected(&self, conn: ConnHandle) -> bool {
        conn == CONN
    }

    fn discover_characteristic(&self, _conn: ConnHandle, uuid: Uuid) -> Result<(), TransportError> {
        self.0.push(Pdu::Discover(uuid))
    }

    fn read(&self, _conn: ConnHandle, handle: u16) -> Result<(), TransportError> {
        self.0.push(Pdu::Read(handle))
    }

    fn read_by_uuid(&self, _conn: ConnHandle, uuid: Uuid) -> Result<(), TransportError> {
        self.0.push(Pdu::ReadByUuid(uuid))
    }

    fn subscribe(&self, _conn: ConnHandle, handle: u16, value: CccValue) -> Result<(), TransportError> {
        self.0.push(Pdu::Subscribe(handle, value))
    }

    fn write(&self, _conn: ConnHandle, handle: u16, data: &[u8]) -> Result<(), TransportError> {
        self.0.push(Pdu::Write(handle, data.to_vec()))
    }
}

/// Hearing aid side: accepts every preset switch
struct Device;

impl PresetOps for Device {
    fn active_set(&self, index: u8, sync: bool) -> HasResult<()> {
        println!("[device] switching to preset {} (sync {})", index, sync);
        Ok(())
    }

    fn name_changed(&self, index: u8, name: &str) {
        println!("[device] preset {} is now {:?}", index, name);
    }
}

/// Remote control side: prints what the client reports
struct Remote;

impl HasClientCallbacks for Remote {
    fn discover(&self, conn: ConnHandle, result: HasResult<HasInfo>) {
        match result {
            Ok(info) => println!(
                "[remote] {} type {:?} features {:?} active {:?}",
                conn, info.hearing_aid_type, info.features, info.active_index
            ),
            Err(e) => println!("[remote] discovery failed: {}", e),
        }
    }

    fn active_preset(&self, _conn: ConnHandle, result: HasResult<u8>) {
        println!("[remote] active preset {:?}", result);
    }

    fn preset_generic_update(&self, _conn: ConnHandle, prev: u8, record: PresetRecord, is_last: bool) {
        println!(
            "[remote] preset {} {:?} after {} (last {})",
            record.index, record.name, prev, is_last
        );
    }

    fn preset_availability(&self, _conn: ConnHandle, index: u8, available: bool, _is_last: bool) {
        println!("[remote] preset {} available {}", index, available);
    }
}

fn characteristic(uuid: Uuid) -> Option<Characteristic> {
    let (value_handle, properties) = if uuid == HAS_HEARING_AID_FEATURES_UUID {
        (FEATURES_HANDLE, CharacteristicProperty::READ)
    } else if uuid == HAS_PRESET_CONTROL_POINT_UUID {
        (
            CP_HANDLE,
            CharacteristicProperty::WRITE | CharacteristicProperty::INDICATE | CharacteristicProperty::NOTIFY,
        )
    } else {
        return None;
    };

    Some(Characteristic {
        uuid,
        declaration_handle: value_handle - 1,
        value_handle,
        properties,
    })
}

/// Deliver queued procedures until both sides are idle
fn pump(link: &Link, server: &HasServer<ServerSide>, client: &HasClient<ClientSide>) {
    loop {
        let pdu = match link.pop() {
            Some(pdu) => pdu,
            None => match server.next_work_deadline() {
                Some(deadline) => {
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    server.run_due_work(Instant::now());
                    continue;
                }
                None => return,
            },
        };

        match pdu {
            Pdu::Discover(uuid) => client.characteristic_discovered(CONN, Ok(characteristic(uuid))),
            Pdu::Read(handle) => {
                let value = if handle == FEATURES_HANDLE {
                    server.read_features(CONN, 0)
                } else {
                    server.read_active_preset_index(CONN, 0)
                };
                match value {
                    Ok(value) => client.read_complete(CONN, handle, Ok(&value)),
                    Err(code) => client.read_complete(CONN, handle, Err(code)),
                }
            }
            Pdu::ReadByUuid(uuid) if uuid == HAS_ACTIVE_PRESET_INDEX_UUID => {
                match server.read_active_preset_index(CONN, 0) {
                    Ok(value) => client.read_complete(CONN, ACTIVE_HANDLE, Ok(&value)),
                    Err(code) => client.read_complete(CONN, ACTIVE_HANDLE, Err(code)),
                }
            }
            Pdu::ReadByUuid(_) => {
                client.read_complete(CONN, 0, Err(AttErrorCode::AttributeNotFound))
            }
            Pdu::Subscribe(handle, value) => {
                let result = if handle == CP_HANDLE {
                    server.control_point_ccc_write(CONN, value.raw()).map(|_| ())
                } else {
                    Ok(())
                };
                client.subscribe_complete(CONN, result);
            }
            Pdu::Write(handle, data) => {
                let result = if handle == CP_HANDLE {
                    server.control_point_write(CONN, &data, 0).map(|_| ())
                } else {
                    Err(AttErrorCode::WriteNotPermitted)
                };
                client.write_complete(CONN, result);
            }
            Pdu::Notification(handle, data) => {
                client.notification_received(CONN, handle, &data);
                if handle == CP_HANDLE {
                    server.control_point_tx_done(CONN);
                }
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=debug shows the server and client side of every exchange
    env_logger::init();

    let link = Arc::new(Link::default());

    let rw = PresetProperties::WRITABLE | PresetProperties::AVAILABLE;
    let server = HasServer::new(
        Arc::new(ServerSide(link.clone())),
        HasServerConfig {
            cp_work_delay: Duration::from_millis(10),
            ..Default::default()
        },
    );
    server.register(
        vec![
            Preset::new(1, rw, "Universal"),
            Preset::new(5, rw, "Outdoor"),
            Preset::new(8, rw, "Noisy"),
            Preset::new(22, PresetProperties::AVAILABLE, "Office"),
        ],
        Arc::new(Device),
    )?;
    server.set_active_preset(1)?;
    println!("Registered presets, features {:?}", server.features());

    let client = HasClient::new(
        Arc::new(ClientSide(link.clone())),
        Arc::new(Remote),
        HasClientConfig::default(),
    );

    // Link up: bonded, encrypted and with a large enough MTU
    server.connected(CONN);
    server.security_changed(CONN, SecurityLevel::EncryptionOnly);
    server.att_mtu_updated(CONN, 64);
    // Drop the stale active index notification queued before connecting
    while link.pop().is_some() {}

    client.discover(CONN)?;
    pump(&link, &server, &client);

    client.read_presets(
        CONN,
        PresetReadParams::ByCount {
            start_index: 1,
            count: 0,
        },
        Box::new(|result: HasResult<Option<PresetRecord>>| {
            match result {
                Ok(Some(record)) => println!("[remote] read preset {} {:?}", record.index, record.name),
                Ok(None) => println!("[remote] read complete"),
                Err(e) => println!("[remote] read failed: {}", e),
            }
            ReadControl::Continue
        }),
    )?;
    pump(&link, &server, &client);

    client.set_next_preset(CONN)?;
    pump(&link, &server, &client);

    server.set_availability(5, false)?;
    pump(&link, &server, &client);

    client.write_preset_name(CONN, 8, "Restaurant")?;
    pump(&link, &server, &client);

    println!("Active preset on the device: {:?}", server.active_preset());
    Ok(())
}
