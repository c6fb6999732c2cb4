//! Server role: Control Point dispatch, scheduling and reconciliation

use super::{MockServerTransport, TxKind};
use crate::att::{AttErrorCode, SecurityLevel};
use crate::error::{HasError, HasResult};
use crate::has::codec::{ControlPointMessage, PresetChange};
use crate::has::preset::{Preset, PresetProperties};
use crate::has::server::{HasServer, HasServerConfig, PresetOps};
use crate::has::transport::{ConnHandle, HasCharacteristic};
use crate::has::types::HasFeatures;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const PEER: ConnHandle = ConnHandle(0x0040);
const OTHER: ConnHandle = ConnHandle(0x0041);

/// Records active preset requests from the server
struct TestOps {
    calls: Mutex<Vec<(u8, bool)>>,
    names: Mutex<Vec<(u8, String)>>,
    fail: AtomicBool,
}

impl TestOps {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            names: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    fn calls(&self) -> Vec<(u8, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

impl PresetOps for TestOps {
    fn active_set(&self, index: u8, sync: bool) -> HasResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HasError::Busy);
        }
        self.calls.lock().unwrap().push((index, sync));
        Ok(())
    }

    fn name_changed(&self, index: u8, name: &str) {
        self.names.lock().unwrap().push((index, name.to_string()));
    }
}

fn rw() -> PresetProperties {
    PresetProperties::WRITABLE | PresetProperties::AVAILABLE
}

fn presets() -> Vec<Preset> {
    vec![
        Preset::new(1, rw(), "Universal"),
        Preset::new(5, rw(), "Outdoor"),
        Preset::new(8, rw(), "Noisy"),
        Preset::new(22, rw(), "Office"),
    ]
}

struct Fixture {
    transport: Arc<MockServerTransport>,
    server: HasServer<MockServerTransport>,
    ops: Arc<TestOps>,
}

fn setup_with(config: HasServerConfig) -> Fixture {
    let transport = Arc::new(MockServerTransport::new());
    let server = HasServer::new(transport.clone(), config);
    let ops = Arc::new(TestOps::new());

    server.register(presets(), ops.clone()).unwrap();
    server.set_active_preset(1).unwrap();
    transport.take_broadcasts();

    Fixture {
        transport,
        server,
        ops,
    }
}

fn setup() -> Fixture {
    setup_with(HasServerConfig::default())
}

fn later() -> Instant {
    Instant::now() + Duration::from_secs(10)
}

impl Fixture {
    /// Bonded peer subscribed for indications on an encrypted link
    fn connect(&self, conn: ConnHandle) {
        self.transport.connect(conn, true);
        self.server.connected(conn);
        self.server
            .control_point_ccc_write(conn, crate::att::CCC_VALUE_INDICATE)
            .unwrap();
        self.server
            .security_changed(conn, SecurityLevel::EncryptionOnly);
    }

    /// Connect and consume the Generic Updates sent to a bonded peer
    fn connect_synced(&self, conn: ConnHandle) {
        self.connect(conn);
        assert_eq!(self.drain(conn).len(), 4);
    }

    /// Run work and confirm every message until the peer goes quiet
    fn drain(&self, conn: ConnHandle) -> Vec<ControlPointMessage> {
        let mut messages = Vec::new();

        loop {
            self.server.run_due_work(later());
            let sent = self.transport.take_sent(conn);
            if sent.is_empty() {
                break;
            }

            for (_, pdu) in sent {
                messages.push(ControlPointMessage::decode(&pdu).unwrap());
                self.server.control_point_tx_done(conn);
            }
        }

        messages
    }

    fn write(&self, conn: ConnHandle, data: &[u8]) -> Result<usize, AttErrorCode> {
        self.server.control_point_write(conn, data, 0)
    }
}

fn changed_indices(messages: &[ControlPointMessage]) -> Vec<u8> {
    messages
        .iter()
        .filter_map(|m| match m {
            ControlPointMessage::PresetChanged { change, .. } => Some(change.index()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_register() {
    let f = setup();
    assert!(f.server.features().contains(HasFeatures::WRITABLE_PRESETS));
    assert_eq!(f.server.presets().len(), 4);

    assert!(matches!(
        f.server.register(presets(), f.ops.clone()),
        Err(HasError::AlreadyRegistered)
    ));
}

#[test]
fn test_register_rejects_invalid_lists() {
    let transport = Arc::new(MockServerTransport::new());
    let server = HasServer::new(transport, HasServerConfig::default());
    let ops = Arc::new(TestOps::new());

    assert!(matches!(
        server.register(Vec::new(), ops.clone()),
        Err(HasError::InvalidArgument(_))
    ));

    let duplicate = vec![
        Preset::new(3, rw(), "One"),
        Preset::new(3, rw(), "Two"),
    ];
    assert!(matches!(
        server.register(duplicate, ops.clone()),
        Err(HasError::InvalidArgument(_))
    ));

    // A failed registration leaves the server unregistered
    let fixed = vec![Preset::new(3, PresetProperties::AVAILABLE, "Fixed")];
    server.register(fixed, ops).unwrap();
    assert!(!server.features().contains(HasFeatures::WRITABLE_PRESETS));
}

#[test]
fn test_characteristic_reads() {
    let f = setup();
    assert_eq!(
        f.server.read_features(PEER, 0).unwrap(),
        vec![f.server.features().bits()]
    );
    assert_eq!(f.server.read_active_preset_index(PEER, 0).unwrap(), vec![1]);
    assert_eq!(
        f.server.read_features(PEER, 1),
        Err(AttErrorCode::AttributeNotLong)
    );
    assert_eq!(
        f.server.read_active_preset_index(PEER, 1),
        Err(AttErrorCode::AttributeNotLong)
    );
}

#[test]
fn test_bonded_peer_gets_generic_updates() {
    let f = setup();
    f.connect(PEER);

    let messages = f.drain(PEER);
    assert_eq!(messages.len(), 4);

    let expected = [(0, 1, "Universal"), (1, 5, "Outdoor"), (5, 8, "Noisy"), (8, 22, "Office")];
    for (i, message) in messages.iter().enumerate() {
        let (prev, index, name) = expected[i];
        match message {
            ControlPointMessage::PresetChanged {
                is_last,
                change:
                    PresetChange::GenericUpdate {
                        prev_index,
                        index: got,
                        name: got_name,
                        ..
                    },
            } => {
                assert_eq!(*is_last, i == 3);
                assert_eq!(*prev_index, prev);
                assert_eq!(*got, index);
                assert_eq!(got_name, name);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
}

#[test]
fn test_unsubscribed_bonded_peer_drops_pending_changes() {
    let f = setup();
    f.transport.connect(PEER, true);
    f.server.connected(PEER);
    f.server
        .security_changed(PEER, SecurityLevel::EncryptionOnly);

    f.server
        .control_point_ccc_write(PEER, crate::att::CCC_VALUE_INDICATE)
        .unwrap();
    assert!(f.drain(PEER).is_empty());
}

#[test]
fn test_stored_subscription_restored_on_encryption() {
    let f = setup();
    f.transport.connect(PEER, true);
    f.transport
        .set_stored_subscription(PEER, crate::gatt::CccValue::Indicate);

    f.server.connected(PEER);
    f.server
        .security_changed(PEER, SecurityLevel::EncryptionWithAuthentication);

    assert_eq!(f.drain(PEER).len(), 4);
}

#[test]
fn test_mtu_update_releases_pending_changes() {
    let f = setup();
    f.transport.set_mtu(23);
    f.connect(PEER);

    // No valid MTU yet, nothing is scheduled
    assert!(f.server.next_work_deadline().is_none());

    f.transport.set_mtu(64);
    f.server.att_mtu_updated(PEER, 64);
    assert_eq!(f.drain(PEER).len(), 4);
}

#[test]
fn test_set_next_cycles_and_wraps() {
    let f = setup();
    f.connect_synced(PEER);

    for expected in [5, 8, 22, 1] {
        assert_eq!(f.write(PEER, &[0x06]), Ok(1));
        assert_eq!(f.server.active_preset(), Some(expected));
    }

    assert_eq!(
        f.ops.calls(),
        vec![(5, false), (8, false), (22, false), (1, false)]
    );

    let broadcasts = f.transport.take_broadcasts();
    assert_eq!(broadcasts.len(), 4);
    assert_eq!(
        broadcasts[0],
        (HasCharacteristic::ActivePresetIndex, vec![5])
    );
}

#[test]
fn test_set_prev_wraps() {
    let f = setup();
    f.connect_synced(PEER);

    assert_eq!(f.write(PEER, &[0x07]), Ok(1));
    assert_eq!(f.server.active_preset(), Some(22));
    assert_eq!(f.write(PEER, &[0x07]), Ok(1));
    assert_eq!(f.server.active_preset(), Some(8));
}

#[test]
fn test_navigation_skips_unavailable() {
    let f = setup();
    f.connect_synced(PEER);
    f.server.set_availability(5, false).unwrap();
    f.server.set_visibility(8, false).unwrap();

    assert_eq!(f.write(PEER, &[0x06]), Ok(1));
    assert_eq!(f.server.active_preset(), Some(22));
}

#[test]
fn test_navigation_without_candidates() {
    let f = setup();
    f.connect_synced(PEER);
    for index in [5, 8, 22] {
        f.server.set_availability(index, false).unwrap();
    }

    assert_eq!(
        f.write(PEER, &[0x06]),
        Err(AttErrorCode::OperationNotPossible)
    );
    assert_eq!(
        f.write(PEER, &[0x07]),
        Err(AttErrorCode::OperationNotPossible)
    );
    assert_eq!(f.server.active_preset(), Some(1));
}

#[test]
fn test_local_navigation_from_no_active_preset() {
    let f = setup();
    f.server.clear_active_preset().unwrap();
    assert_eq!(f.server.active_preset(), None);

    f.server.set_next_preset().unwrap();
    assert_eq!(f.server.active_preset(), Some(1));

    f.server.clear_active_preset().unwrap();
    f.server.set_prev_preset().unwrap();
    assert_eq!(f.server.active_preset(), Some(22));

    // Local changes do not go through the preset hooks
    assert!(f.ops.calls().is_empty());
}

#[test]
fn test_set_active_preset() {
    let f = setup();
    f.connect_synced(PEER);

    assert_eq!(f.write(PEER, &[0x05, 22]), Ok(2));
    assert_eq!(f.server.active_preset(), Some(22));
    assert_eq!(
        f.transport.take_broadcasts(),
        vec![(HasCharacteristic::ActivePresetIndex, vec![22])]
    );

    // Same preset again: no notification
    assert_eq!(f.write(PEER, &[0x05, 22]), Ok(2));
    assert!(f.transport.take_broadcasts().is_empty());
}

#[test]
fn test_set_active_preset_errors() {
    let f = setup();
    f.connect_synced(PEER);

    assert_eq!(f.write(PEER, &[0x05, 2]), Err(AttErrorCode::OutOfRange));
    assert_eq!(
        f.write(PEER, &[0x05]),
        Err(AttErrorCode::InvalidParameterLength)
    );

    f.server.set_availability(8, false).unwrap();
    assert_eq!(
        f.write(PEER, &[0x05, 8]),
        Err(AttErrorCode::OperationNotPossible)
    );

    f.ops.fail.store(true, Ordering::SeqCst);
    assert_eq!(
        f.write(PEER, &[0x05, 5]),
        Err(AttErrorCode::OperationNotPossible)
    );
    assert_eq!(f.server.active_preset(), Some(1));
}

#[test]
fn test_sync_opcodes() {
    let f = setup();
    f.connect_synced(PEER);
    for op in [0x08, 0x09, 0x0A] {
        assert_eq!(
            f.write(PEER, &[op, 5]),
            Err(AttErrorCode::PresetSyncNotSupported)
        );
    }

    let f = setup_with(HasServerConfig {
        preset_sync_support: true,
        ..Default::default()
    });
    f.connect_synced(PEER);
    assert!(f.server.features().contains(HasFeatures::PRESET_SYNC));

    assert_eq!(f.write(PEER, &[0x08, 8]), Ok(2));
    assert_eq!(f.write(PEER, &[0x09]), Ok(1));
    assert_eq!(f.ops.calls(), vec![(8, true), (22, true)]);
}

#[test]
fn test_dispatch_errors() {
    let f = setup();
    f.connect_synced(PEER);

    assert_eq!(
        f.server.control_point_write(OTHER, &[0x06], 0),
        Err(AttErrorCode::Unlikely)
    );
    assert_eq!(
        f.server.control_point_write(PEER, &[0x06], 1),
        Err(AttErrorCode::InvalidOffset)
    );
    assert_eq!(
        f.write(PEER, &[]),
        Err(AttErrorCode::InvalidAttributeValueLength)
    );
    assert_eq!(f.write(PEER, &[0x42]), Err(AttErrorCode::InvalidOpcode));
    // Server to client opcodes
    assert_eq!(
        f.write(PEER, &[0x02, 0x01, 0x01, 0x03, b'A']),
        Err(AttErrorCode::InvalidOpcode)
    );
    assert_eq!(
        f.write(PEER, &[0x03, 0x01, 0x01, 0x05]),
        Err(AttErrorCode::InvalidOpcode)
    );
}

#[test]
fn test_requests_need_indications_and_mtu() {
    let f = setup();
    f.transport.connect(PEER, false);
    f.server
        .control_point_ccc_write(PEER, crate::att::CCC_VALUE_NOTIFY)
        .unwrap();

    assert_eq!(
        f.write(PEER, &[0x01, 0x01, 0xFF]),
        Err(AttErrorCode::CccImproperlyConfigured)
    );
    assert_eq!(
        f.write(PEER, &[0x04, 0x05, b'A']),
        Err(AttErrorCode::CccImproperlyConfigured)
    );
    assert_eq!(
        f.write(PEER, &[0x05, 0x05]),
        Err(AttErrorCode::CccImproperlyConfigured)
    );
    // Navigation only needs a subscription for the result
    assert_eq!(f.write(PEER, &[0x06]), Ok(1));

    f.server
        .control_point_ccc_write(PEER, crate::att::CCC_VALUE_INDICATE)
        .unwrap();
    assert_eq!(
        f.write(PEER, &[0x01, 0x01, 0xFF]),
        Err(AttErrorCode::InsufficientResources)
    );

    f.server.att_mtu_updated(PEER, 49);
    assert_eq!(f.write(PEER, &[0x01, 0x01, 0xFF]), Ok(3));
}

#[test]
fn test_ccc_write() {
    let f = setup_with(HasServerConfig {
        max_peers: 1,
        ..Default::default()
    });

    assert_eq!(
        f.server.control_point_ccc_write(PEER, 0x0003),
        Err(AttErrorCode::ValueNotAllowed)
    );
    assert_eq!(f.server.control_point_ccc_write(PEER, 0x0002), Ok(2));
    assert_eq!(
        f.server.control_point_ccc_write(OTHER, 0x0001),
        Err(AttErrorCode::InsufficientResources)
    );

    // Clearing an unknown peer is not an error
    assert_eq!(f.server.control_point_ccc_write(OTHER, 0x0000), Ok(2));
}

#[test]
fn test_read_all_presets() {
    let f = setup();
    f.connect_synced(PEER);

    assert_eq!(f.write(PEER, &[0x01, 1, 255]), Ok(3));
    let messages = f.drain(PEER);
    assert_eq!(messages.len(), 4);

    let mut indices = Vec::new();
    for (i, message) in messages.iter().enumerate() {
        match message {
            ControlPointMessage::ReadPresetResponse {
                is_last,
                index,
                properties,
                ..
            } => {
                assert_eq!(*is_last, i == 3);
                assert_eq!(*properties, rw());
                indices.push(*index);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
    assert_eq!(indices, vec![1, 5, 8, 22]);
}

#[test]
fn test_read_count_zero_reads_all() {
    let f = setup();
    f.connect_synced(PEER);

    assert_eq!(f.write(PEER, &[0x01, 1, 0]), Ok(3));
    assert_eq!(f.drain(PEER).len(), 4);
}

#[test]
fn test_read_limited_count() {
    let f = setup();
    f.connect_synced(PEER);

    assert_eq!(f.write(PEER, &[0x01, 2, 2]), Ok(3));
    let messages = f.drain(PEER);
    assert_eq!(
        messages,
        vec![
            ControlPointMessage::ReadPresetResponse {
                is_last: false,
                index: 5,
                properties: rw(),
                name: "Outdoor".to_string(),
            },
            ControlPointMessage::ReadPresetResponse {
                is_last: true,
                index: 8,
                properties: rw(),
                name: "Noisy".to_string(),
            },
        ]
    );
}

#[test]
fn test_read_skips_hidden_presets() {
    let f = setup();
    f.connect_synced(PEER);
    f.server.set_visibility(22, false).unwrap();
    f.drain(PEER);

    assert_eq!(
        f.write(PEER, &[0x01, 9, 0]),
        Err(AttErrorCode::OutOfRange)
    );
    assert_eq!(f.write(PEER, &[0x01, 6, 0]), Ok(3));
    let messages = f.drain(PEER);
    assert_eq!(messages.len(), 1);
    assert!(matches!(
        messages[0],
        ControlPointMessage::ReadPresetResponse {
            is_last: true,
            index: 8,
            ..
        }
    ));
}

#[test]
fn test_read_out_of_range() {
    let f = setup();
    f.connect_synced(PEER);

    assert_eq!(
        f.write(PEER, &[0x01, 23, 1]),
        Err(AttErrorCode::OutOfRange)
    );
    assert_eq!(
        f.write(PEER, &[0x01, 1]),
        Err(AttErrorCode::InvalidParameterLength)
    );
    assert!(f.drain(PEER).is_empty());
}

#[test]
fn test_second_read_rejected_while_in_progress() {
    let f = setup();
    f.connect_synced(PEER);

    assert_eq!(f.write(PEER, &[0x01, 1, 255]), Ok(3));
    assert_eq!(
        f.write(PEER, &[0x01, 1, 255]),
        Err(AttErrorCode::OperationNotPossible)
    );

    assert_eq!(f.drain(PEER).len(), 4);
    assert_eq!(f.write(PEER, &[0x01, 1, 1]), Ok(3));
}

#[test]
fn test_read_has_priority_over_changes() {
    let f = setup();
    f.connect_synced(PEER);

    assert_eq!(f.write(PEER, &[0x01, 1, 2]), Ok(3));
    f.server.set_availability(22, false).unwrap();

    let messages = f.drain(PEER);
    assert_eq!(messages.len(), 3);
    assert!(matches!(messages[0], ControlPointMessage::ReadPresetResponse { index: 1, .. }));
    assert!(matches!(
        messages[1],
        ControlPointMessage::ReadPresetResponse {
            is_last: true,
            index: 5,
            ..
        }
    ));
    assert_eq!(
        messages[2],
        ControlPointMessage::PresetChanged {
            is_last: true,
            change: PresetChange::Unavailable { index: 22 },
        }
    );
}

#[test]
fn test_set_name_errors() {
    let f = setup();
    assert_eq!(
        f.server.set_name(5, ""),
        Err(HasError::Att(AttErrorCode::InvalidParameterLength))
    );
    assert_eq!(
        f.server.set_name(5, &"a".repeat(41)),
        Err(HasError::Att(AttErrorCode::InvalidParameterLength))
    );
    assert_eq!(
        f.server.set_name(99, "Car"),
        Err(HasError::Att(AttErrorCode::OutOfRange))
    );
    assert_eq!(f.server.preset(5).unwrap().name, "Outdoor");
}

#[test]
fn test_peer_write_name() {
    let f = setup();
    f.connect_synced(PEER);
    f.connect_synced(OTHER);

    let mut request = vec![0x04, 5];
    request.extend_from_slice(b"Car");
    assert_eq!(f.write(PEER, &request), Ok(5));
    assert_eq!(f.server.preset(5).unwrap().name, "Car");
    assert_eq!(
        f.ops.names.lock().unwrap().clone(),
        vec![(5, "Car".to_string())]
    );

    // Every subscribed peer hears about the new name
    for conn in [PEER, OTHER] {
        let messages = f.drain(conn);
        assert_eq!(
            messages,
            vec![ControlPointMessage::PresetChanged {
                is_last: true,
                change: PresetChange::GenericUpdate {
                    prev_index: 1,
                    index: 5,
                    properties: rw(),
                    name: "Car".to_string(),
                },
            }]
        );
    }

    assert_eq!(
        f.write(PEER, &[0x04, 5]),
        Err(AttErrorCode::InvalidParameterLength)
    );
}

#[test]
fn test_peer_write_name_rejects_invalid_utf8() {
    let f = setup();
    f.connect_synced(PEER);

    assert_eq!(
        f.write(PEER, &[0x04, 5, 0xFF]),
        Err(AttErrorCode::ValueNotAllowed)
    );
    assert_eq!(f.server.preset(5).unwrap().name, "Outdoor");
    assert!(f.drain(PEER).is_empty());
}

#[test]
fn test_write_name_not_allowed() {
    let f = setup_with(HasServerConfig {
        dynamic_names: false,
        ..Default::default()
    });
    f.connect_synced(PEER);
    assert!(!f.server.features().contains(HasFeatures::WRITABLE_PRESETS));

    assert_eq!(
        f.write(PEER, &[0x04, 5, b'A']),
        Err(AttErrorCode::WriteNameNotAllowed)
    );
}

#[test]
fn test_availability_toggle_cancels_out() {
    let f = setup();
    f.connect_synced(PEER);

    f.server.set_availability(8, false).unwrap();
    f.server.set_availability(8, true).unwrap();

    assert!(f.drain(PEER).is_empty());
    assert!(f.server.next_work_deadline().is_none());
}

#[test]
fn test_availability_set_twice_sends_once() {
    let f = setup();
    f.connect_synced(PEER);
    f.server.set_availability(8, false).unwrap();
    f.drain(PEER);

    f.server.set_availability(8, true).unwrap();
    f.server.set_availability(8, true).unwrap();

    assert_eq!(
        f.drain(PEER),
        vec![ControlPointMessage::PresetChanged {
            is_last: true,
            change: PresetChange::Available { index: 8 },
        }]
    );
}

#[test]
fn test_hidden_preset_reported_deleted() {
    let f = setup();
    f.connect_synced(PEER);

    f.server.set_visibility(5, false).unwrap();
    assert_eq!(
        f.drain(PEER),
        vec![ControlPointMessage::PresetChanged {
            is_last: true,
            change: PresetChange::Deleted { index: 5 },
        }]
    );

    // Availability of a hidden preset is not reported
    f.server.set_availability(5, false).unwrap();
    assert!(f.drain(PEER).is_empty());
}

#[test]
fn test_hide_show_cancels_for_name_aware_peer() {
    let f = setup();
    f.connect_synced(PEER);

    f.server.set_visibility(5, false).unwrap();
    f.server.set_visibility(5, true).unwrap();
    assert!(f.drain(PEER).is_empty());
}

#[test]
fn test_rename_while_hidden_is_reported_on_show() {
    let f = setup();
    f.connect_synced(PEER);

    f.server.set_visibility(5, false).unwrap();
    f.server.set_name(5, "Car").unwrap();
    // Rename cleared name awareness, so showing again is not a no-op
    f.server.set_visibility(5, true).unwrap();

    let messages = f.drain(PEER);
    assert_eq!(messages.len(), 1);
    match &messages[0] {
        ControlPointMessage::PresetChanged {
            change: PresetChange::GenericUpdate { index, name, .. },
            ..
        } => {
            assert_eq!(*index, 5);
            assert_eq!(name, "Car");
        }
        other => panic!("unexpected message {:?}", other),
    }
}

#[test]
fn test_change_during_send_is_queued_again() {
    let f = setup();
    f.connect_synced(PEER);

    f.server.set_availability(8, false).unwrap();
    let (entered, release) = f.transport.hold_next_tx();

    std::thread::scope(|s| {
        let worker = s.spawn(|| f.server.run_due_work(later()));
        entered.recv_timeout(Duration::from_secs(2)).unwrap();

        // Unavailable is already on the air and must not cancel this
        f.server.set_availability(8, true).unwrap();

        release.send(()).unwrap();
        worker.join().unwrap();
    });

    let sent = f.transport.take_sent(PEER);
    assert_eq!(sent.len(), 1);
    assert_eq!(
        ControlPointMessage::decode(&sent[0].1).unwrap(),
        ControlPointMessage::PresetChanged {
            is_last: true,
            change: PresetChange::Unavailable { index: 8 },
        }
    );
    f.server.control_point_tx_done(PEER);

    assert_eq!(
        f.drain(PEER),
        vec![ControlPointMessage::PresetChanged {
            is_last: true,
            change: PresetChange::Available { index: 8 },
        }]
    );
}

#[test]
fn test_rename_during_send_is_reported() {
    let f = setup();
    f.connect_synced(PEER);

    f.server.set_name(5, "Car").unwrap();
    let (entered, release) = f.transport.hold_next_tx();

    std::thread::scope(|s| {
        let worker = s.spawn(|| f.server.run_due_work(later()));
        entered.recv_timeout(Duration::from_secs(2)).unwrap();

        f.server.set_name(5, "Train").unwrap();

        release.send(()).unwrap();
        worker.join().unwrap();
    });

    assert_eq!(f.transport.take_sent(PEER).len(), 1);
    f.server.control_point_tx_done(PEER);

    let messages = f.drain(PEER);
    assert_eq!(messages.len(), 1);
    match &messages[0] {
        ControlPointMessage::PresetChanged {
            change: PresetChange::GenericUpdate { index, name, .. },
            ..
        } => {
            assert_eq!(*index, 5);
            assert_eq!(name, "Train");
        }
        other => panic!("unexpected message {:?}", other),
    }
}

#[test]
fn test_single_message_in_flight() {
    let f = setup();
    f.connect_synced(PEER);

    f.server.set_availability(5, false).unwrap();
    f.server.set_availability(8, false).unwrap();

    f.server.run_due_work(later());
    let first = f.transport.take_sent(PEER);
    assert_eq!(first.len(), 1);
    assert_eq!(
        ControlPointMessage::decode(&first[0].1).unwrap(),
        ControlPointMessage::PresetChanged {
            is_last: false,
            change: PresetChange::Unavailable { index: 5 },
        }
    );

    // Not confirmed yet: nothing else goes out
    f.server.run_due_work(later());
    f.server.set_availability(22, false).unwrap();
    f.server.run_due_work(later());
    assert_eq!(f.transport.sent_count(), 0);

    f.server.control_point_tx_done(PEER);
    assert_eq!(changed_indices(&f.drain(PEER)), vec![8, 22]);
}

#[test]
fn test_changes_coalesce_until_delay_expires() {
    let f = setup_with(HasServerConfig {
        cp_work_delay: Duration::from_millis(500),
        ..Default::default()
    });
    f.connect_synced(PEER);

    f.server.set_availability(5, false).unwrap();
    f.server.set_availability(8, false).unwrap();

    // Nothing before the coalescing delay
    let deadline = f.server.run_due_work(Instant::now());
    assert!(deadline.is_some());
    assert_eq!(f.transport.sent_count(), 0);

    assert_eq!(changed_indices(&f.drain(PEER)), vec![5, 8]);
}

#[test]
fn test_notifications_preferred() {
    let f = setup();
    f.connect_synced(PEER);
    f.server
        .control_point_ccc_write(PEER, crate::att::CCC_VALUE_NOTIFY)
        .unwrap();

    f.server.set_availability(5, false).unwrap();
    f.server.run_due_work(later());

    let sent = f.transport.take_sent(PEER);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, TxKind::Notify);
}

#[test]
fn test_unsubscribe_stops_messages() {
    let f = setup();
    f.connect_synced(PEER);
    f.server.control_point_ccc_write(PEER, 0x0000).unwrap();

    f.server.set_availability(5, false).unwrap();
    assert!(f.drain(PEER).is_empty());
}

#[test]
fn test_failed_send_releases_busy() {
    let f = setup();
    f.connect_synced(PEER);

    f.transport.set_fail_tx(true);
    f.server.set_availability(5, false).unwrap();
    f.server.run_due_work(later());
    assert_eq!(f.transport.sent_count(), 0);

    // The change stays pending and goes out with the next submission
    f.transport.set_fail_tx(false);
    f.server.set_availability(8, false).unwrap();
    assert_eq!(changed_indices(&f.drain(PEER)), vec![5, 8]);
}

#[test]
fn test_names_truncated_to_mtu() {
    let f = setup();
    f.connect_synced(PEER);

    f.transport.set_mtu(23);
    f.server.set_name(5, &"x".repeat(40)).unwrap();
    f.server.run_due_work(later());

    let sent = f.transport.take_sent(PEER);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.len(), 20);
}

#[test]
fn test_disconnect_cancels_work_and_frees_slot() {
    let f = setup_with(HasServerConfig {
        max_peers: 1,
        ..Default::default()
    });
    f.connect(PEER);
    assert!(f.server.next_work_deadline().is_some());

    f.transport.drop_link(PEER);
    f.server.disconnected(PEER);
    assert!(f.server.next_work_deadline().is_none());
    f.server.run_due_work(later());
    assert_eq!(f.transport.sent_count(), 0);

    // The single slot can be used again
    f.connect(OTHER);
    assert_eq!(f.drain(OTHER).len(), 4);
}

#[test]
fn test_read_dropped_when_link_is_gone() {
    let f = setup();
    f.connect_synced(PEER);

    assert_eq!(f.write(PEER, &[0x01, 1, 0]), Ok(3));
    f.transport.drop_link(PEER);
    f.server.run_due_work(later());
    assert_eq!(f.transport.sent_count(), 0);

    // The cursor was released
    f.transport.connect(PEER, true);
    assert_eq!(f.write(PEER, &[0x01, 1, 0]), Ok(3));
}

#[test]
fn test_peers_are_independent() {
    let f = setup();
    f.connect_synced(PEER);
    f.connect_synced(OTHER);

    f.server.set_availability(5, false).unwrap();
    f.server.run_due_work(later());
    assert_eq!(f.transport.take_sent(PEER).len(), 1);
    assert_eq!(f.transport.take_sent(OTHER).len(), 1);

    // Only PEER confirms, OTHER stays busy
    f.server.control_point_tx_done(PEER);
    f.server.set_availability(8, false).unwrap();
    assert_eq!(changed_indices(&f.drain(PEER)), vec![8]);
    assert!(f.transport.take_sent(OTHER).is_empty());

    f.server.control_point_tx_done(OTHER);
    assert_eq!(changed_indices(&f.drain(OTHER)), vec![8]);
}

#[test]
fn test_work_queue_thread() {
    let transport = Arc::new(MockServerTransport::new());
    let server = Arc::new(HasServer::new(transport.clone(), HasServerConfig::default()));
    server
        .register(presets(), Arc::new(TestOps::new()))
        .unwrap();

    let mut queue = server.start_work_queue().unwrap();

    transport.connect(PEER, false);
    server
        .control_point_ccc_write(PEER, crate::att::CCC_VALUE_INDICATE)
        .unwrap();
    server.set_availability(5, false).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while transport.sent_count() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    queue.stop();

    assert_eq!(transport.take_sent(PEER).len(), 1);
}
