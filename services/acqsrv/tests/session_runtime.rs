//! End-to-end session runtime tests over the virtual driver
//!
//! Each test builds a full stack - registry, mapping store, resolver,
//! session manager - and drives it through the public API only.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::timeout;

use acqsrv::config::{DeviceDirectory, DeviceProfile, LimitsConfig, ReconnectConfig};
use acqsrv::drivers::virt::VirtualFactory;
use acqsrv::logging::DriverLogType;
use acqsrv::mapping::{MappingResolver, MappingStore};
use acqsrv::registry::DriverRegistry;
use acqsrv::runtime::{SessionManager, SessionStatus};
use acqsrv::AcqSrvError;
use fieldgate_codec::{DataPoint, DataType, EngValue, FunctionCode, RegisterMapping};

const DEVICE: &str = "dev-1";

struct Harness {
    manager: SessionManager,
    factory: Arc<VirtualFactory>,
    store: Arc<MappingStore>,
    events: mpsc::Receiver<DataPoint>,
}

fn profile(device_id: &str, driver_type: &str) -> DeviceProfile {
    DeviceProfile {
        device_id: device_id.to_string(),
        device_key: format!("{}-key", device_id),
        product_id: "product-1".to_string(),
        driver_type: driver_type.to_string(),
        host: None,
        port: None,
        unit_id: 1,
        poll_interval_ms: 50,
        timeout_ms: 500,
        enabled: true,
    }
}

fn harness_with(profiles: Vec<DeviceProfile>, limits: LimitsConfig) -> Harness {
    let registry = Arc::new(DriverRegistry::new());
    let factory = Arc::new(VirtualFactory::new());
    registry
        .register(factory.clone())
        .expect("virtual factory registers");

    let store = Arc::new(MappingStore::new());
    let directory = Arc::new(DeviceDirectory::from_profiles(profiles));
    let resolver = Arc::new(MappingResolver::new(store.clone(), directory.clone()));

    let (events_tx, events_rx) = mpsc::channel(256);
    let manager = SessionManager::new(
        registry,
        resolver,
        directory,
        limits,
        ReconnectConfig {
            max_attempts: 1,
            initial_delay_ms: 10,
            max_delay_ms: 100,
            backoff_multiplier: 2.0,
        },
        events_tx,
    );

    Harness {
        manager,
        factory,
        store,
        events: events_rx,
    }
}

fn harness() -> Harness {
    harness_with(vec![profile(DEVICE, "virtual")], LimitsConfig::default())
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

async fn recv_point(events: &mut mpsc::Receiver<DataPoint>) -> DataPoint {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("data point within deadline")
        .expect("event channel open")
}

/// Poll the manager until a session reports the wanted status
async fn wait_for_status(manager: &SessionManager, device_id: &str, wanted: SessionStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if let Ok(state) = manager.status(device_id).await {
            if state.status == wanted {
                return;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("session never reached {:?}", wanted);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn emits_points_in_resolved_order_with_decoded_values() {
    let mut h = harness();

    h.store
        .set_product_mappings(
            "product-1",
            vec![
                RegisterMapping::new("temperature", 0, FunctionCode::Read03, DataType::Int)
                    .with_scaling(dec("0.1"), dec("-40"))
                    .with_sort_code(10),
                RegisterMapping::new("valve_state", 1, FunctionCode::Read03, DataType::Bool)
                    .with_bit_index(3)
                    .with_sort_code(20),
                RegisterMapping::new("flow", 2, FunctionCode::Read03, DataType::Float)
                    .with_sort_code(30),
            ],
        )
        .unwrap();

    // raw 650 -> 25.0; bit 3 set; 0x41C80000 -> 25.0f32
    h.factory
        .bank(DEVICE)
        .set_registers(0, &[650, 0b0000_1000, 0x41C8, 0x0000]);

    h.manager.start_session(DEVICE).await.unwrap();
    wait_for_status(&h.manager, DEVICE, SessionStatus::Running).await;

    let first = recv_point(&mut h.events).await;
    let second = recv_point(&mut h.events).await;
    let third = recv_point(&mut h.events).await;

    assert_eq!(first.identifier, "temperature");
    assert_eq!(first.value, EngValue::Decimal(dec("25.0")));
    assert_eq!(first.device_id, DEVICE);
    assert_eq!(first.register_address, 0);
    assert_eq!(first.function_code, FunctionCode::Read03);

    assert_eq!(second.identifier, "valve_state");
    assert_eq!(second.value, EngValue::Bool(true));

    assert_eq!(third.identifier, "flow");
    assert_eq!(third.value, EngValue::Decimal(dec("25")));

    h.manager.stop_session(DEVICE).await.unwrap();
}

#[tokio::test]
async fn decode_failure_on_one_mapping_does_not_abort_the_cycle() {
    let mut h = harness();

    h.store
        .set_product_mappings(
            "product-1",
            vec![
                RegisterMapping::new("temp", 0, FunctionCode::Read03, DataType::Int)
                    .with_sort_code(10),
                RegisterMapping::new("pressure", 1, FunctionCode::Read03, DataType::Int)
                    .with_sort_code(20),
                RegisterMapping::new("nan_flow", 2, FunctionCode::Read03, DataType::Float)
                    .with_sort_code(30),
                RegisterMapping::new("valve", 4, FunctionCode::Read03, DataType::Bool)
                    .with_bit_index(0)
                    .with_sort_code(40),
                RegisterMapping::new("flow", 5, FunctionCode::Read03, DataType::Float)
                    .with_sort_code(50),
            ],
        )
        .unwrap();

    // Registers 2..3 hold an IEEE NaN so exactly one mapping fails to decode
    h.factory
        .bank(DEVICE)
        .set_registers(0, &[100, 200, 0x7FC0, 0x0000, 1, 0x41C8, 0x0000]);

    h.manager.start_session(DEVICE).await.unwrap();

    // One full cycle emits the other four identifiers, in resolved order
    let identifiers: Vec<String> = [
        recv_point(&mut h.events).await,
        recv_point(&mut h.events).await,
        recv_point(&mut h.events).await,
        recv_point(&mut h.events).await,
    ]
    .iter()
    .map(|p| p.identifier.clone())
    .collect();
    assert_eq!(identifiers, vec!["temp", "pressure", "valve", "flow"]);

    // The failure left a retrievable trace; every decode entry names the
    // one broken identifier (later cycles may have recorded more of them)
    let entries = h.manager.log_ring().for_device("dev-1-key");
    let decode_errors: Vec<_> = entries
        .iter()
        .filter(|e| e.log_type == DriverLogType::Decode)
        .collect();
    assert!(!decode_errors.is_empty());
    assert!(decode_errors
        .iter()
        .all(|e| e.log_content.contains("nan_flow") && e.error_msg.is_some()));

    // Below the threshold the session stays RUNNING
    assert_eq!(
        h.manager.status(DEVICE).await.unwrap().status,
        SessionStatus::Running
    );

    h.manager.stop_session(DEVICE).await.unwrap();
}

#[tokio::test]
async fn decode_error_threshold_trips_error_and_clean_cycle_recovers() {
    let mut h = harness_with(
        vec![profile(DEVICE, "virtual")],
        LimitsConfig {
            decode_error_threshold: 1,
            ..Default::default()
        },
    );

    h.store
        .set_product_mappings(
            "product-1",
            vec![RegisterMapping::new(
                "flow",
                0,
                FunctionCode::Read03,
                DataType::Float,
            )],
        )
        .unwrap();

    // NaN payload trips the threshold on the first cycle
    h.factory.bank(DEVICE).set_registers(0, &[0x7FC0, 0x0000]);

    h.manager.start_session(DEVICE).await.unwrap();
    wait_for_status(&h.manager, DEVICE, SessionStatus::Error).await;
    let state = h.manager.status(DEVICE).await.unwrap();
    assert!(state.last_error.is_some());

    // Fixing the raw data recovers the session on the next clean cycle
    h.factory.bank(DEVICE).set_registers(0, &[0x41C8, 0x0000]);
    wait_for_status(&h.manager, DEVICE, SessionStatus::Running).await;

    let point = recv_point(&mut h.events).await;
    assert_eq!(point.identifier, "flow");

    h.manager.stop_session(DEVICE).await.unwrap();
}

#[tokio::test]
async fn stop_finishes_cycle_and_emits_nothing_after_stopped() {
    let mut h = harness();

    h.store
        .set_product_mappings(
            "product-1",
            vec![RegisterMapping::new(
                "temp",
                0,
                FunctionCode::Read03,
                DataType::Int,
            )],
        )
        .unwrap();
    h.factory.bank(DEVICE).set_register(0, 650);

    h.manager.start_session(DEVICE).await.unwrap();
    let _ = recv_point(&mut h.events).await;

    let state = h.manager.stop_session(DEVICE).await.unwrap();
    assert_eq!(state.status, SessionStatus::Stopped);

    // Drain whatever the final cycles emitted before the stop completed
    while h.events.try_recv().is_ok() {}

    // Several poll intervals later, nothing further arrives
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.events.try_recv().is_err());

    // The session is gone from the table
    assert!(h.manager.status(DEVICE).await.is_err());
}

#[tokio::test]
async fn unknown_driver_type_aborts_session_creation() {
    let h = harness_with(
        vec![profile(DEVICE, "opc_ua")],
        LimitsConfig::default(),
    );

    let err = h.manager.start_session(DEVICE).await.unwrap_err();
    assert!(matches!(err, AcqSrvError::RegistryError(_)));
    assert!(err.to_string().contains("opc_ua"));

    // No partial session is left behind
    assert!(h.manager.status(DEVICE).await.is_err());
}

#[tokio::test]
async fn write_property_encodes_and_reaches_the_device() {
    let h = harness();

    h.store
        .set_product_mappings(
            "product-1",
            vec![
                RegisterMapping::new("temperature", 0, FunctionCode::Read03, DataType::Int)
                    .with_scaling(dec("0.1"), dec("-40")),
                RegisterMapping::new("setpoint", 10, FunctionCode::Write06, DataType::Int)
                    .with_scaling(dec("0.1"), dec("-40")),
            ],
        )
        .unwrap();

    h.manager.start_session(DEVICE).await.unwrap();
    wait_for_status(&h.manager, DEVICE, SessionStatus::Running).await;

    // 25.0 degrees de-scales to raw 650
    h.manager
        .write_property(DEVICE, "setpoint", EngValue::Decimal(dec("25.0")))
        .await
        .unwrap();
    assert_eq!(h.factory.bank(DEVICE).register(10), 650);

    // Writing through a read-only identifier is rejected
    let err = h
        .manager
        .write_property(DEVICE, "temperature", EngValue::Decimal(dec("25.0")))
        .await
        .unwrap_err();
    assert!(matches!(err, AcqSrvError::MappingError(_)));

    h.manager.stop_session(DEVICE).await.unwrap();
}

#[tokio::test]
async fn refreshed_mappings_apply_from_the_next_cycle() {
    let mut h = harness();

    h.store
        .set_product_mappings(
            "product-1",
            vec![RegisterMapping::new(
                "temp",
                0,
                FunctionCode::Read03,
                DataType::Int,
            )],
        )
        .unwrap();
    h.factory.bank(DEVICE).set_register(0, 1);
    h.factory.bank(DEVICE).set_register(100, 2);

    h.manager.start_session(DEVICE).await.unwrap();
    let point = recv_point(&mut h.events).await;
    assert_eq!(point.register_address, 0);
    assert_eq!(point.value, EngValue::Int(1));

    // A device-level override shadows the product set once refreshed
    h.store
        .batch_save_device(
            DEVICE,
            vec![RegisterMapping::new(
                "temp",
                100,
                FunctionCode::Read03,
                DataType::Int,
            )],
        )
        .unwrap();
    h.manager.refresh_mappings(DEVICE).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let point = recv_point(&mut h.events).await;
        if point.register_address == 100 {
            assert_eq!(point.value, EngValue::Int(2));
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("override mapping never took effect");
        }
    }

    h.manager.stop_session(DEVICE).await.unwrap();
}

#[tokio::test]
async fn restart_builds_a_fresh_session() {
    let mut h = harness();

    h.store
        .set_product_mappings(
            "product-1",
            vec![RegisterMapping::new(
                "temp",
                0,
                FunctionCode::Read03,
                DataType::Int,
            )],
        )
        .unwrap();

    h.manager.start_session(DEVICE).await.unwrap();
    assert!(matches!(
        h.manager.start_session(DEVICE).await,
        Err(AcqSrvError::SessionError(_))
    ));

    h.manager.stop_session(DEVICE).await.unwrap();

    // A stopped session can be started again as a new object
    h.manager.start_session(DEVICE).await.unwrap();
    wait_for_status(&h.manager, DEVICE, SessionStatus::Running).await;
    let _ = recv_point(&mut h.events).await;

    h.manager.shutdown_all().await;
    assert!(h.manager.statuses().await.is_empty());
}
