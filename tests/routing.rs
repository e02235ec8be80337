mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use common::{
    connect, control_frame, signal_id, test_config, FakeEngine, FakeTransport, InitMode,
    FIRMWARE_VALUE, NOTIFY_VALUE,
};
use metawear_rs::engine::Module;
use metawear_rs::error::MetaWearError;
use metawear_rs::metawear_client::{MetaWearClient, MetaWearClientConfig};
use metawear_rs::protocol::{ENABLE_NOTIFICATION, FIRMWARE_REVISION_CHARACTERISTIC};
use metawear_rs::transport::NotificationFraming;
use metawear_rs::types::{BatteryState, CartesianFloat, TaggedValue};

async fn ready(framing: NotificationFraming) -> (Arc<FakeTransport>, Arc<FakeEngine>, MetaWearClient) {
    let transport = Arc::new(FakeTransport::metawear().with_framing(framing));
    let engine = Arc::new(FakeEngine::new(InitMode::Immediate));
    let client = connect(&transport, &engine, test_config()).await.unwrap();
    (transport, engine, client)
}

fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |value: T| sink.lock().push(value))
}

#[tokio::test]
async fn switch_values_reach_the_subscribed_handler() {
    let (transport, _engine, client) = ready(NotificationFraming::Raw).await;
    let (seen, handler) = recorder::<u32>();
    client.switch().subscribe(handler).unwrap();

    transport.emit(NOTIFY_VALUE, &control_frame(Module::Switch, &TaggedValue::UInt32(1)));
    transport.emit(NOTIFY_VALUE, &control_frame(Module::Switch, &TaggedValue::UInt32(0)));

    assert_eq!(*seen.lock(), vec![1, 0]);
}

#[tokio::test]
async fn second_handler_replaces_the_first() {
    let (transport, _engine, client) = ready(NotificationFraming::Raw).await;
    let (first, first_handler) = recorder::<u32>();
    let (second, second_handler) = recorder::<u32>();

    client.switch().subscribe(first_handler).unwrap();
    client.switch().subscribe(second_handler).unwrap();
    transport.emit(NOTIFY_VALUE, &control_frame(Module::Switch, &TaggedValue::UInt32(1)));

    assert!(first.lock().is_empty());
    assert_eq!(*second.lock(), vec![1]);
}

#[tokio::test]
async fn unsubscribe_stops_delivery_and_releases_the_engine_handler() {
    let (transport, engine, client) = ready(NotificationFraming::Raw).await;
    let (seen, handler) = recorder::<u32>();

    client.switch().subscribe(handler).unwrap();
    assert!(client.switch().is_subscribed());
    assert!(engine.has_handler(Module::Switch));
    client.switch().notifications(None).unwrap();
    assert!(!client.switch().is_subscribed());
    assert!(!engine.has_handler(Module::Switch));

    transport.emit(NOTIFY_VALUE, &control_frame(Module::Switch, &TaggedValue::UInt32(1)));
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn battery_and_motion_values_are_unwrapped() {
    let (transport, _engine, client) = ready(NotificationFraming::Raw).await;
    let (battery, battery_handler) = recorder::<BatteryState>();
    let (accel, accel_handler) = recorder::<CartesianFloat>();
    client.battery().subscribe(battery_handler).unwrap();
    client.accelerometer().subscribe(accel_handler).unwrap();

    let state = BatteryState {
        voltage: 42,
        charge: 99,
    };
    let xyz = CartesianFloat {
        x: 0.5,
        y: -1.0,
        z: 9.81,
    };
    transport.emit(NOTIFY_VALUE, &control_frame(Module::Battery, &TaggedValue::BatteryState(state)));
    transport.emit(
        NOTIFY_VALUE,
        &control_frame(Module::Accelerometer, &TaggedValue::CartesianFloat(xyz)),
    );

    assert_eq!(*battery.lock(), vec![state]);
    assert_eq!(*accel.lock(), vec![xyz]);
}

#[tokio::test]
async fn decode_failure_drops_one_value_and_routing_continues() {
    let (transport, _engine, client) = ready(NotificationFraming::Raw).await;
    let (seen, handler) = recorder::<u32>();
    client.switch().subscribe(handler).unwrap();

    transport.emit(NOTIFY_VALUE, &[signal_id(Module::Switch), 0xff, 1, 0, 0, 0]);
    transport.emit(NOTIFY_VALUE, &[signal_id(Module::Switch), 0x00, 1]);
    transport.emit(NOTIFY_VALUE, &control_frame(Module::Switch, &TaggedValue::UInt32(1)));

    assert_eq!(*seen.lock(), vec![1]);
}

#[tokio::test]
async fn value_of_the_wrong_type_is_dropped() {
    let (transport, _engine, client) = ready(NotificationFraming::Raw).await;
    let (seen, handler) = recorder::<BatteryState>();
    client.battery().subscribe(handler).unwrap();

    transport.emit(NOTIFY_VALUE, &control_frame(Module::Battery, &TaggedValue::UInt32(7)));
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn prefixed_framing_strips_three_bytes_from_long_payloads() {
    let (transport, engine, _client) = ready(NotificationFraming::PrefixedHeader).await;

    transport.emit(NOTIFY_VALUE, &[0x1b, 0x11, 0x00, 0x0a, 0x0b, 0x0c, 0x0d]);
    transport.emit(NOTIFY_VALUE, &[0x0a, 0x0b, 0x0c, 0x0d]);

    assert_eq!(
        engine.changed(),
        vec![vec![0x0a, 0x0b, 0x0c, 0x0d], vec![0x0a, 0x0b, 0x0c, 0x0d]]
    );
}

#[tokio::test]
async fn configured_framing_overrides_the_backend() {
    let transport = Arc::new(FakeTransport::metawear());
    let engine = Arc::new(FakeEngine::new(InitMode::Immediate));
    let config = MetaWearClientConfig {
        framing: Some(NotificationFraming::PrefixedHeader),
        ..test_config()
    };
    let _client = connect(&transport, &engine, config).await.unwrap();

    transport.emit(NOTIFY_VALUE, &[0x1b, 0x11, 0x00, 0x01, 0x02]);
    assert_eq!(engine.changed(), vec![vec![0x01, 0x02]]);
}

#[tokio::test]
async fn unregistered_handle_is_dropped_silently() {
    let (transport, engine, client) = ready(NotificationFraming::Raw).await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    client
        .add_raw_listener(0x0030, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert!(transport.emit(0x0040, &[0x01, 0x02, 0x03]));

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(engine.changed().is_empty());
}

#[tokio::test]
async fn raw_listeners_see_their_handle_until_removed() {
    let (transport, engine, client) = ready(NotificationFraming::Raw).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = client
        .add_raw_listener(0x0030, move |handle, payload| {
            sink.lock().push((handle, payload.to_vec()));
        })
        .unwrap();

    transport.emit(0x0030, &[0xde, 0xad, 0xbe, 0xef, 0x00]);
    assert!(client.remove_raw_listener(id));
    transport.emit(0x0030, &[0x01]);

    assert_eq!(*seen.lock(), vec![(0x0030, vec![0xde, 0xad, 0xbe, 0xef, 0x00])]);
    assert!(engine.changed().is_empty());
    assert_eq!(client.clear_raw_listeners(0x0030), 0);
}

#[tokio::test]
async fn subscribe_characteristic_enables_its_cccd() {
    let (transport, _engine, client) = ready(NotificationFraming::Raw).await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    client
        .subscribe_characteristic(FIRMWARE_REVISION_CHARACTERISTIC, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

    assert!(transport
        .writes()
        .contains(&(FIRMWARE_VALUE + 1, ENABLE_NOTIFICATION.to_vec())));
    transport.emit(FIRMWARE_VALUE, b"1.5.1");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_module_signal_is_reported() {
    let transport = Arc::new(FakeTransport::metawear());
    let engine = Arc::new(FakeEngine::new(InitMode::Immediate).without_module(Module::Gyroscope));
    let client = connect(&transport, &engine, test_config()).await.unwrap();

    let err = client.gyroscope().subscribe(|_| {}).unwrap_err();
    assert!(matches!(err, MetaWearError::ModuleUnavailable(Module::Gyroscope)));
    assert!(client.accelerometer().data_signal().is_ok());
}
