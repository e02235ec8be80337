//! In-memory transport and scripted firmware engine shared by the
//! integration tests.  No Bluetooth hardware is touched.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use metawear_rs::engine::{
    BoardId, BtleConnection, DataHandler, DataSignal, FirmwareEngine, InitCompleteFn, Module,
    ModuleCommand,
};
use metawear_rs::error::{MetaWearError, Result};
use metawear_rs::metawear_client::{MetaWearClient, MetaWearClientConfig};
use metawear_rs::parse::encode_tagged;
use metawear_rs::protocol::{
    COMMAND_CHARACTERISTIC, DEVICE_INFO_SERVICE_UUID, FIRMWARE_REVISION_CHARACTERISTIC,
    MANUFACTURER_NAME_CHARACTERISTIC, METAWEAR_SERVICE_UUID, MODEL_NUMBER_CHARACTERISTIC,
    NOTIFY_CHARACTERISTIC,
};
use metawear_rs::transport::{NotificationFraming, NotificationSink, TransportAdapter};
use metawear_rs::types::{CharacteristicHandle, GattCharacteristic, TaggedValue};

pub const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

pub const COMMAND_VALUE: u16 = 0x000e;
pub const NOTIFY_VALUE: u16 = 0x0011;
pub const NOTIFY_CCCD: u16 = 0x0012;
pub const MANUFACTURER_VALUE: u16 = 0x0017;
pub const MODEL_VALUE: u16 = 0x0019;
pub const FIRMWARE_VALUE: u16 = 0x001b;

/// Bytes the scripted engine writes to the command characteristic while
/// initializing.
pub const INIT_COMMAND: [u8; 2] = [0x01, 0x80];

pub const FIRMWARE_REVISION: &str = "1.5.0";

// ── FakeTransport ────────────────────────────────────────────────────────────

pub struct FakeTransport {
    layout: BTreeMap<Uuid, CharacteristicHandle>,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    framing: NotificationFraming,
    fail_connect: bool,
    fail_gatt_io: bool,
    sink: RwLock<Option<NotificationSink>>,
    writes: Mutex<Vec<(u16, Vec<u8>)>>,
    reads: Mutex<Vec<Uuid>>,
    connected: AtomicBool,
    disconnects: AtomicUsize,
}

impl FakeTransport {
    /// A MetaWear board: command and notify characteristics plus part of the
    /// Device Information service (no serial or hardware revision).
    pub fn metawear() -> Self {
        let layout = BTreeMap::from([
            (COMMAND_CHARACTERISTIC, CharacteristicHandle::from_value_handle(COMMAND_VALUE)),
            (NOTIFY_CHARACTERISTIC, CharacteristicHandle::from_value_handle(NOTIFY_VALUE)),
            (
                MANUFACTURER_NAME_CHARACTERISTIC,
                CharacteristicHandle::from_value_handle(MANUFACTURER_VALUE),
            ),
            (MODEL_NUMBER_CHARACTERISTIC, CharacteristicHandle::from_value_handle(MODEL_VALUE)),
            (
                FIRMWARE_REVISION_CHARACTERISTIC,
                CharacteristicHandle::from_value_handle(FIRMWARE_VALUE),
            ),
        ]);
        let values = HashMap::from([
            (MANUFACTURER_NAME_CHARACTERISTIC, b"MbientLab Inc".to_vec()),
            (MODEL_NUMBER_CHARACTERISTIC, b"5\0".to_vec()),
            (FIRMWARE_REVISION_CHARACTERISTIC, FIRMWARE_REVISION.as_bytes().to_vec()),
        ]);
        Self {
            layout,
            values: Mutex::new(values),
            framing: NotificationFraming::Raw,
            fail_connect: false,
            fail_gatt_io: false,
            sink: RwLock::new(None),
            writes: Mutex::new(Vec::new()),
            reads: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn with_framing(mut self, framing: NotificationFraming) -> Self {
        self.framing = framing;
        self
    }

    pub fn without(mut self, uuid: Uuid) -> Self {
        self.layout.remove(&uuid);
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Every read and every write except the control CCCD fails, as on a
    /// link that dropped right after connecting.
    pub fn failing_gatt_io(mut self) -> Self {
        self.fail_gatt_io = true;
        self
    }

    /// Deliver a notification the way a backend's event task would.
    /// Returns `false` when no sink is registered.
    pub fn emit(&self, handle: u16, payload: &[u8]) -> bool {
        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => {
                sink(handle, payload);
                true
            }
            None => false,
        }
    }

    pub fn writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.writes.lock().clone()
    }

    pub fn reads(&self) -> Vec<Uuid> {
        self.reads.lock().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportAdapter for FakeTransport {
    async fn connect(&self, address: &str, timeout: Duration) -> Result<()> {
        if self.fail_connect {
            return Err(MetaWearError::ConnectionTimeout {
                address: address.to_owned(),
                timeout,
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn discover_characteristics(&self) -> Result<BTreeMap<Uuid, CharacteristicHandle>> {
        Ok(self.layout.clone())
    }

    async fn read_by_uuid(&self, uuid: Uuid) -> Result<Vec<u8>> {
        self.reads.lock().push(uuid);
        if self.fail_gatt_io {
            return Err(MetaWearError::Transport(format!("read of {uuid} failed")));
        }
        self.values
            .lock()
            .get(&uuid)
            .cloned()
            .ok_or(MetaWearError::UnknownCharacteristic(uuid))
    }

    async fn write_by_handle(&self, handle: u16, payload: &[u8]) -> Result<()> {
        self.writes.lock().push((handle, payload.to_vec()));
        if self.fail_gatt_io && handle != NOTIFY_CCCD {
            return Err(MetaWearError::Transport(format!("write to 0x{handle:04x} failed")));
        }
        Ok(())
    }

    fn set_notification_sink(&self, sink: NotificationSink) {
        *self.sink.write() = Some(sink);
    }

    fn framing(&self) -> NotificationFraming {
        self.framing
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        *self.sink.write() = None;
        Ok(())
    }
}

// ── FakeEngine ───────────────────────────────────────────────────────────────

pub enum InitMode {
    /// Fire the completion callback inside `initialize`.
    Immediate,
    /// Fire it from another thread after the delay.
    Delayed(Duration),
    /// Hold on to it and never fire.
    Never,
}

/// Scripted stand-in for the vendor engine.
///
/// Control notifications are framed as `[signal id, tag, value…]`: the first
/// byte picks the subscribed handler, the rest is handed over as a tagged
/// value.
pub struct FakeEngine {
    mode: InitMode,
    unavailable: Vec<Module>,
    connection: Mutex<Option<BtleConnection>>,
    pending_init: Mutex<Option<InitCompleteFn>>,
    initialized: Arc<AtomicBool>,
    handlers: Mutex<HashMap<u64, DataHandler>>,
    changed: Mutex<Vec<Vec<u8>>>,
    char_reads: Mutex<Vec<(Uuid, Vec<u8>)>>,
    commands: Mutex<Vec<ModuleCommand>>,
    created: AtomicUsize,
    destroyed: AtomicUsize,
    calls_after_destroy: AtomicUsize,
}

pub const BOARD: BoardId = BoardId::new(7);

pub fn signal_id(module: Module) -> u8 {
    match module {
        Module::Switch => 1,
        Module::Battery => 2,
        Module::Led => 3,
        Module::Haptic => 4,
        Module::Accelerometer => 5,
        Module::Gyroscope => 6,
    }
}

impl FakeEngine {
    pub fn new(mode: InitMode) -> Self {
        Self {
            mode,
            unavailable: vec![Module::Led, Module::Haptic],
            connection: Mutex::new(None),
            pending_init: Mutex::new(None),
            initialized: Arc::new(AtomicBool::new(false)),
            handlers: Mutex::new(HashMap::new()),
            changed: Mutex::new(Vec::new()),
            char_reads: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            calls_after_destroy: AtomicUsize::new(0),
        }
    }

    pub fn without_module(mut self, module: Module) -> Self {
        self.unavailable.push(module);
        self
    }

    pub fn changed(&self) -> Vec<Vec<u8>> {
        self.changed.lock().clone()
    }

    pub fn char_reads(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.char_reads.lock().clone()
    }

    pub fn commands(&self) -> Vec<ModuleCommand> {
        self.commands.lock().clone()
    }

    pub fn has_handler(&self, module: Module) -> bool {
        self.handlers.lock().contains_key(&u64::from(signal_id(module)))
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed_count(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Board calls that arrived after `destroy`.
    pub fn calls_after_destroy(&self) -> usize {
        self.calls_after_destroy.load(Ordering::SeqCst)
    }

    fn track_destroyed(&self) {
        if self.destroyed_count() > 0 {
            self.calls_after_destroy.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl FirmwareEngine for FakeEngine {
    fn create(&self, connection: BtleConnection) -> Result<BoardId> {
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.connection.lock() = Some(connection);
        Ok(BOARD)
    }

    fn initialize(&self, _board: BoardId, on_initialized: InitCompleteFn) {
        let connection = self.connection.lock().clone();
        if let Some(connection) = connection {
            (connection.write_gatt_char)(
                &GattCharacteristic::new(METAWEAR_SERVICE_UUID, COMMAND_CHARACTERISTIC),
                &INIT_COMMAND,
            );
            (connection.read_gatt_char)(&GattCharacteristic::new(
                DEVICE_INFO_SERVICE_UUID,
                FIRMWARE_REVISION_CHARACTERISTIC,
            ));
        }

        match &self.mode {
            InitMode::Immediate => {
                self.initialized.store(true, Ordering::SeqCst);
                on_initialized();
            }
            InitMode::Delayed(delay) => {
                let delay = *delay;
                let flag = Arc::clone(&self.initialized);
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    flag.store(true, Ordering::SeqCst);
                    on_initialized();
                });
            }
            InitMode::Never => *self.pending_init.lock() = Some(on_initialized),
        }
    }

    fn is_initialized(&self, _board: BoardId) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn data_signal(&self, _board: BoardId, module: Module) -> Option<DataSignal> {
        if self.unavailable.contains(&module) {
            None
        } else {
            Some(DataSignal::new(u64::from(signal_id(module))))
        }
    }

    fn subscribe(&self, signal: DataSignal, handler: DataHandler) {
        self.handlers.lock().insert(signal.raw(), handler);
    }

    fn unsubscribe(&self, signal: DataSignal) {
        self.handlers.lock().remove(&signal.raw());
    }

    fn execute(&self, _board: BoardId, command: ModuleCommand) -> Result<()> {
        self.track_destroyed();
        self.commands.lock().push(command);
        Ok(())
    }

    fn notify_char_changed(&self, _board: BoardId, value: &[u8]) {
        self.track_destroyed();
        self.changed.lock().push(value.to_vec());
        let Some((&signal, tagged)) = value.split_first() else {
            return;
        };
        let handler = self.handlers.lock().get(&u64::from(signal)).cloned();
        if let Some(handler) = handler {
            handler(tagged);
        }
    }

    fn char_read(&self, _board: BoardId, characteristic: &GattCharacteristic, value: &[u8]) {
        self.track_destroyed();
        self.char_reads
            .lock()
            .push((characteristic.uuid, value.to_vec()));
    }

    fn destroy(&self, _board: BoardId) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

pub fn test_config() -> MetaWearClientConfig {
    MetaWearClientConfig {
        init_timeout: Some(Duration::from_secs(2)),
        ..MetaWearClientConfig::default()
    }
}

pub async fn connect(
    transport: &Arc<FakeTransport>,
    engine: &Arc<FakeEngine>,
    config: MetaWearClientConfig,
) -> Result<MetaWearClient> {
    let transport: Arc<dyn TransportAdapter> = Arc::clone(transport) as Arc<dyn TransportAdapter>;
    let engine: Arc<dyn FirmwareEngine> = Arc::clone(engine) as Arc<dyn FirmwareEngine>;
    MetaWearClient::connect_with(ADDRESS, transport, engine, config).await
}

/// A control-channel notification carrying `value` for `module`'s signal.
pub fn control_frame(module: Module, value: &TaggedValue) -> Vec<u8> {
    let mut frame = vec![signal_id(module)];
    frame.extend(encode_tagged(value).expect("encodable test value"));
    frame
}

/// Poll `condition` for up to a second.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
