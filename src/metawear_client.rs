use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use crate::engine::{BoardHandle, BoardId, BtleConnection, FirmwareEngine};
use crate::error::{MetaWearError, Result};
use crate::handle_cache::HandleCache;
use crate::modules::{
    AccelerometerModule, BatteryModule, GyroscopeModule, HapticModule, LedModule, SwitchModule,
};
use crate::protocol::{
    hex_bytes, DEFAULT_CONNECT_TIMEOUT, DEFAULT_INIT_TIMEOUT, ENABLE_NOTIFICATION,
    FIRMWARE_REVISION_CHARACTERISTIC, HARDWARE_REVISION_CHARACTERISTIC, INIT_POLL_INTERVAL,
    MANUFACTURER_NAME_CHARACTERISTIC, MODEL_NUMBER_CHARACTERISTIC, NOTIFY_CHARACTERISTIC,
    SERIAL_NUMBER_CHARACTERISTIC,
};
use crate::router::{NotificationRouter, RawCallback, SubscriptionId, SubscriptionRegistry};
use crate::transport::{self, Backend, NotificationFraming, TransportAdapter};
use crate::types::{BridgeState, DeviceInformation, GattCharacteristic};

// ── MetaWearClientConfig ─────────────────────────────────────────────────────

/// Configuration for [`MetaWearClient`].
#[derive(Debug, Clone)]
pub struct MetaWearClientConfig {
    /// BLE library that carries the connection.  Default: btleplug.
    pub backend: Backend,
    /// Deadline for the link to come up.  Default: 5 s.
    pub connect_timeout: Duration,
    /// Deadline for the firmware engine's initialization handshake.
    ///
    /// `None` waits forever.  Default: 20 s.
    pub init_timeout: Option<Duration>,
    /// Override the backend's notification framing.  Default: `None`, use
    /// whatever the backend reports.
    pub framing: Option<NotificationFraming>,
}

impl Default for MetaWearClientConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            init_timeout: Some(DEFAULT_INIT_TIMEOUT),
            framing: None,
        }
    }
}

// ── GATT worker ──────────────────────────────────────────────────────────────

/// Work the engine's callbacks hand to the worker task, in issue order.
enum GattOp {
    Write { handle: u16, payload: Vec<u8> },
    Read { characteristic: GattCharacteristic },
}

/// Build the callback table given to the engine.  Both callbacks resolve the
/// characteristic through the handle cache and queue the I/O; neither blocks.
fn engine_connection(handles: Arc<HandleCache>, ops: mpsc::UnboundedSender<GattOp>) -> BtleConnection {
    let write_handles = Arc::clone(&handles);
    let write_ops = ops.clone();
    let write_gatt_char = Arc::new(move |c: &GattCharacteristic, payload: &[u8]| {
        match write_handles.lookup(c.uuid, false) {
            Ok(handle) => {
                let op = GattOp::Write {
                    handle,
                    payload: payload.to_vec(),
                };
                if write_ops.send(op).is_err() {
                    debug!("GATT worker gone, dropping write to {}", c.uuid);
                }
            }
            Err(e) => warn!("engine write: {e}"),
        }
    });

    let read_gatt_char = Arc::new(move |c: &GattCharacteristic| {
        if let Err(e) = handles.lookup(c.uuid, false) {
            warn!("engine read: {e}");
            return;
        }
        if ops.send(GattOp::Read { characteristic: *c }).is_err() {
            debug!("GATT worker gone, dropping read of {}", c.uuid);
        }
    });

    BtleConnection {
        write_gatt_char,
        read_gatt_char,
    }
}

/// Where the worker reports a transport failure while the handshake is
/// pending.  Emptied once the board is ready.
type InitFailure = Arc<Mutex<Option<oneshot::Sender<MetaWearError>>>>;

/// Drain engine-issued GATT operations one at a time.
///
/// During initialization the first failure aborts the handshake through
/// `init_failure`.  Afterwards failures are logged; the engine has no error
/// path for them.
async fn gatt_worker(
    mut ops: mpsc::UnboundedReceiver<GattOp>,
    transport: Arc<dyn TransportAdapter>,
    board: Arc<BoardHandle>,
    init_failure: InitFailure,
) {
    let fail = |e: MetaWearError| match init_failure.lock().take() {
        Some(tx) => {
            let _ = tx.send(e);
        }
        None => warn!("{e}"),
    };
    while let Some(op) = ops.recv().await {
        match op {
            GattOp::Write { handle, payload } => {
                debug!("Write 0x{handle:04x}: {}", hex_bytes(&payload));
                if let Err(e) = transport.write_by_handle(handle, &payload).await {
                    fail(e);
                }
            }
            GattOp::Read { characteristic } => match transport.read_by_uuid(characteristic.uuid).await {
                Ok(value) => {
                    debug!("Read {}: {}", characteristic.uuid, hex_bytes(&value));
                    if board.char_read(&characteristic, &value).is_err() {
                        break;
                    }
                }
                Err(e) => fail(e),
            },
        }
    }
    debug!("GATT worker stopped");
}

// ── MetaWearClient ───────────────────────────────────────────────────────────

/// A connected, initialized MetaWear board.
///
/// [`MetaWearClient::connect`] walks the board through
/// `Connecting → AwaitingInit → Ready` and only returns once the firmware
/// engine has finished its initialization handshake.  Any failure on the way
/// tears down what was built and no client is returned.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use metawear_rs::prelude::*;
/// # async fn run(engine: Arc<dyn FirmwareEngine>) -> metawear_rs::error::Result<()> {
/// let client = MetaWearClient::connect("AA:BB:CC:DD:EE:FF", engine, MetaWearClientConfig::default()).await?;
/// client.switch().subscribe(|state| println!("switch: {state}"))?;
/// client.battery().subscribe(|b| println!("battery: {} %", b.charge))?;
/// client.battery().read_state()?;
/// # client.disconnect().await
/// # }
/// ```
pub struct MetaWearClient {
    address: String,
    state: RwLock<BridgeState>,
    transport: Arc<dyn TransportAdapter>,
    handles: Arc<HandleCache>,
    board: Arc<BoardHandle>,
    registry: Arc<SubscriptionRegistry>,
    control_handle: u16,
    worker: Mutex<Option<JoinHandle<()>>>,
    switch: SwitchModule,
    battery: BatteryModule,
    led: LedModule,
    haptic: HapticModule,
    accelerometer: AccelerometerModule,
    gyroscope: GyroscopeModule,
}

impl MetaWearClient {
    // ── Construction ─────────────────────────────────────────────────────────

    /// Open the configured backend and connect to `address`.
    pub async fn connect(
        address: &str,
        engine: Arc<dyn FirmwareEngine>,
        config: MetaWearClientConfig,
    ) -> Result<Self> {
        let transport = transport::open(config.backend).await?;
        Self::connect_with(address, transport, engine, config).await
    }

    /// Connect through an already constructed transport.
    pub async fn connect_with(
        address: &str,
        transport: Arc<dyn TransportAdapter>,
        engine: Arc<dyn FirmwareEngine>,
        config: MetaWearClientConfig,
    ) -> Result<Self> {
        info!("{address}: {}", BridgeState::Connecting);
        let (handles, control_handle) = match open_link(address, transport.as_ref(), &config).await {
            Ok(link) => link,
            Err(e) => {
                transport.disconnect().await.ok();
                return Err(e);
            }
        };
        let handles = Arc::new(handles);

        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let connection = engine_connection(Arc::clone(&handles), ops_tx);
        let board_id = match engine.create(connection) {
            Ok(id) => id,
            Err(e) => {
                transport.disconnect().await.ok();
                return Err(e);
            }
        };
        let board = Arc::new(BoardHandle::new(Arc::clone(&engine), board_id));

        let registry = Arc::new(SubscriptionRegistry::new());
        let framing = config.framing.unwrap_or_else(|| transport.framing());
        let router = NotificationRouter::new(
            control_handle,
            framing,
            Arc::clone(&board),
            Arc::clone(&handles),
            Arc::clone(&registry),
        );
        transport.set_notification_sink(Arc::new(move |handle: u16, payload: &[u8]| {
            router.route(handle, payload);
        }));

        let (failure_tx, failure_rx) = oneshot::channel();
        let init_failure: InitFailure = Arc::new(Mutex::new(Some(failure_tx)));
        let worker = tokio::spawn(gatt_worker(
            ops_rx,
            Arc::clone(&transport),
            Arc::clone(&board),
            Arc::clone(&init_failure),
        ));

        info!("{address}: {}", BridgeState::AwaitingInit);
        let initialized =
            await_initialized(engine.as_ref(), board_id, config.init_timeout, failure_rx).await;
        init_failure.lock().take();
        if let Err(e) = initialized {
            warn!("{address}: initialization failed: {e}");
            worker.abort();
            detach_notifications(transport.as_ref());
            transport.disconnect().await.ok();
            board.release();
            return Err(e);
        }
        info!("{address}: {}", BridgeState::Ready);

        Ok(Self {
            address: address.to_owned(),
            state: RwLock::new(BridgeState::Ready),
            handles,
            registry,
            control_handle,
            worker: Mutex::new(Some(worker)),
            switch: SwitchModule::new(Arc::clone(&board)),
            battery: BatteryModule::new(Arc::clone(&board)),
            led: LedModule::new(Arc::clone(&board)),
            haptic: HapticModule::new(Arc::clone(&board)),
            accelerometer: AccelerometerModule::new(Arc::clone(&board)),
            gyroscope: GyroscopeModule::new(Arc::clone(&board)),
            board,
            transport,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn state(&self) -> BridgeState {
        *self.state.read()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn handles(&self) -> &HandleCache {
        &self.handles
    }

    pub fn board(&self) -> &Arc<BoardHandle> {
        &self.board
    }

    /// Value handle of the multiplexed notification characteristic.
    pub fn control_handle(&self) -> u16 {
        self.control_handle
    }

    pub async fn is_connected(&self) -> bool {
        self.state() == BridgeState::Ready && self.transport.is_connected().await
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            BridgeState::Ready => Ok(()),
            other => Err(MetaWearError::State(other)),
        }
    }

    // ── Direct GATT access ───────────────────────────────────────────────────

    pub async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>> {
        self.ensure_ready()?;
        self.handles.get(uuid)?;
        let value = self.transport.read_by_uuid(uuid).await?;
        debug!("Read {uuid}: {}", hex_bytes(&value));
        Ok(value)
    }

    pub async fn write_characteristic(&self, uuid: Uuid, payload: &[u8]) -> Result<()> {
        self.ensure_ready()?;
        let handle = self.handles.lookup(uuid, false)?;
        debug!("Write 0x{handle:04x}: {}", hex_bytes(payload));
        self.transport.write_by_handle(handle, payload).await
    }

    /// Read the Device Information service.  Strings the board does not
    /// expose come back as `None`.
    pub async fn device_information(&self) -> Result<DeviceInformation> {
        Ok(DeviceInformation {
            manufacturer: self.read_string(MANUFACTURER_NAME_CHARACTERISTIC).await?,
            model_number: self.read_string(MODEL_NUMBER_CHARACTERISTIC).await?,
            serial_number: self.read_string(SERIAL_NUMBER_CHARACTERISTIC).await?,
            firmware_revision: self.read_string(FIRMWARE_REVISION_CHARACTERISTIC).await?,
            hardware_revision: self.read_string(HARDWARE_REVISION_CHARACTERISTIC).await?,
        })
    }

    async fn read_string(&self, uuid: Uuid) -> Result<Option<String>> {
        self.ensure_ready()?;
        if !self.handles.contains(uuid) {
            return Ok(None);
        }
        let raw = self.read_characteristic(uuid).await?;
        let text = String::from_utf8_lossy(&raw);
        Ok(Some(text.trim_end_matches('\0').to_owned()))
    }

    // ── Raw listeners ────────────────────────────────────────────────────────

    /// Invoke `callback` for every notification on `handle` that is not the
    /// control channel.
    pub fn add_raw_listener<F>(&self, handle: u16, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(u16, &[u8]) + Send + Sync + 'static,
    {
        self.ensure_ready()?;
        let callback: RawCallback = Arc::new(callback);
        Ok(self.registry.add(handle, callback))
    }

    pub fn remove_raw_listener(&self, id: SubscriptionId) -> bool {
        self.registry.remove(id)
    }

    pub fn clear_raw_listeners(&self, handle: u16) -> usize {
        self.registry.clear(handle)
    }

    /// Enable notifications on `uuid` and listen to them raw.
    pub async fn subscribe_characteristic<F>(&self, uuid: Uuid, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(u16, &[u8]) + Send + Sync + 'static,
    {
        self.ensure_ready()?;
        let handle = self.handles.get(uuid)?;
        let id = self.add_raw_listener(handle.value_handle, callback)?;
        if let Err(e) = self
            .transport
            .write_by_handle(handle.notify_handle, &ENABLE_NOTIFICATION)
            .await
        {
            self.registry.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    // ── Modules ──────────────────────────────────────────────────────────────

    pub fn switch(&self) -> &SwitchModule {
        &self.switch
    }

    pub fn battery(&self) -> &BatteryModule {
        &self.battery
    }

    pub fn led(&self) -> &LedModule {
        &self.led
    }

    pub fn haptic(&self) -> &HapticModule {
        &self.haptic
    }

    pub fn accelerometer(&self) -> &AccelerometerModule {
        &self.accelerometer
    }

    pub fn gyroscope(&self) -> &GyroscopeModule {
        &self.gyroscope
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Release the engine board and drop the link.  Calling it again is a
    /// no-op.
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state == BridgeState::Disconnected {
                return Ok(());
            }
            *state = BridgeState::Disconnected;
        }
        info!("{}: {}", self.address, BridgeState::Disconnected);

        self.registry.clear_all();
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        detach_notifications(self.transport.as_ref());
        let disconnected = self.transport.disconnect().await;
        self.board.release();
        disconnected
    }
}

impl Drop for MetaWearClient {
    fn drop(&mut self) {
        if *self.state.read() == BridgeState::Disconnected {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        detach_notifications(self.transport.as_ref());
        self.board.release();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let transport = Arc::clone(&self.transport);
            runtime.spawn(async move {
                transport.disconnect().await.ok();
            });
        }
    }
}

impl fmt::Debug for MetaWearClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaWearClient")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("control_handle", &self.control_handle)
            .field("board", &self.board)
            .finish_non_exhaustive()
    }
}

// ── Construction steps ───────────────────────────────────────────────────────

/// Bring the link up, index the GATT table and enable the control channel.
/// Returns the cache and the control channel's value handle.
async fn open_link(
    address: &str,
    transport: &dyn TransportAdapter,
    config: &MetaWearClientConfig,
) -> Result<(HandleCache, u16)> {
    transport.connect(address, config.connect_timeout).await?;
    let handles = HandleCache::build(transport).await?;
    let notify = handles.get(NOTIFY_CHARACTERISTIC)?;
    debug!(
        "Write 0x{:04x}: {}",
        notify.notify_handle,
        hex_bytes(&ENABLE_NOTIFICATION)
    );
    transport
        .write_by_handle(notify.notify_handle, &ENABLE_NOTIFICATION)
        .await?;
    Ok((handles, notify.value_handle))
}

/// Stop routing notifications into the board before it is released.
fn detach_notifications(transport: &dyn TransportAdapter) {
    transport.set_notification_sink(Arc::new(|_: u16, _: &[u8]| {}));
}

/// Start the engine handshake and wait for both the completion callback and
/// the engine's own flag, within `limit`.  A transport failure reported by
/// the GATT worker ends the wait early.
async fn await_initialized(
    engine: &dyn FirmwareEngine,
    board: BoardId,
    limit: Option<Duration>,
    failure: oneshot::Receiver<MetaWearError>,
) -> Result<()> {
    let (done_tx, done_rx) = oneshot::channel();
    engine.initialize(
        board,
        Box::new(move || {
            let _ = done_tx.send(());
        }),
    );

    let handshake = async {
        done_rx
            .await
            .map_err(|_| MetaWearError::Engine("initialization callback dropped".into()))?;
        while !engine.is_initialized(board) {
            sleep(INIT_POLL_INTERVAL).await;
        }
        Ok::<(), MetaWearError>(())
    };

    let bounded = async {
        match limit {
            Some(limit) => timeout(limit, handshake)
                .await
                .map_err(|_| MetaWearError::InitTimeout(limit))?,
            None => handshake.await,
        }
    };

    tokio::select! {
        result = bounded => result,
        Ok(e) = failure => Err(e),
    }
}
