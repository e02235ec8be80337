//! [`TransportAdapter`] over `btleplug` (BlueZ on Linux, CoreBluetooth on
//! macOS, WinRT on Windows).
//!
//! btleplug addresses characteristics by UUID and never exposes ATT handles,
//! so this backend allocates handles itself while walking the discovered
//! service table (see [`HandleAllocator`]).  The numbering is deterministic
//! for a given GATT table and stable for the lifetime of one connection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use uuid::Uuid;

use super::{NotificationSink, TransportAdapter};
use crate::error::{MetaWearError, Result};
use crate::protocol::{
    hex_bytes, CONNECT_POLL_INTERVAL, DISABLE_NOTIFICATION, ENABLE_INDICATION, ENABLE_NOTIFICATION,
};
use crate::types::CharacteristicHandle;

// ── Adapter helpers ──────────────────────────────────────────────────────────

/// First Bluetooth adapter of the host, ready to scan.
///
/// On macOS, `CBCentralManager` starts in an "unknown" state and silently
/// ignores scan requests until it reaches *poweredOn*; wait up to 3 s for it.
pub(crate) async fn default_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| MetaWearError::Transport("no Bluetooth adapter found".into()))?;

    #[cfg(target_os = "macos")]
    {
        use btleplug::api::CentralState;

        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            match adapter.adapter_state().await {
                Ok(CentralState::PoweredOn) => {
                    info!("macOS: adapter is PoweredOn");
                    break;
                }
                Ok(state) if Instant::now() >= deadline => {
                    warn!("macOS: adapter still in state {state:?} after 3 s, proceeding anyway");
                    break;
                }
                Ok(state) => debug!("macOS: adapter state = {state:?}, waiting…"),
                Err(e) => {
                    warn!("macOS: adapter_state() error: {e}");
                    break;
                }
            }
            sleep(Duration::from_millis(200)).await;
        }
        sleep(Duration::from_millis(300)).await;
    }

    Ok(adapter)
}

/// The identifier discovery reports and `connect` accepts for `peripheral`.
///
/// CoreBluetooth hides MAC addresses (they read as `00:00:00:00:00:00`), so
/// fall back to the platform peripheral id there.
pub(crate) fn peripheral_address(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address == BDAddr::default() {
        peripheral.id().to_string()
    } else {
        address.to_string()
    }
}

// ── Handle allocation ────────────────────────────────────────────────────────

/// Assigns ATT handles in GATT table order: one per service declaration, and
/// per characteristic a declaration, a value, and (when it can notify or
/// indicate) a CCCD handle directly after the value.
#[derive(Debug)]
struct HandleAllocator {
    next: u16,
}

impl HandleAllocator {
    fn new() -> Self {
        Self { next: 1 }
    }

    fn service(&mut self) {
        self.next = self.next.wrapping_add(1);
    }

    fn characteristic(&mut self, has_cccd: bool) -> CharacteristicHandle {
        let value_handle = self.next.wrapping_add(1);
        self.next = self.next.wrapping_add(if has_cccd { 3 } else { 2 });
        CharacteristicHandle::from_value_handle(value_handle)
    }
}

#[derive(Debug, Default)]
struct GattLayout {
    by_value_handle: HashMap<u16, Characteristic>,
    by_cccd_handle: HashMap<u16, Characteristic>,
    value_handles: HashMap<Uuid, u16>,
}

impl GattLayout {
    fn characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.value_handles
            .get(&uuid)
            .and_then(|h| self.by_value_handle.get(h))
            .cloned()
    }
}

enum WriteTarget {
    Cccd(Characteristic),
    Value(Characteristic),
}

// ── BtleplugTransport ────────────────────────────────────────────────────────

pub struct BtleplugTransport {
    adapter: Adapter,
    peripheral: Mutex<Option<Peripheral>>,
    layout: Arc<RwLock<GattLayout>>,
    sink: Arc<RwLock<Option<NotificationSink>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BtleplugTransport {
    pub async fn new() -> Result<Self> {
        Ok(Self::with_adapter(default_adapter().await?))
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripheral: Mutex::new(None),
            layout: Arc::new(RwLock::new(GattLayout::default())),
            sink: Arc::new(RwLock::new(None)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn connected_peripheral(&self) -> Result<Peripheral> {
        self.peripheral
            .lock()
            .clone()
            .ok_or_else(|| MetaWearError::Transport("not connected".into()))
    }

    async fn known_peripheral(&self, address: &str) -> Result<Option<Peripheral>> {
        Ok(self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| peripheral_address(p).eq_ignore_ascii_case(address)))
    }

    /// Resolve `address` to a peripheral, scanning until `deadline` if the
    /// adapter has not seen it yet.
    async fn find_peripheral(&self, address: &str, deadline: Instant) -> Result<Option<Peripheral>> {
        if let Some(p) = self.known_peripheral(address).await? {
            return Ok(Some(p));
        }
        debug!("{address} not known to the adapter, scanning…");
        self.adapter.start_scan(ScanFilter::default()).await?;
        let found = loop {
            if let Some(p) = self.known_peripheral(address).await? {
                break Some(p);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(Duration::from_millis(250)).await;
        };
        self.adapter.stop_scan().await.ok();
        Ok(found)
    }

    /// Forward every value notification to the registered sink, tagged with
    /// the value handle of its characteristic.
    async fn spawn_notification_pump(&self, peripheral: &Peripheral) -> Result<()> {
        let mut notifications = peripheral.notifications().await?;
        let layout = Arc::clone(&self.layout);
        let sink = Arc::clone(&self.sink);

        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let handle = layout.read().value_handles.get(&notification.uuid).copied();
                let Some(handle) = handle else {
                    debug!("notification from undiscovered characteristic {}", notification.uuid);
                    continue;
                };
                let sink = sink.read().clone();
                match sink {
                    Some(sink) => sink(handle, &notification.value),
                    None => debug!("no sink registered, dropping notification on 0x{handle:04x}"),
                }
            }
            info!("notification stream ended");
        });
        self.tasks.lock().push(task);
        Ok(())
    }

    /// Log link loss as soon as the adapter reports it; the notification
    /// stream can take much longer to close.
    fn spawn_disconnect_watcher(&self, peripheral: &Peripheral) {
        let adapter = self.adapter.clone();
        let peripheral_id = peripheral.id();
        let task = tokio::spawn(async move {
            match adapter.events().await {
                Ok(mut events) => {
                    while let Some(event) = events.next().await {
                        if let CentralEvent::DeviceDisconnected(id) = event {
                            if id == peripheral_id {
                                warn!("link to {id:?} lost");
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!("disconnect watcher: could not subscribe to adapter events: {e}"),
            }
        });
        self.tasks.lock().push(task);
    }
}

#[async_trait]
impl TransportAdapter for BtleplugTransport {
    async fn connect(&self, address: &str, timeout_after: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout_after;
        let timed_out = || MetaWearError::ConnectionTimeout {
            address: address.to_owned(),
            timeout: timeout_after,
        };

        let peripheral = self
            .find_peripheral(address, deadline)
            .await?
            .ok_or_else(timed_out)?;

        info!("connecting to {address}…");
        // BlueZ's Device1.Connect can block forever on a bad link, while
        // other stacks return before the link is up; bound the call and then
        // poll the link state until the deadline.
        timeout_at(deadline, peripheral.connect())
            .await
            .map_err(|_| timed_out())??;
        while !peripheral.is_connected().await.unwrap_or(false) {
            if Instant::now() >= deadline {
                return Err(timed_out());
            }
            sleep(CONNECT_POLL_INTERVAL).await;
        }

        // BlueZ signals the connection before its GATT cache is populated;
        // discovering too early returns an empty table.
        #[cfg(target_os = "linux")]
        sleep(Duration::from_millis(600)).await;

        timeout(Duration::from_secs(15), peripheral.discover_services())
            .await
            .map_err(|_| MetaWearError::Transport("discover_services() timed out after 15 s".into()))??;
        info!("connected to {address}, services discovered");

        *self.peripheral.lock() = Some(peripheral.clone());
        self.spawn_notification_pump(&peripheral).await?;
        self.spawn_disconnect_watcher(&peripheral);
        Ok(())
    }

    async fn discover_characteristics(&self) -> Result<BTreeMap<Uuid, CharacteristicHandle>> {
        let peripheral = self.connected_peripheral()?;
        let mut allocator = HandleAllocator::new();
        let mut layout = GattLayout::default();
        let mut handles = BTreeMap::new();

        for service in peripheral.services() {
            allocator.service();
            for c in &service.characteristics {
                let has_cccd = c
                    .properties
                    .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE);
                let handle = allocator.characteristic(has_cccd);
                debug!(
                    "  {} / {} → value 0x{:04x}, cccd 0x{:04x}",
                    service.uuid, c.uuid, handle.value_handle, handle.notify_handle
                );
                layout.by_value_handle.insert(handle.value_handle, c.clone());
                if has_cccd {
                    layout.by_cccd_handle.insert(handle.notify_handle, c.clone());
                }
                layout.value_handles.insert(c.uuid, handle.value_handle);
                handles.insert(c.uuid, handle);
            }
        }

        *self.layout.write() = layout;
        Ok(handles)
    }

    async fn read_by_uuid(&self, uuid: Uuid) -> Result<Vec<u8>> {
        let peripheral = self.connected_peripheral()?;
        let characteristic = self
            .layout
            .read()
            .characteristic(uuid)
            .ok_or(MetaWearError::UnknownCharacteristic(uuid))?;
        Ok(peripheral.read(&characteristic).await?)
    }

    async fn write_by_handle(&self, handle: u16, payload: &[u8]) -> Result<()> {
        let peripheral = self.connected_peripheral()?;
        let target = {
            let layout = self.layout.read();
            if let Some(c) = layout.by_cccd_handle.get(&handle) {
                WriteTarget::Cccd(c.clone())
            } else if let Some(c) = layout.by_value_handle.get(&handle) {
                WriteTarget::Value(c.clone())
            } else {
                return Err(MetaWearError::Transport(format!(
                    "no characteristic at handle 0x{handle:04x}"
                )));
            }
        };

        match target {
            // btleplug manages the CCCD itself through subscribe/unsubscribe.
            WriteTarget::Cccd(c) => {
                if payload == ENABLE_NOTIFICATION.as_slice() || payload == ENABLE_INDICATION.as_slice() {
                    peripheral.subscribe(&c).await?;
                } else if payload == DISABLE_NOTIFICATION.as_slice() {
                    peripheral.unsubscribe(&c).await?;
                } else {
                    return Err(MetaWearError::Transport(format!(
                        "unsupported CCCD value [{}] for {}",
                        hex_bytes(payload),
                        c.uuid
                    )));
                }
            }
            WriteTarget::Value(c) => {
                let write_type = if c.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
                    WriteType::WithoutResponse
                } else {
                    WriteType::WithResponse
                };
                peripheral.write(&c, payload, write_type).await?;
            }
        }
        Ok(())
    }

    fn set_notification_sink(&self, sink: NotificationSink) {
        *self.sink.write() = Some(sink);
    }

    async fn is_connected(&self) -> bool {
        let peripheral = self.peripheral.lock().clone();
        match peripheral {
            Some(p) => p.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn disconnect(&self) -> Result<()> {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.sink.write() = None;

        let peripheral = self.peripheral.lock().take();
        if let Some(p) = peripheral {
            if p.is_connected().await.unwrap_or(false) {
                p.disconnect().await?;
                info!("disconnected from {}", peripheral_address(&p));
            }
        }
        Ok(())
    }
}
