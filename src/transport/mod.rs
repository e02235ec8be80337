//! Abstract BLE transport the board bridge drives.
//!
//! One [`TransportAdapter`] implementation exists per underlying BLE library;
//! the bridge picks one at construction from [`Backend`].  Application code
//! and tests can also hand the bridge their own adapter.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
#[cfg(not(feature = "btleplug"))]
use crate::error::MetaWearError;
use crate::types::CharacteristicHandle;

#[cfg(feature = "btleplug")]
pub mod btleplug_backend;

/// Receives `(handle, payload)` for every notification.
///
/// Called from the backend's delivery task, possibly concurrently with
/// owner-task calls into the adapter.  The payload is only borrowed for the
/// duration of the call.
pub type NotificationSink = Arc<dyn Fn(u16, &[u8]) + Send + Sync>;

/// Which BLE library carries the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Cross-platform backend built on `btleplug` (BlueZ, CoreBluetooth, WinRT).
    #[default]
    Btleplug,
}

/// How a backend frames payloads it delivers for notifications.
///
/// Some BLE libraries hand over the raw ATT PDU instead of the bare value.
/// This is a property of the backend, not of the firmware protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationFraming {
    /// The payload is the characteristic value.
    #[default]
    Raw,
    /// Payloads longer than 4 bytes carry a 3-byte prefix (ATT opcode plus
    /// handle) in front of the value.
    PrefixedHeader,
}

impl NotificationFraming {
    const PREFIX_LEN: usize = 3;
    const MIN_PREFIXED_LEN: usize = 4;

    /// Strip the backend framing, leaving the characteristic value.
    pub fn unwrap<'a>(&self, payload: &'a [u8]) -> &'a [u8] {
        match self {
            NotificationFraming::Raw => payload,
            NotificationFraming::PrefixedHeader if payload.len() > Self::MIN_PREFIXED_LEN => {
                &payload[Self::PREFIX_LEN..]
            }
            NotificationFraming::PrefixedHeader => payload,
        }
    }
}

/// A connection to one BLE peripheral.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Bring the link up.  Implementations poll link status rather than
    /// trusting the library's connect call, and fail with
    /// [`crate::error::MetaWearError::ConnectionTimeout`] after `timeout`.
    async fn connect(&self, address: &str, timeout: Duration) -> Result<()>;

    /// Enumerate services and characteristics, keyed by characteristic UUID.
    async fn discover_characteristics(&self) -> Result<BTreeMap<Uuid, CharacteristicHandle>>;

    async fn read_by_uuid(&self, uuid: Uuid) -> Result<Vec<u8>>;

    async fn write_by_handle(&self, handle: u16, payload: &[u8]) -> Result<()>;

    /// Register the receiver of all subsequent notifications, replacing any
    /// previous sink.
    fn set_notification_sink(&self, sink: NotificationSink);

    fn framing(&self) -> NotificationFraming {
        NotificationFraming::Raw
    }

    async fn is_connected(&self) -> bool;

    /// Tear the link down.  Safe to call any number of times.
    async fn disconnect(&self) -> Result<()>;
}

/// Instantiate the adapter for `backend`.
pub async fn open(backend: Backend) -> Result<Arc<dyn TransportAdapter>> {
    match backend {
        #[cfg(feature = "btleplug")]
        Backend::Btleplug => {
            let adapter = btleplug_backend::BtleplugTransport::new().await?;
            Ok(Arc::new(adapter))
        }
        #[cfg(not(feature = "btleplug"))]
        Backend::Btleplug => Err(MetaWearError::NotAvailable(
            "btleplug backend (enable the `btleplug` feature)",
        )),
    }
}
