//! GATT UUIDs, timing constants, and BLE wire-format helpers for MetaWear boards.
//!
//! All vendor UUIDs belong to the MbientLab namespace
//! `326aXXXX-85cb-9195-d9dd-464cfbbae75a`.  Standard services use the
//! Bluetooth SIG base UUID `0000XXXX-0000-1000-8000-00805f9b34fb`.

use std::time::Duration;

use uuid::Uuid;

// ── MetaWear service ─────────────────────────────────────────────────────────

/// Primary GATT service exposed by every MetaWear board.
pub const METAWEAR_SERVICE_UUID: Uuid = Uuid::from_u128(0x326a9000_85cb_9195_d9dd_464cfbbae75a);

/// Command characteristic.
///
/// The firmware engine writes its encoded module commands here.
pub const COMMAND_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x326a9001_85cb_9195_d9dd_464cfbbae75a);

/// Multiplexed notification characteristic.
///
/// Every module response and data sample is pushed through this single
/// characteristic; the firmware engine demultiplexes it.  Notifications only
/// start flowing after [`ENABLE_NOTIFICATION`] is written to its CCCD.
pub const NOTIFY_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x326a9006_85cb_9195_d9dd_464cfbbae75a);

// ── Device Information service (0x180A) ──────────────────────────────────────

/// Standard Device Information service.
pub const DEVICE_INFO_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);

/// Manufacturer Name String.
pub const MANUFACTURER_NAME_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);

/// Model Number String.
pub const MODEL_NUMBER_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);

/// Serial Number String.
pub const SERIAL_NUMBER_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00002a25_0000_1000_8000_00805f9b34fb);

/// Firmware Revision String.  The engine reads this during initialization.
pub const FIRMWARE_REVISION_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);

/// Hardware Revision String.
pub const HARDWARE_REVISION_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00002a27_0000_1000_8000_00805f9b34fb);

// ── Descriptor values ────────────────────────────────────────────────────────

/// Client Characteristic Configuration value that enables notifications
/// (`0x0001`, little-endian).
pub const ENABLE_NOTIFICATION: [u8; 2] = [0x01, 0x00];

/// CCCD value that enables indications (`0x0002`, little-endian).
pub const ENABLE_INDICATION: [u8; 2] = [0x02, 0x00];

/// CCCD value that disables both notifications and indications.
pub const DISABLE_NOTIFICATION: [u8; 2] = [0x00, 0x00];

// ── Timing ───────────────────────────────────────────────────────────────────

/// Interval between link-status polls while connecting.
pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Hard deadline for the link to come up.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for the firmware engine to report itself initialized.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(20);

/// Interval between `is_initialized` re-checks after the init callback fired.
pub const INIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default scan duration for [`crate::discovery::discover_devices`].
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Case-insensitive substring every MetaWear board carries in its advertised name.
pub const METAWEAR_NAME_FILTER: &str = "metawear";

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Format a payload as space-separated lowercase hex, e.g. `"01 80 ff"`.
///
/// Used for the `debug!` traces of every GATT write, read, and notification.
pub fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
