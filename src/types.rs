use std::fmt;

use uuid::Uuid;

/// A BLE peripheral found during discovery.
///
/// Immutable once discovered; pass [`PeripheralAddress::address`] to
/// [`crate::metawear_client::MetaWearClient::connect`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralAddress {
    /// Platform BLE identifier.
    /// • Linux / Windows: a Bluetooth MAC address (`AA:BB:CC:DD:EE:FF`)
    /// • macOS: a CoreBluetooth UUID string (MACs are hidden there)
    pub address: String,
    /// Advertised local name, or an empty string when none was advertised.
    pub name: String,
}

impl PeripheralAddress {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

/// Numeric ATT handles of one characteristic.
///
/// Once the handle cache is built for a connection these never change for
/// the lifetime of that connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    /// Handle carrying the characteristic value (reads, writes, notifications).
    pub value_handle: u16,
    /// Handle of the Client Characteristic Configuration descriptor.
    pub notify_handle: u16,
}

impl CharacteristicHandle {
    /// Standard GATT layout: the CCCD immediately follows the value.
    pub fn from_value_handle(value_handle: u16) -> Self {
        Self {
            value_handle,
            notify_handle: value_handle.wrapping_add(1),
        }
    }
}

/// The characteristic descriptor the firmware engine passes to the
/// write/read callbacks: a (service, characteristic) UUID pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattCharacteristic {
    pub service_uuid: Uuid,
    pub uuid: Uuid,
}

impl GattCharacteristic {
    pub const fn new(service_uuid: Uuid, uuid: Uuid) -> Self {
        Self { service_uuid, uuid }
    }

    /// Rebuild the descriptor from the four 64-bit halves used by the vendor
    /// C structure (`service_uuid_high`, `service_uuid_low`, `uuid_high`,
    /// `uuid_low`).
    pub fn from_halves(service_high: u64, service_low: u64, high: u64, low: u64) -> Self {
        Self {
            service_uuid: Uuid::from_u64_pair(service_high, service_low),
            uuid: Uuid::from_u64_pair(high, low),
        }
    }
}

/// A 3-axis floating-point sample (accelerometer in g, gyroscope in °/s).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CartesianFloat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Battery reading reported by the board's settings module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatteryState {
    pub voltage: u8,
    /// State of charge in percent.
    pub charge: u8,
}

/// Raw 4-channel reading from a TCS34725 colour sensor ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorAdc {
    pub clear: u16,
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

/// A decoded sensor value.
///
/// Produced by [`crate::parse::decode_tagged`] from a type tag followed by a
/// value region whose size the tag alone determines.  See
/// [`crate::parse::DataTypeId`] for the wire tags.
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedValue {
    UInt32(u32),
    Float(f32),
    CartesianFloat(CartesianFloat),
    Int32(i32),
    ByteArray(Vec<u8>),
    BatteryState(BatteryState),
    ColorAdc(ColorAdc),
}

/// Lifecycle of a [`crate::metawear_client::MetaWearClient`].
///
/// ```text
/// Unconnected → Connecting → AwaitingInit → Ready → Disconnected
/// ```
///
/// `Disconnected` is terminal; a failure before `Ready` aborts construction
/// and no client is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Unconnected,
    Connecting,
    AwaitingInit,
    Ready,
    Disconnected,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Unconnected => "unconnected",
            BridgeState::Connecting => "connecting",
            BridgeState::AwaitingInit => "awaiting initialization",
            BridgeState::Ready => "ready",
            BridgeState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Standard Device Information strings read from service `0x180A`.
///
/// Any characteristic the board does not expose is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInformation {
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_revision: Option<String>,
    pub hardware_revision: Option<String>,
}
