//! Boundary to the vendor firmware engine.
//!
//! The engine is the stateful driver that encodes module commands into the
//! board's proprietary protocol and decodes its responses.  It is an external
//! collaborator: this crate never implements it, it only
//!
//! * hands it a [`BtleConnection`] (two callbacks: write a characteristic,
//!   read a characteristic),
//! * feeds it notifications from the multiplexed characteristic and the
//!   results of reads it requested,
//! * asks it for per-module [`DataSignal`]s and subscribes handlers to them.
//!
//! A binding to the vendor's C function table implements [`FirmwareEngine`];
//! tests implement it with a scripted fake.

use std::fmt;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::error::{MetaWearError, Result};
use crate::types::{BridgeState, GattCharacteristic};

// ── Callback types ───────────────────────────────────────────────────────────

/// "Write these bytes to this characteristic."  Supplied to the engine.
pub type WriteFn = Arc<dyn Fn(&GattCharacteristic, &[u8]) + Send + Sync>;

/// "Read this characteristic now."  Supplied to the engine; the result is fed
/// back through [`FirmwareEngine::char_read`].
pub type ReadFn = Arc<dyn Fn(&GattCharacteristic) + Send + Sync>;

/// Fired exactly once by the engine when initialization completes.
pub type InitCompleteFn = Box<dyn FnOnce() + Send>;

/// Receives one tagged value (type tag + value region) for a data signal.
/// Decode it with [`crate::parse::decode_tagged`].
pub type DataHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// The connection table the engine drives the board through.
#[derive(Clone)]
pub struct BtleConnection {
    pub write_gatt_char: WriteFn,
    pub read_gatt_char: ReadFn,
}

impl fmt::Debug for BtleConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BtleConnection").finish_non_exhaustive()
    }
}

// ── Opaque handles ───────────────────────────────────────────────────────────

/// Opaque identifier of one engine board instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoardId(u64);

impl BoardId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque identifier of one logical sensor output stream inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataSignal(u64);

impl DataSignal {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

// ── Modules and commands ─────────────────────────────────────────────────────

/// Board modules reachable through the facade layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Module {
    Switch,
    Battery,
    Led,
    Haptic,
    Accelerometer,
    Gyroscope,
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Module::Switch => "Switch",
            Module::Battery => "Battery",
            Module::Led => "LED",
            Module::Haptic => "Haptic",
            Module::Accelerometer => "Accelerometer",
            Module::Gyroscope => "Gyroscope",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedColor {
    Green,
    Red,
    Blue,
}

/// Timing of one LED channel pattern, in the engine's units (intensity 0–31,
/// times in ms).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedPattern {
    pub high_intensity: u8,
    pub low_intensity: u8,
    pub rise_time_ms: u16,
    pub high_time_ms: u16,
    pub fall_time_ms: u16,
    pub pulse_duration_ms: u16,
    pub delay_time_ms: u16,
    pub repeat_count: u8,
}

/// Built-in patterns shipped with the vendor library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPreset {
    Blink,
    Pulse,
    Solid,
}

impl LedPattern {
    /// The vendor preset timings.  `repeat_count` 0xff repeats forever.
    pub fn preset(preset: LedPreset, repeat_count: u8) -> Self {
        let (high, low, rise, high_time, fall, duration) = match preset {
            LedPreset::Blink => (31, 0, 0, 50, 0, 500),
            LedPreset::Pulse => (31, 0, 725, 500, 725, 2000),
            LedPreset::Solid => (31, 31, 0, 500, 0, 1000),
        };
        Self {
            high_intensity: high,
            low_intensity: low,
            rise_time_ms: rise,
            high_time_ms: high_time,
            fall_time_ms: fall,
            pulse_duration_ms: duration,
            delay_time_ms: 0,
            repeat_count,
        }
    }
}

/// A module-level request the engine encodes into firmware commands.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleCommand {
    ReadBatteryState,
    LedWritePattern { color: LedColor, pattern: LedPattern },
    LedPlay,
    LedStop { clear: bool },
    HapticMotor { duty_cycle_percent: f32, pulse_width_ms: u16 },
    HapticBuzzer { pulse_width_ms: u16 },
    AccelerometerStart,
    AccelerometerStop,
    GyroscopeStart,
    GyroscopeStop,
}

// ── The engine trait ─────────────────────────────────────────────────────────

/// The firmware engine as seen by the board bridge.
///
/// Implementations must tolerate being called from the notification-delivery
/// task concurrently with the owner task; the engine's own single-writer
/// guarantees are assumed.
pub trait FirmwareEngine: Send + Sync {
    /// Create a board instance that talks through `connection`.
    fn create(&self, connection: BtleConnection) -> Result<BoardId>;

    /// Start the initialization handshake.  `on_initialized` fires once when done.
    fn initialize(&self, board: BoardId, on_initialized: InitCompleteFn);

    fn is_initialized(&self, board: BoardId) -> bool;

    /// Data signal of a module, or `None` when the board lacks it.
    fn data_signal(&self, board: BoardId, module: Module) -> Option<DataSignal>;

    /// Route future values of `signal` to `handler`, replacing any previous one.
    fn subscribe(&self, signal: DataSignal, handler: DataHandler);

    fn unsubscribe(&self, signal: DataSignal);

    fn execute(&self, board: BoardId, command: ModuleCommand) -> Result<()>;

    /// A notification arrived on the multiplexed characteristic.
    fn notify_char_changed(&self, board: BoardId, value: &[u8]);

    /// Completion of a read previously requested through [`ReadFn`].
    fn char_read(&self, board: BoardId, characteristic: &GattCharacteristic, value: &[u8]);

    /// Tear down a board instance.  Called exactly once per board.
    fn destroy(&self, board: BoardId);
}

// ── BoardHandle ──────────────────────────────────────────────────────────────

/// Owned handle to one engine board instance.
///
/// The bridge owns it; the router and module facades share it through an
/// `Arc` and never release it themselves.  After [`BoardHandle::release`]
/// every operation fails with [`MetaWearError::State`].
///
/// Engine calls run under the read side of `released`; `release` takes the
/// write side, so `destroy` never overlaps a call already in progress.
pub struct BoardHandle {
    engine: Arc<dyn FirmwareEngine>,
    id: BoardId,
    released: RwLock<bool>,
}

impl BoardHandle {
    pub(crate) fn new(engine: Arc<dyn FirmwareEngine>, id: BoardId) -> Self {
        Self {
            engine,
            id,
            released: RwLock::new(false),
        }
    }

    pub fn is_released(&self) -> bool {
        *self.released.read_recursive()
    }

    /// Run `f` against the live board.  Fails with a state error once the
    /// handle has been released.
    ///
    /// Recursive reads: engine callbacks may re-enter the handle (a data
    /// handler issuing a command) while `release` is queued.
    pub fn with_engine<R>(&self, f: impl FnOnce(&dyn FirmwareEngine, BoardId) -> R) -> Result<R> {
        let released = self.released.read_recursive();
        if *released {
            return Err(MetaWearError::State(BridgeState::Disconnected));
        }
        Ok(f(self.engine.as_ref(), self.id))
    }

    /// Destroy the engine board.  Returns `false` if it was already released.
    /// Waits for engine calls in flight on other threads to return.
    pub(crate) fn release(&self) -> bool {
        let mut released = self.released.write();
        if *released {
            return false;
        }
        *released = true;
        debug!("releasing engine board {:?}", self.id);
        self.engine.destroy(self.id);
        true
    }

    pub fn notify_char_changed(&self, value: &[u8]) -> Result<()> {
        self.with_engine(|engine, id| engine.notify_char_changed(id, value))
    }

    pub fn char_read(&self, characteristic: &GattCharacteristic, value: &[u8]) -> Result<()> {
        self.with_engine(|engine, id| engine.char_read(id, characteristic, value))
    }

    pub fn execute(&self, command: ModuleCommand) -> Result<()> {
        self.with_engine(|engine, id| engine.execute(id, command))?
    }
}

impl fmt::Debug for BoardHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoardHandle")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}
