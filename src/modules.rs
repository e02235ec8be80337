//! Per-module facades over the firmware engine.
//!
//! Data-producing modules (switch, battery, accelerometer, gyroscope) wrap a
//! [`DataStream`]: the engine's data signal, fetched lazily, plus a single
//! handler slot.  Registering a second handler replaces the first; the
//! engine only ever sees one trampoline per signal, which reads the slot at
//! delivery time.  Command-only modules (LED, haptic) forward
//! [`ModuleCommand`]s.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error};
use parking_lot::{Mutex, RwLock};

use crate::engine::{
    BoardHandle, DataHandler, DataSignal, LedColor, LedPattern, Module, ModuleCommand,
};
use crate::error::{MetaWearError, Result};
use crate::parse::decode_tagged;
use crate::types::{BatteryState, CartesianFloat, TaggedValue};

/// Application callback receiving values of one module's domain type.
pub type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

type Slot<T> = Arc<RwLock<Option<Handler<T>>>>;

// ── DataStream ───────────────────────────────────────────────────────────────

/// One module's data signal and its handler slot.
pub struct DataStream<T> {
    module: Module,
    board: Arc<BoardHandle>,
    signal: Mutex<Option<DataSignal>>,
    slot: Slot<T>,
    engine_subscribed: AtomicBool,
    unwrap: fn(TaggedValue) -> Option<T>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + 'static> DataStream<T> {
    fn new(module: Module, board: Arc<BoardHandle>, unwrap: fn(TaggedValue) -> Option<T>) -> Self {
        Self {
            module,
            board,
            signal: Mutex::new(None),
            slot: Arc::new(RwLock::new(None)),
            engine_subscribed: AtomicBool::new(false),
            unwrap,
            _marker: PhantomData,
        }
    }

    /// The engine's data signal for this module, obtained on first use.
    pub fn data_signal(&self) -> Result<DataSignal> {
        let mut cached = self.signal.lock();
        if let Some(signal) = *cached {
            return self.board.with_engine(|_, _| signal);
        }
        let signal = self
            .board
            .with_engine(|engine, id| engine.data_signal(id, self.module))?
            .ok_or(MetaWearError::ModuleUnavailable(self.module))?;
        debug!("{} data signal: {:?}", self.module, signal);
        *cached = Some(signal);
        Ok(signal)
    }

    /// Install `handler`, or with `None` remove the current one.
    ///
    /// Removing does not interrupt a delivery already in progress.
    pub fn notifications(&self, handler: Option<Handler<T>>) -> Result<()> {
        match handler {
            Some(handler) => {
                let signal = self.data_signal()?;
                self.board.with_engine(|engine, _| {
                    *self.slot.write() = Some(handler);
                    if !self.engine_subscribed.swap(true, Ordering::AcqRel) {
                        engine.subscribe(signal, self.trampoline());
                    }
                })
            }
            None => self.board.with_engine(|engine, _| {
                *self.slot.write() = None;
                if self.engine_subscribed.swap(false, Ordering::AcqRel) {
                    if let Some(signal) = *self.signal.lock() {
                        engine.unsubscribe(signal);
                    }
                }
            }),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.notifications(Some(Arc::new(handler)))
    }

    pub fn unsubscribe(&self) -> Result<()> {
        self.notifications(None)
    }

    pub fn is_subscribed(&self) -> bool {
        self.slot.read().is_some()
    }

    fn trampoline(&self) -> DataHandler {
        let module = self.module;
        let slot = Arc::clone(&self.slot);
        let unwrap = self.unwrap;
        Arc::new(move |bytes: &[u8]| {
            let value = match decode_tagged(bytes) {
                Ok(value) => value,
                Err(e) => {
                    error!("{module}: {e}");
                    return;
                }
            };
            let kind = value.type_id();
            let Some(value) = unwrap(value) else {
                error!("{module}: unexpected data type {kind:?}");
                return;
            };
            let handler = slot.read().clone();
            if let Some(handler) = handler {
                handler(value);
            }
        })
    }
}

impl<T: Send + 'static> fmt::Debug for DataStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStream")
            .field("module", &self.module)
            .field("signal", &*self.signal.lock())
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

// ── Domain unwrapping ────────────────────────────────────────────────────────

fn as_u32(value: TaggedValue) -> Option<u32> {
    match value {
        TaggedValue::UInt32(v) => Some(v),
        _ => None,
    }
}

fn as_battery(value: TaggedValue) -> Option<BatteryState> {
    match value {
        TaggedValue::BatteryState(v) => Some(v),
        _ => None,
    }
}

fn as_cartesian(value: TaggedValue) -> Option<CartesianFloat> {
    match value {
        TaggedValue::CartesianFloat(v) => Some(v),
        _ => None,
    }
}

// ── Facades ──────────────────────────────────────────────────────────────────

/// Push-button switch.  Values are `1` when pressed and `0` when released.
#[derive(Debug)]
pub struct SwitchModule {
    data: DataStream<u32>,
}

impl SwitchModule {
    pub(crate) fn new(board: Arc<BoardHandle>) -> Self {
        Self {
            data: DataStream::new(Module::Switch, board, as_u32),
        }
    }

    pub fn data_signal(&self) -> Result<DataSignal> {
        self.data.data_signal()
    }

    pub fn notifications(&self, handler: Option<Handler<u32>>) -> Result<()> {
        self.data.notifications(handler)
    }

    pub fn subscribe<F: Fn(u32) + Send + Sync + 'static>(&self, handler: F) -> Result<()> {
        self.data.subscribe(handler)
    }

    pub fn unsubscribe(&self) -> Result<()> {
        self.data.unsubscribe()
    }

    pub fn is_subscribed(&self) -> bool {
        self.data.is_subscribed()
    }
}

/// Battery voltage and charge, delivered in response to [`BatteryModule::read_state`].
#[derive(Debug)]
pub struct BatteryModule {
    board: Arc<BoardHandle>,
    data: DataStream<BatteryState>,
}

impl BatteryModule {
    pub(crate) fn new(board: Arc<BoardHandle>) -> Self {
        Self {
            data: DataStream::new(Module::Battery, Arc::clone(&board), as_battery),
            board,
        }
    }

    pub fn data_signal(&self) -> Result<DataSignal> {
        self.data.data_signal()
    }

    pub fn notifications(&self, handler: Option<Handler<BatteryState>>) -> Result<()> {
        self.data.notifications(handler)
    }

    pub fn subscribe<F: Fn(BatteryState) + Send + Sync + 'static>(&self, handler: F) -> Result<()> {
        self.data.subscribe(handler)
    }

    pub fn unsubscribe(&self) -> Result<()> {
        self.data.unsubscribe()
    }

    pub fn is_subscribed(&self) -> bool {
        self.data.is_subscribed()
    }

    /// Ask the board for its battery state.  The answer arrives on the
    /// subscribed handler.
    pub fn read_state(&self) -> Result<()> {
        self.board.execute(ModuleCommand::ReadBatteryState)
    }
}

#[derive(Debug)]
pub struct LedModule {
    board: Arc<BoardHandle>,
}

impl LedModule {
    pub(crate) fn new(board: Arc<BoardHandle>) -> Self {
        Self { board }
    }

    /// Program one colour channel.  Nothing lights up until [`LedModule::play`].
    pub fn write_pattern(&self, color: LedColor, pattern: LedPattern) -> Result<()> {
        self.board
            .execute(ModuleCommand::LedWritePattern { color, pattern })
    }

    pub fn play(&self) -> Result<()> {
        self.board.execute(ModuleCommand::LedPlay)
    }

    /// Stop playback; with `clear` the programmed patterns are erased too.
    pub fn stop(&self, clear: bool) -> Result<()> {
        self.board.execute(ModuleCommand::LedStop { clear })
    }
}

#[derive(Debug)]
pub struct HapticModule {
    board: Arc<BoardHandle>,
}

impl HapticModule {
    pub(crate) fn new(board: Arc<BoardHandle>) -> Self {
        Self { board }
    }

    /// Drive the vibration motor at `duty_cycle_percent` (0–100) for `pulse_width_ms`.
    pub fn start_motor(&self, duty_cycle_percent: f32, pulse_width_ms: u16) -> Result<()> {
        if !(0.0..=100.0).contains(&duty_cycle_percent) {
            return Err(MetaWearError::Engine(format!(
                "duty cycle {duty_cycle_percent} outside 0..=100"
            )));
        }
        self.board.execute(ModuleCommand::HapticMotor {
            duty_cycle_percent,
            pulse_width_ms,
        })
    }

    pub fn start_buzzer(&self, pulse_width_ms: u16) -> Result<()> {
        self.board
            .execute(ModuleCommand::HapticBuzzer { pulse_width_ms })
    }
}

/// Accelerometer samples in g.
#[derive(Debug)]
pub struct AccelerometerModule {
    board: Arc<BoardHandle>,
    data: DataStream<CartesianFloat>,
}

impl AccelerometerModule {
    pub(crate) fn new(board: Arc<BoardHandle>) -> Self {
        Self {
            data: DataStream::new(Module::Accelerometer, Arc::clone(&board), as_cartesian),
            board,
        }
    }

    pub fn data_signal(&self) -> Result<DataSignal> {
        self.data.data_signal()
    }

    pub fn notifications(&self, handler: Option<Handler<CartesianFloat>>) -> Result<()> {
        self.data.notifications(handler)
    }

    pub fn subscribe<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(CartesianFloat) + Send + Sync + 'static,
    {
        self.data.subscribe(handler)
    }

    pub fn unsubscribe(&self) -> Result<()> {
        self.data.unsubscribe()
    }

    pub fn is_subscribed(&self) -> bool {
        self.data.is_subscribed()
    }

    pub fn start(&self) -> Result<()> {
        self.board.execute(ModuleCommand::AccelerometerStart)
    }

    pub fn stop(&self) -> Result<()> {
        self.board.execute(ModuleCommand::AccelerometerStop)
    }
}

/// Gyroscope samples in °/s.
#[derive(Debug)]
pub struct GyroscopeModule {
    board: Arc<BoardHandle>,
    data: DataStream<CartesianFloat>,
}

impl GyroscopeModule {
    pub(crate) fn new(board: Arc<BoardHandle>) -> Self {
        Self {
            data: DataStream::new(Module::Gyroscope, Arc::clone(&board), as_cartesian),
            board,
        }
    }

    pub fn data_signal(&self) -> Result<DataSignal> {
        self.data.data_signal()
    }

    pub fn notifications(&self, handler: Option<Handler<CartesianFloat>>) -> Result<()> {
        self.data.notifications(handler)
    }

    pub fn subscribe<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(CartesianFloat) + Send + Sync + 'static,
    {
        self.data.subscribe(handler)
    }

    pub fn unsubscribe(&self) -> Result<()> {
        self.data.unsubscribe()
    }

    pub fn is_subscribed(&self) -> bool {
        self.data.is_subscribed()
    }

    pub fn start(&self) -> Result<()> {
        self.board.execute(ModuleCommand::GyroscopeStart)
    }

    pub fn stop(&self) -> Result<()> {
        self.board.execute(ModuleCommand::GyroscopeStop)
    }
}
