//! # metawear-rs
//!
//! Async Rust client for [MbientLab MetaWear](https://mbientlab.com/) sensor
//! boards over Bluetooth Low Energy.
//!
//! The board speaks a proprietary command protocol that a vendor firmware
//! engine encodes and decodes.  This crate is everything around that engine:
//! finding the board, carrying GATT traffic for it, routing notifications
//! back into it, and decoding the tagged values it hands to per-module
//! callbacks.
//!
//! ```text
//! discover_devices ─► TransportAdapter::connect ─► HandleCache
//!                                                     │
//!          FirmwareEngine ◄── write/read callbacks ◄── MetaWearClient
//!                 ▲                                   │
//!  NotificationRouter ◄── (handle, bytes) ◄── backend notification task
//!                 │
//!        DataStream trampolines ─► decode_tagged ─► module handlers
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use metawear_rs::prelude::*;
//!
//! # async fn run(engine: Arc<dyn FirmwareEngine>) -> metawear_rs::error::Result<()> {
//! let boards = discover_devices(DEFAULT_SCAN_TIMEOUT, Some(METAWEAR_NAME_FILTER)).await?;
//! let Some(board) = boards.first() else { return Ok(()) };
//!
//! let client = MetaWearClient::connect(&board.address, engine, MetaWearClientConfig::default()).await?;
//! client.switch().subscribe(|pressed| println!("switch: {pressed}"))?;
//! client.accelerometer().subscribe(|xyz| println!("{:.3} {:.3} {:.3}", xyz.x, xyz.y, xyz.z))?;
//! client.accelerometer().start()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Enables |
//! |---|---|---|
//! | `btleplug` | ✓ | the cross-platform BLE backend, [`discovery`] and the `metawear-scan` binary |
//!
//! Without it, bring your own [`transport::TransportAdapter`] and call
//! [`metawear_client::MetaWearClient::connect_with`].
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`metawear_client`] | Connection state machine, init handshake and GATT worker |
//! | [`engine`] | The [`engine::FirmwareEngine`] boundary and module commands |
//! | [`modules`] | Switch, battery, LED, haptic, accelerometer and gyroscope facades |
//! | [`router`] | Notification demultiplexing and raw listener registry |
//! | [`parse`] | Tagged value decoder |
//! | [`transport`] | Backend-neutral transport trait and the btleplug backend |
//! | [`handle_cache`] | UUID → ATT handle index |
//! | [`discovery`] | Scanning and name filtering |
//! | [`protocol`] | GATT UUIDs, descriptor values and timing constants |
//! | [`types`] | Plain data types |
//! | [`error`] | [`error::MetaWearError`] |

pub mod discovery;
pub mod engine;
pub mod error;
pub mod handle_cache;
pub mod metawear_client;
pub mod modules;
pub mod parse;
pub mod protocol;
pub mod router;
pub mod transport;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Client ────────────────────────────────────────────────────────────────
    pub use crate::discovery::discover_devices;
    pub use crate::metawear_client::{MetaWearClient, MetaWearClientConfig};
    pub use crate::transport::{Backend, NotificationFraming, TransportAdapter};

    // ── Engine boundary ───────────────────────────────────────────────────────
    pub use crate::engine::{
        BoardId, BtleConnection, DataHandler, DataSignal, FirmwareEngine, InitCompleteFn, LedColor,
        LedPattern, LedPreset, Module, ModuleCommand, ReadFn, WriteFn,
    };

    // ── Data types ────────────────────────────────────────────────────────────
    pub use crate::error::MetaWearError;
    pub use crate::parse::decode_tagged;
    pub use crate::types::{
        BatteryState, BridgeState, CartesianFloat, ColorAdc, DeviceInformation, GattCharacteristic,
        PeripheralAddress, TaggedValue,
    };

    // ── Protocol constants ────────────────────────────────────────────────────
    pub use crate::protocol::{DEFAULT_SCAN_TIMEOUT, METAWEAR_NAME_FILTER};
}
