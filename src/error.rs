//! Error type shared by every layer of the client.
//!
//! Transport failures are never retried here; they propagate to whoever
//! triggered the operation (discovery, connect, read, write).  Decode failures
//! abandon the single callback invocation they occurred in.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::engine::Module;
use crate::types::BridgeState;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MetaWearError>;

#[derive(Debug, Error)]
pub enum MetaWearError {
    /// The OS refused to let this process scan (missing capability / permission).
    #[error("insufficient permission for BLE access: {0}")]
    Permission(String),

    /// The link did not come up within the connect deadline.
    #[error("could not establish a connection to {address} within {timeout:?}")]
    ConnectionTimeout { address: String, timeout: Duration },

    /// Read, write or scan I/O failure at the BLE layer.
    #[error("BLE transport error: {0}")]
    Transport(String),

    /// The UUID is absent from the handle cache (firmware/protocol mismatch).
    #[error("unknown characteristic {0}")]
    UnknownCharacteristic(Uuid),

    /// The decoder saw a type tag it has no mapping for.
    #[error("unrecognized data type id: 0x{0:02x}")]
    UnrecognizedDataType(u8),

    /// The value region is shorter than its tag requires.
    #[error("truncated {data_type} value: expected {expected} bytes, got {actual}")]
    Truncated {
        data_type: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A byte array too long for its one-byte length prefix.
    #[error("byte array of {0} bytes does not fit a one-byte length prefix")]
    PayloadTooLarge(usize),

    /// The capability needs a backend that was not selected or compiled in.
    #[error("{0} is not available")]
    NotAvailable(&'static str),

    /// The bridge is not in a state that permits the operation.
    #[error("board is {0}; operation requires a ready board")]
    State(BridgeState),

    /// The firmware engine never reported itself initialized.
    #[error("firmware engine did not finish initializing within {0:?}")]
    InitTimeout(Duration),

    /// The firmware engine does not expose the requested module.
    #[error("{0} module is not available on this board")]
    ModuleUnavailable(Module),

    /// The firmware engine rejected a call.
    #[error("firmware engine error: {0}")]
    Engine(String),
}

#[cfg(feature = "btleplug")]
impl From<btleplug::Error> for MetaWearError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => MetaWearError::Permission(err.to_string()),
            other => MetaWearError::Transport(other.to_string()),
        }
    }
}
