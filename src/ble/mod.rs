//! Bluetooth Low Energy GATT session layer
//!
//! A synchronous GATT client built over an asynchronous radio stack: the
//! operation gate, the connection state bits, the executor and the callback
//! dispatcher, plus the stacks it can drive (simulated and btleplug).

pub mod dispatcher;
pub mod gate;
pub mod gatt;
pub mod gatt_error;
pub mod manager;
pub mod simulated;
pub mod stack;
pub mod status;

#[cfg(feature = "ble")]
pub mod btleplug_stack;

use thiserror::Error;

pub use dispatcher::{GattCallbacks, GattEvent, SessionEvent, SessionListener};
pub use gate::{OperationGate, PendingOperation};
pub use gatt::{GattCharacteristic, GattDescriptor, GattFormat, GattService, ProfileState};
pub use manager::{BleManager, SessionConfig, BLE_WAIT_TIMEOUT};
pub use simulated::SimulatedMicrobit;
pub use stack::{GattLink, GattStack};
pub use status::{ConnectionState, ErrorKind, StatusCode};

#[cfg(feature = "ble")]
pub use btleplug_stack::BtleplugStack;

/// BLE errors raised while setting up a real radio stack
#[derive(Error, Debug)]
pub enum BleError {
    #[error("BLE manager initialization failed: {0}")]
    ManagerInit(String),

    #[error("BLE adapter not found")]
    NoAdapter,

    #[error("BLE scanning failed: {0}")]
    ScanningFailed(String),

    #[error("BLE peripheral not found: {0}")]
    PeripheralNotFound(String),
}

#[cfg(feature = "ble")]
impl From<btleplug::Error> for BleError {
    fn from(err: btleplug::Error) -> Self {
        BleError::ManagerInit(err.to_string())
    }
}
