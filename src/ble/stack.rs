//! Radio stack seam
//!
//! The session manager drives any platform BLE stack through these two traits.
//! Every request method only *starts* an asynchronous operation: it returns
//! `false` when the stack refuses it outright, otherwise the outcome arrives
//! later through the [`GattCallbacks`] handed over when the link was opened.

use std::sync::Arc;

use super::dispatcher::GattCallbacks;
use super::gatt::{GattCharacteristic, GattDescriptor, GattService};

/// Opens links to remote devices
pub trait GattStack: Send + Sync {
    /// Open a link to `address` and start connecting.
    ///
    /// Returns `None` if the stack cannot open a link in the requested mode.
    fn connect_gatt(
        &self,
        address: &str,
        auto_connect: bool,
        callbacks: GattCallbacks,
    ) -> Option<Arc<dyn GattLink>>;
}

/// One client link to a remote GATT server
pub trait GattLink: Send + Sync {
    /// Remote device address
    fn address(&self) -> String;

    /// Reconnect an existing link
    fn connect(&self) -> bool;

    fn disconnect(&self) -> bool;

    /// Release the link; no further callbacks are delivered
    fn close(&self);

    fn discover_services(&self) -> bool;

    /// Services known from the last discovery
    fn services(&self) -> Vec<GattService>;

    fn read_characteristic(&self, characteristic: &GattCharacteristic) -> bool;

    fn write_characteristic(&self, characteristic: &GattCharacteristic) -> bool;

    fn read_descriptor(&self, descriptor: &GattDescriptor) -> bool;

    fn write_descriptor(&self, descriptor: &GattDescriptor) -> bool;

    /// Toggle local delivery of notifications for `characteristic`. Synchronous.
    fn set_characteristic_notification(&self, characteristic: &GattCharacteristic, enable: bool) -> bool;

    fn read_remote_rssi(&self) -> bool {
        false
    }

    fn request_mtu(&self, _mtu: u16) -> bool {
        false
    }

    fn execute_reliable_write(&self) -> bool {
        false
    }
}
