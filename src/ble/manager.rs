//! GATT operation executor
//!
//! [`BleManager`] turns the asynchronous, callback driven radio stack into
//! blocking calls. Each operation claims the gate, issues the stack request,
//! waits for the dispatcher (bounded by the operation timeout) and returns a
//! packed [`StatusCode`]. Expected failures never surface as `Err`.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::dispatcher::{GattCallbacks, SessionListener};
use super::gate::{OperationGate, PendingOperation};
use super::gatt::{
    GattCharacteristic, GattDescriptor, GattService, DISABLE_NOTIFICATION_VALUE,
    ENABLE_NOTIFICATION_VALUE,
};
use super::stack::{GattLink, GattStack};
use super::status::{ConnectionState, ErrorKind, StatusCode};

/// Default time to wait for a stack callback
pub const BLE_WAIT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Per-session tuning
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Upper bound on every wait for a callback
    pub op_timeout: Duration,

    /// Retry opening a link once with the opposite auto-connect flag
    pub retry_opposite_auto_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            op_timeout: BLE_WAIT_TIMEOUT,
            retry_opposite_auto_connect: true,
        }
    }
}

/// Synchronous GATT session with one remote device
pub struct BleManager {
    stack: Arc<dyn GattStack>,
    address: String,
    gate: Arc<OperationGate>,
    callbacks: GattCallbacks,
    config: SessionConfig,
}

impl BleManager {
    pub fn new(
        stack: Arc<dyn GattStack>,
        address: impl Into<String>,
        config: SessionConfig,
        listener: Option<SessionListener>,
    ) -> Self {
        let gate = Arc::new(OperationGate::new());
        let callbacks = GattCallbacks::new(Arc::clone(&gate), listener);
        Self {
            stack,
            address: address.into(),
            gate,
            callbacks,
            config,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.gate.state()
    }

    pub fn is_connected(&self) -> bool {
        self.gate.state().is_connected()
    }

    /// Operation currently holding the gate
    pub fn pending_operation(&self) -> PendingOperation {
        self.gate.pending()
    }

    /// Raw stack status of the last completed operation
    pub fn extended_error(&self) -> i32 {
        self.gate.with_state(|st| st.extended_error)
    }

    pub fn last_characteristic(&self) -> Option<GattCharacteristic> {
        self.gate.with_state(|st| st.last_characteristic.clone())
    }

    pub fn last_descriptor(&self) -> Option<GattDescriptor> {
        self.gate.with_state(|st| st.last_descriptor.clone())
    }

    pub fn rssi(&self) -> i32 {
        self.gate.with_state(|st| st.rssi)
    }

    pub fn mtu(&self) -> u16 {
        self.gate.with_state(|st| st.mtu)
    }

    /// True once the dispatcher has closed the link after a remote disconnect
    pub fn was_force_closed(&self) -> bool {
        self.gate.with_state(|st| st.force_closed)
    }

    fn code(&self, error: ErrorKind) -> StatusCode {
        StatusCode::new(error, self.gate.state())
    }

    /// Connect to the device, opening a link first if there is none
    pub fn connect(&self, auto_reconnect: bool) -> StatusCode {
        let Some(guard) = self.gate.begin_operation(PendingOperation::Connect) else {
            return self.code(ErrorKind::Noop);
        };

        let result = match self.gate.link() {
            None => {
                link_info!("🔗 Opening link to {} (auto_reconnect={})", self.address, auto_reconnect);
                self.gate.with_state(|st| st.force_closed = false);
                match self.open_link(auto_reconnect) {
                    Some(link) => {
                        self.gate.with_state(|st| st.link = Some(link));
                        guard.await_completion(self.config.op_timeout)
                    }
                    None => guard.reject(),
                }
            }
            Some(link) => {
                if self.gate.state().is_connected() {
                    guard.finish()
                } else if link.connect() {
                    guard.await_completion(self.config.op_timeout)
                } else {
                    guard.reject()
                }
            }
        };

        let status = result.status();
        link_info!("🔗 connect({}) -> {:?}", self.address, status);
        status
    }

    fn open_link(&self, auto_reconnect: bool) -> Option<Arc<dyn GattLink>> {
        if let Some(link) = self
            .stack
            .connect_gatt(&self.address, auto_reconnect, self.callbacks.clone())
        {
            return Some(link);
        }
        if !self.config.retry_opposite_auto_connect {
            return None;
        }
        link_warn!(
            "🔁 Stack refused link with auto_reconnect={}, retrying with {}",
            auto_reconnect,
            !auto_reconnect
        );
        self.stack
            .connect_gatt(&self.address, !auto_reconnect, self.callbacks.clone())
    }

    /// Run one gated operation against the current link
    fn run(&self, kind: PendingOperation, issue: impl FnOnce(&dyn GattLink) -> bool) -> StatusCode {
        let Some(link) = self.gate.link() else {
            return self.code(ErrorKind::NoGatt);
        };
        let Some(guard) = self.gate.begin_operation(kind) else {
            return self.code(ErrorKind::Noop);
        };
        let result = if issue(link.as_ref()) {
            guard.await_completion(self.config.op_timeout)
        } else {
            guard.reject()
        };
        link_debug!("📶 {:?} -> {:?}", kind, result);
        result.status()
    }

    /// Disconnect the link. An already disconnected session returns at once
    /// without a trip to the stack, which would have nothing to report.
    pub fn disconnect(&self) -> StatusCode {
        let Some(link) = self.gate.link() else {
            return self.code(ErrorKind::NoGatt);
        };
        let Some(guard) = self.gate.begin_operation(PendingOperation::Connect) else {
            return self.code(ErrorKind::Noop);
        };

        let result = if self.gate.state().is_disconnected() {
            guard.finish()
        } else if link.disconnect() {
            guard.await_completion(self.config.op_timeout)
        } else {
            guard.reject()
        };

        let status = result.status();
        link_info!("🔌 disconnect({}) -> {:?}", self.address, status);
        status
    }

    /// Disconnect if needed, then drop the link and clear every cached result.
    ///
    /// Returns false if the session could not be brought to DISCONNECTED.
    pub fn reset(&self) -> bool {
        if !self.gate.state().is_disconnected() {
            self.disconnect();
        }

        let link = self.gate.with_state(|st| {
            if !st.state.is_disconnected() {
                return Err(());
            }
            st.clear_results();
            Ok(st.link.take())
        });

        match link {
            Err(()) => {
                link_warn!("⚠️ Reset of {} failed, session still {}", self.address, self.gate.state());
                false
            }
            Ok(link) => {
                if let Some(link) = link {
                    link.close();
                }
                true
            }
        }
    }

    pub fn discover_services(&self) -> StatusCode {
        self.run(PendingOperation::DiscoverServices, |link| link.discover_services())
    }

    /// Look up a discovered service; `None` until discovery has succeeded
    pub fn service(&self, uuid: &Uuid) -> Option<GattService> {
        self.services()?.into_iter().find(|s| &s.uuid == uuid)
    }

    pub fn services(&self) -> Option<Vec<GattService>> {
        let (state, link) = self.gate.with_state(|st| (st.state, st.link.clone()));
        if !state.services_discovered() {
            return None;
        }
        link.map(|l| l.services())
    }

    /// Read a characteristic; the value is available from [`Self::last_characteristic`]
    pub fn read_characteristic(&self, characteristic: &GattCharacteristic) -> StatusCode {
        self.run(PendingOperation::ReadCharacteristic, |link| {
            link.read_characteristic(characteristic)
        })
    }

    pub fn write_characteristic(&self, characteristic: &GattCharacteristic) -> StatusCode {
        self.run(PendingOperation::WriteCharacteristic, |link| {
            link.write_characteristic(characteristic)
        })
    }

    pub fn read_descriptor(&self, descriptor: &GattDescriptor) -> StatusCode {
        self.run(PendingOperation::ReadDescriptor, |link| link.read_descriptor(descriptor))
    }

    pub fn write_descriptor(&self, descriptor: &GattDescriptor) -> StatusCode {
        self.run(PendingOperation::WriteDescriptor, |link| link.write_descriptor(descriptor))
    }

    /// Toggle local routing, then write the configuration descriptor.
    ///
    /// The enable/disable value is only set on the descriptor when the local
    /// toggle succeeds; otherwise the descriptor is written with the value it
    /// came with. The two outcomes are OR-ed together, so a failure in one
    /// step can be hidden by the other's bits.
    pub fn enable_characteristic_notification(
        &self,
        characteristic: &GattCharacteristic,
        descriptor: &GattDescriptor,
        enable: bool,
    ) -> StatusCode {
        let Some(link) = self.gate.link() else {
            return self.code(ErrorKind::NoGatt);
        };

        let mut descriptor = descriptor.clone();
        let local = if link.set_characteristic_notification(characteristic, enable) {
            descriptor.value = if enable {
                ENABLE_NOTIFICATION_VALUE.to_vec()
            } else {
                DISABLE_NOTIFICATION_VALUE.to_vec()
            };
            self.code(ErrorKind::Ok)
        } else {
            link_warn!("⚠️ Local notification toggle refused for {}", characteristic.uuid);
            self.code(ErrorKind::Noop)
        };

        self.write_descriptor(&descriptor) | local
    }

    pub fn read_remote_rssi(&self) -> StatusCode {
        self.run(PendingOperation::ReadRemoteRssi, |link| link.read_remote_rssi())
    }

    pub fn request_mtu(&self, mtu: u16) -> StatusCode {
        self.run(PendingOperation::MtuChanged, |link| link.request_mtu(mtu))
    }

    pub fn execute_reliable_write(&self) -> StatusCode {
        self.run(PendingOperation::ReliableWriteCompleted, |link| {
            link.execute_reliable_write()
        })
    }
}

impl Drop for BleManager {
    fn drop(&mut self) {
        // the link holds our callbacks, break the cycle
        if let Some(link) = self.gate.with_state(|st| st.link.take()) {
            link.close();
        }
    }
}
