//! BLE service worker
//!
//! Owns the [`BleManager`] for the paired micro:bit and serialises everything
//! that touches it: host commands and the manager's unsolicited session events
//! arrive on one channel and are handled in order on a dedicated thread, so
//! blocking GATT calls never run on a callback thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ble::gatt_error;
use crate::ble::{
    BleManager, ConnectionState, GattFormat, GattStack, SessionEvent, SessionListener, StatusCode,
};
use crate::config::LinkConfig;
use crate::host::{HostMessenger, PluginDispatcher};
use crate::microbit::events::MicrobitEvent;
use crate::microbit::negotiation::{write_int_characteristic, NegotiationError, Negotiator};
use crate::storage::{PairedDeviceStore, StorageError};

/// Requests the host can make of the service
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCommand {
    /// Connect to the paired board; `just_paired` waits for the board to settle first
    Connect { just_paired: bool },
    Disconnect,
    Reconnect,
    WriteCharacteristic {
        service: Uuid,
        characteristic: Uuid,
        value: i64,
        format: GattFormat,
    },
    Shutdown,
}

enum ServiceInput {
    Command(ServiceCommand),
    /// Session event tagged with the id of the manager that raised it
    Session(u64, SessionEvent),
}

/// Service level failures, each with the numeric code reported to the host
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Operation timed out")]
    TimedOut,

    #[error("GATT failure {status}: {message}")]
    Gatt { status: i32, message: String },

    #[error("Unexpected connection state: {0}")]
    UnexpectedState(ConnectionState),

    #[error("No paired micro:bit")]
    NoPairedDevice,

    #[error("Operation not attempted: {0:?}")]
    NotAttempted(StatusCode),

    #[error("Negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Service stopped")]
    Stopped,

    #[error("Failed to start service worker: {0}")]
    Spawn(String),
}

impl ServiceError {
    /// Code passed to [`HostMessenger::gatt_disconnected`]
    pub fn code(&self) -> i32 {
        match self {
            ServiceError::TimedOut => 10,
            ServiceError::Gatt { .. } => 99,
            ServiceError::UnexpectedState(_) | ServiceError::Negotiation(_) => 1,
            ServiceError::NoPairedDevice => 2,
            ServiceError::NotAttempted(status) => status.raw() as i32,
            ServiceError::Storage(_) | ServiceError::Stopped | ServiceError::Spawn(_) => 99,
        }
    }
}

/// Classify an executor result against the state bits the caller expects.
///
/// `extended_error` is the raw stack status, used for the message on failure.
pub fn interpret_code(
    status: StatusCode,
    good: ConnectionState,
    extended_error: i32,
) -> Result<(), ServiceError> {
    if status.is_noop() || status.is_nogatt() {
        return Err(ServiceError::NotAttempted(status));
    }
    if status.is_timeout() {
        return Err(ServiceError::TimedOut);
    }
    if status.is_fail() {
        return Err(ServiceError::Gatt {
            status: extended_error,
            message: gatt_error::describe(extended_error).to_string(),
        });
    }
    if status.state().bits() & good.bits() == 0 {
        return Err(ServiceError::UnexpectedState(status.state()));
    }
    Ok(())
}

/// Handle to a running service worker. Dropping it stops the worker.
pub struct ServiceHandle {
    tx: mpsc::UnboundedSender<ServiceInput>,
    worker: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    pub fn send(&self, command: ServiceCommand) -> Result<(), ServiceError> {
        self.tx
            .send(ServiceInput::Command(command))
            .map_err(|_| ServiceError::Stopped)
    }

    pub fn connect(&self, just_paired: bool) -> Result<(), ServiceError> {
        self.send(ServiceCommand::Connect { just_paired })
    }

    pub fn disconnect(&self) -> Result<(), ServiceError> {
        self.send(ServiceCommand::Disconnect)
    }

    pub fn reconnect(&self) -> Result<(), ServiceError> {
        self.send(ServiceCommand::Reconnect)
    }

    pub fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: i64,
        format: GattFormat,
    ) -> Result<(), ServiceError> {
        self.send(ServiceCommand::WriteCharacteristic {
            service,
            characteristic,
            value,
            format,
        })
    }

    /// Stop the worker and wait for it to finish the command in hand
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.tx.send(ServiceInput::Command(ServiceCommand::Shutdown));
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                link_error!("❌ BLE service worker panicked");
            }
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The worker's state
pub struct BleService {
    stack: Arc<dyn GattStack>,
    store: Arc<dyn PairedDeviceStore>,
    messenger: Arc<dyn HostMessenger>,
    plugins: Arc<dyn PluginDispatcher>,
    config: LinkConfig,
    manager: Option<BleManager>,
    /// Bumped for every new manager; events from older ones are stale
    session_id: u64,
    tx: mpsc::UnboundedSender<ServiceInput>,
}

impl BleService {
    /// Start the worker thread
    pub fn spawn(
        stack: Arc<dyn GattStack>,
        store: Arc<dyn PairedDeviceStore>,
        messenger: Arc<dyn HostMessenger>,
        plugins: Arc<dyn PluginDispatcher>,
        config: LinkConfig,
    ) -> Result<ServiceHandle, ServiceError> {
        let (mut service, mut rx) = Self::new(stack, store, messenger, plugins, config);
        let tx = service.tx.clone();

        let worker = thread::Builder::new()
            .name("ble-service".to_string())
            .spawn(move || {
                link_info!("🚀 BLE service started");
                while let Some(input) = rx.blocking_recv() {
                    match input {
                        ServiceInput::Command(ServiceCommand::Shutdown) => break,
                        ServiceInput::Command(command) => service.handle_command(command),
                        ServiceInput::Session(id, event) => service.handle_session_event(id, event),
                    }
                }
                service.stop();
                link_info!("🛑 BLE service stopped");
            })
            .map_err(|e| ServiceError::Spawn(e.to_string()))?;

        Ok(ServiceHandle {
            tx,
            worker: Some(worker),
        })
    }

    fn new(
        stack: Arc<dyn GattStack>,
        store: Arc<dyn PairedDeviceStore>,
        messenger: Arc<dyn HostMessenger>,
        plugins: Arc<dyn PluginDispatcher>,
        config: LinkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceInput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = BleService {
            stack,
            store,
            messenger,
            plugins,
            config,
            manager: None,
            session_id: 0,
            tx,
        };
        (service, rx)
    }

    fn handle_command(&mut self, command: ServiceCommand) {
        link_debug!("📨 Service command: {:?}", command);
        match command {
            ServiceCommand::Connect { just_paired } => {
                if just_paired {
                    link_info!("⏳ Just paired, waiting {:?} before connecting", self.config.just_paired_delay());
                    thread::sleep(self.config.just_paired_delay());
                }
                self.setup();
            }
            ServiceCommand::Disconnect => {
                let address = self.current_address();
                if self.reset() {
                    self.set_status(false);
                    self.messenger.gatt_disconnected(&address, 0, "");
                }
            }
            ServiceCommand::Reconnect => {
                if self.reset() {
                    self.setup();
                }
            }
            ServiceCommand::WriteCharacteristic {
                service,
                characteristic,
                value,
                format,
            } => self.write_characteristic(&service, &characteristic, value, format),
            ServiceCommand::Shutdown => {}
        }
    }

    fn handle_session_event(&mut self, session_id: u64, event: SessionEvent) {
        if self.manager.is_none() || session_id != self.session_id {
            link_debug!("Dropping stale session event (session {}): {:?}", session_id, event);
            return;
        }
        match event {
            SessionEvent::UnexpectedConnection {
                state,
                force_closed,
            } => self.handle_unexpected_connection(state, force_closed),
            SessionEvent::CharacteristicChanged(characteristic) => {
                let Some(value) = characteristic.int_value(GattFormat::Uint32, 0) else {
                    return;
                };
                let Some(event) = MicrobitEvent::from_value(value as u32) else {
                    return;
                };
                link_debug!("🔔 {} value {:#010x} -> {:?}", characteristic.uuid, value, event);
                match event.category() {
                    Some(category) if category.is_forwarded() => {
                        self.plugins.forward_event(category, event.event)
                    }
                    _ => link_warn!("⚠️ unknown category: {}", event.source),
                }
            }
        }
    }

    fn handle_unexpected_connection(&mut self, state: ConnectionState, force_closed: bool) {
        link_info!("⚡ Unexpected connection event: {} (force_closed={})", state, force_closed);
        let address = self.current_address();

        if state.is_connected() {
            let result = self.discover().and_then(|()| self.negotiate(true));
            match result {
                Ok(()) => {
                    self.set_status(true);
                    self.messenger.gatt_connected(&address);
                }
                Err(e) => link_warn!("⚠️ Re-establishing session failed: {}", e),
            }
        } else if state.is_disconnected() {
            self.set_status(false);
            self.messenger.gatt_disconnected(&address, 0, "");
        }
    }

    /// Resolve the paired board, build a manager if needed and connect
    fn setup(&mut self) {
        if self.manager.is_none() {
            let address = match self.paired_address() {
                Ok(address) => address,
                Err(e) => {
                    link_error!("❌ Cannot set up BLE: {}", e);
                    self.messenger.gatt_disconnected("", e.code(), &e.to_string());
                    return;
                }
            };
            self.session_id += 1;
            let session_id = self.session_id;
            let tx = self.tx.clone();
            let listener: SessionListener = Arc::new(move |event: SessionEvent| {
                let _ = tx.send(ServiceInput::Session(session_id, event));
            });
            self.manager = Some(BleManager::new(
                Arc::clone(&self.stack),
                address,
                self.config.session_config(),
                Some(listener),
            ));
        }
        self.startup_connection();
    }

    fn paired_address(&self) -> Result<String, ServiceError> {
        self.store
            .load()?
            .and_then(|device| device.address)
            .ok_or(ServiceError::NoPairedDevice)
    }

    fn startup_connection(&mut self) {
        let address = self.current_address();
        link_info!("🔗 Starting connection to {}", address);

        let result = self
            .connect()
            .and_then(|()| self.discover())
            .and_then(|()| self.negotiate(true));

        match result {
            Ok(()) => {
                self.set_status(true);
                if let Err(e) = self.store.update_connection_time(Utc::now()) {
                    link_warn!("⚠️ Cannot record connection time: {}", e);
                }
                link_info!("✅ Connected to {}", address);
                self.messenger.gatt_connected(&address);
            }
            Err(e) => {
                link_error!("❌ Startup connection to {} failed (code {}): {}", address, e.code(), e);
                self.reset();
                self.set_status(false);
                self.messenger.gatt_disconnected(&address, e.code(), &e.to_string());
            }
        }
    }

    fn connect(&self) -> Result<(), ServiceError> {
        let manager = self.manager()?;
        let status = manager.connect(self.config.auto_reconnect);
        interpret_code(status, ConnectionState::CONNECTED, manager.extended_error())
    }

    fn discover(&self) -> Result<(), ServiceError> {
        let manager = self.manager()?;
        let status = manager.discover_services();
        interpret_code(
            status,
            ConnectionState::SERVICES_DISCOVERED,
            manager.extended_error(),
        )
    }

    fn negotiate(&self, enable: bool) -> Result<(), ServiceError> {
        let manager = self.manager()?;
        let report = Negotiator::new(manager, self.messenger.as_ref(), self.plugins.as_ref())
            .with_max_requirement_reads(self.config.max_requirement_reads)
            .run(enable)?;

        if let Some(firmware) = report.firmware.filter(|f| !f.is_empty()) {
            if let Err(e) = self.store.update_firmware(&firmware) {
                link_warn!("⚠️ Cannot record firmware version: {}", e);
            }
        }
        Ok(())
    }

    fn write_characteristic(&self, service: &Uuid, characteristic: &Uuid, value: i64, format: GattFormat) {
        let Some(manager) = self.manager.as_ref().filter(|m| m.is_connected()) else {
            link_debug!("write_characteristic: not connected, dropping write to {}", characteristic);
            return;
        };
        match write_int_characteristic(manager, service, characteristic, value, format) {
            Ok(status) => {
                let result = interpret_code(status, ConnectionState::CONNECTED, manager.extended_error());
                link_info!("✍️ Wrote {} to {} -> {:?}", value, characteristic, result);
            }
            Err(e) => link_warn!("⚠️ write_characteristic: {}", e),
        }
    }

    /// Switch notifications off, disconnect and drop the manager.
    ///
    /// True when there was nothing to reset or the reset succeeded.
    fn reset(&mut self) -> bool {
        let Some(manager) = self.manager.as_ref() else {
            return true;
        };
        if manager.is_connected() {
            if let Err(e) = self.negotiate(false) {
                link_debug!("Unregistering notifications failed: {}", e);
            }
        }
        let ok = manager.reset();
        if ok {
            self.manager = None;
        }
        ok
    }

    fn stop(&mut self) {
        if self.manager.is_some() && !self.reset() {
            link_warn!("⚠️ Session not reset cleanly on shutdown");
        }
        self.manager = None;
    }

    fn manager(&self) -> Result<&BleManager, ServiceError> {
        self.manager.as_ref().ok_or(ServiceError::Stopped)
    }

    fn current_address(&self) -> String {
        self.manager
            .as_ref()
            .map(|m| m.address().to_string())
            .unwrap_or_default()
    }

    fn set_status(&self, connected: bool) {
        if let Err(e) = self.store.set_status(connected) {
            link_warn!("⚠️ Cannot update device status: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::ErrorKind;

    #[test]
    fn test_interpret_code_classes() {
        let connected = ConnectionState::CONNECTED;
        assert!(interpret_code(StatusCode::new(ErrorKind::Ok, connected), connected, 0).is_ok());

        let timed_out = interpret_code(StatusCode::from_raw(0x0003_0001), connected, 0).unwrap_err();
        assert_eq!(timed_out.code(), 10);

        let failed = interpret_code(StatusCode::from_raw(0x0001_0001), connected, 0x85).unwrap_err();
        assert_eq!(failed.code(), 99);
        assert!(matches!(failed, ServiceError::Gatt { status: 0x85, .. }));

        let wrong_state = interpret_code(
            StatusCode::new(ErrorKind::Ok, connected),
            ConnectionState::SERVICES_DISCOVERED,
            0,
        )
        .unwrap_err();
        assert_eq!(wrong_state.code(), 1);

        let busy = interpret_code(StatusCode::from_raw(0xFFFF_0001), connected, 0).unwrap_err();
        assert_eq!(busy.code(), 0xFFFF_0001_u32 as i32);
    }

    #[test]
    fn test_no_paired_device_code() {
        assert_eq!(ServiceError::NoPairedDevice.code(), 2);
    }

    #[test]
    fn test_events_from_a_replaced_manager_are_dropped() {
        use crate::ble::SimulatedMicrobit;
        use crate::host::{ChannelHost, HostMessage};
        use crate::storage::{ConnectedDevice, MemoryDeviceStore};

        let address = "E4:D1:2A:33:10:9C";
        let board = SimulatedMicrobit::new(address);
        let store = Arc::new(MemoryDeviceStore::new(Some(ConnectedDevice::new(
            "BBC micro:bit [zuvip]",
            "zuvip",
            address,
            0,
        ))));
        let (host, mut messages) = ChannelHost::new();
        let host = Arc::new(host);
        let config = LinkConfig {
            op_timeout_ms: 2_000,
            just_paired_delay_ms: 0,
            ..LinkConfig::default()
        };
        let (mut service, _inputs) =
            BleService::new(Arc::new(board.clone()), store.clone(), host.clone(), host, config);

        service.handle_command(ServiceCommand::Connect { just_paired: false });
        assert_eq!(service.session_id, 1);
        service.handle_command(ServiceCommand::Reconnect);
        assert_eq!(service.session_id, 2);
        assert!(service.manager.as_ref().map(|m| m.is_connected()).unwrap_or(false));
        while messages.try_recv().is_ok() {}

        // queued by the first manager, handled after the reconnect
        let dropped = SessionEvent::UnexpectedConnection {
            state: ConnectionState::DISCONNECTED,
            force_closed: true,
        };
        service.handle_session_event(1, dropped.clone());
        assert!(messages.try_recv().is_err());
        assert!(store.load().unwrap().unwrap().status);

        service.handle_session_event(2, dropped);
        match messages.try_recv() {
            Ok(HostMessage::GattDisconnected { error_code, .. }) => assert_eq!(error_code, 0),
            other => panic!("unexpected host message {:?}", other),
        }
        assert!(!store.load().unwrap().unwrap().status);

        service.stop();
    }
}
