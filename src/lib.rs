//! microbit-link - BLE session layer for a BBC micro:bit companion app
//!
//! Drives a paired micro:bit over GATT: a synchronous, one-operation-at-a-time
//! executor on top of a callback based radio stack, the requirement
//! negotiation that tells both sides which events the other wants, and a
//! service worker that keeps the session up and forwards board events.

#[macro_use]
mod logging;

pub mod ble;
pub mod config;
pub mod host;
pub mod microbit;
pub mod service;
pub mod storage;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use config::LinkConfig;
pub use host::{ChannelHost, HostMessage, HostMessenger, PluginDispatcher};
pub use logging::{init_logging, parse_log_level};
pub use service::{BleService, ServiceCommand, ServiceError, ServiceHandle};
pub use storage::{ConnectedDevice, JsonDeviceStore, MemoryDeviceStore, PairedDeviceStore};

/// A running link to the paired micro:bit
pub struct MicrobitLink {
    store: Arc<dyn PairedDeviceStore>,
    service: ServiceHandle,
}

impl MicrobitLink {
    /// Start the service worker; host messages arrive on the returned receiver
    pub fn start(
        stack: Arc<dyn ble::GattStack>,
        store: Arc<dyn PairedDeviceStore>,
        config: LinkConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<HostMessage>), MicrobitLinkError> {
        config.validate()?;
        let (host, messages) = ChannelHost::new();
        let host = Arc::new(host);

        let service = BleService::spawn(
            stack,
            Arc::clone(&store),
            host.clone(),
            host,
            config,
        )?;

        Ok((Self { store, service }, messages))
    }

    /// Start with the JSON store in `config.storage_dir`
    pub fn open(
        stack: Arc<dyn ble::GattStack>,
        config: LinkConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<HostMessage>), MicrobitLinkError> {
        let store = Arc::new(JsonDeviceStore::new(&config.storage_dir)?);
        Self::start(stack, store, config)
    }

    /// Remember `device` as the paired board
    pub fn pair(&self, device: &ConnectedDevice) -> Result<(), MicrobitLinkError> {
        link_info!("🤝 Pairing with {:?}", device.address);
        self.store.save(Some(device))?;
        Ok(())
    }

    pub fn paired_device(&self) -> Result<Option<ConnectedDevice>, MicrobitLinkError> {
        Ok(self.store.load()?)
    }

    pub fn forget(&self) -> Result<(), MicrobitLinkError> {
        self.store.save(None)?;
        Ok(())
    }

    pub fn connect(&self, just_paired: bool) -> Result<(), MicrobitLinkError> {
        Ok(self.service.connect(just_paired)?)
    }

    pub fn disconnect(&self) -> Result<(), MicrobitLinkError> {
        Ok(self.service.disconnect()?)
    }

    pub fn reconnect(&self) -> Result<(), MicrobitLinkError> {
        Ok(self.service.reconnect()?)
    }

    /// Write an integer to a characteristic of the connected board
    pub fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: i64,
        format: ble::GattFormat,
    ) -> Result<(), MicrobitLinkError> {
        Ok(self
            .service
            .write_characteristic(service, characteristic, value, format)?)
    }

    /// Stop the worker, disconnecting first if needed
    pub fn shutdown(self) {
        self.service.shutdown();
    }
}

/// Error types for microbit-link operations
#[derive(Error, Debug)]
pub enum MicrobitLinkError {
    #[error("BLE error: {0}")]
    Ble(#[from] ble::BleError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Negotiation error: {0}")]
    Negotiation(#[from] microbit::NegotiationError),
}
