//! Host collaborators
//!
//! The session layer reports to two outside parties: the messenger that tells
//! the rest of the app about connection changes and board requests, and the
//! plugin layer that owns the phone-side event sources. Both are injected.

use tokio::sync::mpsc;

use crate::microbit::events::{EventCategory, RegistrationId};
use crate::microbit::requirements::DeviceRequirement;

/// Connection and board notifications for the app
pub trait HostMessenger: Send + Sync {
    fn gatt_connected(&self, address: &str);

    /// `error_code` is 0 for an orderly disconnect
    fn gatt_disconnected(&self, address: &str, error_code: i32, message: &str);

    fn firmware_version(&self, version: &str);

    fn device_requirement(&self, requirement: DeviceRequirement);
}

/// Phone-side event sources
pub trait PluginDispatcher: Send + Sync {
    /// Turn one local event source on or off
    fn register(&self, category: EventCategory, registration: RegistrationId, enable: bool);

    /// Hand a board event to the plugin for `category`
    fn forward_event(&self, category: EventCategory, event: u16);
}

/// Everything a host can be told, as one message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    GattConnected {
        address: String,
    },
    GattDisconnected {
        address: String,
        error_code: i32,
        message: String,
    },
    FirmwareVersion(String),
    DeviceRequirement(DeviceRequirement),
    Register {
        category: EventCategory,
        registration: RegistrationId,
        enable: bool,
    },
    ForwardEvent {
        category: EventCategory,
        event: u16,
    },
}

/// Host that turns every call into a [`HostMessage`] on a channel
#[derive(Clone)]
pub struct ChannelHost {
    tx: mpsc::UnboundedSender<HostMessage>,
}

impl ChannelHost {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, message: HostMessage) {
        if self.tx.send(message).is_err() {
            link_debug!("📪 Host receiver dropped, message discarded");
        }
    }
}

impl HostMessenger for ChannelHost {
    fn gatt_connected(&self, address: &str) {
        self.send(HostMessage::GattConnected {
            address: address.to_string(),
        });
    }

    fn gatt_disconnected(&self, address: &str, error_code: i32, message: &str) {
        self.send(HostMessage::GattDisconnected {
            address: address.to_string(),
            error_code,
            message: message.to_string(),
        });
    }

    fn firmware_version(&self, version: &str) {
        self.send(HostMessage::FirmwareVersion(version.to_string()));
    }

    fn device_requirement(&self, requirement: DeviceRequirement) {
        self.send(HostMessage::DeviceRequirement(requirement));
    }
}

impl PluginDispatcher for ChannelHost {
    fn register(&self, category: EventCategory, registration: RegistrationId, enable: bool) {
        self.send(HostMessage::Register {
            category,
            registration,
            enable,
        });
    }

    fn forward_event(&self, category: EventCategory, event: u16) {
        self.send(HostMessage::ForwardEvent { category, event });
    }
}
