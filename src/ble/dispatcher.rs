//! Callback dispatcher
//!
//! Radio stacks report every asynchronous completion as a [`GattEvent`]. An event
//! whose kind matches the pending operation resolves the gate; anything else is
//! unsolicited and is handed to the session listener after the lock is released.

use std::sync::Arc;

use super::gate::{OperationGate, PendingOperation};
use super::gatt::{GattCharacteristic, GattDescriptor, ProfileState, GATT_SUCCESS};
use super::status::{ConnectionState, ErrorKind};

/// Completion events delivered by a radio stack
#[derive(Debug, Clone)]
pub enum GattEvent {
    ConnectionStateChanged {
        address: String,
        status: i32,
        new_state: ProfileState,
    },
    ServicesDiscovered {
        status: i32,
    },
    CharacteristicRead {
        characteristic: GattCharacteristic,
        status: i32,
    },
    CharacteristicWrite {
        characteristic: GattCharacteristic,
        status: i32,
    },
    /// Notification or indication from the remote side
    CharacteristicChanged {
        characteristic: GattCharacteristic,
    },
    DescriptorRead {
        descriptor: GattDescriptor,
        status: i32,
    },
    DescriptorWrite {
        descriptor: GattDescriptor,
        status: i32,
    },
    ReliableWriteCompleted {
        status: i32,
    },
    ReadRemoteRssi {
        rssi: i32,
        status: i32,
    },
    MtuChanged {
        mtu: u16,
        status: i32,
    },
}

impl GattEvent {
    /// Operation kind this event completes
    pub fn kind(&self) -> PendingOperation {
        match self {
            GattEvent::ConnectionStateChanged { .. } => PendingOperation::Connect,
            GattEvent::ServicesDiscovered { .. } => PendingOperation::DiscoverServices,
            GattEvent::CharacteristicRead { .. } => PendingOperation::ReadCharacteristic,
            GattEvent::CharacteristicWrite { .. } => PendingOperation::WriteCharacteristic,
            GattEvent::CharacteristicChanged { .. } => PendingOperation::CharacteristicChanged,
            GattEvent::DescriptorRead { .. } => PendingOperation::ReadDescriptor,
            GattEvent::DescriptorWrite { .. } => PendingOperation::WriteDescriptor,
            GattEvent::ReliableWriteCompleted { .. } => PendingOperation::ReliableWriteCompleted,
            GattEvent::ReadRemoteRssi { .. } => PendingOperation::ReadRemoteRssi,
            GattEvent::MtuChanged { .. } => PendingOperation::MtuChanged,
        }
    }
}

/// Unsolicited session events for the owner of the manager
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Connection state changed with no connect/disconnect pending
    UnexpectedConnection {
        state: ConnectionState,
        force_closed: bool,
    },
    CharacteristicChanged(GattCharacteristic),
}

/// Receiver of unsolicited session events
pub type SessionListener = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Handle given to a radio stack when a link is opened
#[derive(Clone)]
pub struct GattCallbacks {
    gate: Arc<OperationGate>,
    listener: Option<SessionListener>,
}

impl GattCallbacks {
    pub fn new(gate: Arc<OperationGate>, listener: Option<SessionListener>) -> Self {
        Self { gate, listener }
    }

    /// Route one completion event
    pub fn dispatch(&self, event: GattEvent) {
        let kind = event.kind();
        match event {
            GattEvent::ConnectionStateChanged {
                address,
                status,
                new_state,
            } => self.on_connection_state_change(&address, status, new_state),
            GattEvent::ServicesDiscovered { status } => self.on_services_discovered(status),
            GattEvent::CharacteristicRead {
                characteristic,
                status,
            }
            | GattEvent::CharacteristicWrite {
                characteristic,
                status,
            } => {
                self.resolve(kind, status, |st| st.last_characteristic = Some(characteristic));
            }
            GattEvent::DescriptorRead { descriptor, status }
            | GattEvent::DescriptorWrite { descriptor, status } => {
                self.resolve(kind, status, |st| st.last_descriptor = Some(descriptor));
            }
            GattEvent::ReliableWriteCompleted { status } => {
                self.resolve(kind, status, |_| {});
            }
            GattEvent::ReadRemoteRssi { rssi, status } => {
                self.resolve(kind, status, |st| st.rssi = rssi);
            }
            GattEvent::MtuChanged { mtu, status } => {
                self.resolve(kind, status, |st| st.mtu = mtu);
            }
            GattEvent::CharacteristicChanged { characteristic } => {
                link_trace!("🔔 Characteristic changed: {}", characteristic.uuid);
                self.notify(SessionEvent::CharacteristicChanged(characteristic));
            }
        }
    }

    fn resolve(
        &self,
        kind: PendingOperation,
        status: i32,
        store: impl FnOnce(&mut super::gate::SessionState),
    ) {
        let resolved = self.gate.complete(kind, |st| {
            st.error = ErrorKind::from_gatt_status(status);
            st.extended_error = status;
            store(st);
        });
        if !resolved {
            link_debug!("📭 Dropping unsolicited {:?} (status {})", kind, status);
        }
    }

    fn on_connection_state_change(&self, address: &str, status: i32, new_state: ProfileState) {
        let (state, error) = if status == GATT_SUCCESS {
            match new_state {
                ProfileState::Connected => (ConnectionState::CONNECTED, ErrorKind::Ok),
                ProfileState::Disconnected => {
                    self.tear_down_link(address);
                    (ConnectionState::DISCONNECTED, ErrorKind::Ok)
                }
                ProfileState::Connecting | ProfileState::Disconnecting => {
                    link_trace!("🔄 Transitional profile state {:?} for {}", new_state, address);
                    return;
                }
            }
        } else {
            link_error!(
                "❌ Connection error {} for {}: {}",
                status,
                address,
                super::gatt_error::describe_connection_error(status)
            );
            (ConnectionState::DISCONNECTED, ErrorKind::Fail)
        };

        let resolved = self.gate.complete(PendingOperation::Connect, |st| {
            // keep SERVICES_DISCOVERED when a connect lands on a live session
            if state != ConnectionState::from_bits(st.state.bits() & ConnectionState::CONNECTED.bits()) {
                st.state = state;
            }
            st.error = error;
            st.extended_error = status;
        });
        if resolved {
            return;
        }

        let (state, force_closed) = self.gate.with_state(|st| {
            st.state = state;
            (st.state, st.force_closed)
        });
        link_info!("⚡ Unexpected connection event for {}: {}", address, state);
        self.notify(SessionEvent::UnexpectedConnection { state, force_closed });
    }

    fn on_services_discovered(&self, status: i32) {
        let apply = |st: &mut super::gate::SessionState| {
            if status == GATT_SUCCESS {
                st.state.mark_services_discovered();
            } else {
                st.state.clear_services_discovered();
            }
        };
        let resolved = self.gate.complete(PendingOperation::DiscoverServices, |st| {
            apply(st);
            st.error = ErrorKind::from_gatt_status(status);
            st.extended_error = status;
        });
        if !resolved {
            link_debug!("📭 Unsolicited service discovery result (status {})", status);
            self.gate.with_state(apply);
        }
    }

    /// Close a link the remote side dropped so no operation runs on a dead handle
    fn tear_down_link(&self, address: &str) {
        let link = self.gate.with_state(|st| {
            let matches = st.link.as_ref().map(|l| l.address() == address).unwrap_or(false);
            if matches {
                st.force_closed = true;
                st.link.take()
            } else {
                None
            }
        });
        if let Some(link) = link {
            link_info!("🔌 Closing link to {}", address);
            link.disconnect();
            link.close();
        }
    }

    fn notify(&self, event: SessionEvent) {
        if let Some(listener) = &self.listener {
            listener(event);
        }
    }
}
