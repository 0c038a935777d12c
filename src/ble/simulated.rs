//! In-process micro:bit simulator
//!
//! A [`GattStack`] that behaves like a paired board: it exposes the device
//! information and event services, serves a scripted requirement queue and
//! records what the client wrote. Callbacks are delivered from freshly spawned
//! threads, the way a platform stack calls back on its own threads. Each
//! operation's reaction can be scripted with a [`Response`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use super::dispatcher::{GattCallbacks, GattEvent};
use super::gatt::{
    CharacteristicProperty, GattCharacteristic, GattDescriptor, GattService, ProfileState,
    ENABLE_NOTIFICATION_VALUE, GATT_SUCCESS,
};
use super::stack::{GattLink, GattStack};
use crate::microbit::requirements::RequirementRecord;
use crate::microbit::uuids::{
    CLIENT_CHARACTERISTIC_CONFIG, DEVICE_INFORMATION_SERVICE, ES_CLIENT_EVENT, ES_CLIENT_REQUIREMENTS,
    ES_MICROBIT_EVENT, ES_MICROBIT_REQUIREMENTS, EVENT_SERVICE, FIRMWARE_REVISION,
};

/// Largest MTU the simulated board accepts
pub const SIM_MAX_MTU: u16 = 247;

/// Requests a scripted [`Response`] can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Connect,
    Disconnect,
    DiscoverServices,
    ReadCharacteristic,
    WriteCharacteristic,
    ReadDescriptor,
    WriteDescriptor,
    ReadRemoteRssi,
    RequestMtu,
    ReliableWrite,
}

/// How the board reacts to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Response {
    /// Call back with success right away
    #[default]
    Succeed,
    /// Call back with success after a delay
    Delay(Duration),
    /// Call back with this failure status
    FailWith(i32),
    /// Accept the request but never call back
    Silent,
    /// Refuse the request synchronously
    Reject,
}

/// Callbacks of the link currently open on the board
#[derive(Clone)]
struct OpenLink {
    callbacks: GattCallbacks,
    closed: Arc<AtomicBool>,
}

struct SimState {
    services: Vec<GattService>,
    firmware: String,
    requirements: VecDeque<Vec<u8>>,
    responses: HashMap<SimOp, Response>,
    connected: bool,
    /// Auto-connect flag of every refused or accepted link request
    link_requests: Vec<(bool, bool)>,
    refuse_auto_connect: Option<bool>,
    refuse_local_notifications: bool,
    calls: Vec<SimOp>,
    values: HashMap<Uuid, Vec<u8>>,
    client_requirements: Vec<u32>,
    descriptor_writes: Vec<GattDescriptor>,
    remote_notifications: HashSet<Uuid>,
    local_notifications: HashSet<Uuid>,
    rssi: i32,
    current: Option<OpenLink>,
}

struct SimInner {
    address: String,
    state: Mutex<SimState>,
}

/// Simulated micro:bit reachable at one address
#[derive(Clone)]
pub struct SimulatedMicrobit {
    inner: Arc<SimInner>,
}

/// The GATT table of a board running the companion-enabled runtime
pub fn microbit_services() -> Vec<GattService> {
    let device_info = GattService::new(DEVICE_INFORMATION_SERVICE).with_characteristic(GattCharacteristic::new(
        FIRMWARE_REVISION,
        DEVICE_INFORMATION_SERVICE,
        CharacteristicProperty::Read as u8,
    ));

    let notify = CharacteristicProperty::Read as u8 | CharacteristicProperty::Notify as u8;
    let write = CharacteristicProperty::Write as u8 | CharacteristicProperty::WriteWithoutResponse as u8;
    let events = GattService::new(EVENT_SERVICE)
        .with_characteristic(
            GattCharacteristic::new(ES_MICROBIT_REQUIREMENTS, EVENT_SERVICE, notify)
                .with_descriptor(CLIENT_CHARACTERISTIC_CONFIG),
        )
        .with_characteristic(GattCharacteristic::new(ES_CLIENT_REQUIREMENTS, EVENT_SERVICE, write))
        .with_characteristic(
            GattCharacteristic::new(ES_MICROBIT_EVENT, EVENT_SERVICE, notify)
                .with_descriptor(CLIENT_CHARACTERISTIC_CONFIG),
        )
        .with_characteristic(GattCharacteristic::new(ES_CLIENT_EVENT, EVENT_SERVICE, write));

    vec![device_info, events]
}

impl SimulatedMicrobit {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SimInner {
                address: address.into(),
                state: Mutex::new(SimState {
                    services: microbit_services(),
                    firmware: "1.3.2".to_string(),
                    requirements: VecDeque::new(),
                    responses: HashMap::new(),
                    connected: false,
                    link_requests: Vec::new(),
                    refuse_auto_connect: None,
                    refuse_local_notifications: false,
                    calls: Vec::new(),
                    values: HashMap::new(),
                    client_requirements: Vec::new(),
                    descriptor_writes: Vec::new(),
                    remote_notifications: HashSet::new(),
                    local_notifications: HashSet::new(),
                    rssi: -60,
                    current: None,
                }),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    // ---- scripting ----

    pub fn set_response(&self, op: SimOp, response: Response) {
        self.inner.state.lock().responses.insert(op, response);
    }

    pub fn set_firmware(&self, firmware: impl Into<String>) {
        self.inner.state.lock().firmware = firmware.into();
    }

    pub fn set_rssi(&self, rssi: i32) {
        self.inner.state.lock().rssi = rssi;
    }

    /// Queue a raw value for the requirements characteristic
    pub fn push_requirement_value(&self, value: Vec<u8>) {
        self.inner.state.lock().requirements.push_back(value);
    }

    pub fn push_requirement(&self, record: RequirementRecord) {
        self.push_requirement_value(record.to_bytes().to_vec());
    }

    /// Refuse to open links requested with this auto-connect flag
    pub fn refuse_links_with_auto_connect(&self, auto_connect: Option<bool>) {
        self.inner.state.lock().refuse_auto_connect = auto_connect;
    }

    pub fn refuse_local_notifications(&self, refuse: bool) {
        self.inner.state.lock().refuse_local_notifications = refuse;
    }

    pub fn remove_service(&self, uuid: &Uuid) {
        self.inner.state.lock().services.retain(|s| &s.uuid != uuid);
    }

    pub fn remove_characteristic(&self, uuid: &Uuid) {
        for service in self.inner.state.lock().services.iter_mut() {
            service.characteristics.retain(|c| &c.uuid != uuid);
        }
    }

    // ---- inspection ----

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    pub fn calls(&self) -> Vec<SimOp> {
        self.inner.state.lock().calls.clone()
    }

    pub fn count(&self, op: SimOp) -> usize {
        self.inner.state.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// `(auto_connect, accepted)` for every link request
    pub fn link_requests(&self) -> Vec<(bool, bool)> {
        self.inner.state.lock().link_requests.clone()
    }

    /// Values written to the client requirements characteristic
    pub fn client_requirements(&self) -> Vec<u32> {
        self.inner.state.lock().client_requirements.clone()
    }

    pub fn descriptor_writes(&self) -> Vec<GattDescriptor> {
        self.inner.state.lock().descriptor_writes.clone()
    }

    /// Whether the client enabled notifications through the CCCD
    pub fn notifications_enabled(&self, characteristic: &Uuid) -> bool {
        self.inner.state.lock().remote_notifications.contains(characteristic)
    }

    pub fn value_of(&self, characteristic: &Uuid) -> Option<Vec<u8>> {
        self.inner.state.lock().values.get(characteristic).cloned()
    }

    // ---- board-initiated events ----

    /// Send a notification on `characteristic`; false if nobody would receive it
    pub fn notify(&self, characteristic: &Uuid, value: Vec<u8>) -> bool {
        let st = self.inner.state.lock();
        let Some(open) = st.current.clone() else {
            return false;
        };
        if !st.connected
            || !st.remote_notifications.contains(characteristic)
            || !st.local_notifications.contains(characteristic)
        {
            return false;
        }
        let Some(mut target) = st
            .services
            .iter()
            .find_map(|s| s.characteristic(characteristic))
            .cloned()
        else {
            return false;
        };
        drop(st);

        target.value = value;
        deliver(&open, Duration::ZERO, GattEvent::CharacteristicChanged { characteristic: target });
        true
    }

    /// Drop the radio link from the board side
    pub fn drop_connection(&self, status: i32) {
        self.connection_event(false, status);
    }

    /// Bring the radio link back from the board side
    pub fn restore_connection(&self) {
        self.connection_event(true, GATT_SUCCESS);
    }

    fn connection_event(&self, connected: bool, status: i32) {
        let open = {
            let mut st = self.inner.state.lock();
            st.connected = connected;
            st.current.clone()
        };
        if let Some(open) = open {
            let new_state = if connected {
                ProfileState::Connected
            } else {
                ProfileState::Disconnected
            };
            deliver(
                &open,
                Duration::ZERO,
                GattEvent::ConnectionStateChanged {
                    address: self.inner.address.clone(),
                    status,
                    new_state,
                },
            );
        }
    }
}

impl GattStack for SimulatedMicrobit {
    fn connect_gatt(&self, address: &str, auto_connect: bool, callbacks: GattCallbacks) -> Option<Arc<dyn GattLink>> {
        {
            let mut st = self.inner.state.lock();
            let refused = address != self.inner.address
                || st.refuse_auto_connect == Some(auto_connect)
                || st.responses.get(&SimOp::Connect) == Some(&Response::Reject);
            st.link_requests.push((auto_connect, !refused));
            if refused {
                link_debug!("🧪 Simulator refused link to {} (auto_connect={})", address, auto_connect);
                return None;
            }
        }

        let link = SimLink {
            sim: Arc::clone(&self.inner),
            open: OpenLink {
                callbacks,
                closed: Arc::new(AtomicBool::new(false)),
            },
        };
        self.inner.state.lock().current = Some(link.open.clone());
        link.connect();
        Some(Arc::new(link))
    }
}

/// A link handed out by the simulator
struct SimLink {
    sim: Arc<SimInner>,
    open: OpenLink,
}

fn deliver(open: &OpenLink, delay: Duration, event: GattEvent) {
    let open = open.clone();
    let spawned = thread::Builder::new()
        .name("sim-gatt-callback".to_string())
        .spawn(move || {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            if !open.closed.load(Ordering::SeqCst) {
                open.callbacks.dispatch(event);
            }
        });
    if let Err(e) = spawned {
        link_error!("❌ Failed to spawn simulator callback thread: {}", e);
    }
}

impl SimLink {
    /// Apply the scripted response for `op`, building the callback under the lock
    fn respond(&self, op: SimOp, event: impl FnOnce(&mut SimState, i32) -> GattEvent) -> bool {
        if self.open.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut st = self.sim.state.lock();
        st.calls.push(op);
        let (delay, status) = match st.responses.get(&op).copied().unwrap_or_default() {
            Response::Reject => return false,
            Response::Silent => return true,
            Response::Succeed => (Duration::ZERO, GATT_SUCCESS),
            Response::Delay(d) => (d, GATT_SUCCESS),
            Response::FailWith(status) => (Duration::ZERO, status),
        };
        let event = event(&mut st, status);
        drop(st);

        deliver(&self.open, delay, event);
        true
    }

    fn connection_change(&self, st: &mut SimState, status: i32, connect: bool) -> GattEvent {
        let new_state = if status == GATT_SUCCESS && connect {
            st.connected = true;
            ProfileState::Connected
        } else {
            st.connected = false;
            ProfileState::Disconnected
        };
        GattEvent::ConnectionStateChanged {
            address: self.sim.address.clone(),
            status,
            new_state,
        }
    }
}

impl GattLink for SimLink {
    fn address(&self) -> String {
        self.sim.address.clone()
    }

    fn connect(&self) -> bool {
        self.respond(SimOp::Connect, |st, status| self.connection_change(st, status, true))
    }

    fn disconnect(&self) -> bool {
        // an idle link has nothing to report
        if !self.sim.state.lock().connected {
            return true;
        }
        self.respond(SimOp::Disconnect, |st, status| self.connection_change(st, status, false))
    }

    fn close(&self) {
        self.open.closed.store(true, Ordering::SeqCst);
        let mut st = self.sim.state.lock();
        let is_current = st
            .current
            .as_ref()
            .map(|c| Arc::ptr_eq(&c.closed, &self.open.closed))
            .unwrap_or(false);
        if is_current {
            st.current = None;
            st.connected = false;
            st.local_notifications.clear();
        }
    }

    fn discover_services(&self) -> bool {
        self.respond(SimOp::DiscoverServices, |_, status| GattEvent::ServicesDiscovered { status })
    }

    fn services(&self) -> Vec<GattService> {
        self.sim.state.lock().services.clone()
    }

    fn read_characteristic(&self, characteristic: &GattCharacteristic) -> bool {
        let mut characteristic = characteristic.clone();
        self.respond(SimOp::ReadCharacteristic, move |st, status| {
            if status == GATT_SUCCESS {
                characteristic.value = if characteristic.uuid == ES_MICROBIT_REQUIREMENTS {
                    st.requirements.pop_front().unwrap_or_default()
                } else if characteristic.uuid == FIRMWARE_REVISION {
                    st.firmware.as_bytes().to_vec()
                } else {
                    st.values.get(&characteristic.uuid).cloned().unwrap_or_default()
                };
            }
            GattEvent::CharacteristicRead { characteristic, status }
        })
    }

    fn write_characteristic(&self, characteristic: &GattCharacteristic) -> bool {
        let characteristic = characteristic.clone();
        self.respond(SimOp::WriteCharacteristic, move |st, status| {
            if status == GATT_SUCCESS {
                if characteristic.uuid == ES_CLIENT_REQUIREMENTS {
                    if let Some(value) = characteristic.int_value(super::gatt::GattFormat::Uint32, 0) {
                        st.client_requirements.push(value as u32);
                    }
                }
                st.values.insert(characteristic.uuid, characteristic.value.clone());
            }
            GattEvent::CharacteristicWrite { characteristic, status }
        })
    }

    fn read_descriptor(&self, descriptor: &GattDescriptor) -> bool {
        let mut descriptor = descriptor.clone();
        self.respond(SimOp::ReadDescriptor, move |st, status| {
            if status == GATT_SUCCESS && descriptor.uuid == CLIENT_CHARACTERISTIC_CONFIG {
                let enabled = st.remote_notifications.contains(&descriptor.characteristic_uuid);
                descriptor.value = vec![enabled as u8, 0x00];
            }
            GattEvent::DescriptorRead { descriptor, status }
        })
    }

    fn write_descriptor(&self, descriptor: &GattDescriptor) -> bool {
        let descriptor = descriptor.clone();
        self.respond(SimOp::WriteDescriptor, move |st, status| {
            if status == GATT_SUCCESS {
                if descriptor.uuid == CLIENT_CHARACTERISTIC_CONFIG {
                    if descriptor.value == ENABLE_NOTIFICATION_VALUE {
                        st.remote_notifications.insert(descriptor.characteristic_uuid);
                    } else {
                        st.remote_notifications.remove(&descriptor.characteristic_uuid);
                    }
                }
                st.descriptor_writes.push(descriptor.clone());
            }
            GattEvent::DescriptorWrite { descriptor, status }
        })
    }

    fn set_characteristic_notification(&self, characteristic: &GattCharacteristic, enable: bool) -> bool {
        let mut st = self.sim.state.lock();
        if st.refuse_local_notifications {
            return false;
        }
        if enable {
            st.local_notifications.insert(characteristic.uuid);
        } else {
            st.local_notifications.remove(&characteristic.uuid);
        }
        true
    }

    fn read_remote_rssi(&self) -> bool {
        self.respond(SimOp::ReadRemoteRssi, |st, status| GattEvent::ReadRemoteRssi {
            rssi: st.rssi,
            status,
        })
    }

    fn request_mtu(&self, mtu: u16) -> bool {
        self.respond(SimOp::RequestMtu, |_, status| GattEvent::MtuChanged {
            mtu: mtu.min(SIM_MAX_MTU),
            status,
        })
    }

    fn execute_reliable_write(&self) -> bool {
        self.respond(SimOp::ReliableWrite, |_, status| GattEvent::ReliableWriteCompleted { status })
    }
}
