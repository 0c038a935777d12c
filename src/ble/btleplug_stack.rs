//! Radio stack backed by btleplug
//!
//! btleplug is async; the session layer is not. Every [`GattLink`] request is
//! spawned on the given tokio runtime and its outcome is reported through the
//! link's [`GattCallbacks`], exactly as a platform stack would call back.
//!
//! `connect_gatt` blocks on the runtime while it looks for the peripheral, so
//! it must be called from a plain thread (the service worker), never from
//! inside the runtime.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Descriptor, Manager as _, Peripheral as _,
    ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::dispatcher::{GattCallbacks, GattEvent};
use super::gatt::{
    GattCharacteristic, GattDescriptor, GattService, ProfileState, GATT_ERROR, GATT_FAILURE,
    GATT_SUCCESS,
};
use super::stack::{GattLink, GattStack};
use super::BleError;
use crate::microbit::uuids::CLIENT_CHARACTERISTIC_CONFIG;

/// How long `connect_gatt` scans for an unknown peripheral
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// btleplug central on the first adapter
pub struct BtleplugStack {
    runtime: Handle,
    adapter: Adapter,
    scan_timeout: Duration,
}

impl BtleplugStack {
    pub async fn new(runtime: Handle) -> Result<Self, BleError> {
        link_info!("📡 Initializing btleplug radio stack");

        let manager = Manager::new()
            .await
            .map_err(|e| BleError::ManagerInit(format!("Failed to create BLE manager: {}", e)))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| BleError::ManagerInit(format!("Failed to get adapters: {}", e)))?
            .into_iter()
            .next()
            .ok_or(BleError::NoAdapter)?;

        Ok(Self {
            runtime,
            adapter,
            scan_timeout: SCAN_TIMEOUT,
        })
    }

    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    /// Scan until a peripheral with `address` shows up
    pub async fn find_peripheral(&self, address: &str) -> Result<Peripheral, BleError> {
        if let Some(peripheral) = self.known_peripheral(address).await? {
            return Ok(peripheral);
        }

        link_info!("🔍 Scanning for {}", address);
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| BleError::ScanningFailed(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + self.scan_timeout;
        let found = loop {
            if let Some(peripheral) = self.known_peripheral(address).await? {
                break Some(peripheral);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            link_debug!("stop_scan failed: {}", e);
        }
        found.ok_or_else(|| BleError::PeripheralNotFound(address.to_string()))
    }

    async fn known_peripheral(&self, address: &str) -> Result<Option<Peripheral>, BleError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| BleError::ScanningFailed(format!("Failed to get peripherals: {}", e)))?;

        // macOS hides MAC addresses, so the platform id is accepted too
        Ok(peripherals.into_iter().find(|p| {
            p.address().to_string().eq_ignore_ascii_case(address)
                || p.id().to_string().eq_ignore_ascii_case(address)
        }))
    }
}

impl GattStack for BtleplugStack {
    fn connect_gatt(
        &self,
        address: &str,
        auto_connect: bool,
        callbacks: GattCallbacks,
    ) -> Option<Arc<dyn GattLink>> {
        if auto_connect {
            link_debug!("btleplug has no background auto-connect, connecting directly");
        }

        let peripheral = match self.runtime.block_on(self.find_peripheral(address)) {
            Ok(peripheral) => peripheral,
            Err(e) => {
                link_error!("❌ Cannot open link to {}: {}", address, e);
                return None;
            }
        };

        let link = Arc::new(BtleplugLink {
            runtime: self.runtime.clone(),
            address: address.to_string(),
            peripheral,
            callbacks,
            services: Arc::new(Mutex::new(Vec::new())),
            notifying: Arc::new(Mutex::new(HashSet::new())),
            closed: Arc::new(AtomicBool::new(false)),
            local_disconnect: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
            pump: Arc::new(Mutex::new(None)),
        });
        link.watch_adapter(self.adapter.clone());

        if !link.connect() {
            return None;
        }
        Some(link)
    }
}

/// One btleplug peripheral driven through the callback model
pub struct BtleplugLink {
    runtime: Handle,
    address: String,
    peripheral: Peripheral,
    callbacks: GattCallbacks,
    services: Arc<Mutex<Vec<GattService>>>,
    /// Characteristics whose notifications are delivered locally
    notifying: Arc<Mutex<HashSet<Uuid>>>,
    closed: Arc<AtomicBool>,
    /// Set while we are the ones disconnecting, so the adapter event is not
    /// reported a second time
    local_disconnect: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    pump: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// What a spawned task needs to report back
#[derive(Clone)]
struct Reporter {
    callbacks: GattCallbacks,
    closed: Arc<AtomicBool>,
}

impl Reporter {
    fn dispatch(&self, event: GattEvent) {
        if self.closed.load(Ordering::SeqCst) {
            link_trace!("Link closed, dropping {:?}", event.kind());
            return;
        }
        self.callbacks.dispatch(event);
    }
}

fn status_of<T>(result: &Result<T, btleplug::Error>) -> i32 {
    match result {
        Ok(_) => GATT_SUCCESS,
        Err(btleplug::Error::PermissionDenied) => GATT_ERROR,
        Err(_) => GATT_FAILURE,
    }
}

impl BtleplugLink {
    fn reporter(&self) -> Reporter {
        Reporter {
            callbacks: self.callbacks.clone(),
            closed: Arc::clone(&self.closed),
        }
    }

    fn spawn<F>(&self, task: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let handle = self.runtime.spawn(task);
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
        true
    }

    /// Report remote disconnects of our peripheral as unsolicited events
    fn watch_adapter(&self, adapter: Adapter) {
        let reporter = self.reporter();
        let id = self.peripheral.id();
        let address = self.address.clone();
        let local_disconnect = Arc::clone(&self.local_disconnect);

        self.spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    link_warn!("⚠️ No adapter events, remote disconnects will go unnoticed: {}", e);
                    return;
                }
            };
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone != id || local_disconnect.load(Ordering::SeqCst) {
                        continue;
                    }
                    link_info!("📴 {} dropped the connection", address);
                    reporter.dispatch(GattEvent::ConnectionStateChanged {
                        address: address.clone(),
                        status: GATT_SUCCESS,
                        new_state: ProfileState::Disconnected,
                    });
                }
            }
        });
    }

    fn pump_notifications(
        peripheral: Peripheral,
        reporter: Reporter,
        services: Arc<Mutex<Vec<GattService>>>,
        notifying: Arc<Mutex<HashSet<Uuid>>>,
    ) -> impl std::future::Future<Output = ()> + Send {
        async move {
            let mut stream = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    link_warn!("⚠️ Notification stream unavailable: {}", e);
                    return;
                }
            };
            while let Some(notification) = stream.next().await {
                if !notifying.lock().contains(&notification.uuid) {
                    link_trace!("Notification on {} not enabled locally", notification.uuid);
                    continue;
                }
                let characteristic = services
                    .lock()
                    .iter()
                    .find_map(|s| s.characteristics.iter().find(|c| c.uuid == notification.uuid))
                    .cloned();
                let Some(mut characteristic) = characteristic else {
                    continue;
                };
                characteristic.value = notification.value;
                reporter.dispatch(GattEvent::CharacteristicChanged { characteristic });
            }
        }
    }

    fn find_characteristic(&self, characteristic: &GattCharacteristic) -> Option<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid)
    }

    fn find_descriptor(&self, descriptor: &GattDescriptor) -> Option<(Characteristic, Descriptor)> {
        let characteristic = self.peripheral.characteristics().into_iter().find(|c| {
            c.uuid == descriptor.characteristic_uuid && c.service_uuid == descriptor.service_uuid
        })?;
        let found = characteristic
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor.uuid)
            .cloned()?;
        Some((characteristic, found))
    }
}

fn to_gatt_service(service: &Service) -> GattService {
    service
        .characteristics
        .iter()
        .map(to_gatt_characteristic)
        .fold(GattService::new(service.uuid), |s, c| s.with_characteristic(c))
}

fn to_gatt_characteristic(characteristic: &Characteristic) -> GattCharacteristic {
    characteristic.descriptors.iter().fold(
        GattCharacteristic::new(
            characteristic.uuid,
            characteristic.service_uuid,
            characteristic.properties.bits(),
        ),
        |c, d| c.with_descriptor(d.uuid),
    )
}

impl GattLink for BtleplugLink {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn connect(&self) -> bool {
        self.local_disconnect.store(false, Ordering::SeqCst);

        let peripheral = self.peripheral.clone();
        let reporter = self.reporter();
        let address = self.address.clone();
        let pump = Self::pump_notifications(
            self.peripheral.clone(),
            self.reporter(),
            Arc::clone(&self.services),
            Arc::clone(&self.notifying),
        );
        let runtime = self.runtime.clone();
        let pump_slot = Arc::clone(&self.pump);

        self.spawn(async move {
            let result = peripheral.connect().await;
            let status = status_of(&result);
            let new_state = match result {
                Ok(()) => {
                    if let Some(previous) = pump_slot.lock().replace(runtime.spawn(pump)) {
                        previous.abort();
                    }
                    ProfileState::Connected
                }
                Err(e) => {
                    link_error!("❌ btleplug connect to {} failed: {}", address, e);
                    ProfileState::Disconnected
                }
            };
            reporter.dispatch(GattEvent::ConnectionStateChanged {
                address,
                status,
                new_state,
            });
        })
    }

    fn disconnect(&self) -> bool {
        self.local_disconnect.store(true, Ordering::SeqCst);

        let peripheral = self.peripheral.clone();
        let reporter = self.reporter();
        let address = self.address.clone();
        self.spawn(async move {
            let result = peripheral.disconnect().await;
            if let Err(e) = &result {
                link_warn!("⚠️ btleplug disconnect from {} failed: {}", address, e);
            }
            reporter.dispatch(GattEvent::ConnectionStateChanged {
                address,
                status: status_of(&result),
                new_state: ProfileState::Disconnected,
            });
        })
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.notifying.lock().clear();
        link_debug!("🔒 Closed link to {}", self.address);
    }

    fn discover_services(&self) -> bool {
        let peripheral = self.peripheral.clone();
        let reporter = self.reporter();
        let services = Arc::clone(&self.services);
        self.spawn(async move {
            let result = peripheral.discover_services().await;
            if result.is_ok() {
                let discovered: Vec<GattService> =
                    peripheral.services().iter().map(to_gatt_service).collect();
                link_info!("🔍 Discovered {} service(s)", discovered.len());
                *services.lock() = discovered;
            }
            reporter.dispatch(GattEvent::ServicesDiscovered {
                status: status_of(&result),
            });
        })
    }

    fn services(&self) -> Vec<GattService> {
        self.services.lock().clone()
    }

    fn read_characteristic(&self, characteristic: &GattCharacteristic) -> bool {
        let Some(target) = self.find_characteristic(characteristic) else {
            return false;
        };
        let mut characteristic = characteristic.clone();
        let peripheral = self.peripheral.clone();
        let reporter = self.reporter();
        self.spawn(async move {
            let result = peripheral.read(&target).await;
            let status = status_of(&result);
            if let Ok(value) = result {
                characteristic.value = value;
            }
            reporter.dispatch(GattEvent::CharacteristicRead {
                characteristic,
                status,
            });
        })
    }

    fn write_characteristic(&self, characteristic: &GattCharacteristic) -> bool {
        let Some(target) = self.find_characteristic(characteristic) else {
            return false;
        };
        let write_type = if target.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        let characteristic = characteristic.clone();
        let peripheral = self.peripheral.clone();
        let reporter = self.reporter();
        self.spawn(async move {
            let result = peripheral.write(&target, &characteristic.value, write_type).await;
            reporter.dispatch(GattEvent::CharacteristicWrite {
                status: status_of(&result),
                characteristic,
            });
        })
    }

    fn read_descriptor(&self, descriptor: &GattDescriptor) -> bool {
        let Some((_, target)) = self.find_descriptor(descriptor) else {
            return false;
        };
        let mut descriptor = descriptor.clone();
        let peripheral = self.peripheral.clone();
        let reporter = self.reporter();
        self.spawn(async move {
            let result = peripheral.read_descriptor(&target).await;
            let status = status_of(&result);
            if let Ok(value) = result {
                descriptor.value = value;
            }
            reporter.dispatch(GattEvent::DescriptorRead { descriptor, status });
        })
    }

    fn write_descriptor(&self, descriptor: &GattDescriptor) -> bool {
        let Some((characteristic, target)) = self.find_descriptor(descriptor) else {
            return false;
        };
        let descriptor = descriptor.clone();
        let peripheral = self.peripheral.clone();
        let reporter = self.reporter();
        self.spawn(async move {
            // btleplug owns the CCCD, so go through subscribe/unsubscribe
            let result = if descriptor.uuid == CLIENT_CHARACTERISTIC_CONFIG {
                if descriptor.value.first().copied().unwrap_or(0) != 0 {
                    peripheral.subscribe(&characteristic).await
                } else {
                    peripheral.unsubscribe(&characteristic).await
                }
            } else {
                peripheral.write_descriptor(&target, &descriptor.value).await
            };
            reporter.dispatch(GattEvent::DescriptorWrite {
                status: status_of(&result),
                descriptor,
            });
        })
    }

    fn set_characteristic_notification(&self, characteristic: &GattCharacteristic, enable: bool) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut notifying = self.notifying.lock();
        if enable {
            notifying.insert(characteristic.uuid);
        } else {
            notifying.remove(&characteristic.uuid);
        }
        true
    }

    fn read_remote_rssi(&self) -> bool {
        let peripheral = self.peripheral.clone();
        let reporter = self.reporter();
        self.spawn(async move {
            let (rssi, status) = match peripheral.properties().await {
                Ok(Some(properties)) => match properties.rssi {
                    Some(rssi) => (rssi as i32, GATT_SUCCESS),
                    None => (0, GATT_FAILURE),
                },
                Ok(None) => (0, GATT_FAILURE),
                Err(e) => (0, status_of::<()>(&Err(e))),
            };
            reporter.dispatch(GattEvent::ReadRemoteRssi { rssi, status });
        })
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        self.close();
    }
}
