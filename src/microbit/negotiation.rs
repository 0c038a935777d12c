//! Requirement negotiation
//!
//! Runs over a connected, discovered session:
//!
//! 1. read the firmware revision and pass it to the host
//! 2. find the event service (required)
//! 3. drain the board's requirement queue until an empty read
//! 4. switch the app's standing local event sources on or off
//! 5. toggle notifications on the requirements characteristic
//! 6. when enabling, declare the client categories, then toggle
//!    notifications on the micro:bit event characteristic (required)
//!
//! Steps 3 and 5 are best effort.

use std::collections::HashSet;

use thiserror::Error;
use uuid::Uuid;

use crate::ble::{BleManager, GattFormat, GattService, StatusCode};
use crate::host::{HostMessenger, PluginDispatcher};

use super::events::{make_microbit_value, CLIENT_REQUIREMENTS, LOCAL_REGISTRATIONS};
use super::requirements::{DeviceRequirement, RequirementRecord};
use super::uuids::{
    CLIENT_CHARACTERISTIC_CONFIG, DEVICE_INFORMATION_SERVICE, ES_CLIENT_REQUIREMENTS,
    ES_MICROBIT_EVENT, ES_MICROBIT_REQUIREMENTS, EVENT_SERVICE, FIRMWARE_REVISION,
};

/// Negotiation failures that abort the pass
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("Service not found: {0}")]
    ServiceMissing(Uuid),

    #[error("Characteristic not found: {0}")]
    CharacteristicMissing(Uuid),

    #[error("Descriptor not found on characteristic {0}")]
    DescriptorMissing(Uuid),

    #[error("Event notification toggle failed: {0:?}")]
    EventNotification(StatusCode),
}

/// What one pass found out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiationReport {
    pub firmware: Option<String>,

    /// Distinct requirements drained from the board, in arrival order
    pub requirements: Vec<DeviceRequirement>,

    /// Reads issued while draining, including the terminating one
    pub requirement_reads: usize,

    pub requirements_registered: bool,
}

pub struct Negotiator<'a> {
    manager: &'a BleManager,
    messenger: &'a dyn HostMessenger,
    plugins: &'a dyn PluginDispatcher,
    max_requirement_reads: usize,
}

impl<'a> Negotiator<'a> {
    pub fn new(
        manager: &'a BleManager,
        messenger: &'a dyn HostMessenger,
        plugins: &'a dyn PluginDispatcher,
    ) -> Self {
        Self {
            manager,
            messenger,
            plugins,
            max_requirement_reads: crate::config::MAX_REQUIREMENT_READS,
        }
    }

    pub fn with_max_requirement_reads(mut self, max: usize) -> Self {
        self.max_requirement_reads = max.max(1);
        self
    }

    /// Run a pass and collapse the outcome to success/failure
    pub fn register_notifications(&self, enable: bool) -> bool {
        match self.run(enable) {
            Ok(_) => true,
            Err(e) => {
                link_error!("❌ registerNotifications({}) failed: {}", enable, e);
                false
            }
        }
    }

    pub fn run(&self, enable: bool) -> Result<NegotiationReport, NegotiationError> {
        link_info!("🤝 Negotiating requirements (enable={})", enable);
        let mut report = NegotiationReport {
            firmware: self.read_firmware(),
            ..NegotiationReport::default()
        };

        let event_service = self
            .manager
            .service(&EVENT_SERVICE)
            .ok_or(NegotiationError::ServiceMissing(EVENT_SERVICE))?;

        match self.register_microbit_requirements(&event_service, enable, &mut report) {
            Ok(()) => report.requirements_registered = true,
            Err(e) => link_warn!("⚠️ Cannot register micro:bit requirements ({}), will continue", e),
        }

        if enable {
            self.declare_client_requirements(&event_service);
        }

        self.register_microbit_events(&event_service, enable)?;

        link_info!(
            "✅ Negotiation done: {} requirement(s) after {} read(s)",
            report.requirements.len(),
            report.requirement_reads
        );
        Ok(report)
    }

    fn read_firmware(&self) -> Option<String> {
        let Some(service) = self.manager.service(&DEVICE_INFORMATION_SERVICE) else {
            link_warn!("⚠️ Device information service not found");
            return None;
        };
        let characteristic = service.characteristic(&FIRMWARE_REVISION)?;

        let status = self.manager.read_characteristic(characteristic);
        let firmware = if status.is_ok() {
            self.manager
                .last_characteristic()
                .map(|c| c.string_value())
                .unwrap_or_default()
        } else {
            String::new()
        };

        link_info!("📟 micro:bit firmware version: {:?}", firmware);
        self.messenger.firmware_version(&firmware);
        Some(firmware)
    }

    fn register_microbit_requirements(
        &self,
        event_service: &GattService,
        enable: bool,
        report: &mut NegotiationReport,
    ) -> Result<(), NegotiationError> {
        let requirements = event_service.characteristic(&ES_MICROBIT_REQUIREMENTS);
        let descriptor = requirements.and_then(|c| c.descriptor(&CLIENT_CHARACTERISTIC_CONFIG));

        let result = match (requirements, descriptor) {
            (Some(requirements), Some(descriptor)) => {
                self.drain_requirements(requirements, report);
                Ok((requirements, descriptor))
            }
            (None, _) => Err(NegotiationError::CharacteristicMissing(ES_MICROBIT_REQUIREMENTS)),
            (Some(_), None) => Err(NegotiationError::DescriptorMissing(ES_MICROBIT_REQUIREMENTS)),
        };

        // the app's own standing subscriptions do not depend on the board
        for (category, registration) in LOCAL_REGISTRATIONS {
            self.plugins.register(category, registration, enable);
        }

        let (requirements, descriptor) = result?;
        let status = self
            .manager
            .enable_characteristic_notification(requirements, descriptor, enable);
        if !status.is_ok() {
            link_warn!("⚠️ Requirement notifications not toggled: {:?}", status);
        }
        Ok(())
    }

    fn drain_requirements(&self, characteristic: &crate::ble::GattCharacteristic, report: &mut NegotiationReport) {
        let mut seen = HashSet::new();

        while report.requirement_reads < self.max_requirement_reads {
            report.requirement_reads += 1;

            let status = self.manager.read_characteristic(characteristic);
            if !status.is_ok() {
                link_warn!("⚠️ Requirement read failed: {:?}", status);
                return;
            }

            let value = self
                .manager
                .last_characteristic()
                .map(|c| c.value)
                .unwrap_or_default();
            if value.is_empty() {
                return;
            }

            let Some(record) = RequirementRecord::from_bytes(&value) else {
                link_debug!("Ignoring short requirement value {:?}", value);
                continue;
            };
            link_info!("micro:bit interested in = {}", record);

            match DeviceRequirement::from_record(record) {
                Some(requirement) if seen.insert(requirement) => {
                    self.messenger.device_requirement(requirement);
                    report.requirements.push(requirement);
                }
                Some(requirement) => link_debug!("Duplicate requirement {:?}", requirement),
                None => link_debug!("Unsupported requirement {}", record),
            }
        }

        link_warn!(
            "⚠️ Requirement queue still not empty after {} reads, giving up",
            self.max_requirement_reads
        );
    }

    fn declare_client_requirements(&self, event_service: &GattService) {
        if event_service.characteristic(&ES_CLIENT_REQUIREMENTS).is_none() {
            link_warn!("⚠️ Client requirements characteristic not found");
            return;
        }
        for category in CLIENT_REQUIREMENTS {
            let value = make_microbit_value(category.code(), 0);
            match write_int_characteristic(
                self.manager,
                &EVENT_SERVICE,
                &ES_CLIENT_REQUIREMENTS,
                value as i64,
                GattFormat::Uint32,
            ) {
                Ok(status) if status.is_ok() => link_debug!("Declared {}", category),
                Ok(status) => link_warn!("⚠️ Declaring {} failed: {:?}", category, status),
                Err(e) => link_warn!("⚠️ Declaring {} failed: {}", category, e),
            }
        }
    }

    fn register_microbit_events(&self, event_service: &GattService, enable: bool) -> Result<(), NegotiationError> {
        let events = event_service
            .characteristic(&ES_MICROBIT_EVENT)
            .ok_or(NegotiationError::CharacteristicMissing(ES_MICROBIT_EVENT))?;
        let descriptor = events
            .descriptor(&CLIENT_CHARACTERISTIC_CONFIG)
            .ok_or(NegotiationError::DescriptorMissing(ES_MICROBIT_EVENT))?;

        let status = self
            .manager
            .enable_characteristic_notification(events, descriptor, enable);
        if !status.is_ok() {
            return Err(NegotiationError::EventNotification(status));
        }
        Ok(())
    }
}

/// Write an integer into a discovered characteristic
pub fn write_int_characteristic(
    manager: &BleManager,
    service: &Uuid,
    characteristic: &Uuid,
    value: i64,
    format: GattFormat,
) -> Result<StatusCode, NegotiationError> {
    let service = manager
        .service(service)
        .ok_or(NegotiationError::ServiceMissing(*service))?;
    let mut target = service
        .characteristic(characteristic)
        .cloned()
        .ok_or(NegotiationError::CharacteristicMissing(*characteristic))?;

    target.set_int_value(value, format);
    Ok(manager.write_characteristic(&target))
}
