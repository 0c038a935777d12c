//! Unit tests for individual microbit-link components

#[cfg(test)]
mod status_tests {
    use microbit_link::ble::{ConnectionState, ErrorKind, StatusCode};

    #[test]
    fn test_status_code_layout() {
        let connected = StatusCode::new(ErrorKind::Ok, ConnectionState::CONNECTED);
        assert_eq!(connected.raw(), 0x0000_0001);
        assert!(connected.is_ok());

        let discovered = ConnectionState::from_bits(0x0003);
        let timed_out = StatusCode::new(ErrorKind::Timeout, discovered);
        assert_eq!(timed_out.raw(), 0x0003_0003);
        assert!(timed_out.is_fail());
        assert!(timed_out.is_timeout());
        assert_eq!(timed_out.state(), discovered);

        let failed = StatusCode::new(ErrorKind::Fail, ConnectionState::DISCONNECTED);
        assert_eq!(failed.raw(), 0x0001_0000);
        assert!(!failed.is_timeout());
    }

    #[test]
    fn test_sentinels_keep_state_bits() {
        let busy = StatusCode::new(ErrorKind::Noop, ConnectionState::CONNECTED);
        assert_eq!(busy.raw(), 0xFFFF_0001);
        assert!(busy.is_noop());
        assert!(!busy.is_fail());
        assert!(!busy.is_ok());

        let no_link = StatusCode::new(ErrorKind::NoGatt, ConnectionState::DISCONNECTED);
        assert_eq!(no_link.raw(), 0xFFFE_0000);
        assert!(no_link.is_nogatt());
        assert_eq!(no_link.kind(), ErrorKind::NoGatt);
    }

    #[test]
    fn test_services_discovered_needs_connected() {
        let mut state = ConnectionState::DISCONNECTED;
        state.mark_services_discovered();
        assert!(!state.services_discovered());

        let mut state = ConnectionState::CONNECTED;
        state.mark_services_discovered();
        assert!(state.services_discovered());
        assert_eq!(state.bits(), 0x0003);

        state.clear_services_discovered();
        assert_eq!(state, ConnectionState::CONNECTED);
    }
}

#[cfg(test)]
mod interpret_code_tests {
    use microbit_link::ble::{ConnectionState, ErrorKind, StatusCode};
    use microbit_link::service::{interpret_code, ServiceError};

    #[test]
    fn test_success_needs_the_expected_bits() {
        let discovered = StatusCode::from_raw(0x0000_0003);
        assert!(interpret_code(discovered, ConnectionState::SERVICES_DISCOVERED, 0).is_ok());

        let connected_only = StatusCode::new(ErrorKind::Ok, ConnectionState::CONNECTED);
        let err = interpret_code(connected_only, ConnectionState::SERVICES_DISCOVERED, 0).unwrap_err();
        assert!(matches!(err, ServiceError::UnexpectedState(_)));
        assert_eq!(err.code(), 1);
    }

    #[test]
    fn test_failures_map_to_host_codes() {
        let timeout = interpret_code(
            StatusCode::new(ErrorKind::Timeout, ConnectionState::DISCONNECTED),
            ConnectionState::CONNECTED,
            0,
        )
        .unwrap_err();
        assert!(matches!(timeout, ServiceError::TimedOut));
        assert_eq!(timeout.code(), 10);

        let gatt = interpret_code(
            StatusCode::new(ErrorKind::Fail, ConnectionState::CONNECTED),
            ConnectionState::CONNECTED,
            0x05,
        )
        .unwrap_err();
        assert_eq!(gatt.code(), 99);
        match gatt {
            ServiceError::Gatt { status, message } => {
                assert_eq!(status, 0x05);
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_not_attempted_passes_raw_code() {
        let busy = StatusCode::new(ErrorKind::Noop, ConnectionState::CONNECTED);
        let err = interpret_code(busy, ConnectionState::CONNECTED, 0).unwrap_err();
        assert!(matches!(err, ServiceError::NotAttempted(code) if code == busy));

        let no_link = StatusCode::new(ErrorKind::NoGatt, ConnectionState::DISCONNECTED);
        let err = interpret_code(no_link, ConnectionState::CONNECTED, 0).unwrap_err();
        assert_eq!(err.code(), 0xFFFE_0000_u32 as i32);
    }
}

#[cfg(test)]
mod event_tests {
    use microbit_link::microbit::events::{
        alerts, make_microbit_value, remote_control, EventCategory, MicrobitEvent, CLIENT_REQUIREMENTS,
        LOCAL_REGISTRATIONS,
    };

    #[test]
    fn test_decode_ignores_system_sources() {
        // source 3 (a runtime button event) is not part of the companion protocol
        assert_eq!(MicrobitEvent::from_value(0x0001_0003), None);
        assert_eq!(MicrobitEvent::from_value(0x0001_03E8), None);

        let event = MicrobitEvent::from_value(make_microbit_value(1001, remote_control::PAUSE)).unwrap();
        assert_eq!(event.category(), Some(EventCategory::RemoteControl));
        assert_eq!(event.event, remote_control::PAUSE);
    }

    #[test]
    fn test_forwarded_categories() {
        let forwarded: Vec<_> = [1001u16, 1002, 1003, 1004, 1101, 1103, 5555]
            .iter()
            .filter_map(|c| EventCategory::from_code(*c))
            .filter(|c| c.is_forwarded())
            .collect();
        assert_eq!(
            forwarded,
            vec![
                EventCategory::RemoteControl,
                EventCategory::Camera,
                EventCategory::AudioRecorder,
                EventCategory::Alerts
            ]
        );

        let unknown = MicrobitEvent::from_value(make_microbit_value(1050, alerts::VIBRATE)).unwrap();
        assert_eq!(unknown.category(), None);
    }

    #[test]
    fn test_registration_tables() {
        assert_eq!(LOCAL_REGISTRATIONS.len(), 8);
        assert!(!CLIENT_REQUIREMENTS.contains(&EventCategory::Telephony));
        assert!(LOCAL_REGISTRATIONS
            .iter()
            .all(|(_, registration)| registration.code().is_power_of_two()));
    }
}

#[cfg(test)]
mod uuid_tests {
    use microbit_link::microbit::uuids::*;
    use uuid::Uuid;

    #[test]
    fn test_published_microbit_uuids() {
        assert_eq!(
            EVENT_SERVICE,
            Uuid::parse_str("e95d93af-251d-470a-a062-fa1922dfa9a8").unwrap()
        );
        assert_eq!(
            ES_MICROBIT_EVENT,
            Uuid::parse_str("e95d9775-251d-470a-a062-fa1922dfa9a8").unwrap()
        );
        assert_eq!(
            ES_MICROBIT_REQUIREMENTS,
            Uuid::parse_str("e95db84c-251d-470a-a062-fa1922dfa9a8").unwrap()
        );
        assert_eq!(
            CLIENT_CHARACTERISTIC_CONFIG,
            Uuid::parse_str("00002902-0000-1000-8000-00805f9b34fb").unwrap()
        );
        assert_eq!(
            FIRMWARE_REVISION,
            Uuid::parse_str("00002a26-0000-1000-8000-00805f9b34fb").unwrap()
        );
    }
}

#[cfg(test)]
mod requirement_tests {
    use microbit_link::microbit::requirements::{DeviceRequirement, RequirementRecord};

    #[test]
    fn test_token_parsing() {
        let record = RequirementRecord::from_token("4F-04-08-00").unwrap();
        assert_eq!(DeviceRequirement::from_record(record), Some(DeviceRequirement::IncomingSms));

        assert!(RequirementRecord::from_token("4F-04-08").is_none());
        assert!(RequirementRecord::from_token("zz-04-08-00").is_none());
    }

    #[test]
    fn test_unsupported_requirements() {
        // device info category, battery subcode
        let battery = RequirementRecord::new(1103, 9);
        assert_eq!(DeviceRequirement::from_record(battery), None);

        // right subcode, wrong category
        let wrong_category = RequirementRecord::new(1101, 7);
        assert_eq!(DeviceRequirement::from_record(wrong_category), None);

        assert!(RequirementRecord::from_bytes(&[0x4F, 0x04]).is_none());
    }
}

#[cfg(test)]
mod gatt_model_tests {
    use microbit_link::ble::{GattCharacteristic, GattFormat, GattService};
    use microbit_link::microbit::uuids::{CLIENT_CHARACTERISTIC_CONFIG, ES_MICROBIT_EVENT, EVENT_SERVICE};
    use uuid::Uuid;

    #[test]
    fn test_service_fixes_owner_ids() {
        let service = GattService::new(EVENT_SERVICE).with_characteristic(
            GattCharacteristic::new(ES_MICROBIT_EVENT, Uuid::nil(), 0x12)
                .with_descriptor(CLIENT_CHARACTERISTIC_CONFIG),
        );

        let characteristic = service.characteristic(&ES_MICROBIT_EVENT).unwrap();
        assert_eq!(characteristic.service_uuid, EVENT_SERVICE);

        let descriptor = characteristic.descriptor(&CLIENT_CHARACTERISTIC_CONFIG).unwrap();
        assert_eq!(descriptor.characteristic_uuid, ES_MICROBIT_EVENT);
        assert_eq!(descriptor.service_uuid, EVENT_SERVICE);
    }

    #[test]
    fn test_int_values() {
        let mut characteristic = GattCharacteristic::new(ES_MICROBIT_EVENT, EVENT_SERVICE, 0);
        characteristic.set_int_value(0x0003_03EA, GattFormat::Uint32);
        assert_eq!(characteristic.value, vec![0xEA, 0x03, 0x03, 0x00]);
        assert_eq!(characteristic.int_value(GattFormat::Uint16, 2), Some(3));
        assert_eq!(characteristic.int_value(GattFormat::Uint32, 1), None);

        characteristic.set_int_value(-2, GattFormat::Sint8);
        assert_eq!(characteristic.int_value(GattFormat::Sint8, 0), Some(-2));
        assert_eq!(characteristic.int_value(GattFormat::Uint8, 0), Some(0xFE));
    }
}

#[cfg(test)]
mod config_tests {
    use microbit_link::config::{LinkConfig, JUST_PAIRED_DELAY_MS, MAX_REQUIREMENT_READS};
    use std::time::Duration;

    #[test]
    fn test_defaults_follow_companion_timings() {
        let config = LinkConfig::default();
        assert_eq!(config.op_timeout(), Duration::from_millis(10_000));
        assert_eq!(config.just_paired_delay_ms, JUST_PAIRED_DELAY_MS);
        assert_eq!(config.max_requirement_reads, MAX_REQUIREMENT_READS);
        assert!(!config.auto_reconnect);
    }

    #[test]
    fn test_zero_read_cap_is_invalid() {
        let config = LinkConfig {
            max_requirement_reads: 0,
            ..LinkConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

#[cfg(test)]
mod storage_tests {
    use chrono::Utc;
    use microbit_link::{ConnectedDevice, MemoryDeviceStore, PairedDeviceStore};

    #[test]
    fn test_memory_store_updates() {
        let store = MemoryDeviceStore::new(None);
        assert!(!store.update_firmware("1.3.2").unwrap());

        store
            .save(Some(&ConnectedDevice::new("BBC micro:bit [tuvov]", "tuvov", "C0:FF:EE:00:11:22", 0)))
            .unwrap();
        let now = Utc::now();
        assert!(store.update_connection_time(now).unwrap());
        assert!(store.set_status(true).unwrap());

        let device = store.load().unwrap().unwrap();
        assert_eq!(device.last_connection_time, Some(now));
        assert!(device.status);
        assert_eq!(device.firmware_version, None);
    }
}
