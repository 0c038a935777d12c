//! micro:bit GATT identifiers
//!
//! Vendor UUIDs are derived from one 128-bit base by substituting a 16-bit
//! short id into bits 32..48 of the most significant half.

use uuid::Uuid;

/// micro:bit vendor base UUID
pub const MICROBIT_BASE_UUID: Uuid = Uuid::from_u128(0xe95d5be9_251d_470a_a062_fa1922dfa9a8);

/// Bluetooth SIG base UUID
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x00000000_0000_1000_8000_00805f9b34fb);

/// Replace the short-id field of `base` with `short`
pub const fn make_uuid(base: Uuid, short: u16) -> Uuid {
    let mask: u128 = 0xFFFF << 96;
    Uuid::from_u128((base.as_u128() & !mask) | ((short as u128) << 96))
}

pub const EVENT_SERVICE: Uuid = make_uuid(MICROBIT_BASE_UUID, 0x93AF);
/// Written by the app: event categories it wants to receive
pub const ES_CLIENT_REQUIREMENTS: Uuid = make_uuid(MICROBIT_BASE_UUID, 0x23C4);
/// Read/notified: event categories the board wants the app to send
pub const ES_MICROBIT_REQUIREMENTS: Uuid = make_uuid(MICROBIT_BASE_UUID, 0xB84C);
/// Notified: events raised on the board
pub const ES_MICROBIT_EVENT: Uuid = make_uuid(MICROBIT_BASE_UUID, 0x9775);
/// Written by the app: events raised on the phone
pub const ES_CLIENT_EVENT: Uuid = make_uuid(MICROBIT_BASE_UUID, 0x5404);

/// Client characteristic configuration descriptor
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = make_uuid(BLUETOOTH_BASE_UUID, 0x2902);

pub const DEVICE_INFORMATION_SERVICE: Uuid = make_uuid(BLUETOOTH_BASE_UUID, 0x180A);
pub const FIRMWARE_REVISION: Uuid = make_uuid(BLUETOOTH_BASE_UUID, 0x2A26);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_uuids_match_published_values() {
        assert_eq!(
            EVENT_SERVICE.to_string(),
            "e95d93af-251d-470a-a062-fa1922dfa9a8"
        );
        assert_eq!(
            ES_MICROBIT_EVENT.to_string(),
            "e95d9775-251d-470a-a062-fa1922dfa9a8"
        );
        assert_eq!(
            CLIENT_CHARACTERISTIC_CONFIG.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            FIRMWARE_REVISION.to_string(),
            "00002a26-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_make_uuid_only_touches_short_field() {
        let derived = make_uuid(MICROBIT_BASE_UUID, 0x0000);
        assert_eq!(derived.to_string(), "e95d0000-251d-470a-a062-fa1922dfa9a8");
    }
}
