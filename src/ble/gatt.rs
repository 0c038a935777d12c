//! GATT attribute model
//!
//! Services, characteristics and descriptors as they are exchanged between the
//! session manager and a radio stack. Values are plain byte vectors; the typed
//! accessors follow the little-endian GATT integer formats.

use uuid::Uuid;

/// Stack status reported for a successful operation
pub const GATT_SUCCESS: i32 = 0;
pub const GATT_READ_NOT_PERMITTED: i32 = 0x02;
pub const GATT_WRITE_NOT_PERMITTED: i32 = 0x03;
pub const GATT_INSUFFICIENT_AUTHENTICATION: i32 = 0x05;
pub const GATT_REQUEST_NOT_SUPPORTED: i32 = 0x06;
pub const GATT_ERROR: i32 = 0x85;
/// Generic failure
pub const GATT_FAILURE: i32 = 0x101;

/// Client characteristic configuration value enabling notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Client characteristic configuration value disabling notifications
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Link-level profile state carried by connection state callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

/// GATT characteristic properties
#[derive(Debug, Clone, Copy)]
pub enum CharacteristicProperty {
    Broadcast = 0x01,
    Read = 0x02,
    WriteWithoutResponse = 0x04,
    Write = 0x08,
    Notify = 0x10,
    Indicate = 0x20,
}

/// Integer value formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattFormat {
    Uint8 = 0x11,
    Uint16 = 0x12,
    Uint32 = 0x14,
    Sint8 = 0x21,
    Sint16 = 0x22,
    Sint32 = 0x24,
}

impl GattFormat {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x11 => Some(GattFormat::Uint8),
            0x12 => Some(GattFormat::Uint16),
            0x14 => Some(GattFormat::Uint32),
            0x21 => Some(GattFormat::Sint8),
            0x22 => Some(GattFormat::Sint16),
            0x24 => Some(GattFormat::Sint32),
            _ => None,
        }
    }

    /// Width in bytes (low nibble of the format code)
    pub fn size(self) -> usize {
        (self as u8 & 0x0F) as usize
    }

    fn is_signed(self) -> bool {
        matches!(self, GattFormat::Sint8 | GattFormat::Sint16 | GattFormat::Sint32)
    }
}

/// GATT Descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattDescriptor {
    pub uuid: Uuid,

    /// Owning characteristic
    pub characteristic_uuid: Uuid,

    /// Owning service
    pub service_uuid: Uuid,

    pub value: Vec<u8>,
}

impl GattDescriptor {
    pub fn new(uuid: Uuid, characteristic_uuid: Uuid, service_uuid: Uuid) -> Self {
        Self {
            uuid,
            characteristic_uuid,
            service_uuid,
            value: Vec::new(),
        }
    }
}

/// GATT Characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,

    /// Owning service
    pub service_uuid: Uuid,

    /// Characteristic properties (bitmask of `CharacteristicProperty`)
    pub properties: u8,

    /// Last value read, written or notified
    pub value: Vec<u8>,

    pub descriptors: Vec<GattDescriptor>,
}

impl GattCharacteristic {
    pub fn new(uuid: Uuid, service_uuid: Uuid, properties: u8) -> Self {
        Self {
            uuid,
            service_uuid,
            properties,
            value: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    /// Attach a descriptor, fixing up its owner ids
    pub fn with_descriptor(mut self, uuid: Uuid) -> Self {
        self.descriptors
            .push(GattDescriptor::new(uuid, self.uuid, self.service_uuid));
        self
    }

    pub fn has_property(&self, property: CharacteristicProperty) -> bool {
        self.properties & property as u8 != 0
    }

    pub fn descriptor(&self, uuid: &Uuid) -> Option<&GattDescriptor> {
        self.descriptors.iter().find(|d| &d.uuid == uuid)
    }

    /// Replace the value with `value` encoded in `format`
    pub fn set_int_value(&mut self, value: i64, format: GattFormat) {
        let bytes = value.to_le_bytes();
        self.value = bytes[..format.size()].to_vec();
    }

    /// Decode an integer at `offset`; `None` if the value is too short
    pub fn int_value(&self, format: GattFormat, offset: usize) -> Option<i64> {
        let size = format.size();
        let raw = self.value.get(offset..offset + size)?;
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(raw);
        let unsigned = u64::from_le_bytes(buf);
        if format.is_signed() {
            let shift = 64 - size * 8;
            Some(((unsigned << shift) as i64) >> shift)
        } else {
            Some(unsigned as i64)
        }
    }

    /// Value as UTF-8 text, with trailing NULs removed
    pub fn string_value(&self) -> String {
        String::from_utf8_lossy(&self.value)
            .trim_end_matches('\0')
            .to_string()
    }
}

/// GATT Service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            characteristics: Vec::new(),
        }
    }

    /// Add a characteristic owned by this service
    pub fn with_characteristic(mut self, mut characteristic: GattCharacteristic) -> Self {
        characteristic.service_uuid = self.uuid;
        for descriptor in characteristic.descriptors.iter_mut() {
            descriptor.service_uuid = self.uuid;
            descriptor.characteristic_uuid = characteristic.uuid;
        }
        self.characteristics.push(characteristic);
        self
    }

    /// Get characteristic by UUID
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }

    /// Get mutable characteristic by UUID
    pub fn characteristic_mut(&mut self, uuid: &Uuid) -> Option<&mut GattCharacteristic> {
        self.characteristics.iter_mut().find(|c| &c.uuid == uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_value_formats() {
        let mut c = GattCharacteristic::new(Uuid::nil(), Uuid::nil(), CharacteristicProperty::Write as u8);

        c.set_int_value(0x0007_044F, GattFormat::Uint32);
        assert_eq!(c.value, vec![0x4F, 0x04, 0x07, 0x00]);
        assert_eq!(c.int_value(GattFormat::Uint32, 0), Some(0x0007_044F));
        assert_eq!(c.int_value(GattFormat::Uint16, 2), Some(7));
        assert_eq!(c.int_value(GattFormat::Uint32, 1), None);

        c.set_int_value(-2, GattFormat::Sint16);
        assert_eq!(c.value, vec![0xFE, 0xFF]);
        assert_eq!(c.int_value(GattFormat::Sint16, 0), Some(-2));
        assert_eq!(c.int_value(GattFormat::Uint16, 0), Some(0xFFFE));
    }

    #[test]
    fn test_service_fixes_owner_ids() {
        let service_uuid = Uuid::from_u128(1);
        let char_uuid = Uuid::from_u128(2);
        let service = GattService::new(service_uuid).with_characteristic(
            GattCharacteristic::new(char_uuid, Uuid::nil(), CharacteristicProperty::Notify as u8)
                .with_descriptor(Uuid::from_u128(3)),
        );

        let c = service.characteristic(&char_uuid).unwrap();
        assert_eq!(c.service_uuid, service_uuid);
        assert!(c.has_property(CharacteristicProperty::Notify));
        let d = c.descriptor(&Uuid::from_u128(3)).unwrap();
        assert_eq!(d.service_uuid, service_uuid);
        assert_eq!(d.characteristic_uuid, char_uuid);
    }

    #[test]
    fn test_string_value_trims_nul() {
        let mut c = GattCharacteristic::new(Uuid::nil(), Uuid::nil(), 0);
        c.value = b"2.0.0-rc9\0".to_vec();
        assert_eq!(c.string_value(), "2.0.0-rc9");
    }
}
