//! Device requirement records
//!
//! Each read of the micro:bit requirements characteristic yields one record:
//! a little-endian (category, subcode) pair the board wants the phone to send.

use std::fmt;

use super::events::{device_info, make_microbit_value, EventCategory};

/// One (category, subcode) request drained from the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequirementRecord {
    pub category: u16,
    pub subcode: u16,
}

impl RequirementRecord {
    pub fn new(category: u16, subcode: u16) -> Self {
        Self { category, subcode }
    }

    /// Parse a raw characteristic value; `None` if shorter than four bytes
    pub fn from_bytes(value: &[u8]) -> Option<Self> {
        let raw = value.get(..4)?;
        Some(Self {
            category: u16::from_le_bytes([raw[0], raw[1]]),
            subcode: u16::from_le_bytes([raw[2], raw[3]]),
        })
    }

    /// Parse the dashed hex form, e.g. `4F-04-07-00`
    pub fn from_token(token: &str) -> Option<Self> {
        let bytes = hex::decode(token.replace('-', "")).ok()?;
        if bytes.len() != 4 {
            return None;
        }
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(self) -> [u8; 4] {
        make_microbit_value(self.category, self.subcode).to_le_bytes()
    }

    /// Dashed upper-case hex of the wire bytes
    pub fn token(self) -> String {
        dashed_hex(&self.to_bytes())
    }
}

impl fmt::Display for RequirementRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// Render bytes as `AA-BB-CC`
pub fn dashed_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join("-")
}

/// Requirements the companion knows how to satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRequirement {
    IncomingCall,
    IncomingSms,
}

impl DeviceRequirement {
    pub fn from_record(record: RequirementRecord) -> Option<Self> {
        if record.category != EventCategory::DeviceInfo.code() {
            return None;
        }
        match record.subcode {
            device_info::INCOMING_CALL => Some(DeviceRequirement::IncomingCall),
            device_info::INCOMING_SMS => Some(DeviceRequirement::IncomingSms),
            _ => None,
        }
    }

    pub fn record(self) -> RequirementRecord {
        let subcode = match self {
            DeviceRequirement::IncomingCall => device_info::INCOMING_CALL,
            DeviceRequirement::IncomingSms => device_info::INCOMING_SMS,
        };
        RequirementRecord::new(EventCategory::DeviceInfo.code(), subcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens() {
        assert_eq!(DeviceRequirement::IncomingCall.record().token(), "4F-04-07-00");
        assert_eq!(DeviceRequirement::IncomingSms.record().token(), "4F-04-08-00");
        assert_eq!(
            RequirementRecord::from_token("4f-04-08-00"),
            Some(DeviceRequirement::IncomingSms.record())
        );
        assert_eq!(RequirementRecord::from_token("4F-04"), None);
        assert_eq!(RequirementRecord::from_token("zz-04-08-00"), None);
    }

    #[test]
    fn test_unknown_records_are_not_requirements() {
        assert_eq!(DeviceRequirement::from_record(RequirementRecord::new(1103, 3)), None);
        assert_eq!(DeviceRequirement::from_record(RequirementRecord::new(1001, 7)), None);
        assert_eq!(RequirementRecord::from_bytes(&[0x4F, 0x04]), None);
    }
}
