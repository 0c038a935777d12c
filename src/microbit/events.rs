//! micro:bit event protocol values
//!
//! An event on the wire is a little-endian u32: the low half is the event
//! source (category), the high half the event code within it.

use std::fmt;

/// Smallest source id that belongs to the companion protocol
pub const MIN_EVENT_SOURCE: u16 = 1001;

/// Event categories understood by the companion app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    RemoteControl = 1001,
    Camera = 1002,
    AudioRecorder = 1003,
    Alerts = 1004,
    SignalStrength = 1101,
    DeviceInfo = 1103,
    /// Internal registration bucket, never sent to the board
    Telephony = 5555,
}

impl EventCategory {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1001 => Some(EventCategory::RemoteControl),
            1002 => Some(EventCategory::Camera),
            1003 => Some(EventCategory::AudioRecorder),
            1004 => Some(EventCategory::Alerts),
            1101 => Some(EventCategory::SignalStrength),
            1103 => Some(EventCategory::DeviceInfo),
            5555 => Some(EventCategory::Telephony),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Categories whose board events are forwarded to the plugin layer
    pub fn is_forwarded(self) -> bool {
        matches!(
            self,
            EventCategory::RemoteControl
                | EventCategory::Alerts
                | EventCategory::AudioRecorder
                | EventCategory::Camera
        )
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Local event sources the app registers with its plugin layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationId {
    Telephony = 0x01,
    Messaging = 0x02,
    DeviceOrientation = 0x04,
    DeviceGesture = 0x08,
    Display = 0x10,
    SignalStrength = 0x20,
    BatteryStrength = 0x40,
    Temperature = 0x80,
}

impl RegistrationId {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Standing local registrations, in the order they are sent
pub const LOCAL_REGISTRATIONS: [(EventCategory, RegistrationId); 8] = [
    (EventCategory::SignalStrength, RegistrationId::SignalStrength),
    (EventCategory::DeviceInfo, RegistrationId::DeviceOrientation),
    (EventCategory::DeviceInfo, RegistrationId::DeviceGesture),
    (EventCategory::DeviceInfo, RegistrationId::BatteryStrength),
    (EventCategory::DeviceInfo, RegistrationId::Temperature),
    (EventCategory::Telephony, RegistrationId::Telephony),
    (EventCategory::Telephony, RegistrationId::Messaging),
    (EventCategory::Telephony, RegistrationId::Display),
];

/// Categories the app declares in the client requirements characteristic
pub const CLIENT_REQUIREMENTS: [EventCategory; 5] = [
    EventCategory::RemoteControl,
    EventCategory::Camera,
    EventCategory::Alerts,
    EventCategory::SignalStrength,
    EventCategory::DeviceInfo,
];

pub mod remote_control {
    pub const PLAY: u16 = 1;
    pub const PAUSE: u16 = 2;
    pub const STOP: u16 = 3;
    pub const NEXT_TRACK: u16 = 4;
    pub const PREV_TRACK: u16 = 5;
    pub const FORWARD: u16 = 6;
    pub const REWIND: u16 = 7;
    pub const VOLUME_UP: u16 = 8;
    pub const VOLUME_DOWN: u16 = 9;
}

pub mod camera {
    pub const LAUNCH_PHOTO_MODE: u16 = 1;
    pub const LAUNCH_VIDEO_MODE: u16 = 2;
    pub const TAKE_PHOTO: u16 = 3;
    pub const START_VIDEO_CAPTURE: u16 = 4;
    pub const STOP_VIDEO_CAPTURE: u16 = 5;
    pub const STOP_PHOTO_MODE: u16 = 6;
    pub const STOP_VIDEO_MODE: u16 = 7;
    pub const TOGGLE_FRONT_REAR: u16 = 8;
}

pub mod audio_recorder {
    pub const LAUNCH: u16 = 0;
    pub const START_CAPTURE: u16 = 1;
    pub const STOP_CAPTURE: u16 = 2;
    pub const STOP: u16 = 3;
}

pub mod alerts {
    pub const DISPLAY_TOAST: u16 = 1;
    pub const VIBRATE: u16 = 2;
    pub const PLAY_SOUND: u16 = 3;
    pub const PLAY_RINGTONE: u16 = 4;
    pub const FIND_MY_PHONE: u16 = 5;
    pub const ALARM1: u16 = 6;
    pub const ALARM2: u16 = 7;
    pub const ALARM3: u16 = 8;
    pub const ALARM4: u16 = 9;
    pub const ALARM5: u16 = 10;
    pub const ALARM6: u16 = 11;
    pub const STOP_PLAYING: u16 = 12;
}

pub mod signal_strength {
    pub const NO_BAR: u16 = 1;
    pub const ONE_BAR: u16 = 2;
    pub const TWO_BAR: u16 = 3;
    pub const THREE_BAR: u16 = 4;
    pub const FOUR_BAR: u16 = 5;
}

pub mod device_info {
    pub const ORIENTATION_LANDSCAPE: u16 = 1;
    pub const ORIENTATION_PORTRAIT: u16 = 2;
    pub const GESTURE_NONE: u16 = 3;
    pub const GESTURE_DEVICE_SHAKEN: u16 = 4;
    pub const DISPLAY_OFF: u16 = 5;
    pub const DISPLAY_ON: u16 = 6;
    pub const INCOMING_CALL: u16 = 7;
    pub const INCOMING_SMS: u16 = 8;
    pub const BATTERY_STRENGTH: u16 = 9;
}

/// One event as carried by the event characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicrobitEvent {
    pub source: u16,
    pub event: u16,
}

impl MicrobitEvent {
    pub fn new(category: EventCategory, event: u16) -> Self {
        Self {
            source: category.code(),
            event,
        }
    }

    /// Pack as `(event << 16) | source`
    pub fn to_value(self) -> u32 {
        make_microbit_value(self.source, self.event)
    }

    /// Unpack a wire value; sources below [`MIN_EVENT_SOURCE`] are not ours
    pub fn from_value(value: u32) -> Option<Self> {
        let source = (value & 0xFFFF) as u16;
        if source < MIN_EVENT_SOURCE {
            return None;
        }
        Some(Self {
            source,
            event: ((value >> 16) & 0xFFFF) as u16,
        })
    }

    pub fn category(self) -> Option<EventCategory> {
        EventCategory::from_code(self.source)
    }
}

pub fn make_microbit_value(category: u16, value: u16) -> u32 {
    ((value as u32) << 16) | category as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_layout() {
        let event = MicrobitEvent::new(EventCategory::DeviceInfo, device_info::INCOMING_CALL);
        assert_eq!(event.to_value(), 0x0007_044F);
        assert_eq!(MicrobitEvent::from_value(0x0007_044F), Some(event));
    }

    #[test]
    fn test_low_sources_are_ignored() {
        assert_eq!(MicrobitEvent::from_value(make_microbit_value(1000, 1)), None);
        assert_eq!(MicrobitEvent::from_value(0), None);
    }

    #[test]
    fn test_forwarded_categories() {
        assert!(EventCategory::RemoteControl.is_forwarded());
        assert!(EventCategory::AudioRecorder.is_forwarded());
        assert!(!EventCategory::DeviceInfo.is_forwarded());
        assert!(!EventCategory::SignalStrength.is_forwarded());
        assert_eq!(EventCategory::from_code(4242), None);
    }
}
