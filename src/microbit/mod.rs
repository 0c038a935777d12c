//! micro:bit companion protocol
//!
//! GATT identifiers, the event encoding, device requirement records and the
//! negotiation pass that runs after services are discovered.

pub mod events;
pub mod negotiation;
pub mod requirements;
pub mod uuids;

pub use events::{EventCategory, MicrobitEvent, RegistrationId};
pub use negotiation::{NegotiationError, NegotiationReport, Negotiator};
pub use requirements::{DeviceRequirement, RequirementRecord};
