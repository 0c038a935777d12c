//! Connection state bits and the packed status code returned by every GATT operation
//!
//! Low 16 bits carry the connection state at completion, high 16 bits carry the
//! error flags (or one of the two sentinels).

use std::fmt;
use std::ops::BitOr;

/// Error flag: the stack reported a failure status
pub const ERROR_FAIL: u32 = 0x0001_0000;

/// Error flag: no callback arrived within the wait budget (always paired with FAIL)
pub const ERROR_TIMEOUT: u32 = 0x0002_0000;

/// Sentinel: the operation was not attempted
pub const ERROR_NOOP: u32 = 0xFFFF_0000;

/// Sentinel: there is no session link to operate on
pub const ERROR_NOGATT: u32 = 0xFFFE_0000;

const STATE_MASK: u32 = 0x0000_FFFF;
const ERROR_MASK: u32 = 0xFFFF_0000;

/// Bitmask over {disconnected, connected, services discovered}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ConnectionState(u16);

impl ConnectionState {
    pub const DISCONNECTED: Self = Self(0x0000);
    pub const CONNECTED: Self = Self(0x0001);
    pub const SERVICES_DISCOVERED: Self = Self(0x0002);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & 0x0003)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_disconnected(self) -> bool {
        self.0 == 0
    }

    pub const fn is_connected(self) -> bool {
        self.0 & Self::CONNECTED.0 != 0
    }

    pub const fn services_discovered(self) -> bool {
        self.0 & Self::SERVICES_DISCOVERED.0 != 0
    }

    /// Sets the services-discovered bit. Ignored unless the connected bit is set.
    pub fn mark_services_discovered(&mut self) {
        if self.is_connected() {
            self.0 |= Self::SERVICES_DISCOVERED.0;
        }
    }

    pub fn clear_services_discovered(&mut self) {
        self.0 &= !Self::SERVICES_DISCOVERED.0;
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_connected(), self.services_discovered()) {
            (false, false) => write!(f, "DISCONNECTED"),
            (true, false) => write!(f, "CONNECTED"),
            (true, true) => write!(f, "CONNECTED|SERVICES_DISCOVERED"),
            (false, true) => write!(f, "SERVICES_DISCOVERED"),
        }
    }
}

/// Error outcome of a single operation, kept apart from the state bits until encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    #[default]
    Ok,
    Fail,
    /// FAIL with the TIMEOUT flag
    Timeout,
    Noop,
    NoGatt,
}

impl ErrorKind {
    pub const fn flags(self) -> u32 {
        match self {
            ErrorKind::Ok => 0,
            ErrorKind::Fail => ERROR_FAIL,
            ErrorKind::Timeout => ERROR_FAIL | ERROR_TIMEOUT,
            ErrorKind::Noop => ERROR_NOOP,
            ErrorKind::NoGatt => ERROR_NOGATT,
        }
    }

    /// Maps a stack status to OK/FAIL
    pub const fn from_gatt_status(status: i32) -> Self {
        if status == crate::ble::gatt::GATT_SUCCESS {
            ErrorKind::Ok
        } else {
            ErrorKind::Fail
        }
    }
}

/// Outcome of one gated operation before it is packed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpResult {
    pub state: ConnectionState,
    pub error: ErrorKind,
    /// Raw stack status of the completing callback
    pub extended: i32,
}

impl OpResult {
    pub fn status(&self) -> StatusCode {
        StatusCode::new(self.error, self.state)
    }
}

/// Packed result as seen by callers of the manager
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(u32);

impl StatusCode {
    pub const fn new(error: ErrorKind, state: ConnectionState) -> Self {
        Self(error.flags() | state.bits() as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Connection state bits at completion
    pub const fn state(self) -> ConnectionState {
        ConnectionState::from_bits((self.0 & STATE_MASK) as u16)
    }

    /// The high half as a 16-bit value (0x0000 OK, 0x0001 FAIL, 0x0003 FAIL|TIMEOUT, ...)
    pub const fn error_bits(self) -> u16 {
        ((self.0 & ERROR_MASK) >> 16) as u16
    }

    pub const fn is_noop(self) -> bool {
        self.0 & ERROR_MASK == ERROR_NOOP
    }

    pub const fn is_nogatt(self) -> bool {
        self.0 & ERROR_MASK == ERROR_NOGATT
    }

    const fn is_sentinel(self) -> bool {
        self.is_noop() || self.is_nogatt()
    }

    pub const fn is_ok(self) -> bool {
        self.0 & ERROR_MASK == 0
    }

    pub const fn is_fail(self) -> bool {
        !self.is_sentinel() && self.0 & ERROR_FAIL != 0
    }

    pub const fn is_timeout(self) -> bool {
        self.is_fail() && self.0 & ERROR_TIMEOUT != 0
    }

    pub const fn kind(self) -> ErrorKind {
        if self.is_noop() {
            ErrorKind::Noop
        } else if self.is_nogatt() {
            ErrorKind::NoGatt
        } else if self.is_timeout() {
            ErrorKind::Timeout
        } else if self.is_fail() {
            ErrorKind::Fail
        } else {
            ErrorKind::Ok
        }
    }
}

impl BitOr for StatusCode {
    type Output = StatusCode;

    fn bitor(self, rhs: Self) -> Self::Output {
        StatusCode(self.0 | rhs.0)
    }
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> Self {
        code.0
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusCode(0x{:08X} {:?} {})", self.0, self.kind(), self.state())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}
