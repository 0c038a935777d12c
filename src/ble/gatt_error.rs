//! Human readable names for raw GATT status codes

/// Describe a status reported by a read/write/discovery callback
pub fn describe(status: i32) -> &'static str {
    match status {
        0x0000 => "GATT SUCCESS",
        0x0001 => "GATT INVALID HANDLE",
        0x0002 => "GATT READ NOT PERMIT",
        0x0003 => "GATT WRITE NOT PERMIT",
        0x0004 => "GATT INVALID PDU",
        0x0005 => "GATT INSUF AUTHENTICATION",
        0x0006 => "GATT REQ NOT SUPPORTED",
        0x0007 => "GATT INVALID OFFSET",
        0x0008 => "GATT INSUF AUTHORIZATION",
        0x0009 => "GATT PREPARE Q FULL",
        0x000A => "GATT NOT FOUND",
        0x000B => "GATT NOT LONG",
        0x000C => "GATT INSUF KEY SIZE",
        0x000D => "GATT INVALID ATTR LEN",
        0x000E => "GATT ERR UNLIKELY",
        0x000F => "GATT INSUF ENCRYPTION",
        0x0010 => "GATT UNSUPPORT GRP TYPE",
        0x0011 => "GATT INSUF RESOURCE",
        0x0080 => "GATT NO RESOURCES",
        0x0081 => "GATT INTERNAL ERROR",
        0x0082 => "GATT WRONG STATE",
        0x0083 => "GATT DB FULL",
        0x0084 => "GATT BUSY",
        0x0085 => "GATT ERROR",
        0x0086 => "GATT CMD STARTED",
        0x0087 => "GATT ILLEGAL PARAMETER",
        0x0088 => "GATT PENDING",
        0x0089 => "GATT AUTH FAIL",
        0x008A => "GATT MORE",
        0x008B => "GATT INVALID CFG",
        0x008C => "GATT SERVICE STARTED",
        0x008D => "GATT ENCRYPTED NO MITM",
        0x008E => "GATT NOT ENCRYPTED",
        0x008F => "GATT CONGESTED",
        0x00FD => "GATT CCCD CFG ERROR",
        0x00FE => "GATT PROCEDURE IN PROGRESS",
        0x00FF => "GATT VALUE OUT OF RANGE",
        0x0101 => "TOO MANY OPEN CONNECTIONS",
        _ => "UNKNOWN GATT ERROR",
    }
}

/// Describe a status reported by a connection state callback
pub fn describe_connection_error(status: i32) -> &'static str {
    match status {
        0x0000 => "SUCCESS",
        0x0001 => "GATT CONN L2C FAILURE",
        0x0008 => "GATT CONN TIMEOUT",
        0x0013 => "GATT CONN TERMINATE PEER USER",
        0x0016 => "GATT CONN TERMINATE LOCAL HOST",
        0x0022 => "GATT CONN LMP TIMEOUT",
        0x003E => "GATT CONN FAIL ESTABLISH",
        0x0085 => "GATT ERROR",
        0x0100 => "GATT CONN CANCEL",
        _ => "UNKNOWN CONNECTION ERROR",
    }
}
