//! Frame kind codes.
//!
//! The high byte carries the direction and status bits, the low byte the
//! operation:
//!
//! | bit (of the 16-bit kind) | meaning |
//! |---|---|
//! | `0x8000` | request (1) or response (0) |
//! | `0x4000` | on responses: success (1) or error (0) |
//! | low byte | operation: `0x01` write, `0x02` read, `0x03` call |

use std::fmt;

/// Set on every request kind.
pub const REQUEST_BIT: u16 = 0x8000;

/// Write into the peer's memory space. Fire and forget.
pub const WRITE_REQUEST: u16 = 0xEC01;
/// Read from the peer's memory space.
pub const READ_REQUEST: u16 = 0xEC02;
/// Successful read: address, length, bytes.
pub const READ_REPLY: u16 = 0x6C02;
/// Failed read: one error code byte.
pub const READ_ERROR: u16 = 0x2C02;
/// Invoke a registered function on the peer.
pub const CALL_REQUEST: u16 = 0xEC03;
/// Successful call: function code, return length, return bytes.
pub const CALL_REPLY: u16 = 0x6C03;
/// Failed call: one error code byte.
pub const CALL_ERROR: u16 = 0x2C03;

/// Read error: the start address lies outside the memory space.
pub const ERR_ILLEGAL_ADDRESS: u8 = 0x01;
/// Call error: no function is registered under the code.
pub const ERR_UNKNOWN_FUNCTION: u8 = 0x01;
/// Call error: the function reported a failure.
pub const ERR_HANDLER_FAILED: u8 = 0x02;
/// Call error: the function returned more bytes than a reply may carry.
pub const ERR_RETURN_OVERFLOW: u8 = 0x03;

/// The operation a frame belongs to, taken from the low byte of its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    WriteMemory,
    ReadMemory,
    CallFunction,
}

impl Operation {
    /// Decode the operation byte of a kind.
    pub fn from_kind(kind: u16) -> Option<Self> {
        match kind & 0x00FF {
            0x01 => Some(Self::WriteMemory),
            0x02 => Some(Self::ReadMemory),
            0x03 => Some(Self::CallFunction),
            _ => None,
        }
    }

    pub fn request_kind(self) -> u16 {
        match self {
            Self::WriteMemory => WRITE_REQUEST,
            Self::ReadMemory => READ_REQUEST,
            Self::CallFunction => CALL_REQUEST,
        }
    }

    /// Kind of the success reply. Writes are never answered.
    pub fn reply_kind(self) -> Option<u16> {
        match self {
            Self::WriteMemory => None,
            Self::ReadMemory => Some(READ_REPLY),
            Self::CallFunction => Some(CALL_REPLY),
        }
    }

    /// Kind of the error reply. Writes are never answered.
    pub fn error_kind(self) -> Option<u16> {
        match self {
            Self::WriteMemory => None,
            Self::ReadMemory => Some(READ_ERROR),
            Self::CallFunction => Some(CALL_ERROR),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::WriteMemory => "write-memory",
            Self::ReadMemory => "read-memory",
            Self::CallFunction => "call-function",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns true if the kind has the request bit set.
pub fn is_request(kind: u16) -> bool {
    kind & REQUEST_BIT != 0
}

/// Returns a human-readable name for a kind.
pub fn kind_name(kind: u16) -> &'static str {
    match kind {
        WRITE_REQUEST => "WRITE_REQUEST",
        READ_REQUEST => "READ_REQUEST",
        READ_REPLY => "READ_REPLY",
        READ_ERROR => "READ_ERROR",
        CALL_REQUEST => "CALL_REQUEST",
        CALL_REPLY => "CALL_REPLY",
        CALL_ERROR => "CALL_ERROR",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_bit() {
        assert!(is_request(WRITE_REQUEST));
        assert!(is_request(READ_REQUEST));
        assert!(is_request(CALL_REQUEST));
        assert!(!is_request(READ_REPLY));
        assert!(!is_request(CALL_ERROR));
    }

    #[test]
    fn operation_from_low_byte() {
        assert_eq!(Operation::from_kind(READ_ERROR), Some(Operation::ReadMemory));
        assert_eq!(Operation::from_kind(CALL_REPLY), Some(Operation::CallFunction));
        assert_eq!(Operation::from_kind(0xEC7F), None);
    }

    #[test]
    fn writes_have_no_replies() {
        assert_eq!(Operation::WriteMemory.reply_kind(), None);
        assert_eq!(Operation::WriteMemory.error_kind(), None);
        assert_eq!(Operation::ReadMemory.reply_kind(), Some(0x6C02));
        assert_eq!(Operation::CallFunction.error_kind(), Some(0x2C03));
    }
}
