//! Message type codes.

use std::fmt;

use crate::errors::CodecError;

/// Supported system-controller message types.
///
/// Requests and their responses share the same type code; direction is
/// implied by who sends the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    /// Firmware version query
    Version = 0x0002,
    /// Derived key-encryption-key retrieval from the SA2UL engine
    Sa2ulGetDkek = 0x9029,
}

impl MessageType {
    /// Wire value of this type.
    #[inline]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a wire value, returning `None` for unsupported codes.
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0002 => Some(Self::Version),
            0x9029 => Some(Self::Sa2ulGetDkek),
            _ => None,
        }
    }

    /// Short name used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Version => "VERSION",
            Self::Sa2ulGetDkek => "SA2UL_GET_DKEK",
        }
    }
}

impl TryFrom<u16> for MessageType {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::from_u16(value).ok_or(CodecError::UnknownMessageType(value))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#06x})", self.name(), self.to_u16())
    }
}
