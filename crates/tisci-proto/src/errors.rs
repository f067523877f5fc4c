//! Codec error types.

use thiserror::Error;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors produced while encoding or decoding wire messages.
///
/// Decoding never yields a partially populated message: any of these errors
/// means the input was rejected as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Buffer is shorter than the fixed layout of the expected message.
    #[error("message truncated: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required by the layout
        need: usize,
        /// Bytes actually present
        have: usize,
    },

    /// Header carries a different message type than the one being decoded.
    #[error("unexpected message type: expected {expected:#06x}, got {actual:#06x}")]
    UnexpectedType {
        /// Type code the caller asked for
        expected: u16,
        /// Type code found in the header
        actual: u16,
    },

    /// Integrity checksum does not match the message contents.
    ///
    /// Only reported in high-security mode. Callers must treat this as a
    /// possible tampering attempt and never retry automatically.
    #[error("checksum mismatch: expected {expected:#06x}, header carries {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes
        expected: u16,
        /// Checksum carried in the secure header
        actual: u16,
    },

    /// The reserved half of the secure header is not zero.
    #[error("reserved header field is {0:#06x}, must be zero")]
    ReservedNotZero(u16),

    /// KDF label and context do not fit the fixed request buffer.
    #[error("KDF label and context total {len} bytes, limit is {max}")]
    LabelContextTooLong {
        /// Combined label and context length
        len: usize,
        /// Capacity of the request buffer
        max: usize,
    },

    /// Type code is not part of the supported message set.
    #[error("unknown message type {0:#06x}")]
    UnknownMessageType(u16),
}
