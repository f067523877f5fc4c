//! Acknowledgement flags carried in every message header.
//!
//! On requests the flags select how the firmware acknowledges the message.
//! On responses the same bit positions report the outcome: bit 1 set is a
//! generic ACK, an empty flag word is a generic NACK.

use bitflags::bitflags;

bitflags! {
    /// Header flag word (32 bits on the wire).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MessageFlags: u32 {
        /// Firmware acknowledges as soon as the request is received
        const ACK_ON_RECEIVED = 1 << 0;
        /// Firmware acknowledges once the request has been processed
        const ACK_ON_PROCESSED = 1 << 1;
    }
}

impl MessageFlags {
    /// Request flags for fire-and-forget messages.
    pub const NO_RESPONSE: Self = Self::empty();

    /// Response flag reporting success.
    pub const GENERIC_ACK: Self = Self::ACK_ON_PROCESSED;

    /// Response flag word reporting refusal.
    pub const GENERIC_NACK: Self = Self::empty();

    /// Whether a request with these flags expects any reply frame.
    #[inline]
    pub const fn expects_response(self) -> bool {
        !self.is_empty()
    }

    /// Whether a response with these flags is a generic ACK.
    #[inline]
    pub const fn is_ack(self) -> bool {
        self.contains(Self::GENERIC_ACK)
    }
}
