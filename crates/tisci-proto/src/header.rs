//! Fixed 12-byte message header.
//!
//! ```text
//! offset  size  field
//!   0      2    checksum   (secure header)
//!   2      2    reserved   (secure header, must be 0)
//!   4      2    type
//!   6      1    host
//!   7      1    seq
//!   8      4    flags
//! ```
//!
//! All multi-byte integers are little-endian. The structs below use
//! unaligned byte-order types so the in-memory layout is the wire layout,
//! with no compiler padding.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::little_endian::{U16, U32},
};

use crate::{
    errors::{CodecError, Result},
    flags::MessageFlags,
    message_type::MessageType,
};

/// Integrity prefix present in every message.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct SecureHeader {
    checksum: U16,
    reserved: U16,
}

impl SecureHeader {
    /// Size on the wire.
    pub const SIZE: usize = 4;

    /// Checksum value (zero outside high-security mode).
    pub fn checksum(&self) -> u16 {
        self.checksum.get()
    }

    /// Reserved field, must be zero.
    pub fn reserved(&self) -> u16 {
        self.reserved.get()
    }
}

/// Generic header shared by all requests and responses.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct MessageHeader {
    secure: SecureHeader,
    message_type: U16,
    host: u8,
    seq: u8,
    flags: U32,
}

const _: () = assert!(size_of::<SecureHeader>() == SecureHeader::SIZE);
const _: () = assert!(size_of::<MessageHeader>() == MessageHeader::SIZE);

impl MessageHeader {
    /// Size on the wire.
    pub const SIZE: usize = 12;

    /// Byte range of the checksum within any encoded message.
    pub const CHECKSUM_RANGE: std::ops::Range<usize> = 0..2;

    /// Create a header with a zeroed secure prefix.
    pub fn new(message_type: MessageType, host: u8, seq: u8, flags: MessageFlags) -> Self {
        Self {
            secure: SecureHeader::default(),
            message_type: U16::new(message_type.to_u16()),
            host,
            seq,
            flags: U32::new(flags.bits()),
        }
    }

    /// Read the header at the front of `bytes` without decoding the body.
    ///
    /// Used for routing: the caller can inspect `seq` and `type` before
    /// committing to a typed decode.
    pub fn peek(bytes: &[u8]) -> Result<Self> {
        Self::read_from_prefix(bytes)
            .map(|(header, _)| header)
            .map_err(|_| CodecError::Truncated { need: Self::SIZE, have: bytes.len() })
    }

    /// Build the reply header a firmware would send for this request.
    ///
    /// Type, host and sequence are echoed; flags carry ACK or NACK.
    pub fn reply(&self, ack: bool) -> Self {
        let flags = if ack { MessageFlags::GENERIC_ACK } else { MessageFlags::GENERIC_NACK };
        Self {
            secure: SecureHeader::default(),
            message_type: self.message_type,
            host: self.host,
            seq: self.seq,
            flags: U32::new(flags.bits()),
        }
    }

    /// Secure prefix.
    pub fn secure(&self) -> &SecureHeader {
        &self.secure
    }

    /// Checksum carried in the secure prefix.
    pub fn checksum(&self) -> u16 {
        self.secure.checksum()
    }

    /// Reserved field of the secure prefix.
    pub fn reserved(&self) -> u16 {
        self.secure.reserved()
    }

    /// Raw type code.
    pub fn message_type_raw(&self) -> u16 {
        self.message_type.get()
    }

    /// Type code as a known [`MessageType`], if supported.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u16(self.message_type_raw())
    }

    /// Originating host id.
    pub fn host(&self) -> u8 {
        self.host
    }

    /// Transaction sequence number.
    pub fn seq(&self) -> u8 {
        self.seq
    }

    /// Flag word. Unknown bits are retained.
    pub fn flags(&self) -> MessageFlags {
        MessageFlags::from_bits_retain(self.flags.get())
    }

    /// Set the message type.
    pub fn set_message_type(&mut self, message_type: MessageType) {
        self.message_type = U16::new(message_type.to_u16());
    }

    /// Set the host id.
    pub fn set_host(&mut self, host: u8) {
        self.host = host;
    }

    /// Set the sequence number.
    pub fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    /// Set the flag word.
    pub fn set_flags(&mut self, flags: MessageFlags) {
        self.flags = U32::new(flags.bits());
    }

    /// Set the checksum field.
    pub fn set_checksum(&mut self, checksum: u16) {
        self.secure.checksum = U16::new(checksum);
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn layout_offsets() {
        let mut header =
            MessageHeader::new(MessageType::Sa2ulGetDkek, 0x0b, 0x7f, MessageFlags::ACK_ON_PROCESSED);
        header.set_checksum(0xbeef);

        assert_eq!(header.as_bytes(), hex!("efbe0000 2990 0b 7f 02000000"));
    }

    #[test]
    fn peek_reads_prefix_only() {
        let mut bytes = hex!("00000000 0200 0b 05 01000000").to_vec();
        bytes.extend_from_slice(&[0xaa; 8]);

        let header = MessageHeader::peek(&bytes).unwrap();
        assert_eq!(header.message_type(), Some(MessageType::Version));
        assert_eq!(header.host(), 0x0b);
        assert_eq!(header.seq(), 5);
        assert_eq!(header.flags(), MessageFlags::ACK_ON_RECEIVED);
    }

    #[test]
    fn secure_prefix_fields() {
        let header = MessageHeader::peek(&hex!("cdab 0000 2990 0b 00 02000000")).unwrap();
        assert_eq!(header.secure().checksum(), 0xabcd);
        assert_eq!(header.secure().reserved(), 0);
        assert_eq!(header.message_type(), Some(MessageType::Sa2ulGetDkek));
    }

    #[test]
    fn peek_rejects_short_buffer() {
        let result = MessageHeader::peek(&[0u8; 11]);
        assert_eq!(result, Err(CodecError::Truncated { need: 12, have: 11 }));
    }

    #[test]
    fn unknown_type_is_preserved_raw() {
        let header = MessageHeader::peek(&hex!("00000000 3412 00 00 00000000")).unwrap();
        assert_eq!(header.message_type(), None);
        assert_eq!(header.message_type_raw(), 0x1234);
    }

    #[test]
    fn reply_echoes_routing_fields() {
        let request =
            MessageHeader::new(MessageType::Version, 11, 42, MessageFlags::ACK_ON_PROCESSED);

        let ack = request.reply(true);
        assert_eq!(ack.seq(), 42);
        assert_eq!(ack.host(), 11);
        assert_eq!(ack.message_type(), Some(MessageType::Version));
        assert!(ack.flags().is_ack());

        let nack = request.reply(false);
        assert_eq!(nack.flags(), MessageFlags::GENERIC_NACK);
    }
}
