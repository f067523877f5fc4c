//! Typed encode/decode for fixed-layout messages.
//!
//! Every message is a `#[repr(C)]` struct of unaligned fields starting with a
//! [`MessageHeader`], so encoding is a byte copy plus checksum sealing, and
//! decoding is a length-checked copy out of the buffer. Decoding produces a
//! fresh value and leaves no partial state behind on failure.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    checksum::IntegrityMode,
    errors::{CodecError, Result},
    header::MessageHeader,
    message_type::MessageType,
};

/// A fixed-layout message with a leading [`MessageHeader`].
pub trait WireMessage: FromBytes + IntoBytes + KnownLayout + Immutable + Sized {
    /// Type code carried in the header.
    const MESSAGE_TYPE: MessageType;

    /// Encoded size in bytes.
    const SIZE: usize = size_of::<Self>();

    /// Message header.
    fn header(&self) -> &MessageHeader;

    /// Mutable message header.
    fn header_mut(&mut self) -> &mut MessageHeader;

    /// Check body invariants after decoding.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// A request and the response type the firmware answers it with.
pub trait Request: WireMessage {
    /// Response message for this request.
    type Response: WireMessage;
}

/// Encode a message into its exact wire bytes.
///
/// The checksum field is sealed according to `mode`; the reserved field is
/// always zero.
pub fn encode<M: WireMessage>(message: &M, mode: IntegrityMode) -> Vec<u8> {
    let mut bytes = message.as_bytes().to_vec();
    // reserved
    bytes[2..4].fill(0);
    mode.seal(&mut bytes);
    bytes
}

/// Decode a message of type `M` from the front of `bytes`.
///
/// Checks, in order: the buffer holds at least `M::SIZE` bytes, the checksum
/// (high-security mode only), the header type code, the reserved field, and
/// finally the message's own body invariants. Trailing bytes are ignored.
pub fn decode<M: WireMessage>(bytes: &[u8], mode: IntegrityMode) -> Result<M> {
    if bytes.len() < M::SIZE {
        return Err(CodecError::Truncated { need: M::SIZE, have: bytes.len() });
    }
    let framed = &bytes[..M::SIZE];

    mode.verify(framed)?;

    let header = MessageHeader::peek(framed)?;
    let expected = M::MESSAGE_TYPE.to_u16();
    if header.message_type_raw() != expected {
        return Err(CodecError::UnexpectedType { expected, actual: header.message_type_raw() });
    }
    if header.reserved() != 0 {
        return Err(CodecError::ReservedNotZero(header.reserved()));
    }

    let message = M::read_from_bytes(framed)
        .map_err(|_| CodecError::Truncated { need: M::SIZE, have: framed.len() })?;
    message.validate()?;
    Ok(message)
}
