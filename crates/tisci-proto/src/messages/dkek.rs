//! SA2UL derived key-encryption-key (DKEK) retrieval.
//!
//! The firmware derives a 32-byte key from a device secret using a KDF whose
//! label and context are supplied by the requester. Label bytes come first
//! in the shared buffer, context bytes follow, the remainder is zero.

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    codec::{Request, WireMessage},
    errors::{CodecError, Result},
    flags::MessageFlags,
    header::MessageHeader,
    message_type::MessageType,
};

/// Capacity of the combined KDF label and context buffer.
pub const KDF_LABEL_AND_CONTEXT_LEN_MAX: usize = 41;

/// Length of the derived key returned by the firmware.
pub const SA2UL_DKEK_KEY_LEN: usize = 32;

/// Request for a derived key-encryption-key.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct DkekRequest {
    header: MessageHeader,
    sa2ul_instance: u8,
    kdf_label_len: u8,
    kdf_context_len: u8,
    kdf_label_and_context: [u8; KDF_LABEL_AND_CONTEXT_LEN_MAX],
}

const _: () = assert!(size_of::<DkekRequest>() == 56);

impl DkekRequest {
    /// Build a request for `instance` with the given KDF inputs.
    ///
    /// Fails with [`CodecError::LabelContextTooLong`] when label and context
    /// together exceed [`KDF_LABEL_AND_CONTEXT_LEN_MAX`].
    pub fn new(instance: u8, label: &[u8], context: &[u8]) -> Result<Self> {
        let len = label.len() + context.len();
        if len > KDF_LABEL_AND_CONTEXT_LEN_MAX {
            return Err(CodecError::LabelContextTooLong { len, max: KDF_LABEL_AND_CONTEXT_LEN_MAX });
        }

        let mut kdf_label_and_context = [0u8; KDF_LABEL_AND_CONTEXT_LEN_MAX];
        kdf_label_and_context[..label.len()].copy_from_slice(label);
        kdf_label_and_context[label.len()..len].copy_from_slice(context);

        Ok(Self {
            header: MessageHeader::new(MessageType::Sa2ulGetDkek, 0, 0, MessageFlags::NO_RESPONSE),
            sa2ul_instance: instance,
            kdf_label_len: label.len() as u8,
            kdf_context_len: context.len() as u8,
            kdf_label_and_context,
        })
    }

    /// SA2UL instance number.
    pub fn instance(&self) -> u8 {
        self.sa2ul_instance
    }

    /// KDF label bytes.
    pub fn label(&self) -> &[u8] {
        &self.kdf_label_and_context[..self.kdf_label_len as usize]
    }

    /// KDF context bytes.
    pub fn context(&self) -> &[u8] {
        let start = self.kdf_label_len as usize;
        &self.kdf_label_and_context[start..start + self.kdf_context_len as usize]
    }
}

impl WireMessage for DkekRequest {
    const MESSAGE_TYPE: MessageType = MessageType::Sa2ulGetDkek;

    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn validate(&self) -> Result<()> {
        let len = self.kdf_label_len as usize + self.kdf_context_len as usize;
        if len > KDF_LABEL_AND_CONTEXT_LEN_MAX {
            return Err(CodecError::LabelContextTooLong { len, max: KDF_LABEL_AND_CONTEXT_LEN_MAX });
        }
        Ok(())
    }
}

impl Request for DkekRequest {
    type Response = DkekResponse;
}

/// Response carrying the derived key.
///
/// The key bytes are wiped when the value is dropped, and `Debug` never
/// prints them.
#[repr(C)]
#[derive(Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Zeroize, ZeroizeOnDrop)]
pub struct DkekResponse {
    #[zeroize(skip)]
    header: MessageHeader,
    dkek: [u8; SA2UL_DKEK_KEY_LEN],
}

const _: () = assert!(size_of::<DkekResponse>() == 44);

impl DkekResponse {
    /// Build a response carrying `dkek`.
    pub fn new(header: MessageHeader, dkek: &[u8; SA2UL_DKEK_KEY_LEN]) -> Self {
        Self { header, dkek: *dkek }
    }

    /// Derived key bytes.
    pub fn dkek(&self) -> &[u8; SA2UL_DKEK_KEY_LEN] {
        &self.dkek
    }
}

impl WireMessage for DkekResponse {
    const MESSAGE_TYPE: MessageType = MessageType::Sa2ulGetDkek;

    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}

impl fmt::Debug for DkekResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkekResponse")
            .field("header", &self.header)
            .field("dkek", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{checksum::IntegrityMode, codec};

    #[test]
    fn label_then_context_then_zero() {
        let request = DkekRequest::new(0, b"OP-TEE", b"DKEK").unwrap();
        let bytes = codec::encode(&request, IntegrityMode::Standard);

        assert_eq!(bytes.len(), 56);
        assert_eq!(&bytes[12..15], &[0, 6, 4]);
        assert_eq!(&bytes[15..25], b"OP-TEEDKEK");
        assert!(bytes[25..].iter().all(|&b| b == 0));
        assert_eq!(request.label(), b"OP-TEE");
        assert_eq!(request.context(), b"DKEK");
    }

    #[test]
    fn exact_capacity_accepted() {
        let label = [b'L'; 20];
        let context = [b'C'; 21];
        let request = DkekRequest::new(0, &label, &context).unwrap();
        assert_eq!(request.label().len() + request.context().len(), 41);
    }

    #[test]
    fn over_capacity_rejected() {
        let result = DkekRequest::new(0, &[b'L'; 21], &[b'C'; 21]);
        assert_eq!(result, Err(CodecError::LabelContextTooLong { len: 42, max: 41 }));
    }

    #[test]
    fn decode_validates_lengths() {
        let request = DkekRequest::new(0, b"a", b"b").unwrap();
        let mut bytes = codec::encode(&request, IntegrityMode::Standard);
        // label length 41 plus context length 1
        bytes[13] = 41;

        let result = codec::decode::<DkekRequest>(&bytes, IntegrityMode::Standard);
        assert_eq!(result, Err(CodecError::LabelContextTooLong { len: 42, max: 41 }));
    }

    #[test]
    fn response_debug_redacts_key() {
        let header = MessageHeader::new(MessageType::Sa2ulGetDkek, 0, 0, MessageFlags::GENERIC_ACK);
        let response = DkekResponse::new(header, &[0xa5; 32]);
        let printed = format!("{response:?}");
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("165"));
    }

    #[test]
    fn response_zeroize_clears_key() {
        let header = MessageHeader::new(MessageType::Sa2ulGetDkek, 0, 0, MessageFlags::GENERIC_ACK);
        let mut response = DkekResponse::new(header, &[0xa5; 32]);
        response.zeroize();
        assert_eq!(response.dkek(), &[0u8; 32]);
        assert_eq!(response.header().seq(), 0);
    }
}
