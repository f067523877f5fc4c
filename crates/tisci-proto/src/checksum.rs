//! Secure-header integrity checksum.
//!
//! The checksum is the 16-bit two's complement of the byte sum of everything
//! after the checksum field. A correctly sealed message therefore satisfies
//! `checksum + sum(bytes[2..]) == 0 (mod 2^16)`. Any single-byte corruption
//! changes the sum by a non-zero amount below 2^8 and is always detected.

use crate::{
    errors::{CodecError, Result},
    header::MessageHeader,
};

/// Whether the deployment requires integrity-checked messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrityMode {
    /// Checksum is written as zero and ignored on receive
    #[default]
    Standard,
    /// Checksum is computed on send and verified on receive
    HighSecurity,
}

impl IntegrityMode {
    /// Whether checksums are enforced.
    pub const fn is_enforced(self) -> bool {
        matches!(self, Self::HighSecurity)
    }

    /// Write the checksum field of an encoded message in place.
    ///
    /// In [`IntegrityMode::Standard`] the field is forced to zero.
    pub fn seal(self, message: &mut [u8]) {
        if message.len() < MessageHeader::SIZE {
            return;
        }
        let checksum = match self {
            Self::Standard => 0,
            Self::HighSecurity => compute(message),
        };
        message[MessageHeader::CHECKSUM_RANGE].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Verify the checksum of an encoded message.
    ///
    /// Always succeeds in [`IntegrityMode::Standard`].
    pub fn verify(self, message: &[u8]) -> Result<()> {
        if !self.is_enforced() {
            return Ok(());
        }
        if message.len() < MessageHeader::SIZE {
            return Err(CodecError::Truncated { need: MessageHeader::SIZE, have: message.len() });
        }

        let actual = u16::from_le_bytes([message[0], message[1]]);
        let expected = compute(message);
        if actual == expected {
            Ok(())
        } else {
            Err(CodecError::ChecksumMismatch { expected, actual })
        }
    }
}

/// Compute the checksum over an encoded message.
///
/// The checksum field itself (bytes 0..2) is excluded.
pub fn compute(message: &[u8]) -> u16 {
    let sum = message
        .iter()
        .skip(MessageHeader::CHECKSUM_RANGE.end)
        .fold(0u16, |acc, &byte| acc.wrapping_add(u16::from(byte)));
    0u16.wrapping_sub(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_excludes_checksum_field() {
        let mut message = [0u8; 12];
        message[4] = 0x02;
        let before = compute(&message);

        message[0] = 0xff;
        message[1] = 0xff;
        assert_eq!(compute(&message), before);
        assert_eq!(before, 0u16.wrapping_sub(2));
    }

    #[test]
    fn sealed_message_verifies() {
        let mut message = [0x5au8; 44];
        IntegrityMode::HighSecurity.seal(&mut message);
        assert!(IntegrityMode::HighSecurity.verify(&message).is_ok());
    }

    #[test]
    fn corrupted_byte_detected() {
        let mut message = [0x11u8; 56];
        IntegrityMode::HighSecurity.seal(&mut message);
        message[30] ^= 0x80;

        let result = IntegrityMode::HighSecurity.verify(&message);
        assert!(matches!(result, Err(CodecError::ChecksumMismatch { .. })));
    }

    #[test]
    fn standard_mode_zeroes_and_ignores() {
        let mut message = [0x11u8; 12];
        IntegrityMode::Standard.seal(&mut message);
        assert_eq!(&message[0..2], &[0, 0]);

        message[0] = 0x99;
        assert!(IntegrityMode::Standard.verify(&message).is_ok());
    }
}
