//! Error types for the protocol client.

use std::time::Duration;

use thiserror::Error;
use tisci_proto::{CodecError, MessageType};

use crate::{transport::TransportError, version::AbiVersion};

/// Errors from the transaction layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Transport failed to send or receive
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No matching response arrived before the deadline
    #[error("timed out after {waited:?} waiting for {message_type} response (seq {seq})")]
    Timeout {
        /// Sequence number of the abandoned transaction
        seq: u8,
        /// Request type
        message_type: MessageType,
        /// Time spent waiting
        waited: Duration,
    },

    /// Integrity check failed. Never retried: may indicate tampering.
    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes
        expected: u16,
        /// Checksum carried in the message
        actual: u16,
    },

    /// Response was malformed
    #[error("malformed message: {0}")]
    Decode(CodecError),

    /// Firmware answered with a generic NACK
    #[error("firmware refused {message_type} request (seq {seq})")]
    Nack {
        /// Sequence number of the refused request
        seq: u8,
        /// Request type
        message_type: MessageType,
    },

    /// Every sequence number is held by a live transaction
    #[error("all sequence numbers are in flight")]
    SequenceExhausted,

    /// `send_and_wait` on a transaction opened without acknowledgement flags
    #[error("transaction seq {seq} expects no response")]
    NoResponseExpected {
        /// Sequence number of the transaction
        seq: u8,
    },

    /// `send_only` on a transaction that expects a response
    #[error("transaction seq {seq} expects a response")]
    ResponseExpected {
        /// Sequence number of the transaction
        seq: u8,
    },

    /// Request bytes were not stamped for this transaction
    #[error("request header (seq {actual_seq}, type {actual_type:#06x}) does not match transaction seq {expected_seq}")]
    RequestMismatch {
        /// Transaction sequence number
        expected_seq: u8,
        /// Sequence number found in the request
        actual_seq: u8,
        /// Type code found in the request
        actual_type: u16,
    },
}

impl From<CodecError> for ProtocolError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::ChecksumMismatch { expected, actual } => {
                Self::ChecksumMismatch { expected, actual }
            },
            other => Self::Decode(other),
        }
    }
}

impl ProtocolError {
    /// Whether the caller may retry with a fresh transaction.
    ///
    /// Only timeouts qualify. Integrity failures and NACKs are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error indicates a failed integrity check.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }
}

/// Errors from the key derivation client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyDerivationError {
    /// Transaction layer failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Caller-supplied arguments violate a precondition
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Only SA2UL instance 0 is supported
    #[error("SA2UL instance {0} is not supported")]
    UnsupportedInstance(u8),

    /// Firmware ABI is older than the configured minimum
    #[error("firmware ABI {actual} is below required {required}")]
    UnsupportedVersion {
        /// Configured minimum
        required: AbiVersion,
        /// Reported by firmware
        actual: AbiVersion,
    },
}

/// Errors from platform bring-up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// Secure proxy could not be initialized
    #[error("secure proxy initialization failed: {0}")]
    Transport(#[from] TransportError),

    /// Firmware handshake failed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Key derivation failed
    #[error(transparent)]
    KeyDerivation(#[from] KeyDerivationError),

    /// Platform was configured without the key derivation capability
    #[error("key derivation is not available on this platform")]
    KeyDerivationDisabled,

    /// Requested hardware unique key is longer than the derived key
    #[error("hardware unique key length {len} exceeds derived key length {max}")]
    InvalidKeyLength {
        /// Configured length
        len: usize,
        /// Derived key length
        max: usize,
    },
}
