//! Wire format for the system-controller message protocol.
//!
//! Every message is a packed, little-endian struct that starts with a
//! 12-byte header: a 4-byte secure prefix (integrity checksum plus a
//! reserved half-word), the message type, the originating host id, a
//! sequence number used to pair responses with requests, and a 32-bit
//! acknowledgement flag word.
//!
//! Only the version query and the SA2UL derived-key request are modelled.
//!
//! # Security
//!
//! All parsing goes through compile-time verified layouts via `zerocopy`;
//! decoders check length before touching the body and never hand back a
//! partially decoded value. In high-security deployments every message
//! carries a checksum that is verified before any field is trusted. Message
//! bodies that carry key material zeroize themselves on drop.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod checksum;
pub mod codec;
pub mod errors;
pub mod flags;
pub mod header;
pub mod message_type;
pub mod messages;

pub use checksum::IntegrityMode;
pub use codec::{Request, WireMessage, decode, encode};
pub use errors::{CodecError, Result};
pub use flags::MessageFlags;
pub use header::{MessageHeader, SecureHeader};
pub use message_type::MessageType;
pub use messages::{
    DkekRequest, DkekResponse, FIRMWARE_DESCRIPTION_LEN, KDF_LABEL_AND_CONTEXT_LEN_MAX,
    SA2UL_DKEK_KEY_LEN, VersionRequest, VersionResponse,
};
