//! Firmware version query.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, byteorder::little_endian::U16,
};

use crate::{
    codec::{Request, WireMessage},
    flags::MessageFlags,
    header::MessageHeader,
    message_type::MessageType,
};

/// Length of the NUL-padded firmware description.
pub const FIRMWARE_DESCRIPTION_LEN: usize = 32;

/// Request for firmware version information. Header only.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct VersionRequest {
    header: MessageHeader,
}

impl VersionRequest {
    /// Create a version request. Routing fields are stamped by the caller.
    pub fn new() -> Self {
        Self { header: MessageHeader::new(MessageType::Version, 0, 0, MessageFlags::NO_RESPONSE) }
    }
}

impl Default for VersionRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl WireMessage for VersionRequest {
    const MESSAGE_TYPE: MessageType = MessageType::Version;

    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}

impl Request for VersionRequest {
    type Response = VersionResponse;
}

/// Firmware version information.
///
/// Minor ABI increments are backward compatible; major increments may not
/// be.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct VersionResponse {
    header: MessageHeader,
    firmware_description: [u8; FIRMWARE_DESCRIPTION_LEN],
    firmware_revision: U16,
    abi_major: u8,
    abi_minor: u8,
    sub_version: u8,
    patch_version: u8,
}

const _: () = assert!(size_of::<VersionResponse>() == 50);

impl VersionResponse {
    /// Build a response body. `description` is truncated to 32 bytes and
    /// NUL padded.
    pub fn new(
        header: MessageHeader,
        description: &str,
        firmware_revision: u16,
        abi: (u8, u8),
        sub_version: u8,
        patch_version: u8,
    ) -> Self {
        let mut firmware_description = [0u8; FIRMWARE_DESCRIPTION_LEN];
        let len = description.len().min(FIRMWARE_DESCRIPTION_LEN);
        firmware_description[..len].copy_from_slice(&description.as_bytes()[..len]);

        Self {
            header,
            firmware_description,
            firmware_revision: U16::new(firmware_revision),
            abi_major: abi.0,
            abi_minor: abi.1,
            sub_version,
            patch_version,
        }
    }

    /// Raw description bytes, NUL padded.
    pub fn firmware_description_raw(&self) -> &[u8; FIRMWARE_DESCRIPTION_LEN] {
        &self.firmware_description
    }

    /// Description up to the first NUL, with invalid UTF-8 replaced.
    pub fn firmware_description(&self) -> String {
        let end = self
            .firmware_description
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FIRMWARE_DESCRIPTION_LEN);
        String::from_utf8_lossy(&self.firmware_description[..end]).into_owned()
    }

    /// Firmware revision.
    pub fn firmware_revision(&self) -> u16 {
        self.firmware_revision.get()
    }

    /// ABI major version.
    pub fn abi_major(&self) -> u8 {
        self.abi_major
    }

    /// ABI minor version.
    pub fn abi_minor(&self) -> u8 {
        self.abi_minor
    }

    /// Firmware sub-version.
    pub fn sub_version(&self) -> u8 {
        self.sub_version
    }

    /// Firmware patch version.
    pub fn patch_version(&self) -> u8 {
        self.patch_version
    }
}

impl WireMessage for VersionResponse {
    const MESSAGE_TYPE: MessageType = MessageType::Version;

    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}
