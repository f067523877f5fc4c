//! Firmware version query and ABI capability gating.

use std::fmt;

use tisci_proto::{MessageFlags, VersionRequest, VersionResponse};
use tracing::info;

use crate::{channel::Channel, env::Environment, error::ProtocolError, transport::SecureProxy};

/// Firmware ABI revision. Ordered by major, then minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AbiVersion {
    /// ABI major revision
    pub major: u8,
    /// ABI minor revision
    pub minor: u8,
}

impl AbiVersion {
    /// Create an ABI version.
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Decoded firmware version report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Firmware description, cut at the first NUL
    pub description: String,
    /// Firmware revision
    pub firmware_revision: u16,
    /// ABI revision
    pub abi: AbiVersion,
    /// Firmware sub version
    pub sub_version: u8,
    /// Firmware patch version
    pub patch_version: u8,
}

impl VersionInfo {
    /// Whether the firmware ABI is at least `required`.
    pub fn supports(&self, required: AbiVersion) -> bool {
        self.abi >= required
    }
}

impl From<&VersionResponse> for VersionInfo {
    fn from(response: &VersionResponse) -> Self {
        Self {
            description: response.firmware_description(),
            firmware_revision: response.firmware_revision(),
            abi: AbiVersion::new(response.abi_major(), response.abi_minor()),
            sub_version: response.sub_version(),
            patch_version: response.patch_version(),
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ABI: {} (firmware rev {:#06x} '{}' {}.{})",
            self.abi, self.firmware_revision, self.description, self.sub_version, self.patch_version
        )
    }
}

/// Issues the version query over a [`Channel`].
pub struct VersionNegotiator<'c, P, E> {
    channel: &'c Channel<P, E>,
}

impl<'c, P: SecureProxy, E: Environment> VersionNegotiator<'c, P, E> {
    /// Create a negotiator over `channel`.
    pub fn new(channel: &'c Channel<P, E>) -> Self {
        Self { channel }
    }

    /// Ask the firmware for its version.
    ///
    /// Each call is a fresh transaction; callers cache the result.
    pub fn query_version(&self) -> Result<VersionInfo, ProtocolError> {
        let response = self.channel.transact(VersionRequest::new(), MessageFlags::ACK_ON_PROCESSED)?;
        let info = VersionInfo::from(&response);
        info!(abi = %info.abi, revision = info.firmware_revision, description = %info.description, "firmware version");
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use tisci_proto::{MessageHeader, MessageType};

    use super::*;

    #[test]
    fn abi_orders_by_major_then_minor() {
        assert!(AbiVersion::new(3, 0) > AbiVersion::new(2, 9));
        assert!(AbiVersion::new(3, 1) > AbiVersion::new(3, 0));
        assert_eq!(AbiVersion::new(3, 1).to_string(), "3.1");
    }

    #[test]
    fn info_from_response() {
        let header = MessageHeader::new(MessageType::Version, 11, 4, MessageFlags::GENERIC_ACK);
        let response = VersionResponse::new(header, "SYSFW", 0x0009, (3, 1), 2, 5);
        let info = VersionInfo::from(&response);

        assert_eq!(info.description, "SYSFW");
        assert_eq!(info.abi, AbiVersion::new(3, 1));
        assert_eq!((info.sub_version, info.patch_version), (2, 5));
        assert!(info.supports(AbiVersion::new(3, 0)));
        assert!(!info.supports(AbiVersion::new(4, 0)));
        assert_eq!(info.to_string(), "ABI: 3.1 (firmware rev 0x0009 'SYSFW' 2.5)");
    }
}
