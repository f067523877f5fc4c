//! Runtime configuration.
//!
//! Platform differences are expressed here rather than at compile time: a
//! deployment without the key derivation capability simply leaves
//! [`PlatformConfig::key_derivation`] unset.

use std::time::Duration;

use tisci_proto::IntegrityMode;

use crate::{transport::ProxyThread, version::AbiVersion};

/// Host id the secure world uses when talking to the system controller.
pub const DEFAULT_HOST_ID: u8 = 11;

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Host id stamped into every request
    pub host_id: u8,
    /// Proxy thread requests are sent on
    pub tx_thread: ProxyThread,
    /// Proxy thread responses arrive on
    pub rx_thread: ProxyThread,
    /// How long a transaction waits for its response
    pub timeout: Duration,
    /// Upper bound on a single blocking receive while waiting
    pub poll_interval: Duration,
    /// Checksum policy
    pub integrity: IntegrityMode,
    /// First sequence number handed out
    pub initial_seq: u8,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host_id: DEFAULT_HOST_ID,
            tx_thread: ProxyThread(7),
            rx_thread: ProxyThread(6),
            timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(10),
            integrity: IntegrityMode::Standard,
            initial_seq: 0,
        }
    }
}

/// Key derivation client configuration.
#[derive(Debug, Clone, Default)]
pub struct KeyDerivationConfig {
    /// Lowest firmware ABI allowed to serve DKEK requests
    pub min_abi: Option<AbiVersion>,
}

/// Platform bring-up configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Channel settings
    pub channel: ChannelConfig,
    /// Key derivation capability; `None` when the platform lacks it
    pub key_derivation: Option<KeyDerivationConfig>,
    /// Bytes of the derived key used as the hardware unique key
    pub huk_length: usize,
    /// KDF label for the hardware unique key
    pub huk_label: String,
    /// KDF context for the hardware unique key
    pub huk_context: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            key_derivation: Some(KeyDerivationConfig::default()),
            huk_length: 16,
            huk_label: "OP-TEE".to_string(),
            huk_context: "DKEK".to_string(),
        }
    }
}
