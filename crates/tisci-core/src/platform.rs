//! Boot-time platform context.
//!
//! [`Platform`] is the explicit owner of the secure proxy connection for a
//! secure-world image: it brings the proxy up once, records which firmware
//! it is talking to, and produces the hardware unique key. Whether the
//! platform can derive keys at all is decided by
//! [`PlatformConfig::key_derivation`] at runtime.

use std::sync::{Mutex, PoisonError};

use tisci_proto::SA2UL_DKEK_KEY_LEN;
use tracing::info;

use crate::{
    channel::Channel,
    config::PlatformConfig,
    dkek::{KeyDerivationClient, SUPPORTED_SA2UL_INSTANCE},
    env::Environment,
    error::PlatformError,
    sensitive::{DerivedKey, HwUniqueKey},
    transport::SecureProxy,
    version::{VersionInfo, VersionNegotiator},
};

/// Platform context owning the channel to the system controller.
pub struct Platform<P, E> {
    channel: Channel<P, E>,
    config: PlatformConfig,
    version: Mutex<Option<VersionInfo>>,
}

impl<P: SecureProxy, E: Environment> Platform<P, E> {
    /// Create a platform context. Nothing is sent until [`Platform::init`].
    pub fn new(proxy: P, env: E, config: PlatformConfig) -> Self {
        let channel = Channel::new(proxy, env, config.channel.clone());
        Self { channel, config, version: Mutex::new(None) }
    }

    /// Bring up the secure proxy and identify the firmware.
    ///
    /// Idempotent: later calls return the cached version report.
    pub fn init(&self) -> Result<VersionInfo, PlatformError> {
        let mut version = self.version.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(info) = version.as_ref() {
            return Ok(info.clone());
        }

        self.channel.init()?;
        let info = VersionNegotiator::new(&self.channel).query_version()?;
        info!("{info}");
        *version = Some(info.clone());
        Ok(info)
    }

    /// Derive the hardware unique key.
    ///
    /// Initializes the platform first if needed. Any failure is fatal to
    /// secure boot; there is no fallback key.
    pub fn hw_unique_key(&self) -> Result<HwUniqueKey, PlatformError> {
        let Some(kdf_config) = self.config.key_derivation.clone() else {
            return Err(PlatformError::KeyDerivationDisabled);
        };
        let len = self.config.huk_length;
        if len > SA2UL_DKEK_KEY_LEN {
            return Err(PlatformError::InvalidKeyLength { len, max: SA2UL_DKEK_KEY_LEN });
        }

        let version = self.init()?;
        let mut client = KeyDerivationClient::new(&self.channel, kdf_config).with_version(version);
        let dkek: DerivedKey = client.get_dkek(
            SUPPORTED_SA2UL_INSTANCE,
            &self.config.huk_label,
            &self.config.huk_context,
        )?;

        let huk = HwUniqueKey::from_prefix(&dkek, len)
            .ok_or(PlatformError::InvalidKeyLength { len, max: SA2UL_DKEK_KEY_LEN })?;
        info!(len = huk.len(), "HUK initialized");
        Ok(huk)
    }

    /// Firmware version, once [`Platform::init`] has succeeded.
    pub fn version(&self) -> Option<VersionInfo> {
        self.version.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The channel, for issuing further requests.
    pub fn channel(&self) -> &Channel<P, E> {
        &self.channel
    }

    /// Platform configuration.
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }
}
