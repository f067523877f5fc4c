//! SA2UL derived key-encryption-key retrieval.
//!
//! The returned key passes through exactly one staging buffer owned by the
//! client. The buffer is borrowed through a [`WipeOnDrop`] guard for the
//! duration of a request, so it is all zeroes again whenever a call returns,
//! whether it succeeded or not. The decoded response message wipes its own
//! copy when dropped.

use tisci_proto::{DkekRequest, KDF_LABEL_AND_CONTEXT_LEN_MAX, MessageFlags, SA2UL_DKEK_KEY_LEN};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::{
    channel::Channel,
    config::KeyDerivationConfig,
    env::Environment,
    error::KeyDerivationError,
    sensitive::{DerivedKey, WipeOnDrop},
    transport::SecureProxy,
    version::{VersionInfo, VersionNegotiator},
};

/// The only SA2UL instance the firmware currently serves.
pub const SUPPORTED_SA2UL_INSTANCE: u8 = 0;

/// Requests derived keys from the firmware.
pub struct KeyDerivationClient<'c, P, E> {
    channel: &'c Channel<P, E>,
    config: KeyDerivationConfig,
    version: Option<VersionInfo>,
    staging: [u8; SA2UL_DKEK_KEY_LEN],
}

impl<'c, P: SecureProxy, E: Environment> KeyDerivationClient<'c, P, E> {
    /// Create a client. The firmware version is queried lazily, and only
    /// when `config` sets a minimum ABI.
    pub fn new(channel: &'c Channel<P, E>, config: KeyDerivationConfig) -> Self {
        Self { channel, config, version: None, staging: [0; SA2UL_DKEK_KEY_LEN] }
    }

    /// Reuse a version report obtained earlier instead of querying again.
    #[must_use]
    pub fn with_version(mut self, info: VersionInfo) -> Self {
        self.version = Some(info);
        self
    }

    /// Firmware version, if it has been queried.
    pub fn version(&self) -> Option<&VersionInfo> {
        self.version.as_ref()
    }

    /// Whether the staging buffer holds no key material.
    pub fn staging_is_clear(&self) -> bool {
        self.staging.iter().all(|&byte| byte == 0)
    }

    /// Derive the full 32-byte key for `label` and `context`.
    pub fn get_dkek(
        &mut self,
        instance: u8,
        label: &str,
        context: &str,
    ) -> Result<DerivedKey, KeyDerivationError> {
        let mut key = Zeroizing::new([0u8; SA2UL_DKEK_KEY_LEN]);
        self.get_dkek_into(instance, label, context, key.as_mut_slice())?;
        Ok(DerivedKey::new(*key))
    }

    /// Derive a key and copy its first `key.len()` bytes into `key`.
    ///
    /// Arguments are validated before any transport activity: the key slot
    /// must not exceed 32 bytes, the instance must be 0, and label plus
    /// context must fit the 41-byte KDF buffer. `key` is left untouched on
    /// error.
    pub fn get_dkek_into(
        &mut self,
        instance: u8,
        label: &str,
        context: &str,
        key: &mut [u8],
    ) -> Result<(), KeyDerivationError> {
        if key.len() > SA2UL_DKEK_KEY_LEN {
            return Err(KeyDerivationError::InvalidArgument(format!(
                "key length {} exceeds derived key length {SA2UL_DKEK_KEY_LEN}",
                key.len()
            )));
        }
        if instance != SUPPORTED_SA2UL_INSTANCE {
            return Err(KeyDerivationError::UnsupportedInstance(instance));
        }
        let kdf_len = label.len() + context.len();
        if kdf_len > KDF_LABEL_AND_CONTEXT_LEN_MAX {
            return Err(KeyDerivationError::InvalidArgument(format!(
                "label and context take {kdf_len} bytes, limit is {KDF_LABEL_AND_CONTEXT_LEN_MAX}"
            )));
        }

        self.check_abi()?;

        let request = DkekRequest::new(instance, label.as_bytes(), context.as_bytes())
            .map_err(|err| KeyDerivationError::InvalidArgument(err.to_string()))?;
        debug!(instance, label_len = label.len(), context_len = context.len(), "requesting DKEK");

        let mut staging = WipeOnDrop::new(&mut self.staging);
        let response = self.channel.transact(request, MessageFlags::ACK_ON_PROCESSED)?;
        staging.copy_from_slice(response.dkek());
        drop(response);

        key.copy_from_slice(&staging[..key.len()]);
        Ok(())
    }

    fn check_abi(&mut self) -> Result<(), KeyDerivationError> {
        let Some(required) = self.config.min_abi else {
            return Ok(());
        };

        let actual = match &self.version {
            Some(info) => info.abi,
            None => {
                let info = VersionNegotiator::new(self.channel).query_version()?;
                let abi = info.abi;
                self.version = Some(info);
                abi
            },
        };

        if actual < required {
            warn!(%required, %actual, "firmware ABI too old for key derivation");
            return Err(KeyDerivationError::UnsupportedVersion { required, actual });
        }
        Ok(())
    }
}

impl<P, E> std::fmt::Debug for KeyDerivationClient<'_, P, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDerivationClient")
            .field("config", &self.config)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
