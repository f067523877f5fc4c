//! Key material that is wiped when it goes out of scope.

use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use tisci_proto::SA2UL_DKEK_KEY_LEN;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A derived key-encryption-key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; SA2UL_DKEK_KEY_LEN]);

impl DerivedKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; SA2UL_DKEK_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Key bytes.
    pub fn as_bytes(&self) -> &[u8; SA2UL_DKEK_KEY_LEN] {
        &self.0
    }
}

impl AsRef<[u8]> for DerivedKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// The platform's hardware unique key: a prefix of the derived key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HwUniqueKey {
    bytes: [u8; SA2UL_DKEK_KEY_LEN],
    len: usize,
}

impl HwUniqueKey {
    /// Copy the first `len` bytes of `key`. Returns `None` when `len`
    /// exceeds the key length.
    pub fn from_prefix(key: &DerivedKey, len: usize) -> Option<Self> {
        if len > SA2UL_DKEK_KEY_LEN {
            return None;
        }
        let mut bytes = [0u8; SA2UL_DKEK_KEY_LEN];
        bytes[..len].copy_from_slice(&key.as_bytes()[..len]);
        Some(Self { bytes, len })
    }

    /// Key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the key is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for HwUniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HwUniqueKey").field("len", &self.len).field("bytes", &"<redacted>").finish()
    }
}

/// Borrowed buffer that is zeroized when the guard drops.
///
/// Wraps a long-lived staging buffer so every exit path of the scope that
/// fills it, `?` included, leaves it clear.
pub struct WipeOnDrop<'a, const N: usize>(&'a mut [u8; N]);

impl<'a, const N: usize> WipeOnDrop<'a, N> {
    /// Guard `buffer`.
    pub fn new(buffer: &'a mut [u8; N]) -> Self {
        Self(buffer)
    }
}

impl<const N: usize> Deref for WipeOnDrop<'_, N> {
    type Target = [u8; N];

    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl<const N: usize> DerefMut for WipeOnDrop<'_, N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0
    }
}

impl<const N: usize> Drop for WipeOnDrop<'_, N> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_key_bytes() {
        let key = DerivedKey::new([0xAB; 32]);
        let huk = HwUniqueKey::from_prefix(&key, 16).unwrap();

        assert!(!format!("{key:?}").contains("171"));
        assert!(!format!("{huk:?}").to_lowercase().contains("ab"));
        assert_eq!(format!("{huk:?}"), "HwUniqueKey { len: 16, bytes: \"<redacted>\" }");
    }

    #[test]
    fn huk_is_key_prefix() {
        let mut raw = [0u8; 32];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let key = DerivedKey::new(raw);

        let huk = HwUniqueKey::from_prefix(&key, 16).unwrap();
        assert_eq!(huk.as_bytes(), &raw[..16]);
        assert_eq!(huk.len(), 16);
        assert!(HwUniqueKey::from_prefix(&key, 33).is_none());
        assert!(HwUniqueKey::from_prefix(&key, 0).unwrap().is_empty());
    }

    #[test]
    fn guard_wipes_on_early_exit() {
        fn fill_then_fail(buffer: &mut [u8; 8]) -> Result<(), ()> {
            let mut guard = WipeOnDrop::new(buffer);
            guard.fill(0x5A);
            assert_eq!(guard[3], 0x5A);
            Err(())
        }

        let mut buffer = [0u8; 8];
        assert!(fill_then_fail(&mut buffer).is_err());
        assert_eq!(buffer, [0u8; 8]);
    }
}
