//! Symmetric key material.

use crate::error::{PlaybackError, Result};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length in bytes of an AES-256 key.
pub const KEY_LEN: usize = 32;

/// A 256-bit content key.
///
/// The bytes are wiped when the value is dropped, and `Debug` never prints
/// them. Not serializable.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        use aes_gcm::aead::OsRng;
        use aes_gcm::KeyInit;

        let key = aes_gcm::Aes256Gcm::generate_key(&mut OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(key.as_slice());
        Self(bytes)
    }

    /// Create from existing key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LEN {
            return Err(PlaybackError::InvalidKeyMaterial(format!(
                "expected {} bytes for AES-256, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Deserialize from a hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let mut bytes = hex::decode(hex_str.trim())
            .map_err(|e| PlaybackError::InvalidKeyMaterial(format!("invalid hex key: {}", e)))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}
