//! AES-256-GCM content cipher.
//!
//! Payload layout: 12-byte nonce, ciphertext, 16-byte tag.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use bytes::Bytes;
use zeroize::Zeroizing;

use crate::error::{PlaybackError, Result};
use crate::vault::SymmetricKey;

/// Nonce length prepended to every payload.
pub const NONCE_LEN: usize = 12;
/// Authentication tag length appended by GCM.
pub const TAG_LEN: usize = 16;
/// Bytes a payload carries beyond its plaintext.
pub const OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Encrypts and decrypts content payloads with a single key.
pub struct ContentCipher {
    cipher: Aes256Gcm,
}

impl ContentCipher {
    pub fn new(key: &SymmetricKey) -> Self {
        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Plaintext length for a payload of `ciphertext_len` bytes, or `None` if
    /// the payload is too short to be valid.
    pub fn plaintext_len(ciphertext_len: usize) -> Option<usize> {
        ciphertext_len.checked_sub(OVERHEAD)
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Bytes> {
        use aes_gcm::aead::rand_core::RngCore;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| PlaybackError::Internal(format!("Encryption failed: {}", e)))?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(Bytes::from(result))
    }

    /// Authenticate and decrypt `payload`.
    ///
    /// The returned buffer is wiped when dropped.
    pub fn decrypt(&self, payload: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if payload.len() < OVERHEAD {
            return Err(PlaybackError::DecryptionFailed(format!(
                "payload too short: {} bytes",
                payload.len()
            )));
        }

        let (nonce, body) = payload.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map(Zeroizing::new)
            .map_err(|_| PlaybackError::DecryptionFailed("authentication failed".to_string()))
    }

    /// Decrypt on the blocking pool.
    pub async fn decrypt_blocking(
        key: SymmetricKey,
        payload: Bytes,
    ) -> Result<Zeroizing<Vec<u8>>> {
        tokio::task::spawn_blocking(move || ContentCipher::new(&key).decrypt(&payload))
            .await
            .map_err(|e| PlaybackError::Internal(format!("Decrypt task failed: {}", e)))?
    }
}
