//! Key Unlock Abstraction
//!
//! Passphrase verification and key derivation belong to the host. The core
//! only receives the resulting key bytes and keeps them in memory.

use async_trait::async_trait;

use crate::content::KeyScope;
use crate::error::Result;

/// Derives the symmetric key for a scope from a user passphrase.
///
/// # Security
///
/// Implementations MUST:
/// - Return [`BridgeError::PermissionDenied`](crate::BridgeError::PermissionDenied)
///   for an incorrect passphrase
/// - Never log the passphrase or the derived bytes
#[async_trait]
pub trait KeyUnlocker: Send + Sync {
    /// Verify `passphrase` for `scope` and return the raw 32-byte key.
    async fn unlock(&self, scope: &KeyScope, passphrase: &str) -> Result<Vec<u8>>;
}
