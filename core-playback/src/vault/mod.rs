//! # Key Vault
//!
//! In-memory map from [`KeyScope`](bridge_traits::KeyScope) to the symmetric
//! key unlocked for it. Nothing here is ever written to durable storage.
//!
//! Granting, revoking and clearing never touch the decryption cache; a caller
//! on the app-lock path must invalidate the cache separately.

mod key;
mod key_vault;

pub use key::{SymmetricKey, KEY_LEN};
pub use key_vault::{KeyVault, KeyVaultEntry};
