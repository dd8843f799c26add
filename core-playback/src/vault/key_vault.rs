use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bridge_traits::{Clock, KeyScope, KeyUnlocker, SystemClock};
use chrono::{DateTime, Utc};
use core_runtime::events::{CoreEvent, EventBus, VaultEvent};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use super::key::SymmetricKey;
use crate::error::{PlaybackError, Result};

/// A granted key and when it was granted.
///
/// Owned exclusively by [`KeyVault`]; never serialized.
#[derive(Clone)]
pub struct KeyVaultEntry {
    pub scope: KeyScope,
    pub key: SymmetricKey,
    pub granted_at: DateTime<Utc>,
}

impl fmt::Debug for KeyVaultEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVaultEntry")
            .field("scope", &self.scope)
            .field("key", &"[REDACTED]")
            .field("granted_at", &self.granted_at)
            .finish()
    }
}

/// In-memory key store.
///
/// All state sits behind one lock, so grants, revokes and lookups from the UI,
/// the cache and lock handlers are linearizable. None of the operations fail:
/// a `None` from [`lookup`](Self::lookup) means "access not currently granted".
pub struct KeyVault {
    entries: RwLock<HashMap<KeyScope, KeyVaultEntry>>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
}

impl KeyVault {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock: Arc::new(SystemClock),
            event_bus: None,
        }
    }

    /// Use `clock` for `granted_at` timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish [`VaultEvent`]s on `event_bus`.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Insert or replace the key for `scope`.
    ///
    /// Plaintext already decrypted under a previous key stays in the cache
    /// until it is invalidated explicitly.
    pub fn grant(&self, scope: KeyScope, key: SymmetricKey) {
        let entry = KeyVaultEntry {
            scope: scope.clone(),
            key,
            granted_at: self.clock.now(),
        };
        let replaced = self.entries.write().insert(scope.clone(), entry).is_some();

        info!(scope = %scope, replaced, "Key granted");
        self.emit(VaultEvent::Granted {
            scope: scope.to_string(),
        });
    }

    /// Remove the key for `scope`, if any. Does not touch cached plaintext.
    pub fn revoke(&self, scope: &KeyScope) {
        let removed = self.entries.write().remove(scope).is_some();

        if removed {
            info!(scope = %scope, "Key revoked");
            self.emit(VaultEvent::Revoked {
                scope: scope.to_string(),
            });
        } else {
            debug!(scope = %scope, "Revoke for scope with no key");
        }
    }

    /// Key currently granted for `scope`.
    pub fn lookup(&self, scope: &KeyScope) -> Option<SymmetricKey> {
        self.entries.read().get(scope).map(|entry| entry.key.clone())
    }

    /// First candidate with a granted key, in the order given.
    ///
    /// The whole scan happens under one read lock so a concurrent revoke
    /// cannot interleave between candidates.
    pub fn first_granted(&self, candidates: &[KeyScope]) -> Option<(KeyScope, SymmetricKey)> {
        let entries = self.entries.read();
        candidates.iter().find_map(|scope| {
            entries
                .get(scope)
                .map(|entry| (scope.clone(), entry.key.clone()))
        })
    }

    /// Remove every key. Returns how many were removed.
    ///
    /// Called on app lock; the caller is responsible for clearing the cache.
    pub fn clear_all(&self) -> usize {
        let removed = {
            let mut entries = self.entries.write();
            let count = entries.len();
            entries.clear();
            count
        };

        info!(scopes_removed = removed, "Key vault cleared");
        self.emit(VaultEvent::Cleared {
            scopes_removed: removed,
        });
        removed
    }

    pub fn is_granted(&self, scope: &KeyScope) -> bool {
        self.entries.read().contains_key(scope)
    }

    /// When the key for `scope` was (last) granted.
    pub fn granted_at(&self, scope: &KeyScope) -> Option<DateTime<Utc>> {
        self.entries.read().get(scope).map(|entry| entry.granted_at)
    }

    pub fn granted_scopes(&self) -> Vec<KeyScope> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Verify `passphrase` through `unlocker` and grant the resulting key.
    ///
    /// A rejected passphrase surfaces as [`PlaybackError::NoKeyAvailable`] and
    /// leaves the vault unchanged.
    #[instrument(skip_all, fields(scope = %scope))]
    pub async fn unlock(
        &self,
        unlocker: &dyn KeyUnlocker,
        scope: KeyScope,
        passphrase: &str,
    ) -> Result<()> {
        let raw = Zeroizing::new(unlocker.unlock(&scope, passphrase).await.map_err(|e| {
            warn!(error = %e, "Unlock rejected");
            match PlaybackError::from(e) {
                PlaybackError::NoKeyAvailable(_) => {
                    PlaybackError::NoKeyAvailable(format!("unlock rejected for {}", scope))
                }
                other => other,
            }
        })?);

        let key = SymmetricKey::from_bytes(&raw)?;
        self.grant(scope, key);
        Ok(())
    }

    fn emit(&self, event: VaultEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Vault(event)).ok();
        }
    }
}

impl Default for KeyVault {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVault")
            .field("granted_scopes", &self.granted_scopes())
            .finish()
    }
}
