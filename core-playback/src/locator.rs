//! # Content Locator
//!
//! Resolves a [`ContentId`] into the facts the cache needs: where the payload
//! lives, whether it is encrypted, and which key scopes may unlock it.
//!
//! The locator never consults the [`KeyVault`]; key selection happens in
//! [`select_key`] at plaintext-request time so that the vault state observed
//! is always the current one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::{ContentId, ContentStore, KeyScope};
use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::error::{PlaybackError, Result};
use crate::vault::{KeyVault, SymmetricKey};

/// Everything needed to obtain plaintext for one content item.
///
/// Built fresh from the store on every request and never cached, so a tag
/// change in the store is observed by the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDescriptor {
    pub content_id: ContentId,
    pub is_encrypted: bool,
    /// Candidate scopes in priority order: tag first, then base.
    pub key_scopes: Vec<KeyScope>,
    pub ciphertext_path: PathBuf,
}

impl ContentDescriptor {
    pub fn tag_scope(&self) -> Option<&KeyScope> {
        self.key_scopes
            .iter()
            .find(|scope| matches!(scope, KeyScope::Tag(_)))
    }
}

/// Pick the key that unlocks `descriptor`.
///
/// Returns the first candidate scope with a granted key. An item therefore
/// decrypts under exactly one scope, or not at all.
pub fn select_key(
    descriptor: &ContentDescriptor,
    vault: &KeyVault,
) -> Result<(KeyScope, SymmetricKey)> {
    vault.first_granted(&descriptor.key_scopes).ok_or_else(|| {
        let scopes = descriptor
            .key_scopes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        PlaybackError::NoKeyAvailable(format!(
            "{} (candidates: [{}])",
            descriptor.content_id, scopes
        ))
    })
}

/// Thin adapter over the host's [`ContentStore`].
pub struct ContentLocator {
    store: Arc<dyn ContentStore>,
}

impl ContentLocator {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Look up `id` and describe how to obtain its plaintext.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::NotFound`] if the item is unknown, or claims a
    ///   recording without a payload path
    /// - [`PlaybackError::NoRecording`] if the item has no audio payload
    #[instrument(skip(self), fields(content_id = %id))]
    pub async fn resolve(&self, id: &ContentId) -> Result<ContentDescriptor> {
        let stored = self
            .store
            .resolve_content(id)
            .await?
            .ok_or_else(|| PlaybackError::NotFound(id.to_string()))?;

        if !stored.has_recording {
            return Err(PlaybackError::NoRecording(id.to_string()));
        }

        let ciphertext_path = stored.audio_path.ok_or_else(|| {
            warn!("Content reports a recording but has no payload path");
            PlaybackError::NotFound(format!("{} has no payload path", id))
        })?;

        let mut key_scopes = Vec::with_capacity(2);
        if let Some(tag) = stored.tag_scope {
            key_scopes.push(KeyScope::Tag(tag));
        }
        if stored.base_encrypted {
            key_scopes.push(KeyScope::Base);
        }

        debug!(scopes = key_scopes.len(), "Content resolved");

        Ok(ContentDescriptor {
            content_id: id.clone(),
            is_encrypted: !key_scopes.is_empty(),
            key_scopes,
            ciphertext_path,
        })
    }

    /// Read the raw payload at `path`.
    pub async fn read_ciphertext(&self, path: &Path) -> Result<Bytes> {
        self.store.read_ciphertext(path).await.map_err(|e| {
            warn!(error = %e, "Failed to read ciphertext");
            PlaybackError::from(e)
        })
    }
}
