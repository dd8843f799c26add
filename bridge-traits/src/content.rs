//! Content Store Abstractions
//!
//! Vocabulary shared between the playback core and the host's entity store:
//! the canonical content identifier, key scopes, and the store's snapshot of a
//! content item's encryption metadata.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Canonical identifier for a content item.
///
/// This is the only key used by the decryption cache; file paths are derived
/// from it, never the other way around.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ContentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Secret boundary that determines which key unlocks a content item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum KeyScope {
    /// Key belonging to a specific encrypted tag.
    Tag(String),
    /// The single device-wide base key.
    Base,
}

impl KeyScope {
    pub fn tag(id: impl Into<String>) -> Self {
        KeyScope::Tag(id.into())
    }
}

impl fmt::Display for KeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyScope::Tag(id) => write!(f, "tag:{}", id),
            KeyScope::Base => f.write_str("base"),
        }
    }
}

/// The store's view of a content item at request time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContent {
    pub content_id: ContentId,
    /// Whether the item carries an audio payload at all.
    pub has_recording: bool,
    /// Location of the (possibly encrypted) audio payload.
    pub audio_path: Option<PathBuf>,
    /// Encrypted tag the item belongs to, if any.
    pub tag_scope: Option<String>,
    /// Whether the payload is encrypted under the device base key.
    pub base_encrypted: bool,
}

impl StoredContent {
    /// An item with an unencrypted recording at `path`.
    pub fn plain(content_id: impl Into<ContentId>, path: impl Into<PathBuf>) -> Self {
        Self {
            content_id: content_id.into(),
            has_recording: true,
            audio_path: Some(path.into()),
            tag_scope: None,
            base_encrypted: false,
        }
    }

    pub fn with_tag_scope(mut self, tag: impl Into<String>) -> Self {
        self.tag_scope = Some(tag.into());
        self
    }

    pub fn with_base_encryption(mut self, encrypted: bool) -> Self {
        self.base_encrypted = encrypted;
        self
    }
}

/// Entity store collaborator.
///
/// Implementations must return a fresh snapshot on every call; callers rely on
/// it reflecting the current encryption metadata.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Look up a content item. Returns `Ok(None)` when the id is unknown.
    async fn resolve_content(&self, id: &ContentId) -> Result<Option<StoredContent>>;

    /// Read the raw payload stored at `path`.
    async fn read_ciphertext(&self, path: &Path) -> Result<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_scope_equality_is_by_value() {
        assert_eq!(KeyScope::tag("travel"), KeyScope::Tag("travel".to_string()));
        assert_ne!(KeyScope::tag("travel"), KeyScope::tag("work"));
        assert_ne!(KeyScope::tag("base"), KeyScope::Base);
    }

    #[test]
    fn key_scope_display() {
        assert_eq!(KeyScope::tag("t1").to_string(), "tag:t1");
        assert_eq!(KeyScope::Base.to_string(), "base");
    }

    #[test]
    fn content_id_serializes_transparently() {
        let id = ContentId::new("entry-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"entry-42\"");
        assert_eq!(id.to_string(), "entry-42");
    }

    #[test]
    fn stored_content_builders() {
        let item = StoredContent::plain("e1", "/data/e1.enc")
            .with_tag_scope("t1")
            .with_base_encryption(true);

        assert!(item.has_recording);
        assert_eq!(item.tag_scope.as_deref(), Some("t1"));
        assert!(item.base_encrypted);
    }
}
