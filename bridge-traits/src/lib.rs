//! # Host Bridge Traits
//!
//! The playback core decrypts journal recordings on demand and plays them.
//! Everything it does not own comes from the host through the traits here:
//!
//! | Trait | Supplies |
//! |-------|----------|
//! | [`ContentStore`] | encryption metadata and ciphertext per content item |
//! | [`KeyUnlocker`] | key bytes for a scope once a passphrase checks out |
//! | [`FileSystemAccess`] | the plaintext scratch directory |
//! | [`AudioOutput`] | a sink for decoded PCM |
//! | [`Clock`] | wall time, replaceable in tests |
//! | [`LoggerSink`] | the host's log pipeline |
//!
//! Every trait is `Send + Sync` and returns [`BridgeError`]. Adapters report
//! a missing file as [`BridgeError::NotFound`] and keep key material and
//! passphrases out of error messages.
//!
//! ```ignore
//! use async_trait::async_trait;
//! use bridge_traits::{ContentId, ContentStore, StoredContent};
//! use bridge_traits::error::Result;
//!
//! struct JournalStore { db: Database }
//!
//! #[async_trait]
//! impl ContentStore for JournalStore {
//!     async fn resolve_content(&self, id: &ContentId) -> Result<Option<StoredContent>> {
//!         self.db.recording_for(id).await
//!     }
//!
//!     async fn read_ciphertext(&self, path: &std::path::Path) -> Result<bytes::Bytes> {
//!         Ok(tokio::fs::read(path).await?.into())
//!     }
//! }
//! ```

pub mod content;
pub mod error;
pub mod keys;
pub mod playback;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use content::{ContentId, ContentStore, KeyScope, StoredContent};
pub use keys::KeyUnlocker;
pub use playback::{AudioOutput, OutputFormat};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
