//! # Decryption Cache Module
//!
//! Produces local plaintext files for encrypted recordings on demand and keeps
//! the set of plaintext on disk as small as possible.
//!
//! ## Overview
//!
//! - Plaintext is produced only while a key for the content's scope is granted
//! - Every file the cache writes is tracked and deleted on invalidation
//! - Files are written to `<name>.partial` and renamed, so a visible file is
//!   always complete
//! - A background [`GarbageCollector`] removes anything older than the
//!   configured age, including leftovers from a crashed run
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     DecryptionCache                    │
//! │  - materialize()                       │
//! │  - invalidate() / invalidate_all()     │
//! │  - run_garbage_collection()            │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> ContentLocator (descriptor, ciphertext)
//!          ├──> KeyVault (key gate)
//!          ├──> ContentCipher (AES-256-GCM, blocking pool)
//!          └──> FileSystemAccess (scratch directory)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::cache::DecryptionCache;
//! use bridge_traits::ContentId;
//!
//! # async fn example(cache: &DecryptionCache) -> core_playback::Result<()> {
//! let id = ContentId::new("entry-1");
//! let path = cache.materialize(&id).await?;
//! // ... hand `path` to the decoder ...
//! cache.invalidate(&id).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod encryption;
pub mod gc;
pub mod manager;
pub mod stats;

pub use config::{CacheConfig, DEFAULT_PLAINTEXT_EXTENSION};
pub use encryption::ContentCipher;
pub use gc::GarbageCollector;
pub use manager::{plaintext_file_name, CacheEntry, DecryptionCache};
pub use stats::{CacheStats, SweepReport};
