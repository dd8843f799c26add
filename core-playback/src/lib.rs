//! # Playback & Decryption Module
//!
//! Key-gated decryption of journal recordings and playback of the resulting
//! plaintext.
//!
//! ## Overview
//!
//! This module handles:
//! - Session keys granted per scope ([`KeyVault`])
//! - Resolving content items to ciphertext and candidate key scopes ([`ContentLocator`])
//! - Materializing plaintext into the scratch directory and removing it again ([`DecryptionCache`])
//! - Periodic removal of stale plaintext ([`GarbageCollector`])
//! - A single-session playback state machine ([`PlaybackEngine`])
//! - Audio decoding using symphonia (optional, feature-gated)

pub mod cache;
#[cfg(feature = "decoder")]
pub mod decoder;
pub mod engine;
pub mod error;
pub mod locator;
pub mod traits;
pub mod vault;

pub use cache::{
    CacheConfig, CacheEntry, CacheStats, ContentCipher, DecryptionCache, GarbageCollector,
    SweepReport,
};
#[cfg(feature = "decoder")]
pub use decoder::{SymphoniaDecoder, SymphoniaDecoderFactory};
pub use engine::{EngineConfig, PlaybackEngine, PlaybackPosition, PlaybackSession, PlaybackState};
pub use error::{PlaybackError, PlaybackErrorKind, Result};
pub use locator::{select_key, ContentDescriptor, ContentLocator};
pub use traits::{
    AudioCodec, AudioDecoder, AudioFormat, AudioFrameChunk, AudioSource, DecoderFactory,
    ProbeResult,
};
pub use vault::{KeyVault, KeyVaultEntry, SymmetricKey};
