//! # Encrypted Playback Example
//!
//! Encrypts a synthetic WAV recording, grants its key, and plays it through
//! the decryption cache and a paced headless output while printing events.
//!
//! Run with: `cargo run --example playback_demo --package core-playback`

use async_trait::async_trait;
use bridge_desktop::{PacedAudioOutput, TokioFileSystem};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{ContentId, ContentStore, KeyScope, StoredContent};
use bytes::Bytes;
use core_playback::{
    CacheConfig, ContentCipher, ContentLocator, DecryptionCache, EngineConfig, KeyVault,
    PlaybackEngine, SymmetricKey, SymphoniaDecoderFactory,
};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// Single-item content store
// ============================================================================

struct DemoStore {
    item: StoredContent,
    payload: Bytes,
}

#[async_trait]
impl ContentStore for DemoStore {
    async fn resolve_content(&self, id: &ContentId) -> BridgeResult<Option<StoredContent>> {
        Ok((*id == self.item.content_id).then(|| self.item.clone()))
    }

    async fn read_ciphertext(&self, path: &Path) -> BridgeResult<Bytes> {
        if self.item.audio_path.as_deref() == Some(path) {
            Ok(self.payload.clone())
        } else {
            Err(BridgeError::NotFound(path.display().to_string()))
        }
    }
}

/// Two seconds of a 440 Hz tone as 16-bit mono PCM WAV.
fn sine_wav(sample_rate: u32, seconds: u32) -> Vec<u8> {
    let frames = sample_rate * seconds;
    let data_len = frames * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        let t = f64::from(i) / f64::from(sample_rate);
        let sample = (2.0 * std::f64::consts::PI * 440.0 * t).sin() * 0.3;
        out.extend_from_slice(&((sample * f64::from(i16::MAX)) as i16).to_le_bytes());
    }
    out
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(
        LoggingConfig::default()
            .with_format(LogFormat::Compact)
            .with_filter("core_playback=debug"),
    )?;

    let workdir = std::env::temp_dir().join("core-playback-demo");
    let scratch: PathBuf = workdir.join("scratch");

    println!("=== Encrypted Playback Demo ===\n");

    let key = SymmetricKey::generate();
    let payload = ContentCipher::new(&key).encrypt(&sine_wav(22_050, 2))?;
    let store = Arc::new(DemoStore {
        item: StoredContent::plain("memo-1", workdir.join("memo-1.enc")).with_tag_scope("private"),
        payload,
    });

    let events = EventBus::new(64);
    let vault = Arc::new(KeyVault::new().with_event_bus(events.clone()));
    let cache = Arc::new(
        DecryptionCache::new(
            CacheConfig::new(&scratch)
                .with_plaintext_extension("wav")
                .with_purge_on_initialize(true),
            Arc::new(ContentLocator::new(store)),
            vault.clone(),
            Arc::new(TokioFileSystem::new()),
        )
        .with_event_bus(events.clone()),
    );
    cache.initialize().await?;

    let engine = PlaybackEngine::new(
        cache.clone(),
        Arc::new(SymphoniaDecoderFactory),
        Arc::new(PacedAudioOutput::with_speed(4.0)),
        EngineConfig::default(),
        Some(events.clone()),
    );

    let mut rx = events.subscribe();
    let id = ContentId::new("memo-1");

    println!("1. Loading without a key");
    if let Err(e) = engine.load(id.clone()).await {
        println!("   -> {} (state: {})\n", e, engine.state());
    }

    println!("2. Granting the key and loading again");
    vault.grant(KeyScope::tag("private"), key);
    engine.load(id.clone()).await?;
    println!(
        "   -> state: {}, duration: {:.2}s\n",
        engine.state(),
        engine.session().duration_seconds().unwrap_or_default()
    );

    println!("3. Playing");
    engine.play()?;

    while let Ok(event) = rx.recv().await {
        match event {
            CoreEvent::Playback(PlaybackEvent::PositionChanged { position_ms, .. }) => {
                println!("   position {:>5} ms", position_ms);
            }
            CoreEvent::Playback(PlaybackEvent::Finished { .. }) => {
                println!("   finished\n");
                break;
            }
            CoreEvent::Playback(PlaybackEvent::Error { message, .. }) => {
                println!("   error: {}\n", message);
                break;
            }
            _ => {}
        }
    }

    println!("4. Cache after playback");
    let stats = cache.stats();
    println!(
        "   tracked: {}, decryptions: {}, files removed: {}",
        stats.tracked_entries, stats.decryptions, stats.files_removed
    );

    Ok(())
}
