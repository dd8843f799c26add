//! End-to-end: encrypted WAV → decryption cache → symphonia → paced output.

#![cfg(feature = "decoder")]

mod common;

use bridge_desktop::{PacedAudioOutput, TokioFileSystem};
use bridge_traits::{ContentId, KeyScope, StoredContent};
use common::MemoryStore;
use core_playback::{
    CacheConfig, ContentCipher, ContentLocator, DecryptionCache, EngineConfig, KeyVault,
    PlaybackEngine, PlaybackState, SymmetricKey, SymphoniaDecoderFactory,
};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use std::sync::Arc;
use std::time::Duration;

fn wav_bytes(sample_rate: u32, frames: u32) -> Vec<u8> {
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
        out.extend_from_slice(&(((i % 200) as i16) * 100).to_le_bytes());
    }
    out
}

#[tokio::test]
async fn test_encrypted_recording_plays_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let events = EventBus::new(256);

    let key = SymmetricKey::generate();
    let payload = ContentCipher::new(&key)
        .encrypt(&wav_bytes(8000, 4000))
        .unwrap();
    let store = Arc::new(MemoryStore::default());
    store.insert(
        StoredContent::plain("memo", dir.path().join("memo.enc")).with_tag_scope("private"),
        payload,
    );

    let vault = Arc::new(KeyVault::new());
    vault.grant(KeyScope::tag("private"), key);

    let cache = Arc::new(
        DecryptionCache::new(
            CacheConfig::new(dir.path().join("scratch")).with_plaintext_extension("wav"),
            Arc::new(ContentLocator::new(store)),
            vault,
            Arc::new(TokioFileSystem::new()),
        )
        .with_event_bus(events.clone()),
    );
    cache.initialize().await.unwrap();

    let engine = PlaybackEngine::new(
        cache.clone(),
        Arc::new(SymphoniaDecoderFactory),
        Arc::new(PacedAudioOutput::with_speed(20.0)),
        EngineConfig::default().with_chunk_frames(1024),
        Some(events.clone()),
    );
    let mut rx = events.subscribe();
    let id = ContentId::new("memo");

    engine.load(id.clone()).await.unwrap();
    assert_eq!(engine.state(), PlaybackState::Ready);
    assert_eq!(engine.session().duration_seconds(), Some(0.5));

    engine.play().unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(CoreEvent::Playback(PlaybackEvent::Finished { content_id })) = rx.recv().await
            {
                assert_eq!(content_id, "memo");
                break;
            }
        }
    })
    .await
    .expect("playback never finished");

    assert_eq!(engine.state(), PlaybackState::Stopped);
    assert!(cache.is_empty());
    assert!(!cache.plaintext_path_for(&id).exists());
}
