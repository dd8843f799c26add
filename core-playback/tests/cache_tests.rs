//! Integration tests for the decryption cache
//!
//! These run against a real scratch directory through `TokioFileSystem` and an
//! in-memory content store.

mod common;

use bridge_traits::{ContentId, FileSystemAccess, KeyScope, ManualClock, StoredContent};
use chrono::Utc;
use common::Fixture;
use core_playback::{ContentCipher, GarbageCollector, PlaybackError, SymmetricKey};
use core_runtime::events::{CacheEvent, CoreEvent};
use std::sync::Arc;
use std::time::Duration;

const AUDIO: &[u8] = b"not really audio, but plaintext all the same";

// ============================================================================
// Key gating
// ============================================================================

#[tokio::test]
async fn test_materialize_requires_granted_key() {
    let fx = Fixture::new().await;
    let key = fx.add_encrypted("e1", Some("t1"), AUDIO);
    let id = ContentId::new("e1");

    let err = fx.cache.materialize(&id).await.unwrap_err();
    assert!(matches!(err, PlaybackError::NoKeyAvailable(_)));
    assert!(fx.scratch_files().await.is_empty());
    assert_eq!(fx.store.reads(), 0);

    fx.vault.grant(KeyScope::tag("t1"), key);
    let path = fx.cache.materialize(&id).await.unwrap();

    assert_eq!(tokio::fs::read(&path).await.unwrap(), AUDIO);
    assert_eq!(path, fx.cache.plaintext_path_for(&id));
    assert!(fx.cache.contains(&id));
}

#[tokio::test]
async fn test_revoked_key_blocks_cache_hit() {
    let fx = Fixture::new().await;
    let key = fx.add_encrypted("e1", Some("t1"), AUDIO);
    let id = ContentId::new("e1");

    fx.vault.grant(KeyScope::tag("t1"), key);
    let path = fx.cache.materialize(&id).await.unwrap();

    fx.vault.revoke(&KeyScope::tag("t1"));
    let err = fx.cache.materialize(&id).await.unwrap_err();
    assert!(matches!(err, PlaybackError::NoKeyAvailable(_)));

    // Revocation leaves the plaintext for the caller to invalidate.
    assert!(path.exists());
    assert!(fx.cache.contains(&id));
}

#[tokio::test]
async fn test_base_key_unlocks_base_encrypted_content() {
    let fx = Fixture::new().await;
    let key = fx.add_encrypted("e1", None, AUDIO);

    fx.vault.grant(KeyScope::tag("unrelated"), SymmetricKey::generate());
    assert!(matches!(
        fx.cache.materialize(&ContentId::new("e1")).await,
        Err(PlaybackError::NoKeyAvailable(_))
    ));

    fx.vault.grant(KeyScope::Base, key);
    let path = fx.cache.materialize(&ContentId::new("e1")).await.unwrap();
    assert_eq!(tokio::fs::read(path).await.unwrap(), AUDIO);
}

#[tokio::test]
async fn test_wrong_key_fails_without_leaving_files() {
    let fx = Fixture::new().await;
    fx.add_encrypted("e1", Some("t1"), AUDIO);
    fx.vault.grant(KeyScope::tag("t1"), SymmetricKey::generate());

    let err = fx.cache.materialize(&ContentId::new("e1")).await.unwrap_err();

    assert!(matches!(err, PlaybackError::DecryptionFailed(_)));
    assert!(fx.scratch_files().await.is_empty());
    assert!(fx.cache.is_empty());
}

#[tokio::test]
async fn test_truncated_payload_is_decryption_failure() {
    let fx = Fixture::new().await;
    let path = fx.dir.path().join("short.enc");
    fx.store.insert(
        StoredContent::plain("short", path).with_tag_scope("t1"),
        bytes::Bytes::from_static(b"tiny"),
    );
    fx.vault.grant(KeyScope::tag("t1"), SymmetricKey::generate());

    let err = fx
        .cache
        .materialize(&ContentId::new("short"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybackError::DecryptionFailed(_)));
    assert!(fx.scratch_files().await.is_empty());
}

// ============================================================================
// Lookup errors and unencrypted content
// ============================================================================

#[tokio::test]
async fn test_unknown_and_empty_items() {
    let fx = Fixture::new().await;
    fx.store.insert_item(StoredContent {
        has_recording: false,
        audio_path: None,
        ..StoredContent::plain("silent", "/unused")
    });

    assert!(matches!(
        fx.cache.materialize(&ContentId::new("missing")).await,
        Err(PlaybackError::NotFound(_))
    ));
    assert!(matches!(
        fx.cache.materialize(&ContentId::new("silent")).await,
        Err(PlaybackError::NoRecording(_))
    ));
}

#[tokio::test]
async fn test_unencrypted_content_is_served_in_place() {
    let fx = Fixture::new().await;
    let original = fx.dir.path().join("plain.m4a");
    tokio::fs::write(&original, AUDIO).await.unwrap();
    fx.add_plain("plain", original.clone());

    let path = fx.cache.materialize(&ContentId::new("plain")).await.unwrap();

    assert_eq!(path, original);
    assert!(fx.cache.is_empty());
    assert_eq!(fx.store.reads(), 0);

    fx.cache.invalidate(&ContentId::new("plain")).await.unwrap();
    assert!(original.exists());
}

// ============================================================================
// Hits, coalescing, adoption
// ============================================================================

#[tokio::test]
async fn test_second_request_is_a_hit() {
    let fx = Fixture::new().await;
    let key = fx.add_encrypted("e1", Some("t1"), AUDIO);
    fx.vault.grant(KeyScope::tag("t1"), key);
    let id = ContentId::new("e1");

    let mut events = fx.events.subscribe();

    let first = fx.cache.materialize(&id).await.unwrap();
    let second = fx.cache.materialize(&id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(fx.store.reads(), 1);

    let stats = fx.cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.decryptions, 1);
    assert_eq!(stats.tracked_entries, 1);

    let hits: Vec<bool> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event {
            CoreEvent::Cache(CacheEvent::Materialized { cache_hit, .. }) => Some(cache_hit),
            _ => None,
        })
        .collect();
    assert_eq!(hits, vec![false, true]);
}

#[tokio::test]
async fn test_concurrent_requests_decrypt_once() {
    let fx = Fixture::new().await;
    let key = fx.add_encrypted("e1", Some("t1"), AUDIO);
    fx.vault.grant(KeyScope::tag("t1"), key);
    fx.store.set_read_delay(Duration::from_millis(50));
    let id = ContentId::new("e1");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = fx.cache.clone();
            let id = id.clone();
            tokio::spawn(async move { cache.materialize(&id).await })
        })
        .collect();

    let mut paths = Vec::new();
    for task in tasks {
        paths.push(task.await.unwrap().unwrap());
    }

    assert!(paths.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(fx.store.reads(), 1);
    assert_eq!(fx.cache.stats().decryptions, 1);
    assert_eq!(fx.scratch_files().await.len(), 1);
}

#[tokio::test]
async fn test_vanished_file_is_decrypted_again() {
    let fx = Fixture::new().await;
    let key = fx.add_encrypted("e1", Some("t1"), AUDIO);
    fx.vault.grant(KeyScope::tag("t1"), key);
    let id = ContentId::new("e1");

    let path = fx.cache.materialize(&id).await.unwrap();
    tokio::fs::remove_file(&path).await.unwrap();

    let again = fx.cache.materialize(&id).await.unwrap();
    assert_eq!(again, path);
    assert_eq!(tokio::fs::read(&again).await.unwrap(), AUDIO);
    assert_eq!(fx.cache.stats().decryptions, 2);
}

#[tokio::test]
async fn test_complete_file_from_previous_run_is_adopted() {
    let fx = Fixture::new().await;
    let key = fx.add_encrypted("e1", Some("t1"), AUDIO);
    fx.vault.grant(KeyScope::tag("t1"), key);
    let id = ContentId::new("e1");

    let target = fx.cache.plaintext_path_for(&id);
    tokio::fs::write(&target, AUDIO).await.unwrap();

    let path = fx.cache.materialize(&id).await.unwrap();

    assert_eq!(path, target);
    let stats = fx.cache.stats();
    assert_eq!(stats.adoptions, 1);
    assert_eq!(stats.decryptions, 1);
}

#[tokio::test]
async fn test_leftover_file_does_not_bypass_wrong_key() {
    let fx = Fixture::new().await;
    fx.add_encrypted("e1", Some("t1"), AUDIO);
    fx.vault.grant(KeyScope::tag("t1"), SymmetricKey::generate());
    let id = ContentId::new("e1");

    let target = fx.cache.plaintext_path_for(&id);
    tokio::fs::write(&target, vec![b'X'; AUDIO.len()]).await.unwrap();

    let err = fx.cache.materialize(&id).await.unwrap_err();

    assert!(matches!(err, PlaybackError::DecryptionFailed(_)));
    assert!(!fx.cache.contains(&id));
    assert_eq!(fx.cache.stats().adoptions, 0);
}

#[tokio::test]
async fn test_stale_file_of_same_length_is_replaced() {
    let fx = Fixture::new().await;
    let key = fx.add_encrypted("e1", Some("t1"), AUDIO);
    fx.vault.grant(KeyScope::tag("t1"), key);
    let id = ContentId::new("e1");

    let target = fx.cache.plaintext_path_for(&id);
    tokio::fs::write(&target, vec![b'X'; AUDIO.len()]).await.unwrap();

    let path = fx.cache.materialize(&id).await.unwrap();

    assert_eq!(tokio::fs::read(&path).await.unwrap(), AUDIO);
    assert_eq!(fx.cache.stats().adoptions, 0);
    assert_eq!(fx.scratch_files().await.len(), 1);
}

#[tokio::test]
async fn test_truncated_file_from_previous_run_is_replaced() {
    let fx = Fixture::new().await;
    let key = fx.add_encrypted("e1", Some("t1"), AUDIO);
    fx.vault.grant(KeyScope::tag("t1"), key);
    let id = ContentId::new("e1");

    let target = fx.cache.plaintext_path_for(&id);
    tokio::fs::write(&target, &AUDIO[..10]).await.unwrap();

    let path = fx.cache.materialize(&id).await.unwrap();

    assert_eq!(tokio::fs::read(&path).await.unwrap(), AUDIO);
    assert_eq!(fx.cache.stats().adoptions, 0);
    assert_eq!(fx.cache.stats().decryptions, 1);
}

// ============================================================================
// Invalidation
// ============================================================================

#[tokio::test]
async fn test_invalidate_removes_file_and_entry() {
    let fx = Fixture::new().await;
    let key = fx.add_encrypted("e1", Some("t1"), AUDIO);
    fx.vault.grant(KeyScope::tag("t1"), key);
    let id = ContentId::new("e1");

    let path = fx.cache.materialize(&id).await.unwrap();
    fx.cache.invalidate(&id).await.unwrap();

    assert!(!path.exists());
    assert!(!fx.cache.contains(&id));

    // Idempotent, including for ids that were never cached.
    fx.cache.invalidate(&id).await.unwrap();
    fx.cache.invalidate(&ContentId::new("never")).await.unwrap();
}

#[tokio::test]
async fn test_invalidate_removes_untracked_file_at_derived_path() {
    let fx = Fixture::new().await;
    let id = ContentId::new("orphan");
    let path = fx.cache.plaintext_path_for(&id);
    tokio::fs::write(&path, AUDIO).await.unwrap();

    fx.cache.invalidate(&id).await.unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_invalidate_all_clears_tracked_and_leftover_files() {
    let fx = Fixture::new().await;
    for (id, tag) in [("e1", "t1"), ("e2", "t2")] {
        let key = fx.add_encrypted(id, Some(tag), AUDIO);
        fx.vault.grant(KeyScope::tag(tag), key);
        fx.cache.materialize(&ContentId::new(id)).await.unwrap();
    }
    tokio::fs::write(fx.scratch_dir().join("stray.m4a.partial"), b"x")
        .await
        .unwrap();

    let report = fx.cache.invalidate_all().await;

    assert_eq!(report.files_removed, 3);
    assert_eq!(report.entries_pruned, 2);
    assert!(report.is_clean());
    assert!(fx.cache.is_empty());
    assert!(fx.scratch_files().await.is_empty());
}

#[tokio::test]
async fn test_initialize_purges_scratch_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("scratch");
    tokio::fs::create_dir_all(&scratch).await.unwrap();
    tokio::fs::write(scratch.join("old.m4a"), b"stale").await.unwrap();

    let fs = Arc::new(bridge_desktop::TokioFileSystem::new());
    let cache = core_playback::DecryptionCache::new(
        core_playback::CacheConfig::new(&scratch).with_purge_on_initialize(true),
        Arc::new(core_playback::ContentLocator::new(Arc::new(
            common::MemoryStore::default(),
        ))),
        Arc::new(core_playback::KeyVault::new()),
        fs.clone(),
    );

    cache.initialize().await.unwrap();
    assert!(fs.list_directory(&scratch).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_initialize_rejects_invalid_extension() {
    let dir = tempfile::tempdir().unwrap();
    let cache = core_playback::DecryptionCache::new(
        core_playback::CacheConfig::new(dir.path()).with_plaintext_extension(".m4a"),
        Arc::new(core_playback::ContentLocator::new(Arc::new(
            common::MemoryStore::default(),
        ))),
        Arc::new(core_playback::KeyVault::new()),
        Arc::new(bridge_desktop::TokioFileSystem::new()),
    );

    assert!(matches!(
        cache.initialize().await,
        Err(PlaybackError::Internal(_))
    ));
}

// ============================================================================
// Garbage collection
// ============================================================================

#[tokio::test]
async fn test_gc_keeps_young_files_and_removes_expired_ones() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let fx = Fixture::with_clock(clock.clone()).await;
    let key = fx.add_encrypted("e1", Some("t1"), AUDIO);
    fx.vault.grant(KeyScope::tag("t1"), key);
    let id = ContentId::new("e1");

    let path = fx.cache.materialize(&id).await.unwrap();

    let report = fx
        .cache
        .run_garbage_collection(Duration::from_secs(3600))
        .await;
    assert_eq!(report.files_removed, 0);
    assert!(path.exists());

    clock.advance(chrono::Duration::hours(2));
    let report = fx
        .cache
        .run_garbage_collection(Duration::from_secs(3600))
        .await;

    assert_eq!(report.files_removed, 1);
    assert_eq!(report.entries_pruned, 1);
    assert!(!path.exists());
    assert!(!fx.cache.contains(&id));
    assert_eq!(fx.cache.stats().gc_runs, 2);
}

#[tokio::test]
async fn test_gc_clock_behind_file_times_keeps_files() {
    let clock = Arc::new(ManualClock::new(Utc::now() - chrono::Duration::days(1)));
    let fx = Fixture::with_clock(clock.clone()).await;
    let key = fx.add_encrypted("e1", Some("t1"), AUDIO);
    fx.vault.grant(KeyScope::tag("t1"), key);
    let id = ContentId::new("e1");

    let path = fx.cache.materialize(&id).await.unwrap();

    let report = fx
        .cache
        .run_garbage_collection(Duration::from_secs(3600))
        .await;

    assert_eq!(report.files_removed, 0);
    assert!(report.failures.is_empty());
    assert!(path.exists());
    assert!(fx.cache.contains(&id));
}

#[tokio::test]
async fn test_gc_with_zero_age_removes_everything() {
    let fx = Fixture::new().await;
    let key = fx.add_encrypted("e1", Some("t1"), AUDIO);
    fx.vault.grant(KeyScope::tag("t1"), key);
    fx.cache.materialize(&ContentId::new("e1")).await.unwrap();
    tokio::fs::write(fx.scratch_dir().join("leftover.m4a"), b"x")
        .await
        .unwrap();

    let report = fx.cache.run_garbage_collection(Duration::ZERO).await;

    assert_eq!(report.files_removed, 2);
    assert!(fx.cache.is_empty());
    assert!(fx.scratch_files().await.is_empty());
}

#[tokio::test]
async fn test_gc_prunes_entries_whose_file_vanished() {
    let fx = Fixture::new().await;
    let key = fx.add_encrypted("e1", Some("t1"), AUDIO);
    fx.vault.grant(KeyScope::tag("t1"), key);
    let path = fx.cache.materialize(&ContentId::new("e1")).await.unwrap();
    tokio::fs::remove_file(path).await.unwrap();

    let report = fx
        .cache
        .run_garbage_collection(Duration::from_secs(3600))
        .await;

    assert_eq!(report.files_removed, 0);
    assert_eq!(report.entries_pruned, 1);
    assert!(fx.cache.is_empty());
}

#[tokio::test]
async fn test_gc_on_empty_scratch_is_noop() {
    let fx = Fixture::new().await;
    let report = fx.cache.run_garbage_collection(Duration::ZERO).await;
    assert_eq!(report, Default::default());
}

#[tokio::test]
async fn test_background_collector_runs_and_shuts_down() {
    let fx = Fixture::new().await;
    tokio::fs::write(fx.scratch_dir().join("leftover.m4a"), b"x")
        .await
        .unwrap();

    let mut collector =
        GarbageCollector::spawn(fx.cache.clone(), Duration::from_millis(20), Duration::ZERO);
    assert!(collector.is_running());

    tokio::time::timeout(Duration::from_secs(5), async {
        while !fx.scratch_files().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("collector never removed the leftover");

    collector.shutdown().await;
    assert!(!collector.is_running());
}

// ============================================================================
// Cipher interoperability
// ============================================================================

#[test]
fn test_payload_layout_overhead() {
    let key = SymmetricKey::generate();
    let payload = ContentCipher::new(&key).encrypt(AUDIO).unwrap();
    assert_eq!(ContentCipher::plaintext_len(payload.len()), Some(AUDIO.len()));
}
