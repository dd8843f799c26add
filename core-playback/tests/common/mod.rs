//! Shared fixtures for the core-playback integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{
    AudioOutput, Clock, ContentId, ContentStore, FileSystemAccess, OutputFormat, StoredContent,
};
use bytes::Bytes;
use core_playback::{
    AudioCodec, AudioDecoder, AudioFormat, AudioFrameChunk, AudioSource, CacheConfig,
    ContentCipher, ContentLocator, DecoderFactory, DecryptionCache, KeyVault, PlaybackError,
    ProbeResult, Result, SymmetricKey,
};
use core_runtime::events::EventBus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// In-memory ContentStore
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<ContentId, StoredContent>>,
    payloads: Mutex<HashMap<PathBuf, Bytes>>,
    reads: AtomicUsize,
    read_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn insert(&self, item: StoredContent, payload: Bytes) {
        if let Some(path) = &item.audio_path {
            self.payloads.lock().insert(path.clone(), payload);
        }
        self.items.lock().insert(item.content_id.clone(), item);
    }

    pub fn insert_item(&self, item: StoredContent) {
        self.items.lock().insert(item.content_id.clone(), item);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn resolve_content(&self, id: &ContentId) -> BridgeResult<Option<StoredContent>> {
        Ok(self.items.lock().get(id).cloned())
    }

    async fn read_ciphertext(&self, path: &Path) -> BridgeResult<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.payloads
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(path.display().to_string()))
    }
}

// ============================================================================
// Cache fixture
// ============================================================================

pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub vault: Arc<KeyVault>,
    pub fs: Arc<TokioFileSystem>,
    pub cache: Arc<DecryptionCache>,
    pub events: EventBus,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::build(|cache| cache).await
    }

    pub async fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::build(move |cache| cache.with_clock(clock)).await
    }

    async fn build(customize: impl FnOnce(DecryptionCache) -> DecryptionCache) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let events = EventBus::new(256);
        let vault = Arc::new(KeyVault::new().with_event_bus(events.clone()));
        let fs = Arc::new(TokioFileSystem::new());
        let locator = Arc::new(ContentLocator::new(store.clone()));

        let cache = DecryptionCache::new(
            CacheConfig::new(dir.path().join("scratch")),
            locator,
            vault.clone(),
            fs.clone() as Arc<dyn FileSystemAccess>,
        )
        .with_event_bus(events.clone());
        let cache = Arc::new(customize(cache));
        cache.initialize().await.unwrap();

        Self {
            dir,
            store,
            vault,
            fs,
            cache,
            events,
        }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    /// Register `id` as encrypted under `tag` (or the base key) and return
    /// the key that unlocks it.
    pub fn add_encrypted(&self, id: &str, tag: Option<&str>, plaintext: &[u8]) -> SymmetricKey {
        let key = SymmetricKey::generate();
        let payload = ContentCipher::new(&key).encrypt(plaintext).unwrap();

        let mut item = StoredContent::plain(id, self.dir.path().join(format!("{}.enc", id)));
        item = match tag {
            Some(tag) => item.with_tag_scope(tag),
            None => item.with_base_encryption(true),
        };
        self.store.insert(item, payload);
        key
    }

    pub fn add_plain(&self, id: &str, path: PathBuf) {
        self.store
            .insert(StoredContent::plain(id, path), Bytes::from_static(b""));
    }

    pub async fn scratch_files(&self) -> Vec<PathBuf> {
        self.fs
            .list_directory(&self.scratch_dir())
            .await
            .unwrap_or_default()
    }
}

// ============================================================================
// Fake decoder
// ============================================================================

/// Produces `total_frames` of silence at the configured format.
pub struct SilentDecoder {
    format: AudioFormat,
    total_frames: u64,
    position: u64,
    /// Chunks to yield before every further decode fails.
    fail_after_chunks: Option<usize>,
    chunks: usize,
}

#[async_trait]
impl AudioDecoder for SilentDecoder {
    async fn probe(&mut self) -> Result<ProbeResult> {
        Ok(ProbeResult::new(self.format.clone()).with_total_frames(Some(self.total_frames)))
    }

    async fn decode_frames(&mut self, max_frames: usize) -> Result<Option<AudioFrameChunk>> {
        let remaining = self.total_frames.saturating_sub(self.position);
        if remaining == 0 {
            return Ok(None);
        }

        if self.fail_after_chunks.is_some_and(|limit| self.chunks >= limit) {
            return Err(PlaybackError::EngineFailure("corrupt packet".to_string()));
        }
        self.chunks += 1;

        let frames = remaining.min(max_frames as u64) as usize;
        let timestamp =
            Duration::from_secs_f64(self.position as f64 / f64::from(self.format.sample_rate));
        self.position += frames as u64;

        let samples = vec![0.0; frames * usize::from(self.format.channels)];
        Ok(Some(AudioFrameChunk::new(samples, frames, timestamp)))
    }

    async fn seek(&mut self, position: Duration) -> Result<()> {
        let frame = (position.as_secs_f64() * f64::from(self.format.sample_rate)) as u64;
        self.position = frame.min(self.total_frames);
        Ok(())
    }
}

/// Opens a [`SilentDecoder`] for any path that exists.
pub struct SilentDecoderFactory {
    pub sample_rate: u32,
    pub channels: u16,
    pub total_frames: u64,
    pub opened: Mutex<Vec<PathBuf>>,
    pub fail_open: Mutex<bool>,
    pub fail_decode_after: Mutex<Option<usize>>,
}

impl SilentDecoderFactory {
    pub fn new(sample_rate: u32, total_frames: u64) -> Self {
        Self {
            sample_rate,
            channels: 1,
            total_frames,
            opened: Mutex::new(Vec::new()),
            fail_open: Mutex::new(false),
            fail_decode_after: Mutex::new(None),
        }
    }

    pub fn fail_next_open(&self) {
        *self.fail_open.lock() = true;
    }

    /// Decoders opened from now on fail after yielding `chunks` chunks.
    pub fn fail_decode_after(&self, chunks: usize) {
        *self.fail_decode_after.lock() = Some(chunks);
    }
}

#[async_trait]
impl DecoderFactory for SilentDecoderFactory {
    async fn open(&self, source: AudioSource) -> Result<Box<dyn AudioDecoder>> {
        let path = source.path().to_path_buf();
        if std::mem::take(&mut *self.fail_open.lock()) {
            return Err(PlaybackError::UnsupportedFormat(path.display().to_string()));
        }
        if !path.exists() {
            return Err(PlaybackError::NotFound(path.display().to_string()));
        }
        self.opened.lock().push(path);

        Ok(Box::new(SilentDecoder {
            format: AudioFormat::new(AudioCodec::Aac, self.sample_rate, self.channels),
            total_frames: self.total_frames,
            position: 0,
            fail_after_chunks: *self.fail_decode_after.lock(),
            chunks: 0,
        }))
    }
}

// ============================================================================
// Recording audio output
// ============================================================================

/// Counts what the engine writes, sleeping `write_delay` per chunk.
pub struct RecordingOutput {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub samples_written: AtomicUsize,
    pub formats: Mutex<Vec<OutputFormat>>,
    /// Writes accepted before the device reports an error.
    pub fail_after_writes: Mutex<Option<usize>>,
    writes: AtomicUsize,
    write_delay: Duration,
}

impl RecordingOutput {
    pub fn new(write_delay: Duration) -> Self {
        Self {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            samples_written: AtomicUsize::new(0),
            formats: Mutex::new(Vec::new()),
            fail_after_writes: Mutex::new(None),
            writes: AtomicUsize::new(0),
            write_delay,
        }
    }

    pub fn fail_after_writes(&self, writes: usize) {
        *self.fail_after_writes.lock() = Some(writes);
    }

    pub fn samples_written(&self) -> usize {
        self.samples_written.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    async fn start(&self, format: OutputFormat) -> BridgeResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.formats.lock().push(format);
        Ok(())
    }

    async fn write(&self, samples: &[f32]) -> BridgeResult<()> {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        let limit = *self.fail_after_writes.lock();
        if limit.is_some_and(|limit| self.writes.fetch_add(1, Ordering::SeqCst) >= limit) {
            return Err(BridgeError::OperationFailed("device unplugged".to_string()));
        }
        self.samples_written
            .fetch_add(samples.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> BridgeResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
