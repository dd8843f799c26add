//! Decryption cache implementation

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::{Clock, ContentId, FileSystemAccess, SystemClock};
use chrono::{DateTime, Utc};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument, warn};

use super::config::CacheConfig;
use super::encryption::ContentCipher;
use super::stats::{CacheCounters, CacheStats, SweepReport};
use crate::error::{PlaybackError, Result};
use crate::locator::{select_key, ContentLocator};
use crate::vault::KeyVault;

const PARTIAL_SUFFIX: &str = "partial";

/// A plaintext file owned by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub content_id: ContentId,
    pub plaintext_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Deterministic scratch file name for `id`.
pub fn plaintext_file_name(id: &ContentId, extension: &str) -> String {
    let digest = Sha256::digest(id.as_str().as_bytes());
    format!("{}.{}", hex::encode(digest), extension)
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Key-gated cache of decrypted audio.
///
/// Produces plaintext files on demand, tracks every file it creates, and
/// deletes them on invalidation or by age. All work for one [`ContentId`] is
/// serialized through a per-id lock, so concurrent requests for the same id
/// decrypt at most once.
pub struct DecryptionCache {
    config: CacheConfig,
    locator: Arc<ContentLocator>,
    vault: Arc<KeyVault>,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    entries: Mutex<HashMap<ContentId, CacheEntry>>,
    id_locks: Mutex<HashMap<ContentId, Arc<AsyncMutex<()>>>>,
    in_flight: Mutex<HashSet<PathBuf>>,
    counters: CacheCounters,
}

/// Holds the per-id lock; unregisters it on drop once nobody else waits.
struct IdLockGuard<'a> {
    cache: &'a DecryptionCache,
    id: ContentId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.cache.id_locks.lock();
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

/// Marks paths as in flight so sweeps leave them alone.
struct InFlightGuard<'a> {
    cache: &'a DecryptionCache,
    paths: Vec<PathBuf>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.cache.in_flight.lock();
        for path in &self.paths {
            in_flight.remove(path);
        }
    }
}

impl DecryptionCache {
    pub fn new(
        config: CacheConfig,
        locator: Arc<ContentLocator>,
        vault: Arc<KeyVault>,
        fs: Arc<dyn FileSystemAccess>,
    ) -> Self {
        Self {
            config,
            locator,
            vault,
            fs,
            clock: Arc::new(SystemClock),
            event_bus: None,
            entries: Mutex::new(HashMap::new()),
            id_locks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            counters: CacheCounters::default(),
        }
    }

    /// Use `clock` for entry timestamps and file ages.
    ///
    /// File ages compare `clock` against file system timestamps, so it must
    /// track wall time. A clock running behind makes files look younger and
    /// delays their collection; it never expires them early.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish [`CacheEvent`]s on `event_bus`.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Validate configuration and create the scratch directory.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing decryption cache");

        self.config.validate().map_err(|e| {
            error!("Invalid cache configuration: {}", e);
            PlaybackError::Internal(format!("Invalid cache configuration: {}", e))
        })?;

        self.fs
            .create_dir_all(&self.config.scratch_dir)
            .await
            .map_err(|e| {
                error!("Failed to create scratch directory: {}", e);
                PlaybackError::IoFailure(format!("Failed to create scratch directory: {}", e))
            })?;

        if self.config.purge_on_initialize {
            let report = self.sweep_leftovers().await;
            if report.files_removed > 0 {
                info!(
                    files_removed = report.files_removed,
                    "Purged plaintext left over from a previous run"
                );
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Where plaintext for `id` lives once materialized.
    pub fn plaintext_path_for(&self, id: &ContentId) -> PathBuf {
        self.config
            .scratch_dir
            .join(plaintext_file_name(id, &self.config.plaintext_extension))
    }

    /// Return a local path holding playable plaintext for `id`.
    ///
    /// Unencrypted content is served from its payload path and never enters
    /// the cache. Encrypted content requires a granted key on every call,
    /// including calls that would hit an existing entry.
    ///
    /// # Errors
    ///
    /// `NotFound`, `NoRecording`, `NoKeyAvailable`, `DecryptionFailed` or
    /// `IoFailure`. On any error no new file remains and no entry is added.
    #[instrument(skip(self), fields(content_id = %id))]
    pub async fn materialize(&self, id: &ContentId) -> Result<PathBuf> {
        let _lock = self.lock_id(id).await;

        let descriptor = self.locator.resolve(id).await?;
        if !descriptor.is_encrypted {
            debug!("Content is not encrypted; serving payload in place");
            return Ok(descriptor.ciphertext_path);
        }

        let (scope, key) = select_key(&descriptor, &self.vault).map_err(|e| {
            debug!("No granted key for content");
            e
        })?;

        if let Some(path) = self.tracked_path(id) {
            if self.file_exists(&path).await {
                CacheCounters::bump(&self.counters.hits);
                debug!(scope = %scope, "Cache hit");
                self.emit(CacheEvent::Materialized {
                    content_id: id.to_string(),
                    cache_hit: true,
                });
                return Ok(path);
            }

            warn!("Tracked plaintext vanished; decrypting again");
            self.entries.lock().remove(id);
        }

        CacheCounters::bump(&self.counters.misses);

        let target = self.plaintext_path_for(id);
        let partial = partial_path(&target);
        let _in_flight = self.mark_in_flight(vec![target.clone(), partial.clone()]);

        let payload = self
            .locator
            .read_ciphertext(&descriptor.ciphertext_path)
            .await?;
        if ContentCipher::plaintext_len(payload.len()).is_none() {
            return Err(PlaybackError::DecryptionFailed(format!(
                "payload for {} is too short ({} bytes)",
                id,
                payload.len()
            )));
        }

        let plaintext = ContentCipher::decrypt_blocking(key, payload)
            .await
            .map_err(|e| {
                warn!(scope = %scope, error = %e, "Decryption failed");
                e
            })?;
        CacheCounters::bump(&self.counters.decryptions);

        if self.adopt_existing(&target, &plaintext).await? {
            CacheCounters::bump(&self.counters.adoptions);
            info!(scope = %scope, "Adopted plaintext from a previous run");
        } else {
            self.write_atomically(&target, &partial, &plaintext).await?;
            info!(
                scope = %scope,
                bytes = plaintext.len(),
                file = %file_label(&target),
                "Content decrypted"
            );
        }

        self.insert_entry(id, target.clone()).await;
        self.emit(CacheEvent::Materialized {
            content_id: id.to_string(),
            cache_hit: false,
        });

        Ok(target)
    }

    /// Delete the plaintext for `id` and forget its entry.
    ///
    /// Idempotent: unknown ids and already-missing files are not errors. If
    /// the file cannot be deleted the entry is kept, since the file still
    /// exists, and `IoFailure` is returned.
    #[instrument(skip(self), fields(content_id = %id))]
    pub async fn invalidate(&self, id: &ContentId) -> Result<()> {
        let _lock = self.lock_id(id).await;
        self.invalidate_locked(id).await.map(|_| ())
    }

    /// Invalidate every tracked entry, then delete untracked leftovers in the
    /// scratch directory.
    #[instrument(skip(self))]
    pub async fn invalidate_all(&self) -> SweepReport {
        let ids: Vec<ContentId> = self.entries.lock().keys().cloned().collect();
        info!(tracked = ids.len(), "Invalidating all cached plaintext");

        let mut report = SweepReport::default();
        for id in ids {
            let _lock = self.lock_id(&id).await;
            match self.invalidate_locked(&id).await {
                Ok(outcome) => outcome.record(&mut report),
                Err(e) => {
                    error!(content_id = %id, error = %e, "Failed to invalidate entry");
                    report.failures.push(id.to_string());
                }
            }
        }

        report.merge(self.sweep_leftovers().await);

        info!(
            files_removed = report.files_removed,
            entries_pruned = report.entries_pruned,
            failures = report.failures.len(),
            "Cache cleared"
        );
        report
    }

    /// Delete scratch files at least `max_age` old, then prune entries whose
    /// file has vanished.
    ///
    /// A file's age is the cache clock's `now` minus its creation time, or
    /// its modification time when the platform has none. A timestamp ahead of
    /// `now` counts as age zero. A file with neither is treated as expired.
    /// Paths with work in flight are skipped. Failures are logged and recorded
    /// in the report; they never abort the pass.
    #[instrument(skip(self))]
    pub async fn run_garbage_collection(&self, max_age: Duration) -> SweepReport {
        let mut report = SweepReport::default();
        let now = self.clock.unix_timestamp();
        let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);

        let tracked: HashMap<PathBuf, ContentId> = self
            .entries
            .lock()
            .values()
            .map(|entry| (entry.plaintext_path.clone(), entry.content_id.clone()))
            .collect();

        for path in self.list_scratch().await {
            if self.is_in_flight(&path) {
                debug!(file = %file_label(&path), "Skipping file with work in flight");
                continue;
            }

            let metadata = match self.fs.metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    warn!(file = %file_label(&path), error = %e, "Failed to stat scratch file");
                    report.failures.push(file_label(&path));
                    continue;
                }
            };
            if metadata.is_directory {
                continue;
            }

            let expired = max_age.is_zero()
                || match metadata.birth_time() {
                    Some(born) => now.saturating_sub(born) >= max_age_secs,
                    None => true,
                };
            if !expired {
                continue;
            }

            match tracked.get(&path) {
                Some(id) => {
                    let _lock = self.lock_id(id).await;
                    if self.tracked_path(id).as_deref() != Some(path.as_path()) {
                        continue;
                    }
                    match self.invalidate_locked(id).await {
                        Ok(outcome) => outcome.record(&mut report),
                        Err(e) => {
                            warn!(content_id = %id, error = %e, "Failed to expire entry");
                            report.failures.push(id.to_string());
                        }
                    }
                }
                None => match self.remove_file(&path).await {
                    Ok(true) => report.files_removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(file = %file_label(&path), error = %e, "Failed to delete leftover");
                        report.failures.push(file_label(&path));
                    }
                },
            }
        }

        report.entries_pruned += self.prune_vanished().await;

        CacheCounters::bump(&self.counters.gc_runs);
        info!(
            files_removed = report.files_removed,
            entries_pruned = report.entries_pruned,
            "Garbage collection complete"
        );
        self.emit(CacheEvent::GarbageCollected {
            files_removed: report.files_removed,
            entries_pruned: report.entries_pruned,
        });

        report
    }

    pub fn entry(&self, id: &ContentId) -> Option<CacheEntry> {
        self.entries.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.len())
    }

    async fn lock_id(&self, id: &ContentId) -> IdLockGuard<'_> {
        let lock = self
            .id_locks
            .lock()
            .entry(id.clone())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;

        IdLockGuard {
            cache: self,
            id: id.clone(),
            guard: Some(guard),
        }
    }

    fn mark_in_flight(&self, paths: Vec<PathBuf>) -> InFlightGuard<'_> {
        {
            let mut in_flight = self.in_flight.lock();
            for path in &paths {
                in_flight.insert(path.clone());
            }
        }
        InFlightGuard { cache: self, paths }
    }

    fn is_in_flight(&self, path: &Path) -> bool {
        self.in_flight.lock().contains(path)
    }

    fn tracked_path(&self, id: &ContentId) -> Option<PathBuf> {
        self.entries
            .lock()
            .get(id)
            .map(|entry| entry.plaintext_path.clone())
    }

    async fn file_exists(&self, path: &Path) -> bool {
        match self.fs.exists(path).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(file = %file_label(path), error = %e, "Failed to check plaintext file");
                false
            }
        }
    }

    /// Keep a file from an earlier run only when it holds exactly
    /// `plaintext`; anything else at the target is deleted.
    async fn adopt_existing(&self, target: &Path, plaintext: &[u8]) -> Result<bool> {
        let metadata = match self.fs.metadata(target).await {
            Ok(metadata) => metadata,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => {
                warn!(error = %e, "Failed to stat plaintext target; rewriting");
                return Ok(false);
            }
        };

        if !metadata.is_directory && metadata.size == plaintext.len() as u64 {
            match self.fs.read_file(target).await {
                Ok(existing) if existing.as_ref() == plaintext => return Ok(true),
                Ok(_) => debug!("Discarding stale plaintext"),
                Err(e) => warn!(error = %e, "Failed to read plaintext target; rewriting"),
            }
        } else {
            debug!(
                found = metadata.size,
                expected = plaintext.len(),
                "Discarding incomplete plaintext"
            );
        }

        self.remove_file(target).await?;
        Ok(false)
    }

    async fn write_atomically(&self, target: &Path, partial: &Path, plaintext: &[u8]) -> Result<()> {
        if let Err(e) = self.fs.write_file(partial, plaintext).await {
            error!(error = %e, "Failed to write plaintext");
            self.discard_partial(partial).await;
            return Err(PlaybackError::IoFailure(format!(
                "Failed to write plaintext: {}",
                e
            )));
        }

        if let Err(e) = self.fs.rename(partial, target).await {
            error!(error = %e, "Failed to publish plaintext");
            self.discard_partial(partial).await;
            return Err(PlaybackError::IoFailure(format!(
                "Failed to publish plaintext: {}",
                e
            )));
        }

        Ok(())
    }

    async fn discard_partial(&self, partial: &Path) {
        match self.fs.delete_file(partial).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(error = %e, "Failed to remove partial plaintext"),
        }
    }

    async fn insert_entry(&self, id: &ContentId, path: PathBuf) {
        let previous = self.tracked_path(id);
        if let Some(old) = previous.filter(|old| *old != path) {
            if let Err(e) = self.remove_file(&old).await {
                warn!(error = %e, "Failed to remove superseded plaintext");
            }
        }

        let entry = CacheEntry {
            content_id: id.clone(),
            plaintext_path: path,
            created_at: self.clock.now(),
        };
        self.entries.lock().insert(id.clone(), entry);
    }

    /// Caller must hold the id lock.
    async fn invalidate_locked(&self, id: &ContentId) -> Result<InvalidateOutcome> {
        let tracked = self.tracked_path(id);
        let path = tracked
            .clone()
            .unwrap_or_else(|| self.plaintext_path_for(id));

        let file_removed = self.remove_file(&path).await?;

        let entry_removed = tracked.is_some() && self.entries.lock().remove(id).is_some();
        if entry_removed {
            CacheCounters::bump(&self.counters.invalidations);
        }

        if file_removed || entry_removed {
            debug!(file_removed, entry_removed, "Plaintext invalidated");
            self.emit(CacheEvent::Invalidated {
                content_id: id.to_string(),
            });
        }

        Ok(InvalidateOutcome {
            file_removed,
            entry_removed,
        })
    }

    /// Returns `Ok(false)` when the file was already gone.
    async fn remove_file(&self, path: &Path) -> Result<bool> {
        match self.fs.delete_file(path).await {
            Ok(()) => {
                CacheCounters::bump(&self.counters.files_removed);
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(PlaybackError::IoFailure(format!(
                "Failed to delete {}: {}",
                file_label(path),
                e
            ))),
        }
    }

    async fn list_scratch(&self) -> Vec<PathBuf> {
        match self.fs.list_directory(&self.config.scratch_dir).await {
            Ok(paths) => paths,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to list scratch directory");
                Vec::new()
            }
        }
    }

    /// Delete scratch files that no entry owns and no request is producing.
    async fn sweep_leftovers(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for path in self.list_scratch().await {
            if self.is_in_flight(&path) {
                continue;
            }
            let owned = self
                .entries
                .lock()
                .values()
                .any(|entry| entry.plaintext_path == path);
            if owned {
                continue;
            }

            match self.fs.metadata(&path).await {
                Ok(metadata) if metadata.is_directory => continue,
                Err(e) if e.is_not_found() => continue,
                _ => {}
            }

            match self.remove_file(&path).await {
                Ok(true) => report.files_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(file = %file_label(&path), error = %e, "Failed to delete leftover");
                    report.failures.push(file_label(&path));
                }
            }
        }

        report
    }

    /// Drop entries whose file no longer exists.
    async fn prune_vanished(&self) -> usize {
        let snapshot: Vec<(ContentId, PathBuf)> = self
            .entries
            .lock()
            .values()
            .map(|entry| (entry.content_id.clone(), entry.plaintext_path.clone()))
            .collect();

        let mut pruned = 0;
        for (id, path) in snapshot {
            if self.file_exists(&path).await {
                continue;
            }

            let _lock = self.lock_id(&id).await;
            let still_missing = self.tracked_path(&id).as_deref() == Some(path.as_path())
                && !self.file_exists(&path).await;
            if still_missing && self.entries.lock().remove(&id).is_some() {
                debug!(content_id = %id, "Pruned entry whose plaintext vanished");
                pruned += 1;
            }
        }

        pruned
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Cache(event)).ok();
        }
    }
}

impl std::fmt::Debug for DecryptionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionCache")
            .field("scratch_dir", &self.config.scratch_dir)
            .field("entries", &self.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct InvalidateOutcome {
    file_removed: bool,
    entry_removed: bool,
}

impl InvalidateOutcome {
    fn record(self, report: &mut SweepReport) {
        if self.file_removed {
            report.files_removed += 1;
        }
        if self.entry_removed {
            report.entries_pruned += 1;
        }
    }
}
