//! Cache statistics and sweep reports

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Snapshot of cache activity since construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently tracked.
    pub tracked_entries: usize,

    /// Requests answered from an existing entry.
    pub hits: u64,

    /// Requests that had to produce plaintext.
    pub misses: u64,

    /// Payloads actually decrypted.
    pub decryptions: u64,

    /// Files from a previous run kept because they matched the decrypted
    /// payload byte for byte.
    pub adoptions: u64,

    /// Entries removed through invalidation (including GC).
    pub invalidations: u64,

    /// Completed garbage collection passes.
    pub gc_runs: u64,

    /// Scratch files deleted by GC and sweeps.
    pub files_removed: u64,
}

impl CacheStats {
    /// Share of requests served from the cache, in percent.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }

        (self.hits as f64 / total as f64) * 100.0
    }
}

/// Outcome of `invalidate_all` or a garbage collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Scratch files deleted.
    pub files_removed: usize,

    /// Map entries removed, whether their file was deleted or had vanished.
    pub entries_pruned: usize,

    /// Paths or ids that could not be cleaned up; logged, never fatal.
    pub failures: Vec<String>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn merge(&mut self, other: SweepReport) {
        self.files_removed += other.files_removed;
        self.entries_pruned += other.entries_pruned;
        self.failures.extend(other.failures);
    }
}

/// Lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub decryptions: AtomicU64,
    pub adoptions: AtomicU64,
    pub invalidations: AtomicU64,
    pub gc_runs: AtomicU64,
    pub files_removed: AtomicU64,
}

impl CacheCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, tracked_entries: usize) -> CacheStats {
        CacheStats {
            tracked_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            decryptions: self.decryptions.load(Ordering::Relaxed),
            adoptions: self.adoptions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            gc_runs: self.gc_runs.load(Ordering::Relaxed),
            files_removed: self.files_removed.load(Ordering::Relaxed),
        }
    }
}
