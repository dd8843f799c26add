//! Background garbage collection for the decryption cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manager::DecryptionCache;

/// Periodically deletes expired plaintext on a background task.
///
/// The task stops when [`shutdown`](Self::shutdown) is called or the
/// collector is dropped. A pass already in progress runs to completion.
pub struct GarbageCollector {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl GarbageCollector {
    /// Start collecting every `interval`, removing files at least `max_age`
    /// old. The first pass runs one interval after spawning.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(cache: Arc<DecryptionCache>, interval: Duration, max_age: Duration) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        info!(
            interval_secs = interval.as_secs(),
            max_age_secs = max_age.as_secs(),
            "Starting plaintext garbage collector"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = cache.run_garbage_collection(max_age).await;
                        if !report.is_clean() {
                            warn!(failures = report.failures.len(), "Garbage collection left files behind");
                        }
                    }
                }
            }

            debug!("Plaintext garbage collector stopped");
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the background task and wait for it to exit.
    pub async fn shutdown(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Garbage collector task ended abnormally");
            }
        }
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
