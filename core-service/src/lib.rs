//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (content store, key
//! unlocker, filesystem, audio output) into the shared Rust core and exposes
//! the flows a journal app needs: unlock a scope, play an entry, lock the app.
//! Desktop apps typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`) to get default filesystem and audio adapters.
//!
//! ```no_run
//! # async fn example(store: std::sync::Arc<dyn bridge_traits::ContentStore>) -> core_service::Result<()> {
//! use bridge_traits::{ContentId, KeyScope};
//! use core_runtime::config::CoreConfig;
//! use core_service::CoreService;
//!
//! let config = CoreConfig::builder()
//!     .scratch_dir("/tmp/journal-scratch")
//!     .content_store(store)
//!     .build()?;
//! let core = CoreService::bootstrap(config).await?;
//!
//! core.unlock(KeyScope::tag("travel"), "1234").await?;
//! core.play_entry(ContentId::new("entry-42")).await?;
//!
//! // App moved to background
//! core.lock().await;
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{ContentId, KeyScope, KeyUnlocker};
use core_playback::{
    CacheConfig, ContentLocator, DecoderFactory, DecryptionCache, EngineConfig, GarbageCollector,
    KeyVault, PlaybackEngine, PlaybackState, SweepReport, SymmetricKey,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, EventStream};
use parking_lot::Mutex;
use tokio::sync::broadcast::Receiver;
use tracing::{info, instrument, warn};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::{PacedAudioOutput, TokioFileSystem};

/// Primary façade exposed to host applications.
///
/// Cheap to clone; all clones share the same vault, cache and engine.
#[derive(Clone)]
pub struct CoreService {
    events: EventBus,
    vault: Arc<KeyVault>,
    cache: Arc<DecryptionCache>,
    engine: PlaybackEngine,
    key_unlocker: Option<Arc<dyn KeyUnlocker>>,
    collector: Arc<Mutex<Option<GarbageCollector>>>,
}

impl CoreService {
    /// Build every component from `config` with the symphonia decoder.
    #[cfg(feature = "decoder")]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        Self::bootstrap_with_decoder(config, Arc::new(core_playback::SymphoniaDecoderFactory)).await
    }

    /// Build every component from `config`, decoding through `decoders`.
    ///
    /// Initializes the scratch directory (purging leftovers when
    /// `purge_scratch_on_start` is set) and starts background garbage
    /// collection when `enable_background_gc` is set. Must be called from
    /// within a tokio runtime.
    #[instrument(skip_all, fields(scratch_dir = %config.scratch_dir.display()))]
    pub async fn bootstrap_with_decoder(
        config: CoreConfig,
        decoders: Arc<dyn DecoderFactory>,
    ) -> Result<Self> {
        config.validate()?;
        info!("Bootstrapping core service");

        let events = EventBus::new(config.event_buffer_size);

        let vault = Arc::new(
            KeyVault::new()
                .with_clock(config.clock.clone())
                .with_event_bus(events.clone()),
        );

        let locator = Arc::new(ContentLocator::new(config.content_store.clone()));

        let cache_config = CacheConfig::new(config.scratch_dir.clone())
            .with_plaintext_extension(config.plaintext_extension.clone())
            .with_purge_on_initialize(config.features.purge_scratch_on_start);
        let cache = Arc::new(
            DecryptionCache::new(
                cache_config,
                locator,
                vault.clone(),
                config.file_system.clone(),
            )
            .with_clock(config.clock.clone())
            .with_event_bus(events.clone()),
        );
        cache
            .initialize()
            .await
            .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;

        let engine = PlaybackEngine::new(
            cache.clone(),
            decoders,
            config.audio_output.clone(),
            EngineConfig::default(),
            Some(events.clone()),
        );

        let collector = config.features.enable_background_gc.then(|| {
            GarbageCollector::spawn(cache.clone(), config.gc_interval, config.plaintext_max_age)
        });

        info!(
            background_gc = collector.is_some(),
            "Core service ready"
        );

        Ok(Self {
            events,
            vault,
            cache,
            engine,
            key_unlocker: config.key_unlocker,
            collector: Arc::new(Mutex::new(collector)),
        })
    }

    /// Verify `passphrase` for `scope` and grant the derived key.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapabilityMissing`] when no `KeyUnlocker` was configured;
    /// `NoKeyAvailable` for a rejected passphrase.
    #[instrument(skip(self, passphrase), fields(scope = %scope))]
    pub async fn unlock(&self, scope: KeyScope, passphrase: &str) -> Result<()> {
        let unlocker = self
            .key_unlocker
            .as_ref()
            .ok_or_else(|| CoreError::CapabilityMissing {
                capability: "KeyUnlocker".to_string(),
                message: "No KeyUnlocker configured. Inject one with .key_unlocker() or grant keys directly."
                    .to_string(),
            })?;

        self.vault.unlock(unlocker.as_ref(), scope, passphrase).await?;
        Ok(())
    }

    pub fn grant(&self, scope: KeyScope, key: SymmetricKey) {
        self.vault.grant(scope, key);
    }

    /// Remove the key for `scope`. Plaintext already on disk stays until it
    /// is invalidated or collected.
    pub fn revoke(&self, scope: &KeyScope) {
        self.vault.revoke(scope);
    }

    /// App-lock: stop playback, forget every key, delete every plaintext.
    ///
    /// Returns once all scratch files the cache knows about are gone.
    #[instrument(skip(self))]
    pub async fn lock(&self) -> SweepReport {
        self.engine.stop();
        let scopes_removed = self.vault.clear_all();
        let report = self.cache.invalidate_all().await;
        self.engine.wait_for_cleanup().await;

        if report.is_clean() {
            info!(
                scopes_removed,
                files_removed = report.files_removed,
                "Core locked"
            );
        } else {
            warn!(
                scopes_removed,
                failures = report.failures.len(),
                "Core locked with plaintext left behind"
            );
        }
        report
    }

    /// Load `id` and start playing it.
    #[instrument(skip(self), fields(content_id = %id))]
    pub async fn play_entry(&self, id: ContentId) -> Result<()> {
        self.engine.load(id).await?;
        self.engine.play()?;
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        Ok(self.engine.pause()?)
    }

    pub fn resume(&self) -> Result<()> {
        Ok(self.engine.play()?)
    }

    pub fn seek(&self, seconds: f64) -> Result<()> {
        Ok(self.engine.seek(seconds)?)
    }

    pub fn stop(&self) {
        self.engine.stop();
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.engine.state()
    }

    /// Stop playback, wait for plaintext cleanup and stop background GC.
    ///
    /// Keys stay granted; use [`lock`](Self::lock) to clear them.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.engine.stop();
        self.engine.wait_for_cleanup().await;

        let collector = self.collector.lock().take();
        if let Some(mut collector) = collector {
            collector.shutdown().await;
        }

        info!("Core service shut down");
    }

    /// Subscribe to vault, cache and playback events.
    pub fn events(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Subscribe to playback events only.
    pub fn playback_events(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
            .filter(|event| matches!(event, CoreEvent::Playback(_)))
    }

    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    pub fn cache(&self) -> &Arc<DecryptionCache> {
        &self.cache
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn is_gc_running(&self) -> bool {
        self.collector
            .lock()
            .as_ref()
            .is_some_and(GarbageCollector::is_running)
    }
}

impl std::fmt::Debug for CoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreService")
            .field("vault", &self.vault)
            .field("cache", &self.cache)
            .field("engine", &self.engine)
            .finish()
    }
}
