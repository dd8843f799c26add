//! # Core Configuration
//!
//! [`CoreConfig`] carries every host collaborator and tuning knob the core
//! needs. It is assembled with [`CoreConfigBuilder`] and validated when
//! built, so a misconfigured host fails at startup rather than on the first
//! playback request.
//!
//! | Setting | Default |
//! |---------|---------|
//! | scratch directory | required |
//! | `ContentStore` | required |
//! | `FileSystemAccess` | `TokioFileSystem` with `desktop-shims`, else required |
//! | `AudioOutput` | `PacedAudioOutput` with `desktop-shims`, else required |
//! | `KeyUnlocker` | none; `unlock` reports a missing capability |
//! | `Clock` | system clock |
//! | plaintext extension | `m4a` |
//! | GC interval / max age | 10 min / 1 h |
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .scratch_dir(app_cache.join("plaintext"))
//!     .content_store(Arc::new(JournalStore::new(db)))
//!     .key_unlocker(Arc::new(PinUnlocker::new(keychain)))
//!     .plaintext_max_age(Duration::from_secs(30 * 60))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{AudioOutput, Clock, ContentStore, FileSystemAccess, KeyUnlocker, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::events::DEFAULT_EVENT_BUFFER_SIZE;

/// Default file extension for materialized plaintext.
pub const DEFAULT_PLAINTEXT_EXTENSION: &str = "m4a";

/// Default interval between background garbage collection passes.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default age after which plaintext is considered orphaned.
pub const DEFAULT_PLAINTEXT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Lower bound for `plaintext_max_age`; must exceed any plausible decrypt.
pub const MIN_PLAINTEXT_MAX_AGE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct CoreConfig {
    /// Directory exclusively owned by the decryption cache
    pub scratch_dir: PathBuf,

    /// Extension appended to plaintext file names (without the dot)
    pub plaintext_extension: String,

    /// How often the background GC runs
    pub gc_interval: Duration,

    /// Age after which the GC deletes plaintext files
    pub plaintext_max_age: Duration,

    /// Capacity of the event broadcast channel
    pub event_buffer_size: usize,

    pub content_store: Arc<dyn ContentStore>,

    /// `None` disables passphrase unlock; keys can still be granted directly.
    pub key_unlocker: Option<Arc<dyn KeyUnlocker>>,

    pub file_system: Arc<dyn FileSystemAccess>,

    pub audio_output: Arc<dyn AudioOutput>,

    /// Must follow wall time: GC compares it against file system timestamps.
    pub clock: Arc<dyn Clock>,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("scratch_dir", &self.scratch_dir)
            .field("plaintext_extension", &self.plaintext_extension)
            .field("gc_interval", &self.gc_interval)
            .field("plaintext_max_age", &self.plaintext_max_age)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("content_store", &"ContentStore { ... }")
            .field(
                "key_unlocker",
                &self.key_unlocker.as_ref().map(|_| "KeyUnlocker { ... }"),
            )
            .field("file_system", &"FileSystemAccess { ... }")
            .field("audio_output", &"AudioOutput { ... }")
            .field("features", &self.features)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Run age-based garbage collection on a background task
    pub enable_background_gc: bool,

    /// Delete leftover plaintext in the scratch directory at startup
    pub purge_scratch_on_start: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_background_gc: true,
            purge_scratch_on_start: true,
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Reject values the cache or GC cannot work with. `plaintext_max_age`
    /// must be at least [`MIN_PLAINTEXT_MAX_AGE`].
    pub fn validate(&self) -> Result<()> {
        if self.scratch_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "Scratch directory cannot be empty".to_string(),
            ));
        }

        if self.plaintext_extension.is_empty()
            || self.plaintext_extension.contains(['.', '/', '\\'])
        {
            return Err(Error::Config(format!(
                "Plaintext extension must be a bare extension like 'm4a', got '{}'",
                self.plaintext_extension
            )));
        }

        if self.gc_interval.is_zero() {
            return Err(Error::Config(
                "GC interval must be greater than zero".to_string(),
            ));
        }

        if self.plaintext_max_age < MIN_PLAINTEXT_MAX_AGE {
            return Err(Error::Config(format!(
                "Plaintext max age must be at least {}s so GC never races a decrypt",
                MIN_PLAINTEXT_MAX_AGE.as_secs()
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn file_system_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required for the plaintext scratch directory. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default TokioFileSystem. \
                 Mobile: inject an adapter for the app's private cache area."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn audio_output_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "AudioOutput".to_string(),
        message: "AudioOutput implementation is required for playback. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default PacedAudioOutput. \
                 Mobile: inject the platform audio session adapter."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(file_system_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_audio_output() -> Result<Arc<dyn AudioOutput>> {
    use bridge_desktop::PacedAudioOutput;

    let output: Arc<dyn AudioOutput> = Arc::new(PacedAudioOutput::new());
    Ok(output)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_audio_output() -> Result<Arc<dyn AudioOutput>> {
    Err(audio_output_missing_error())
}

/// Incremental [`CoreConfig`] construction; see the module docs for defaults.
#[derive(Default)]
pub struct CoreConfigBuilder {
    scratch_dir: Option<PathBuf>,
    plaintext_extension: Option<String>,
    gc_interval: Option<Duration>,
    plaintext_max_age: Option<Duration>,
    event_buffer_size: Option<usize>,
    content_store: Option<Arc<dyn ContentStore>>,
    key_unlocker: Option<Arc<dyn KeyUnlocker>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    audio_output: Option<Arc<dyn AudioOutput>>,
    clock: Option<Arc<dyn Clock>>,
    features: Option<FeatureFlags>,
}

impl CoreConfigBuilder {
    /// Directory owned by the decryption cache. Nothing else may live there:
    /// startup purges and sweeps delete every file in it.
    pub fn scratch_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.scratch_dir = Some(path.into());
        self
    }

    pub fn plaintext_extension(mut self, extension: impl Into<String>) -> Self {
        self.plaintext_extension = Some(extension.into());
        self
    }

    pub fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = Some(interval);
        self
    }

    /// Age past which background GC deletes plaintext.
    pub fn plaintext_max_age(mut self, max_age: Duration) -> Self {
        self.plaintext_max_age = Some(max_age);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn content_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.content_store = Some(store);
        self
    }

    pub fn key_unlocker(mut self, unlocker: Arc<dyn KeyUnlocker>) -> Self {
        self.key_unlocker = Some(unlocker);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn audio_output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.audio_output = Some(output);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn enable_background_gc(mut self, enabled: bool) -> Self {
        self.features.get_or_insert_with(FeatureFlags::default).enable_background_gc = enabled;
        self
    }

    pub fn purge_scratch_on_start(mut self, enabled: bool) -> Self {
        self.features.get_or_insert_with(FeatureFlags::default).purge_scratch_on_start = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = Some(features);
        self
    }

    /// # Errors
    ///
    /// [`Error::Config`] for a missing scratch directory or invalid values;
    /// [`Error::CapabilityMissing`] for a missing `ContentStore`, or a missing
    /// filesystem or audio output on builds without `desktop-shims`.
    pub fn build(self) -> Result<CoreConfig> {
        let scratch_dir = self.scratch_dir.ok_or_else(|| {
            Error::Config("Scratch directory is required. Use .scratch_dir() to set it.".to_string())
        })?;

        let content_store = self.content_store.ok_or_else(|| Error::CapabilityMissing {
            capability: "ContentStore".to_string(),
            message: "ContentStore implementation is required to resolve journal content. \
                     Inject the host's entity store adapter with .content_store()."
                .to_string(),
        })?;

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let audio_output = match self.audio_output {
            Some(output) => output,
            None => provide_default_audio_output()?,
        };

        let config = CoreConfig {
            scratch_dir,
            plaintext_extension: self
                .plaintext_extension
                .unwrap_or_else(|| DEFAULT_PLAINTEXT_EXTENSION.to_string()),
            gc_interval: self.gc_interval.unwrap_or(DEFAULT_GC_INTERVAL),
            plaintext_max_age: self.plaintext_max_age.unwrap_or(DEFAULT_PLAINTEXT_MAX_AGE),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            content_store,
            key_unlocker: self.key_unlocker,
            file_system,
            audio_output,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            features: self.features.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}
