//! Decryption cache configuration

use std::path::PathBuf;

/// File extension used for plaintext scratch files unless configured.
pub const DEFAULT_PLAINTEXT_EXTENSION: &str = "m4a";

/// Configuration for the decryption cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory that holds decrypted scratch files. Owned exclusively by the
    /// cache; anything else found in it is treated as a leftover.
    pub scratch_dir: PathBuf,

    /// Extension of plaintext files, without the leading dot (default: `m4a`).
    /// The audio decoder uses it as a container hint.
    pub plaintext_extension: String,

    /// Delete leftover plaintext from a previous run during `initialize`
    /// (default: false).
    pub purge_on_initialize: bool,
}

impl CacheConfig {
    /// Create a configuration rooted at `scratch_dir` with default values.
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            plaintext_extension: DEFAULT_PLAINTEXT_EXTENSION.to_string(),
            purge_on_initialize: false,
        }
    }

    /// Set the plaintext file extension.
    pub fn with_plaintext_extension(mut self, extension: impl Into<String>) -> Self {
        self.plaintext_extension = extension.into();
        self
    }

    /// Enable or disable purging leftovers on initialize.
    pub fn with_purge_on_initialize(mut self, enabled: bool) -> Self {
        self.purge_on_initialize = enabled;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.scratch_dir.as_os_str().is_empty() {
            return Err("scratch_dir cannot be empty".to_string());
        }

        if self.plaintext_extension.is_empty() {
            return Err("plaintext_extension cannot be empty".to_string());
        }

        if self.plaintext_extension.contains(['.', '/', '\\']) {
            return Err(format!(
                "plaintext_extension must be a bare extension, got {:?}",
                self.plaintext_extension
            ));
        }

        Ok(())
    }
}
