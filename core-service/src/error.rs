use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Playback error: {0}")]
    Playback(#[from] core_playback::PlaybackError),
}

impl CoreError {
    /// Whether the host should prompt for a PIN and retry.
    pub fn needs_unlock(&self) -> bool {
        matches!(self, CoreError::Playback(e) if e.is_user_recoverable())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
