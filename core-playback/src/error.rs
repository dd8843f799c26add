//! # Playback Error Types
//!
//! Error taxonomy shared by the key vault, the decryption cache and the
//! playback engine.

use bridge_traits::error::BridgeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while materializing or playing content.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Content Errors
    // ========================================================================
    /// Content item, or its ciphertext, is unknown to the store.
    #[error("Content not found: {0}")]
    NotFound(String),

    /// Content item exists but has no audio payload.
    #[error("Content has no recording: {0}")]
    NoRecording(String),

    // ========================================================================
    // Key / Decryption Errors
    // ========================================================================
    /// Content is encrypted and no applicable key is granted.
    #[error("No key available for content: {0}")]
    NoKeyAvailable(String),

    /// A key was present but authentication or format checks failed.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Key bytes supplied by a collaborator are malformed.
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    // ========================================================================
    // I/O Errors
    // ========================================================================
    /// Reading ciphertext or writing/deleting plaintext failed.
    #[error("I/O failure: {0}")]
    IoFailure(String),

    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// Audio source could not be opened or decoded.
    #[error("Audio engine failure: {0}")]
    EngineFailure(String),

    /// Codec or container is not supported by the decoder.
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Operation is not valid in the current playback state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Operation requires loaded content.
    #[error("No content loaded")]
    NoContentLoaded,

    /// A newer `load` or `stop` replaced this load while it was in flight.
    #[error("Load of {0} was superseded")]
    LoadSuperseded(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable projection of [`PlaybackError`] carried in `error(kind)`
/// notifications and in [`PlaybackState::Error`](crate::engine::PlaybackState::Error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackErrorKind {
    NotFound,
    NoRecording,
    NoKeyAvailable,
    DecryptionFailed,
    IoFailure,
    EngineFailure,
    Internal,
}

impl PlaybackErrorKind {
    /// Stable snake_case name, as used in event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackErrorKind::NotFound => "not_found",
            PlaybackErrorKind::NoRecording => "no_recording",
            PlaybackErrorKind::NoKeyAvailable => "no_key_available",
            PlaybackErrorKind::DecryptionFailed => "decryption_failed",
            PlaybackErrorKind::IoFailure => "io_failure",
            PlaybackErrorKind::EngineFailure => "engine_failure",
            PlaybackErrorKind::Internal => "internal",
        }
    }

    /// Whether the user can resolve this by entering a PIN or re-granting.
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            PlaybackErrorKind::NoKeyAvailable | PlaybackErrorKind::DecryptionFailed
        )
    }
}

impl std::fmt::Display for PlaybackErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PlaybackError {
    /// Maps the error onto the externally visible taxonomy.
    pub fn kind(&self) -> PlaybackErrorKind {
        match self {
            PlaybackError::NotFound(_) => PlaybackErrorKind::NotFound,
            PlaybackError::NoRecording(_) => PlaybackErrorKind::NoRecording,
            PlaybackError::NoKeyAvailable(_) => PlaybackErrorKind::NoKeyAvailable,
            PlaybackError::DecryptionFailed(_) | PlaybackError::InvalidKeyMaterial(_) => {
                PlaybackErrorKind::DecryptionFailed
            }
            PlaybackError::IoFailure(_) => PlaybackErrorKind::IoFailure,
            PlaybackError::EngineFailure(_) | PlaybackError::UnsupportedFormat(_) => {
                PlaybackErrorKind::EngineFailure
            }
            PlaybackError::InvalidState { .. }
            | PlaybackError::NoContentLoaded
            | PlaybackError::LoadSuperseded(_)
            | PlaybackError::Internal(_) => PlaybackErrorKind::Internal,
        }
    }

    /// Returns `true` for expected conditions the user can fix (prompt for PIN).
    ///
    /// I/O failures are never user-recoverable in this sense.
    pub fn is_user_recoverable(&self) -> bool {
        self.kind().is_user_recoverable()
    }

    /// Returns `true` if this error is related to audio format/codec issues.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::UnsupportedFormat(_) | PlaybackError::EngineFailure(_)
        )
    }
}

impl From<BridgeError> for PlaybackError {
    fn from(err: BridgeError) -> Self {
        if err.is_not_found() {
            return PlaybackError::NotFound(err.to_string());
        }
        match err {
            BridgeError::PermissionDenied(msg) => PlaybackError::NoKeyAvailable(msg),
            other => PlaybackError::IoFailure(other.to_string()),
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
