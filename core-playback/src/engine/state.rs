//! Playback states and session snapshot.

use bridge_traits::ContentId;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PlaybackErrorKind;

/// Engine state machine.
///
/// `Idle` is initial. `Stopped` and `Error` are terminal until the next load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Stopped,
    Error(PlaybackErrorKind),
}

impl PlaybackState {
    /// Returns `true` while content is loading or loaded.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Loading | Self::Ready | Self::Playing | Self::Paused
        )
    }

    /// Returns `true` if only a new load leaves this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error(_))
    }

    /// Returns `true` if the state has a decoder and a position.
    pub fn is_seekable(&self) -> bool {
        matches!(self, Self::Ready | Self::Playing | Self::Paused)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Idle => f.write_str("idle"),
            PlaybackState::Loading => f.write_str("loading"),
            PlaybackState::Ready => f.write_str("ready"),
            PlaybackState::Playing => f.write_str("playing"),
            PlaybackState::Paused => f.write_str("paused"),
            PlaybackState::Stopped => f.write_str("stopped"),
            PlaybackState::Error(kind) => write!(f, "error({})", kind),
        }
    }
}

/// Snapshot of the engine's current session.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    pub content_id: Option<ContentId>,
    pub state: PlaybackState,
    pub position_frames: u64,
    pub sample_rate: f64,
    /// `None` when the container does not report a length.
    pub duration_frames: Option<u64>,
}

impl PlaybackSession {
    pub(crate) fn loading(content_id: ContentId) -> Self {
        Self {
            content_id: Some(content_id),
            state: PlaybackState::Loading,
            ..Self::default()
        }
    }

    pub fn position(&self) -> PlaybackPosition {
        PlaybackPosition::new(self.position_frames, self.sample_rate)
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        let rate = self.sample_rate;
        self.duration_frames
            .filter(|_| rate > 0.0)
            .map(|frames| frames as f64 / rate)
    }
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self {
            content_id: None,
            state: PlaybackState::Idle,
            position_frames: 0,
            sample_rate: 0.0,
            duration_frames: None,
        }
    }
}

/// Current position in frames and seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackPosition {
    pub frames: u64,
    pub seconds: f64,
}

impl PlaybackPosition {
    pub fn new(frames: u64, sample_rate: f64) -> Self {
        let seconds = if sample_rate > 0.0 {
            frames as f64 / sample_rate
        } else {
            0.0
        };
        Self { frames, seconds }
    }

    pub fn millis(&self) -> u64 {
        (self.seconds * 1000.0).round() as u64
    }
}
