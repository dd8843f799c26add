//! # Engine Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Playback engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of frames to decode and write per render cycle.
    ///
    /// Default: 4096 frames (~93ms at 44.1kHz).
    #[serde(default = "default_chunk_frames")]
    pub chunk_frames: usize,

    /// Minimum wall-clock time between `PositionChanged` events while playing.
    ///
    /// Default: 250ms.
    #[serde(default = "default_position_event_interval")]
    pub position_event_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_frames: default_chunk_frames(),
            position_event_interval: default_position_event_interval(),
        }
    }
}

impl EngineConfig {
    pub fn with_chunk_frames(mut self, frames: usize) -> Self {
        self.chunk_frames = frames;
        self
    }

    pub fn with_position_event_interval(mut self, interval: Duration) -> Self {
        self.position_event_interval = interval;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_frames == 0 {
            return Err("chunk_frames must be greater than 0".to_string());
        }

        if self.chunk_frames > 1 << 20 {
            return Err(format!(
                "chunk_frames ({}) is unreasonably large",
                self.chunk_frames
            ));
        }

        Ok(())
    }
}

fn default_chunk_frames() -> usize {
    4096
}

fn default_position_event_interval() -> Duration {
    Duration::from_millis(250)
}
