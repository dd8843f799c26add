//! Audio output bridge.
//!
//! The playback engine decodes audio itself and hands interleaved PCM to a
//! host-provided sink. Desktop hosts can use a device backend; tests and
//! headless builds use a paced or recording sink.

use async_trait::async_trait;

use crate::error::Result;

/// PCM layout the engine will write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    /// Sample rate in hertz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
}

impl OutputFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

/// Sink for decoded audio.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Prepare the device for the given format. Called every time playback
    /// (re)starts.
    async fn start(&self, format: OutputFormat) -> Result<()>;

    /// Write interleaved samples in `[-1.0, 1.0]`. Implementations may block
    /// until the device has room, which paces playback.
    async fn write(&self, samples: &[f32]) -> Result<()>;

    /// Release the device. Must be safe to call when not started.
    async fn stop(&self) -> Result<()>;
}
