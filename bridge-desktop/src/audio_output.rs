//! Headless audio sink that paces writes to real time.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    playback::{AudioOutput, OutputFormat},
};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;

/// Discards samples after sleeping for their playback duration.
///
/// Useful when the host renders audio through its own pipeline and only needs
/// the core to advance position at the natural rate.
pub struct PacedAudioOutput {
    format: Mutex<Option<OutputFormat>>,
    speed: f64,
}

impl PacedAudioOutput {
    pub fn new() -> Self {
        Self::with_speed(1.0)
    }

    /// Sink that runs `speed` times faster than real time.
    pub fn with_speed(speed: f64) -> Self {
        let speed = if speed.is_finite() && speed > 0.0 {
            speed
        } else {
            1.0
        };
        Self {
            format: Mutex::new(None),
            speed,
        }
    }

    fn chunk_duration(&self, format: OutputFormat, samples: usize) -> Duration {
        let channels = format.channels.max(1) as f64;
        let rate = format.sample_rate.max(1) as f64;
        let secs = samples as f64 / channels / rate / self.speed;
        Duration::from_secs_f64(secs)
    }
}

impl Default for PacedAudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioOutput for PacedAudioOutput {
    async fn start(&self, format: OutputFormat) -> Result<()> {
        debug!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Paced output started"
        );
        *self.format.lock() = Some(format);
        Ok(())
    }

    async fn write(&self, samples: &[f32]) -> Result<()> {
        let format = (*self.format.lock()).ok_or_else(|| {
            BridgeError::OperationFailed("audio output written before start".to_string())
        })?;
        tokio::time::sleep(self.chunk_duration(format, samples.len())).await;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.format.lock().take().is_some() {
            debug!("Paced output stopped");
        }
        Ok(())
    }
}
