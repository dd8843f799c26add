//! Decoder seam between the playback engine and a codec library.
//!
//! The engine only ever decodes plaintext the cache has already written to
//! the scratch directory, so a decoder is opened from a local path through a
//! [`DecoderFactory`], probed once, then pulled chunk by chunk. The host side
//! of the pipeline is `bridge_traits::AudioOutput`.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Codec of the selected track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Alac,
    Mp3,
    Flac,
    Vorbis,
    Opus,
    /// Any uncompressed PCM variant.
    Pcm,
    Unknown,
}

/// Stream parameters reported by [`AudioDecoder::probe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(codec: AudioCodec, sample_rate: u32, channels: u16) -> Self {
        Self {
            codec,
            sample_rate,
            channels,
        }
    }
}

/// A materialized plaintext file to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSource {
    path: PathBuf,
}

impl AudioSource {
    pub fn local_file(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Interleaved f32 PCM in `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct AudioFrameChunk {
    pub samples: Vec<f32>,
    /// `samples.len() / channels`
    pub frames: usize,
    /// Stream position of the first frame.
    pub timestamp: Duration,
}

impl AudioFrameChunk {
    pub fn new(samples: Vec<f32>, frames: usize, timestamp: Duration) -> Self {
        Self {
            samples,
            frames,
            timestamp,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0 || self.samples.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub format: AudioFormat,
    /// `None` when the container does not record a length.
    pub total_frames: Option<u64>,
}

impl ProbeResult {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            total_frames: None,
        }
    }

    pub fn with_total_frames(mut self, total_frames: Option<u64>) -> Self {
        self.total_frames = total_frames;
        self
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.total_frames, self.format.sample_rate) {
            (_, 0) | (None, _) => None,
            (Some(frames), rate) => Some(Duration::from_secs_f64(frames as f64 / f64::from(rate))),
        }
    }
}

/// Pull decoder over one file.
#[async_trait]
pub trait AudioDecoder: Send {
    async fn probe(&mut self) -> Result<ProbeResult>;

    /// Up to `max_frames` frames; `Ok(None)` at end of stream.
    async fn decode_frames(&mut self, max_frames: usize) -> Result<Option<AudioFrameChunk>>;

    /// The next chunk starts at `position`.
    async fn seek(&mut self, position: Duration) -> Result<()>;
}

#[async_trait]
pub trait DecoderFactory: Send + Sync {
    async fn open(&self, source: AudioSource) -> Result<Box<dyn AudioDecoder>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_duration_needs_length_and_rate() {
        let format = AudioFormat::new(AudioCodec::Pcm, 8000, 1);

        let probe = ProbeResult::new(format.clone()).with_total_frames(Some(16_000));
        assert_eq!(probe.duration(), Some(Duration::from_secs(2)));

        assert_eq!(ProbeResult::new(format).duration(), None);

        let silent = ProbeResult::new(AudioFormat::new(AudioCodec::Aac, 0, 2))
            .with_total_frames(Some(10));
        assert_eq!(silent.duration(), None);
    }

    #[test]
    fn test_empty_chunk() {
        assert!(AudioFrameChunk::new(Vec::new(), 0, Duration::ZERO).is_empty());
        assert!(!AudioFrameChunk::new(vec![0.0; 4], 2, Duration::ZERO).is_empty());
    }

    #[test]
    fn test_codec_serializes_lowercase() {
        let json = serde_json::to_string(&AudioCodec::Pcm).unwrap();
        assert_eq!(json, "\"pcm\"");
    }
}
