//! [`AudioDecoder`] over symphonia's demuxers and codecs.

use crate::decoder::codec;
use crate::decoder::sample_converter::SampleConverter;
use crate::error::{PlaybackError, Result};
use crate::traits::{
    AudioDecoder, AudioFormat, AudioFrameChunk, AudioSource, DecoderFactory, ProbeResult,
};
use async_trait::async_trait;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::units::Time;
use tracing::{debug, instrument, warn};

/// Bad packets tolerated in a row before decoding fails.
const MAX_BAD_PACKETS: usize = 10;

/// Decoder for one plaintext file.
///
/// Decoded packets rarely line up with the requested chunk size, so samples
/// past the requested count are buffered for the next call.
pub struct SymphoniaDecoder {
    reader: Box<dyn FormatReader>,
    codec: Box<dyn Decoder>,
    track_id: u32,
    format: AudioFormat,
    total_frames: Option<u64>,
    buffered: Vec<f32>,
    /// Frames to drop after a seek landed before the requested timestamp.
    discard: u64,
    /// Frame index of the next frame returned.
    cursor: u64,
    finished: bool,
}

impl SymphoniaDecoder {
    /// Probe `path` and set up a codec for its first audio track.
    ///
    /// Blocking; [`SymphoniaDecoderFactory`] runs this off the async runtime.
    #[instrument(skip(path), fields(file = ?path.file_name()))]
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PlaybackError::NotFound(format!("Plaintext missing: {}", e)),
            _ => PlaybackError::EngineFailure(format!("Cannot open plaintext: {}", e)),
        })?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let reader = symphonia::default::get_probe()
            .format(
                &codec::probe_hint(path),
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlaybackError::UnsupportedFormat(format!("Unrecognized container: {}", e)))?
            .format;

        let track = reader
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PlaybackError::UnsupportedFormat("No audio track".to_string()))?;
        let params = &track.codec_params;

        let kind = codec::require_known(params.codec)?;
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| PlaybackError::UnsupportedFormat("Track has no sample rate".to_string()))?;
        // AAC in MP4 may only report its layout once a packet is decoded.
        let channels = params.channels.map_or(2, |layout| layout.count() as u16);

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| PlaybackError::UnsupportedFormat(format!("Codec setup failed: {}", e)))?;

        debug!(
            codec = ?kind,
            sample_rate,
            channels,
            total_frames = ?params.n_frames,
            "Decoder opened"
        );

        let track_id = track.id;
        let total_frames = params.n_frames;

        Ok(Self {
            track_id,
            total_frames,
            reader,
            codec: decoder,
            format: AudioFormat::new(kind, sample_rate, channels),
            buffered: Vec::new(),
            discard: 0,
            cursor: 0,
            finished: false,
        })
    }

    fn stride(&self) -> usize {
        usize::from(self.format.channels.max(1))
    }

    /// Samples from the next packet of our track, `None` at end of stream.
    fn next_samples(&mut self) -> Result<Option<Vec<f32>>> {
        let mut bad_packets = 0;

        while !self.finished {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    self.finished = true;
                    break;
                }
                Err(SymphoniaError::IoError(e)) if bad_packets + 1 < MAX_BAD_PACKETS => {
                    bad_packets += 1;
                    warn!(bad_packets, "Packet read failed: {}", e);
                    continue;
                }
                Err(SymphoniaError::ResetRequired) => {
                    return Err(PlaybackError::EngineFailure(
                        "Track layout changed mid-stream".to_string(),
                    ));
                }
                Err(e) => {
                    return Err(PlaybackError::EngineFailure(format!("Packet read failed: {}", e)));
                }
            };

            // Drop metadata revisions so they do not accumulate.
            while !self.reader.metadata().is_latest() {
                self.reader.metadata().pop();
            }

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.codec.decode(&packet) {
                Ok(decoded) => {
                    let channels = decoded.spec().channels.count() as u16;
                    if channels != self.format.channels {
                        debug!(from = self.format.channels, to = channels, "Channel layout resolved");
                        self.format.channels = channels;
                    }
                    return Ok(Some(SampleConverter::to_interleaved_f32(&decoded)));
                }
                Err(e @ (SymphoniaError::IoError(_) | SymphoniaError::DecodeError(_)))
                    if bad_packets + 1 < MAX_BAD_PACKETS =>
                {
                    bad_packets += 1;
                    warn!(bad_packets, "Skipping undecodable packet: {}", e);
                }
                Err(e) => {
                    return Err(PlaybackError::EngineFailure(format!("Decode failed: {}", e)));
                }
            }
        }

        Ok(None)
    }

    /// Drop frames still owed from a seek.
    fn apply_discard(&mut self) {
        let stride = self.stride();
        let available = (self.buffered.len() / stride) as u64;
        let dropped = self.discard.min(available);
        self.buffered.drain(..dropped as usize * stride);
        self.discard -= dropped;
    }
}

#[async_trait]
impl AudioDecoder for SymphoniaDecoder {
    async fn probe(&mut self) -> Result<ProbeResult> {
        Ok(ProbeResult::new(self.format.clone()).with_total_frames(self.total_frames))
    }

    async fn decode_frames(&mut self, max_frames: usize) -> Result<Option<AudioFrameChunk>> {
        let wanted = max_frames.max(1);

        loop {
            self.apply_discard();
            if self.discard == 0 && self.buffered.len() >= wanted * self.stride() {
                break;
            }
            match self.next_samples()? {
                Some(samples) => self.buffered.extend(samples),
                None => break,
            }
        }

        let stride = self.stride();
        let frames = wanted.min(self.buffered.len() / stride);
        if frames == 0 {
            self.buffered.clear();
            return Ok(None);
        }

        let timestamp =
            Duration::from_secs_f64(self.cursor as f64 / f64::from(self.format.sample_rate.max(1)));
        let samples: Vec<f32> = self.buffered.drain(..frames * stride).collect();
        self.cursor += frames as u64;

        Ok(Some(AudioFrameChunk::new(samples, frames, timestamp)))
    }

    async fn seek(&mut self, position: Duration) -> Result<()> {
        let target = (position.as_secs_f64() * f64::from(self.format.sample_rate)).round() as u64;
        if self.total_frames.is_some_and(|total| target > total) {
            return Err(PlaybackError::EngineFailure(format!(
                "Seek to {:?} is past the end of the stream",
                position
            )));
        }

        let landed = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(position.as_secs_f64()),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| PlaybackError::EngineFailure(format!("Seek failed: {}", e)))?;

        self.codec.reset();
        self.buffered.clear();
        self.discard = landed.required_ts.saturating_sub(landed.actual_ts);
        self.cursor = landed.required_ts;
        self.finished = false;

        debug!(cursor = self.cursor, discard = self.discard, "Decoder repositioned");
        Ok(())
    }
}

/// Opens [`SymphoniaDecoder`]s on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoderFactory;

#[async_trait]
impl DecoderFactory for SymphoniaDecoderFactory {
    async fn open(&self, source: AudioSource) -> Result<Box<dyn AudioDecoder>> {
        let decoder = tokio::task::spawn_blocking(move || SymphoniaDecoder::open(source.path()))
            .await
            .map_err(|e| PlaybackError::Internal(format!("Decoder open task failed: {}", e)))??;

        Ok(Box::new(decoder))
    }
}
