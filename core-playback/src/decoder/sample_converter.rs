//! # Sample Format Converter
//!
//! Normalizes symphonia's decoded buffers to interleaved f32.

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::conv::FromSample;
use symphonia::core::sample::Sample;

/// Converts any symphonia sample format to interleaved f32 in `[-1.0, 1.0]`.
pub struct SampleConverter;

impl SampleConverter {
    /// Convert a decoded buffer to owned interleaved samples (LRLR... for
    /// stereo). The buffer is only valid until the next decode call, so the
    /// samples are copied out immediately.
    pub fn to_interleaved_f32(buffer: &AudioBufferRef<'_>) -> Vec<f32> {
        match buffer {
            AudioBufferRef::U8(buf) => Self::interleave(buf),
            AudioBufferRef::U16(buf) => Self::interleave(buf),
            AudioBufferRef::U24(buf) => Self::interleave(buf),
            AudioBufferRef::U32(buf) => Self::interleave(buf),
            AudioBufferRef::S8(buf) => Self::interleave(buf),
            AudioBufferRef::S16(buf) => Self::interleave(buf),
            AudioBufferRef::S24(buf) => Self::interleave(buf),
            AudioBufferRef::S32(buf) => Self::interleave(buf),
            AudioBufferRef::F32(buf) => Self::interleave(buf),
            AudioBufferRef::F64(buf) => Self::interleave(buf),
        }
    }

    fn interleave<T>(buf: &AudioBuffer<T>) -> Vec<f32>
    where
        T: Sample,
        f32: FromSample<T>,
    {
        let num_channels = buf.spec().channels.count();
        let num_frames = buf.frames();
        let mut interleaved = Vec::with_capacity(num_frames * num_channels);

        for frame_idx in 0..num_frames {
            for chan_idx in 0..num_channels {
                interleaved.push(f32::from_sample(buf.chan(chan_idx)[frame_idx]));
            }
        }

        interleaved
    }
}
