//! Symphonia-backed decoding of materialized plaintext.
//!
//! [`SymphoniaDecoder`] covers every container and codec symphonia ships with
//! its `all` feature: AAC and ALAC in MP4, MP3, FLAC, Vorbis and WAV.
//!
//! ```text
//! scratch file → MediaSourceStream → FormatReader → Decoder → AudioFrameChunk
//! ```

mod codec;
mod sample_converter;
mod symphonia;

pub use self::symphonia::{SymphoniaDecoder, SymphoniaDecoderFactory};
pub use sample_converter::SampleConverter;
