//! Probe hints and codec identification for symphonia.

use crate::error::{PlaybackError, Result};
use crate::traits::AudioCodec;
use std::path::Path;
use symphonia::core::codecs::{
    CodecType, CODEC_TYPE_AAC, CODEC_TYPE_ALAC, CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_OPUS,
    CODEC_TYPE_PCM_F32BE, CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64BE, CODEC_TYPE_PCM_F64LE,
    CODEC_TYPE_PCM_S16BE, CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S24BE, CODEC_TYPE_PCM_S24LE,
    CODEC_TYPE_PCM_S32BE, CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_U8, CODEC_TYPE_VORBIS,
};
use symphonia::core::probe::Hint;

/// Scratch files carry the configured plaintext extension, which is
/// usually the container.
pub(crate) fn probe_hint(path: &Path) -> Hint {
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }
    hint
}

pub(crate) fn identify(codec: CodecType) -> AudioCodec {
    match codec {
        CODEC_TYPE_AAC => AudioCodec::Aac,
        CODEC_TYPE_ALAC => AudioCodec::Alac,
        CODEC_TYPE_MP3 => AudioCodec::Mp3,
        CODEC_TYPE_FLAC => AudioCodec::Flac,
        CODEC_TYPE_VORBIS => AudioCodec::Vorbis,
        CODEC_TYPE_OPUS => AudioCodec::Opus,
        CODEC_TYPE_PCM_U8
        | CODEC_TYPE_PCM_S16LE
        | CODEC_TYPE_PCM_S16BE
        | CODEC_TYPE_PCM_S24LE
        | CODEC_TYPE_PCM_S24BE
        | CODEC_TYPE_PCM_S32LE
        | CODEC_TYPE_PCM_S32BE
        | CODEC_TYPE_PCM_F32LE
        | CODEC_TYPE_PCM_F32BE
        | CODEC_TYPE_PCM_F64LE
        | CODEC_TYPE_PCM_F64BE => AudioCodec::Pcm,
        _ => AudioCodec::Unknown,
    }
}

/// Identify `codec`, rejecting anything the engine has no decoder for.
pub(crate) fn require_known(codec: CodecType) -> Result<AudioCodec> {
    match identify(codec) {
        AudioCodec::Unknown => Err(PlaybackError::UnsupportedFormat(format!(
            "No decoder for codec {:?}",
            codec
        ))),
        known => Ok(known),
    }
}
