#[cfg(feature = "av1")]
pub mod av1_stream;
pub mod flac_stream;
#[cfg(feature = "opus")]
pub mod opus_stream;
pub mod zstd_stream;

use crate::config::{AudioCompression, WaterfallCompression};

/// Stateful audio codec owned by one connection task. `encode` takes exactly
/// one demodulated frame and returns zero or more finished bitstream
/// payloads (codecs are free to buffer across frames).
pub trait AudioEncoder: Send {
    /// Stream preamble to deliver before any encoded frames, if the codec
    /// has one.
    fn stream_header(&self) -> anyhow::Result<Option<Vec<u8>>>;
    fn encode(&mut self, pcm: &[i16]) -> anyhow::Result<Vec<Vec<u8>>>;
}

/// Stateful waterfall codec; returns wire-ready packets (headers included).
pub trait WaterfallEncoder: Send {
    fn encode_line(
        &mut self,
        frame_num: u64,
        l: u32,
        r: u32,
        line: &[i8],
    ) -> anyhow::Result<Vec<Vec<u8>>>;
}

pub fn new_audio_encoder(
    kind: AudioCompression,
    sample_rate: usize,
    frame_samples: usize,
) -> anyhow::Result<Box<dyn AudioEncoder>> {
    match kind {
        AudioCompression::Flac => Ok(Box::new(flac_stream::FlacAudioEncoder::new(
            sample_rate,
            frame_samples,
        )?)),
        AudioCompression::Opus => {
            #[cfg(feature = "opus")]
            {
                let _ = frame_samples;
                Ok(Box::new(opus_stream::OpusAudioEncoder::new(sample_rate)?))
            }
            #[cfg(not(feature = "opus"))]
            {
                let _ = (sample_rate, frame_samples);
                anyhow::bail!(
                    "Opus audio compression is not compiled in (rebuild with Cargo feature \"opus\")"
                )
            }
        }
    }
}

pub fn new_waterfall_encoder(
    kind: WaterfallCompression,
    waterfall_size: usize,
) -> anyhow::Result<Box<dyn WaterfallEncoder>> {
    match kind {
        WaterfallCompression::Zstd => {
            let _ = waterfall_size;
            Ok(Box::new(zstd_stream::ZstdWaterfallEncoder::new(3)?))
        }
        WaterfallCompression::Av1 => {
            #[cfg(feature = "av1")]
            {
                Ok(Box::new(av1_stream::Av1WaterfallEncoder::new(
                    waterfall_size,
                )?))
            }
            #[cfg(not(feature = "av1"))]
            {
                anyhow::bail!(
                    "AV1 waterfall compression is not compiled in (rebuild with Cargo feature \"av1\")"
                )
            }
        }
    }
}
