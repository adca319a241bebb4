use crate::codec::AudioEncoder;

const OPUS_BITRATE: i32 = 80_000;
const MAX_PACKET: usize = 1024;

/// Mono Opus at 20 ms frames. Opus only accepts its canonical rates, so an
/// `audio_sps` outside {8, 12, 16, 24, 48} kHz fails construction.
pub struct OpusAudioEncoder {
    encoder: opus::Encoder,
    frame_size: usize,
    pending: Vec<i16>,
}

impl OpusAudioEncoder {
    pub fn new(sample_rate: usize) -> anyhow::Result<Self> {
        let sample_rate = sample_rate.min(48_000);
        let mut encoder = opus::Encoder::new(
            sample_rate as u32,
            opus::Channels::Mono,
            opus::Application::Audio,
        )
        .map_err(|e| anyhow::anyhow!("opus encoder init: {e}"))?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(OPUS_BITRATE))
            .map_err(|e| anyhow::anyhow!("opus set bitrate: {e}"))?;

        Ok(Self {
            encoder,
            frame_size: sample_rate * 20 / 1000,
            pending: Vec::new(),
        })
    }
}

impl AudioEncoder for OpusAudioEncoder {
    fn stream_header(&self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn encode(&mut self, pcm: &[i16]) -> anyhow::Result<Vec<Vec<u8>>> {
        self.pending.extend_from_slice(pcm);

        let mut out = Vec::new();
        let mut packet = [0u8; MAX_PACKET];
        while self.pending.len() >= self.frame_size {
            let frame: Vec<i16> = self.pending.drain(..self.frame_size).collect();
            let size = self
                .encoder
                .encode(&frame, &mut packet)
                .map_err(|e| anyhow::anyhow!("opus encode: {e}"))?;
            if size > 1 {
                out.push(packet[..size].to_vec());
            }
        }
        Ok(out)
    }
}
