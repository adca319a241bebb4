use crate::codec::AudioEncoder;
use flacenc::component::{BitRepr, Stream};
use flacenc::config;
use flacenc::error::{Verified, Verify};
use flacenc::source::{Fill, FrameBuf};

pub struct FlacStreamEncoder {
    cfg: Verified<config::Encoder>,
    stream: Stream,
    frame_number: u64,
    block_size: usize,
    frame_buf: FrameBuf,
}

impl FlacStreamEncoder {
    pub fn new(
        sample_rate: usize,
        bits_per_sample: usize,
        block_size: usize,
    ) -> anyhow::Result<Self> {
        let cfg = config::Encoder::default()
            .into_verified()
            .map_err(|e| anyhow::anyhow!("flac config verify: {e:?}"))?;

        let mut stream = Stream::new(sample_rate, 1, bits_per_sample)
            .map_err(|e| anyhow::anyhow!("flac streaminfo: {e:?}"))?;
        stream
            .stream_info_mut()
            .set_block_sizes(block_size, block_size)
            .map_err(|e| anyhow::anyhow!("flac set block sizes: {e:?}"))?;

        let frame_buf = FrameBuf::with_size(1, block_size)
            .map_err(|e| anyhow::anyhow!("flac framebuf: {e:?}"))?;

        Ok(Self {
            cfg,
            stream,
            frame_number: 0,
            block_size,
            frame_buf,
        })
    }

    pub fn header_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut sink = flacenc::bitsink::MemSink::<u8>::new();
        self.stream
            .write(&mut sink)
            .map_err(|e| anyhow::anyhow!("flac header write: {e:?}"))?;
        Ok(sink.into_inner())
    }

    pub fn encode_block(&mut self, pcm_i32: &[i32]) -> anyhow::Result<Vec<u8>> {
        anyhow::ensure!(
            pcm_i32.len() == self.block_size,
            "flac block size mismatch (expected {}, got {})",
            self.block_size,
            pcm_i32.len()
        );

        self.frame_buf
            .fill_interleaved(pcm_i32)
            .map_err(|e| anyhow::anyhow!("flac fill interleaved: {e:?}"))?;

        let frame = flacenc::encode_fixed_size_frame(
            &self.cfg,
            &self.frame_buf,
            self.frame_number as usize,
            self.stream.stream_info(),
        )
        .map_err(|e| anyhow::anyhow!("flac encode frame: {e:?}"))?;
        self.frame_number += 1;

        let mut sink = flacenc::bitsink::MemSink::<u8>::new();
        frame
            .write(&mut sink)
            .map_err(|e| anyhow::anyhow!("flac frame write: {e:?}"))?;
        Ok(sink.into_inner())
    }
}

/// FLAC needs fixed block sizes, so per-FFT frames accumulate into blocks of
/// roughly 20 ms before a FLAC frame goes out. This trims packet rate without
/// touching the DSP cadence.
pub struct FlacAudioEncoder {
    inner: FlacStreamEncoder,
    block_size: usize,
    pcm_accum: Vec<i32>,
    pcm_offset: usize,
}

impl FlacAudioEncoder {
    pub fn new(sample_rate: usize, frame_samples: usize) -> anyhow::Result<Self> {
        let target_block_sec = 0.020_f64;
        let min_block = ((sample_rate as f64) * target_block_sec).ceil().max(1.0) as usize;
        let mut block_size = frame_samples.max(min_block);
        block_size = block_size.div_ceil(8) * 8;
        block_size = block_size.clamp(frame_samples, 8192);

        Ok(Self {
            inner: FlacStreamEncoder::new(sample_rate, 16, block_size)?,
            block_size,
            pcm_accum: Vec::with_capacity(block_size * 4),
            pcm_offset: 0,
        })
    }
}

impl AudioEncoder for FlacAudioEncoder {
    fn stream_header(&self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(Some(self.inner.header_bytes()?))
    }

    fn encode(&mut self, pcm: &[i16]) -> anyhow::Result<Vec<Vec<u8>>> {
        self.pcm_accum.extend(pcm.iter().map(|s| *s as i32));

        let mut out = Vec::new();
        loop {
            let available = self.pcm_accum.len() - self.pcm_offset;
            if available < self.block_size {
                break;
            }
            let end = self.pcm_offset + self.block_size;
            out.push(self.inner.encode_block(&self.pcm_accum[self.pcm_offset..end])?);
            self.pcm_offset = end;

            if self.pcm_offset >= self.block_size * 4 {
                self.pcm_accum.drain(0..self.pcm_offset);
                self.pcm_offset = 0;
            }
        }
        Ok(out)
    }
}
