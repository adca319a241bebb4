use crate::codec::WaterfallEncoder;
use rav1e::prelude::*;

/// Lines buffered into one monochrome video frame.
const WATERFALL_COALESCE: usize = 8;

/// ITU-T T.35 country code for the metadata OBU carrying the line headers.
const T35_COUNTRY_CODE: u8 = 0xB5;

#[derive(Debug, Clone, Copy, Default)]
struct LineHeader {
    frame_num: u64,
    bytes: u32,
    l: u32,
    r: u32,
}

/// AV1 waterfall: eight int8 lines become one 8-row monochrome frame encoded
/// in realtime low-latency mode. The per-line `{frame_num, bytes, l, r}`
/// headers ride along as a zstd-compressed T.35 metadata block tagged with a
/// leading 0x00 byte.
pub struct Av1WaterfallEncoder {
    ctx: Context<u8>,
    width: usize,
    line: usize,
    image: Vec<u8>,
    headers: [LineHeader; WATERFALL_COALESCE],
}

impl Av1WaterfallEncoder {
    pub fn new(waterfall_size: usize) -> anyhow::Result<Self> {
        let enc = EncoderConfig {
            width: waterfall_size,
            height: WATERFALL_COALESCE,
            bit_depth: 8,
            chroma_sampling: ChromaSampling::Cs400,
            still_picture: false,
            low_latency: true,
            quantizer: 204,
            min_quantizer: 196,
            speed_settings: SpeedSettings::from_preset(10),
            ..Default::default()
        };
        let ctx = Config::new()
            .with_encoder_config(enc)
            .with_threads(1)
            .new_context::<u8>()
            .map_err(|e| anyhow::anyhow!("av1 context init: {e}"))?;

        Ok(Self {
            ctx,
            width: waterfall_size,
            line: 0,
            image: vec![0u8; waterfall_size * WATERFALL_COALESCE],
            headers: [LineHeader::default(); WATERFALL_COALESCE],
        })
    }

    fn header_metadata(&self) -> anyhow::Result<Box<[u8]>> {
        let mut raw = Vec::with_capacity(WATERFALL_COALESCE * 20);
        for h in &self.headers {
            raw.extend_from_slice(&(h.frame_num as u32).to_le_bytes());
            raw.extend_from_slice(&h.bytes.to_le_bytes());
            raw.extend_from_slice(&h.l.to_le_bytes());
            raw.extend_from_slice(&h.r.to_le_bytes());
        }
        let mut payload = vec![0u8; zstd_safe::compress_bound(raw.len()) + 1];
        payload[0] = 0x00;
        let written = zstd_safe::compress(&mut payload[1..], &raw, 5)
            .map_err(|code| anyhow::anyhow!("zstd compress t35 header (code {code:?})"))?;
        payload.truncate(1 + written);
        Ok(payload.into_boxed_slice())
    }

    fn encode_pending(&mut self) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut frame = self.ctx.new_frame();
        frame.planes[0].copy_from_raw_u8(&self.image, self.width, 1);

        let t35 = T35 {
            country_code: T35_COUNTRY_CODE,
            country_code_extension_byte: 0x00,
            data: self.header_metadata()?,
        };
        let params = FrameParameters {
            frame_type_override: FrameTypeOverride::No,
            opaque: None,
            t35_metadata: Box::new([t35]),
        };
        self.ctx
            .send_frame((frame, params))
            .map_err(|e| anyhow::anyhow!("av1 send frame: {e:?}"))?;

        let mut out = Vec::new();
        loop {
            match self.ctx.receive_packet() {
                Ok(pkt) => out.push(pkt.data),
                Err(EncoderStatus::Encoded) => continue,
                Err(EncoderStatus::NeedMoreData) => break,
                Err(e) => anyhow::bail!("av1 receive packet: {e:?}"),
            }
        }
        Ok(out)
    }
}

impl WaterfallEncoder for Av1WaterfallEncoder {
    fn encode_line(
        &mut self,
        frame_num: u64,
        l: u32,
        r: u32,
        line: &[i8],
    ) -> anyhow::Result<Vec<Vec<u8>>> {
        let row = &mut self.image[self.line * self.width..(self.line + 1) * self.width];
        let n = line.len().min(self.width);
        for (dst, src) in row.iter_mut().zip(line[..n].iter()) {
            // int8 to the codec's unsigned sample domain.
            *dst = (*src as u8) ^ 0x80;
        }
        self.headers[self.line] = LineHeader {
            frame_num,
            bytes: n as u32,
            l,
            r,
        };

        self.line += 1;
        if self.line < WATERFALL_COALESCE {
            return Ok(Vec::new());
        }
        self.line = 0;
        self.encode_pending()
    }
}
