use spectrad_core::codec::flac_stream::{FlacAudioEncoder, FlacStreamEncoder};
use spectrad_core::codec::zstd_stream::{ZstdStreamEncoder, ZstdWaterfallEncoder};
use spectrad_core::codec::{AudioEncoder, WaterfallEncoder};
use spectrad_core::protocol::WATERFALL_HEADER_LEN;
use zstd_safe::{DCtx, InBuffer, OutBuffer};

fn zstd_decompress_all(input: &[u8]) -> Vec<u8> {
    let mut dctx = DCtx::create();
    let mut dst = vec![0u8; 1 << 16];
    let pos = {
        let mut out_buf = OutBuffer::around(&mut dst[..]);
        let mut in_buf = InBuffer::around(input);
        while in_buf.pos < in_buf.src.len() && out_buf.pos() < out_buf.capacity() {
            let _ = dctx.decompress_stream(&mut out_buf, &mut in_buf).unwrap();
        }
        out_buf.pos()
    };
    dst.truncate(pos);
    dst
}

#[test]
fn flac_header_starts_with_magic() {
    let enc = FlacStreamEncoder::new(12_000, 16, 512).unwrap();
    let header = enc.header_bytes().unwrap();
    assert!(header.starts_with(b"fLaC"));
}

#[test]
fn flac_audio_encoder_buffers_until_a_full_block() {
    let mut enc = FlacAudioEncoder::new(12_000, 512).unwrap();
    assert!(enc.stream_header().unwrap().is_some());

    // 20 ms at 12 kHz is 240 samples; the block size rounds up from the
    // 512-sample frame, so the first frame alone cannot fill a block twice.
    let frame = vec![100i16; 512];
    let mut packets = 0;
    for _ in 0..8 {
        packets += enc.encode(&frame).unwrap().len();
    }
    assert!(packets >= 7, "expected ~one packet per frame, got {packets}");
}

#[test]
fn zstd_stream_flush_roundtrip() {
    let mut enc = ZstdStreamEncoder::new(3).unwrap();
    let input = b"hello zstd stream";
    let out = enc.compress_flush(input).unwrap();
    assert_eq!(zstd_decompress_all(&out), input);
}

#[test]
fn zstd_waterfall_packet_contains_header_and_payload() {
    let mut enc = ZstdWaterfallEncoder::new(3).unwrap();
    let line: Vec<i8> = (0..64).map(|i| (i as i8) - 32).collect();
    let packets = enc.encode_line(7, 128, 192, &line).unwrap();
    assert_eq!(packets.len(), 1);

    let body = zstd_decompress_all(&packets[0]);
    assert_eq!(body.len(), WATERFALL_HEADER_LEN + 64);
    assert_eq!(&body[0..8], &7u64.to_le_bytes());
    assert_eq!(&body[8..12], &128u32.to_le_bytes());
    assert_eq!(&body[12..16], &192u32.to_le_bytes());
    let payload: Vec<i8> = body[16..].iter().map(|b| *b as i8).collect();
    assert_eq!(payload, line);
}

#[test]
fn zstd_waterfall_stream_stays_decodable_across_lines() {
    let mut enc = ZstdWaterfallEncoder::new(3).unwrap();
    let line = vec![-5i8; 32];
    // The flushed frames form one continuous stream; a single decompressor
    // must be able to walk all of them.
    let mut stream = Vec::new();
    for frame in 0..4u64 {
        for pkt in enc.encode_line(frame, 0, 32, &line).unwrap() {
            stream.extend_from_slice(&pkt);
        }
    }
    let body = zstd_decompress_all(&stream);
    assert_eq!(body.len(), 4 * (WATERFALL_HEADER_LEN + 32));
}
