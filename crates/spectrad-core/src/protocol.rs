use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct InitialInfoDefaults {
    pub frequency: i64,
    pub modulation: String,
    pub l: i32,
    pub m: f64,
    pub r: i32,
}

/// Handshake sent as a text frame on every WebSocket open.
#[derive(Debug, Clone, Serialize)]
pub struct InitialInfo {
    pub sps: i64,
    pub audio_max_sps: i64,
    pub audio_max_fft: usize,
    pub fft_size: usize,
    pub fft_result_size: usize,
    pub waterfall_size: usize,
    pub basefreq: i64,
    pub total_bandwidth: i64,
    pub defaults: InitialInfoDefaults,
    pub waterfall_compression: String,
    pub audio_compression: String,
}

/// Control frames are small text messages tagged by `cmd`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum ClientCommand {
    Window {
        l: i32,
        r: i32,
        #[serde(default)]
        m: Option<f64>,
        #[serde(default)]
        level: Option<i32>,
    },
    Demodulation {
        demodulation: String,
    },
    Userid {
        userid: String,
    },
    Mute {
        mute: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsInfo {
    pub waterfall_clients: usize,
    pub signal_clients: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_changes: Option<HashMap<String, (i32, f64, i32)>>,
}

pub const AUDIO_HEADER_LEN: usize = 32;
pub const WATERFALL_HEADER_LEN: usize = 16;

/// Audio data frame: fixed little-endian header followed by the codec
/// bitstream.
pub fn audio_packet(frame_num: u64, l: u32, r: u32, m: f64, pwr: f64, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(AUDIO_HEADER_LEN + payload.len());
    buf.put_u64_le(frame_num);
    buf.put_u32_le(l);
    buf.put_u32_le(r);
    buf.put_f64_le(m);
    buf.put_f64_le(pwr);
    buf.put_slice(payload);
    buf.to_vec()
}

/// Uncompressed body of one waterfall line, as fed to the Zstd stream.
pub fn waterfall_line(frame_num: u64, l: u32, r: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(WATERFALL_HEADER_LEN + payload.len());
    buf.put_u64_le(frame_num);
    buf.put_u32_le(l);
    buf.put_u32_le(r);
    buf.put_slice(payload);
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_packet_header_layout_is_fixed_little_endian() {
        let pkt = audio_packet(0x0102030405060708, 7, 9, 1.5, 2.5, &[0xaa, 0xbb]);
        assert_eq!(pkt.len(), AUDIO_HEADER_LEN + 2);
        assert_eq!(&pkt[0..8], &0x0102030405060708u64.to_le_bytes());
        assert_eq!(&pkt[8..12], &7u32.to_le_bytes());
        assert_eq!(&pkt[12..16], &9u32.to_le_bytes());
        assert_eq!(&pkt[16..24], &1.5f64.to_le_bytes());
        assert_eq!(&pkt[24..32], &2.5f64.to_le_bytes());
        assert_eq!(&pkt[32..], &[0xaa, 0xbb]);
    }

    #[test]
    fn waterfall_line_header_precedes_payload() {
        let pkt = waterfall_line(42, 3, 5, &[1, 2]);
        assert_eq!(pkt.len(), WATERFALL_HEADER_LEN + 2);
        assert_eq!(&pkt[0..8], &42u64.to_le_bytes());
        assert_eq!(&pkt[8..12], &3u32.to_le_bytes());
        assert_eq!(&pkt[12..16], &5u32.to_le_bytes());
        assert_eq!(&pkt[16..], &[1, 2]);
    }

    #[test]
    fn client_command_parses_window_with_optional_fields() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"cmd":"window","l":65536,"r":65700,"m":65568.0}"#).unwrap();
        match cmd {
            ClientCommand::Window { l, r, m, level } => {
                assert_eq!(l, 65536);
                assert_eq!(r, 65700);
                assert_eq!(m, Some(65568.0));
                assert_eq!(level, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn client_command_rejects_unknown_cmd() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"cmd":"nope"}"#).is_err());
    }

    #[test]
    fn events_info_serializes_changes_as_triples() {
        let mut changes = HashMap::new();
        changes.insert("ab12".to_string(), (100, 150.5, 200));
        let info = EventsInfo {
            waterfall_clients: 2,
            signal_clients: 1,
            signal_changes: Some(changes),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains(r#""waterfall_clients":2"#), "{json}");
        assert!(json.contains(r#""signal_clients":1"#), "{json}");
        assert!(json.contains(r#""ab12":[100,150.5,200]"#), "{json}");
    }

    #[test]
    fn events_info_omits_changes_when_absent() {
        let info = EventsInfo {
            waterfall_clients: 0,
            signal_clients: 0,
            signal_changes: None,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("signal_changes"), "{json}");
    }
}
