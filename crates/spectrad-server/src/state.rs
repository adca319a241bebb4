use crate::registry::{ConnId, SliceRegistry};
use spectrad_core::config::{Config, Runtime};
use spectrad_core::protocol::{InitialInfo, InitialInfoDefaults};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Why the server is going down; decides the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Running,
    Signal,
    EndOfStream,
}

pub struct AppState {
    pub cfg: Config,
    pub rt: Runtime,
    pub registry: SliceRegistry,
    next_conn_id: AtomicU64,
    pub stop_tx: watch::Sender<StopReason>,
}

impl AppState {
    pub fn new(cfg: Config, rt: Runtime) -> Self {
        let registry = SliceRegistry::new(rt.downsample_levels, rt.show_other_users);
        let (stop_tx, _) = watch::channel(StopReason::Running);
        Self {
            cfg,
            rt,
            registry,
            next_conn_id: AtomicU64::new(1),
            stop_tx,
        }
    }

    pub fn alloc_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn request_stop(&self, reason: StopReason) {
        crate::shutdown::request_shutdown();
        let _ = self.stop_tx.send(reason);
    }

    pub async fn stopped(&self) {
        let mut rx = self.stop_tx.subscribe();
        while *rx.borrow() == StopReason::Running {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn initial_info_json(&self) -> String {
        let rt = &self.rt;
        let info = InitialInfo {
            sps: rt.sps,
            audio_max_sps: rt.audio_max_sps,
            audio_max_fft: rt.audio_max_fft_size,
            fft_size: rt.fft_size,
            fft_result_size: rt.fft_result_size,
            waterfall_size: rt.min_waterfall_fft,
            basefreq: rt.basefreq,
            total_bandwidth: rt.total_bandwidth,
            defaults: InitialInfoDefaults {
                frequency: rt.default_frequency,
                modulation: rt.default_mode_str.clone(),
                l: rt.default_l,
                m: rt.default_m,
                r: rt.default_r,
            },
            waterfall_compression: rt.waterfall_compression_str().to_string(),
            audio_compression: rt.audio_compression_str().to_string(),
        };
        match serde_json::to_string(&info) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = ?e, "failed to serialize initial info");
                "{}".to_string()
            }
        }
    }
}
