use crate::registry::{lock_or_recover, AudioJob, FrameSnapshot, WaterfallJob};
use crate::state::{AppState, StopReason};
use anyhow::Context;
use spectrad_core::config::SampleFormat;
use spectrad_core::dsp::fft::{CpuFft, FftParams, SpectrumFft};
use spectrad_core::dsp::sample::SampleReader;
use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Per-connection cap on bytes sitting in the outbound queue. A subscriber
/// over the cap has frames dropped, never an error.
pub const MAX_QUEUED_BYTES: usize = 1_000_000;

pub fn spawn(
    state: Arc<AppState>,
    reader: Box<dyn Read + Send>,
    format: SampleFormat,
) -> anyhow::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("fft".to_string())
        .spawn(move || match run(&state, reader, format) {
            Ok(()) => tracing::info!("fft loop stopped"),
            Err(e) => {
                tracing::error!(error = format!("{e:#}"), "sample ingest ended; shutting down");
                state.request_stop(StopReason::EndOfStream);
            }
        })
        .context("spawn fft thread")
}

fn run(state: &AppState, reader: Box<dyn Read + Send>, format: SampleFormat) -> anyhow::Result<()> {
    let rt = &state.rt;
    let mut sample_reader = SampleReader::new(reader, format);

    let params = FftParams {
        fft_size: rt.fft_size,
        is_real: rt.is_real,
        downsample_levels: rt.downsample_levels,
        audio_max_fft_size: rt.audio_max_fft_size,
        brightness_offset: rt.brightness_offset,
    };
    let mut fft = CpuFft::new(&params)?;
    if rt.fft_threads > 1 {
        tracing::info!("fft_threads > 1 has no effect on the CPU backend");
    }

    // Consecutive frames share half their samples. Three rotating blocks let
    // the next block land while the previous two are still the live frame.
    let block_floats = if rt.is_real {
        rt.fft_size / 2
    } else {
        rt.fft_size
    };
    let mut blocks = [
        vec![0.0f32; block_floats],
        vec![0.0f32; block_floats],
        vec![0.0f32; block_floats],
    ];
    sample_reader.read_f32(&mut blocks[0])?;
    sample_reader.read_f32(&mut blocks[1])?;

    // Waterfall lines target ~10 fps; the factor of two accounts for the
    // 50% overlap doubling the frame rate.
    let skip_num = 1.max(((rt.sps as f64 / rt.fft_size as f64) / 10.0).floor() as u64 * 2);
    tracing::info!(skip_num, "waterfall is sent every {skip_num} FFTs");

    let mut k = 0usize;
    let mut frame_num = 0u64;
    while !crate::shutdown::is_shutdown_requested() {
        sample_reader.read_f32(&mut blocks[(k + 2) % 3])?;

        // Keep reading (and the frame counter moving) with no subscribers so
        // the stream position and overlap parity stay consistent.
        let idle = state.registry.audio_count() == 0 && state.registry.waterfall_count() == 0;
        if !idle {
            let old = &blocks[k % 3];
            let new = &blocks[(k + 1) % 3];
            if rt.is_real {
                fft.load_real(old, new);
            } else {
                fft.load_iq(old, new);
            }
            fft.execute()?;

            let snapshot = Arc::new(FrameSnapshot {
                frame_num,
                is_real: rt.is_real,
                spectrum: fft.spectrum().to_vec(),
                quantized: fft.quantized().to_vec(),
            });
            dispatch_audio(state, &snapshot);
            if frame_num % skip_num == 0 {
                dispatch_waterfall(state, &snapshot);
            }
        }

        frame_num += 1;
        k = (k + 1) % 3;
    }
    Ok(())
}

/// Post one job per audio subscriber. The capacity-1 job channel doubles as
/// the in-flight flag: a subscriber still chewing on an earlier frame simply
/// misses this one. Subscribers over the queued-byte cap are skipped the
/// same way.
fn dispatch_audio(state: &AppState, frame: &Arc<FrameSnapshot>) {
    state.registry.for_each_audio(|_key, sub| {
        if sub.queued_bytes.load(Ordering::Relaxed) > MAX_QUEUED_BYTES {
            return;
        }
        let params = *lock_or_recover(&sub.params, "audio params");
        let _ = sub.job_tx.try_send(AudioJob {
            frame: frame.clone(),
            params,
        });
    });
}

fn dispatch_waterfall(state: &AppState, frame: &Arc<FrameSnapshot>) {
    for level in 0..state.registry.levels() {
        state.registry.for_each_waterfall(level, |_key, sub| {
            if sub.queued_bytes.load(Ordering::Relaxed) > MAX_QUEUED_BYTES {
                return;
            }
            let params = *lock_or_recover(&sub.params, "waterfall params");
            let _ = sub.job_tx.try_send(WaterfallJob {
                frame: frame.clone(),
                params,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AudioControl, AudioJob, AudioSubscriber};
    use spectrad_core::config::{
        Accelerator, AudioCompression, Config, Input, InputDefaults, InputDriver, Limits,
        SampleFormat, Server, SignalType, WaterfallCompression,
    };
    use spectrad_core::dsp::demod::DemodulationMode;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    fn test_state() -> Arc<AppState> {
        let cfg = Config {
            server: Server::default(),
            input: Input {
                sps: 48_000,
                frequency: 7_000_000,
                signal: SignalType::Iq,
                fft_size: 4096,
                brightness_offset: 0,
                audio_sps: 12_000,
                waterfall_size: 512,
                fft_threads: 1,
                accelerator: Accelerator::None,
                waterfall_compression: WaterfallCompression::Zstd,
                audio_compression: AudioCompression::Flac,
                driver: InputDriver {
                    name: "stdin".to_string(),
                    format: SampleFormat::F32,
                },
                defaults: InputDefaults::default(),
            },
            limits: Limits::default(),
        };
        let rt = cfg.runtime().unwrap();
        Arc::new(AppState::new(cfg, rt))
    }

    fn frame(n: u64) -> Arc<FrameSnapshot> {
        Arc::new(FrameSnapshot {
            frame_num: n,
            is_real: false,
            spectrum: Vec::new(),
            quantized: Vec::new(),
        })
    }

    fn subscriber() -> (Arc<AudioSubscriber>, mpsc::Receiver<AudioJob>) {
        let (tx, rx) = mpsc::channel(1);
        let sub = Arc::new(AudioSubscriber {
            conn_id: 1,
            unique_id: "u".to_string(),
            userid: Mutex::new(None),
            params: Mutex::new(AudioControl {
                l: 0,
                r: 100,
                m: 50.0,
                mode: DemodulationMode::Usb,
                mute: false,
            }),
            agc_reset: AtomicBool::new(false),
            job_tx: tx,
            queued_bytes: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        });
        (sub, rx)
    }

    #[test]
    fn busy_subscriber_drops_the_frame() {
        let state = test_state();
        let (sub, mut rx) = subscriber();
        state.registry.insert_audio(sub);

        // The capacity-1 job channel is the in-flight flag: with a frame
        // already pending, the next dispatch is a silent drop.
        dispatch_audio(&state, &frame(0));
        dispatch_audio(&state, &frame(1));
        assert_eq!(rx.try_recv().unwrap().frame.frame_num, 0);
        assert!(rx.try_recv().is_err());

        // Once the pending frame is consumed, dispatch resumes.
        dispatch_audio(&state, &frame(2));
        assert_eq!(rx.try_recv().unwrap().frame.frame_num, 2);
    }

    #[test]
    fn over_cap_subscriber_is_skipped_until_it_drains() {
        let state = test_state();
        let (sub, mut rx) = subscriber();
        sub.queued_bytes
            .store(MAX_QUEUED_BYTES + 1, Ordering::Relaxed);
        state.registry.insert_audio(sub.clone());

        for n in 0..3 {
            dispatch_audio(&state, &frame(n));
        }
        assert!(rx.try_recv().is_err(), "no frames while over the byte cap");

        sub.queued_bytes.store(0, Ordering::Relaxed);
        dispatch_audio(&state, &frame(3));
        assert_eq!(rx.try_recv().unwrap().frame.frame_num, 3);
    }

    #[test]
    fn dispatch_snapshots_params_at_post_time() {
        let state = test_state();
        let (sub, mut rx) = subscriber();
        let cursor = state.registry.insert_audio(sub.clone());

        state.registry.retune_audio(cursor, &sub, 200, 300, 250.0);
        dispatch_audio(&state, &frame(0));
        let job = rx.try_recv().unwrap();
        assert_eq!((job.params.l, job.params.r), (200, 300));
        assert_eq!(job.params.m, 250.0);
    }
}
