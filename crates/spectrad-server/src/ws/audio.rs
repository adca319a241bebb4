use crate::registry::{lock_or_recover, AudioControl, AudioJob, AudioSubscriber};
use crate::state::AppState;
use crate::ws::close_going_away;
use axum::{
    extract::connect_info::ConnectInfo,
    extract::{ws, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use spectrad_core::{
    codec::{new_audio_encoder, AudioEncoder},
    dsp::audio::{AudioParams, AudioPipeline},
    dsp::demod::DemodulationMode,
    protocol::{self, ClientCommand},
    util::generate_unique_id,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    if state.registry.audio_count() >= state.cfg.limits.audio {
        return (StatusCode::TOO_MANY_REQUESTS, "too many audio clients").into_response();
    }
    ws.on_upgrade(move |socket| handle(socket, state, addr))
}

async fn handle(socket: ws::WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let conn_id = state.alloc_conn_id();
    tracing::info!(conn_id, remote = %addr, "audio ws connected");

    let rt = &state.rt;
    let sample_rate = rt.audio_max_sps as usize;
    let audio_fft_size = rt.audio_max_fft_size;

    let pipeline = match AudioPipeline::new(sample_rate, audio_fft_size) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(conn_id, error = ?e, "audio pipeline init failed");
            return;
        }
    };
    let encoder = match new_audio_encoder(rt.audio_compression, sample_rate, audio_fft_size / 2) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(conn_id, error = ?e, "audio encoder init failed");
            return;
        }
    };
    let stream_header = match encoder.stream_header() {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(conn_id, error = ?e, "audio encoder header failed");
            return;
        }
    };

    let default_mode = DemodulationMode::from_str_upper(rt.default_mode_str.as_str())
        .unwrap_or(DemodulationMode::Usb);
    let (job_tx, job_rx) = mpsc::channel::<AudioJob>(1);
    let (out_tx, out_rx) = mpsc::channel::<ws::Message>(64);
    let out_ctl = out_tx.clone();
    let unique_id = generate_unique_id();
    let sub = Arc::new(AudioSubscriber {
        conn_id,
        unique_id,
        userid: Mutex::new(None),
        params: Mutex::new(AudioControl {
            l: rt.default_l,
            r: rt.default_r,
            m: rt.default_m,
            mode: default_mode,
            mute: false,
        }),
        agc_reset: AtomicBool::new(false),
        job_tx,
        queued_bytes: Arc::new(AtomicUsize::new(0)),
    });

    let (mut ws_sender, mut ws_receiver) = socket.split();

    if ws_sender
        .send(ws::Message::Text(state.initial_info_json()))
        .await
        .is_err()
    {
        return;
    }
    if let Some(header) = stream_header {
        let pkt = protocol::audio_packet(0, 0, 0, 0.0, 0.0, &header);
        if ws_sender.send(ws::Message::Binary(pkt)).await.is_err() {
            return;
        }
    }

    let queued_for_send = sub.queued_bytes.clone();
    let send_task = tokio::spawn(async move {
        let mut out_rx = out_rx;
        while let Some(msg) = out_rx.recv().await {
            let len = match &msg {
                ws::Message::Binary(b) => b.len(),
                ws::Message::Text(t) => t.len(),
                _ => 0,
            };
            if ws_sender.send(msg).await.is_err() {
                break;
            }
            queued_for_send.fetch_sub(len, Ordering::Relaxed);
        }
    });

    // The per-connection strand: one task owns the DSP scratch and the
    // encoder, so frames for this subscriber can never run concurrently and
    // always arrive in increasing frame order.
    let process_task = tokio::spawn(process_loop(
        state.clone(),
        sub.clone(),
        job_rx,
        out_tx,
        pipeline,
        encoder,
        conn_id,
    ));

    let mut cursor = state.registry.insert_audio(sub.clone());
    {
        let p = *lock_or_recover(&sub.params, "audio params");
        state
            .registry
            .record_change(sub.effective_id(), p.l, p.m, p.r);
    }

    loop {
        tokio::select! {
            _ = state.stopped() => {
                close_going_away(&out_ctl).await;
                break;
            }
            msg = ws_receiver.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    ws::Message::Text(txt) => {
                        if txt.len() > crate::ws::MAX_CONTROL_BYTES {
                            continue;
                        }
                        let Ok(cmd) = serde_json::from_str::<ClientCommand>(&txt) else {
                            continue;
                        };
                        tracing::info!(remote = %addr, conn_id, kind = "audio", payload = %txt, "control message");
                        apply_command(&state, &sub, &mut cursor, cmd);
                    }
                    ws::Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    state.registry.remove_audio(cursor);
    state
        .registry
        .record_change(sub.effective_id(), -1, -1.0, -1);
    tracing::info!(conn_id, "audio ws disconnected");
    process_task.abort();
    send_task.abort();
}

fn apply_command(
    state: &Arc<AppState>,
    sub: &Arc<AudioSubscriber>,
    cursor: &mut crate::registry::SliceKey,
    cmd: ClientCommand,
) {
    let rt = &state.rt;
    match cmd {
        ClientCommand::Window { l, r, m, .. } => {
            let Some(m) = m else { return };
            if l < 0 || r < 0 || l > r || r as usize > rt.fft_result_size {
                return;
            }
            if r - l > rt.audio_max_fft_size as i32 {
                return;
            }
            *cursor = state.registry.retune_audio(*cursor, sub, l, r, m);
            state.registry.record_change(sub.effective_id(), l, m, r);
        }
        ClientCommand::Demodulation { demodulation } => {
            let Some(mode) = DemodulationMode::from_str_upper(demodulation.as_str()) else {
                return;
            };
            lock_or_recover(&sub.params, "audio params").mode = mode;
            sub.agc_reset.store(true, Ordering::Relaxed);
        }
        ClientCommand::Userid { userid } => {
            let userid: String = userid.chars().take(32).collect();
            *lock_or_recover(&sub.userid, "audio userid") = Some(userid);
        }
        ClientCommand::Mute { mute } => {
            lock_or_recover(&sub.params, "audio params").mute = mute;
        }
    }
}

async fn process_loop(
    state: Arc<AppState>,
    sub: Arc<AudioSubscriber>,
    mut job_rx: mpsc::Receiver<AudioJob>,
    out_tx: mpsc::Sender<ws::Message>,
    mut pipeline: AudioPipeline,
    mut encoder: Box<dyn AudioEncoder>,
    conn_id: u64,
) {
    let is_real = state.rt.is_real;
    while let Some(job) = job_rx.recv().await {
        if sub.agc_reset.swap(false, Ordering::Relaxed) {
            pipeline.reset_agc();
        }

        let p = job.params;
        let Some(slice) = job
            .frame
            .spectrum
            .get(p.l as usize..p.r as usize)
        else {
            tracing::warn!(conn_id, l = p.l, r = p.r, "audio window out of bounds; dropping");
            continue;
        };
        let params = AudioParams {
            l: p.l,
            r: p.r,
            m: p.m,
            mode: p.mode,
            mute: p.mute,
        };

        let (pwr, payloads) = {
            let frame = match pipeline.process(slice, job.frame.frame_num, &params, is_real) {
                Ok(f) => f,
                Err(e) => {
                    // Recoverable per-frame failure (NaN); the next frame
                    // proceeds normally.
                    tracing::debug!(conn_id, error = %e, "audio frame dropped");
                    continue;
                }
            };
            let pwr = frame.average_power;
            match encoder.encode(frame.pcm) {
                Ok(v) => (pwr, v),
                Err(e) => {
                    tracing::warn!(conn_id, error = %e, "audio encode failed; dropping frame");
                    continue;
                }
            }
        };

        for payload in payloads {
            let pkt = protocol::audio_packet(
                job.frame.frame_num,
                p.l as u32,
                p.r as u32,
                p.m,
                pwr,
                &payload,
            );
            sub.queued_bytes.fetch_add(pkt.len(), Ordering::Relaxed);
            if out_tx.send(ws::Message::Binary(pkt)).await.is_err() {
                return;
            }
        }
    }
}
