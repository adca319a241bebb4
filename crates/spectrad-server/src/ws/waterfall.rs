use crate::registry::{lock_or_recover, WaterfallControl, WaterfallJob, WaterfallSubscriber};
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
    codec::{new_waterfall_encoder, WaterfallEncoder},
    dsp::fft::pyramid_base,
    protocol::ClientCommand,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    if state.registry.waterfall_count() >= state.cfg.limits.waterfall {
        return (StatusCode::TOO_MANY_REQUESTS, "too many waterfall clients").into_response();
    }
    ws.on_upgrade(move |socket| handle(socket, state, addr))
}

async fn handle(socket: ws::WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let conn_id = state.alloc_conn_id();
    tracing::info!(conn_id, remote = %addr, "waterfall ws connected");

    let rt = &state.rt;
    let encoder = match new_waterfall_encoder(rt.waterfall_compression, rt.min_waterfall_fft) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(conn_id, error = ?e, "waterfall encoder init failed");
            return;
        }
    };

    // The coarsest level shows the whole band in one screen of bins.
    let initial_level = rt.downsample_levels - 1;
    let initial_r = rt
        .min_waterfall_fft
        .min(rt.fft_result_size >> initial_level);

    let (job_tx, job_rx) = mpsc::channel::<WaterfallJob>(1);
    let (out_tx, out_rx) = mpsc::channel::<ws::Message>(64);
    let out_ctl = out_tx.clone();
    let sub = Arc::new(WaterfallSubscriber {
        conn_id,
        userid: Mutex::new(None),
        params: Mutex::new(WaterfallControl {
            level: initial_level,
            l: 0,
            r: initial_r,
        }),
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

    let process_task = tokio::spawn(process_loop(
        state.clone(),
        sub.clone(),
        job_rx,
        out_tx,
        encoder,
        conn_id,
    ));

    let mut level = initial_level;
    let mut cursor = state.registry.insert_waterfall(sub.clone(), level);

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
                        tracing::info!(remote = %addr, conn_id, kind = "waterfall", payload = %txt, "control message");
                        apply_command(&state, &sub, &mut cursor, &mut level, cmd);
                    }
                    ws::Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    state.registry.remove_waterfall(cursor, level);
    tracing::info!(conn_id, "waterfall ws disconnected");
    process_task.abort();
    send_task.abort();
}

fn apply_command(
    state: &Arc<AppState>,
    sub: &Arc<WaterfallSubscriber>,
    cursor: &mut crate::registry::SliceKey,
    level: &mut usize,
    cmd: ClientCommand,
) {
    let rt = &state.rt;
    match cmd {
        ClientCommand::Window { l, r, .. } => {
            if l < 0 || r < 0 || l >= r || r as usize > rt.fft_result_size {
                return;
            }
            let Some((new_level, new_l, new_r)) = choose_level(
                l,
                r,
                rt.downsample_levels,
                rt.min_waterfall_fft,
                rt.fft_result_size,
            ) else {
                return;
            };

            *cursor = state
                .registry
                .retune_waterfall(*cursor, sub, *level, new_level, new_l, new_r);
            *level = new_level;
        }
        ClientCommand::Userid { userid } => {
            let userid: String = userid.chars().take(32).collect();
            *lock_or_recover(&sub.userid, "waterfall userid") = Some(userid);
        }
        // Audio-only commands are ignored on waterfall sockets.
        ClientCommand::Demodulation { .. } | ClientCommand::Mute { .. } => {}
    }
}

/// Map a full-resolution `[l, r)` request onto the pyramid: walk the levels
/// and keep the one whose halved width comes closest to one screen of bins.
/// Floating point avoids the cumulative rounding drift of halving integers.
fn choose_level(
    l: i32,
    r: i32,
    downsample_levels: usize,
    min_waterfall_fft: usize,
    fft_result_size: usize,
) -> Option<(usize, usize, usize)> {
    let mut new_level = downsample_levels - 1;
    let mut new_l = l;
    let mut new_r = r;
    let mut best_diff = (r - l) as f32;
    let mut lf = l as f32;
    let mut rf = r as f32;
    for i in 0..downsample_levels {
        let send_size = ((rf - lf) - min_waterfall_fft as f32).abs();
        if send_size < best_diff {
            best_diff = send_size;
            new_level = i;
            new_l = lf.round() as i32;
            new_r = rf.round() as i32;
        }
        lf /= 2.0;
        rf /= 2.0;
    }

    if new_l < 0 || new_r <= new_l {
        return None;
    }
    let (new_l, new_r) = (new_l as usize, new_r as usize);
    if new_r > fft_result_size >> new_level {
        return None;
    }
    Some((new_level, new_l, new_r))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_screen_width_stays_at_level_zero() {
        let got = choose_level(0, 1024, 8, 1024, 131_072);
        assert_eq!(got, Some((0, 0, 1024)));
    }

    #[test]
    fn wide_request_walks_down_to_a_screen_of_bins() {
        // 8192 bins halve three times before they fit one 1024-bin screen.
        let got = choose_level(0, 8192, 8, 1024, 131_072);
        assert_eq!(got, Some((3, 0, 1024)));
    }

    #[test]
    fn offsets_halve_along_with_the_width() {
        let got = choose_level(4096, 8192, 8, 1024, 131_072);
        assert_eq!(got, Some((2, 1024, 2048)));
    }

    #[test]
    fn full_band_request_lands_on_the_coarsest_level() {
        let got = choose_level(0, 131_072, 8, 1024, 131_072);
        assert_eq!(got, Some((7, 0, 1024)));
    }
}

async fn process_loop(
    state: Arc<AppState>,
    sub: Arc<WaterfallSubscriber>,
    mut job_rx: mpsc::Receiver<WaterfallJob>,
    out_tx: mpsc::Sender<ws::Message>,
    mut encoder: Box<dyn WaterfallEncoder>,
    conn_id: u64,
) {
    let fft_result_size = state.rt.fft_result_size;
    while let Some(job) = job_rx.recv().await {
        let p = job.params;
        let base = pyramid_base(fft_result_size, p.level);
        let Some(segment) = job.frame.quantized.get(base + p.l..base + p.r) else {
            tracing::warn!(
                conn_id,
                level = p.level,
                l = p.l,
                r = p.r,
                "waterfall window out of bounds; dropping"
            );
            continue;
        };

        let packets = match encoder.encode_line(
            job.frame.frame_num,
            (p.l << p.level) as u32,
            (p.r << p.level) as u32,
            segment,
        ) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(conn_id, error = %e, "waterfall encode failed; dropping line");
                continue;
            }
        };

        for pkt in packets {
            sub.queued_bytes.fetch_add(pkt.len(), Ordering::Relaxed);
            if out_tx.send(ws::Message::Binary(pkt)).await.is_err() {
                return;
            }
        }
    }
}
