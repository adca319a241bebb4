use crate::state::AppState;
use axum::{
    extract::connect_info::ConnectInfo,
    extract::{ws, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use spectrad_core::protocol::EventsInfo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

pub async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    if state.registry.events_count() >= state.cfg.limits.events {
        return (StatusCode::TOO_MANY_REQUESTS, "too many events clients").into_response();
    }
    ws.on_upgrade(move |socket| handle(socket, state, addr))
}

async fn handle(socket: ws::WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let conn_id = state.alloc_conn_id();
    tracing::info!(conn_id, remote = %addr, "events ws connected");

    let (tx, mut rx) = mpsc::channel::<Arc<String>>(8);
    state.registry.insert_events(conn_id, tx);

    // New subscribers get a snapshot of where every audio client currently
    // sits, not just the deltas.
    let mut initial = EventsInfo {
        waterfall_clients: state.registry.waterfall_count(),
        signal_clients: state.registry.audio_count(),
        signal_changes: None,
    };
    if state.rt.show_other_users {
        initial.signal_changes = Some(state.registry.audio_positions());
    }
    let initial_json = match serde_json::to_string(&initial) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(conn_id, error = ?e, "failed to serialize initial events payload");
            "{}".to_string()
        }
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();
    if ws_sender
        .send(ws::Message::Text(initial_json))
        .await
        .is_err()
    {
        state.registry.remove_events(conn_id);
        return;
    }

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender
                .send(ws::Message::Text(msg.as_ref().to_string()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = state.stopped() => break,
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(ws::Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.registry.remove_events(conn_id);
    tracing::info!(conn_id, "events ws disconnected");
    send_task.abort();
}
