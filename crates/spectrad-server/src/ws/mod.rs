use axum::extract::ws;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod audio;
pub mod events;
pub mod waterfall;

/// Control frames above this size are dropped unparsed.
pub const MAX_CONTROL_BYTES: usize = 1024;

/// On server shutdown, tell the peer we are going away and give the writer a
/// moment to flush before the tasks are torn down.
pub async fn close_going_away(out_tx: &mpsc::Sender<ws::Message>) {
    let frame = ws::CloseFrame {
        code: ws::close_code::AWAY,
        reason: "going away".into(),
    };
    let _ = out_tx.try_send(ws::Message::Close(Some(frame)));
    tokio::time::sleep(Duration::from_millis(100)).await;
}
