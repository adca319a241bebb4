use crate::state::AppState;
use spectrad_core::protocol::EventsInfo;
use std::sync::Arc;
use std::time::Duration;

/// Once a second, flush accumulated signal changes to every events
/// subscriber. Quiet seconds send nothing.
pub fn spawn_event_timer(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if crate::shutdown::is_shutdown_requested() {
                break;
            }

            let changes = state.registry.drain_changes();
            if changes.is_empty() {
                continue;
            }
            let info = EventsInfo {
                waterfall_clients: state.registry.waterfall_count(),
                signal_clients: state.registry.audio_count(),
                signal_changes: Some(changes),
            };
            let json = match serde_json::to_string(&info) {
                Ok(s) => Arc::new(s),
                Err(e) => {
                    tracing::error!(error = ?e, "failed to serialize events payload");
                    continue;
                }
            };
            for tx in state.registry.event_senders() {
                let _ = tx.try_send(json.clone());
            }
        }
    })
}
