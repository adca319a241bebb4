use num_complex::Complex32;
use spectrad_core::dsp::demod::DemodulationMode;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

pub type ConnId = u64;

/// One frame's worth of shared spectral data. Fan-out hands every consumer
/// an `Arc`, so the buffers stay alive for exactly as long as some task for
/// frame `n` is still running, while the producer moves on to frame `n+1`.
pub struct FrameSnapshot {
    pub frame_num: u64,
    pub is_real: bool,
    pub spectrum: Vec<Complex32>,
    pub quantized: Vec<i8>,
}

#[derive(Debug, Clone, Copy)]
pub struct AudioControl {
    pub l: i32,
    pub r: i32,
    pub m: f64,
    pub mode: DemodulationMode,
    pub mute: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct WaterfallControl {
    pub level: usize,
    pub l: usize,
    pub r: usize,
}

pub struct AudioJob {
    pub frame: Arc<FrameSnapshot>,
    pub params: AudioControl,
}

pub struct WaterfallJob {
    pub frame: Arc<FrameSnapshot>,
    pub params: WaterfallControl,
}

pub struct AudioSubscriber {
    pub conn_id: ConnId,
    pub unique_id: String,
    pub userid: Mutex<Option<String>>,
    pub params: Mutex<AudioControl>,
    pub agc_reset: AtomicBool,
    pub job_tx: mpsc::Sender<AudioJob>,
    pub queued_bytes: Arc<AtomicUsize>,
}

impl AudioSubscriber {
    /// Key used for event correlation: the client-supplied userid when one
    /// has been set, otherwise the generated connection id.
    pub fn effective_id(&self) -> String {
        lock_or_recover(&self.userid, "audio userid")
            .clone()
            .unwrap_or_else(|| self.unique_id.clone())
    }
}

pub struct WaterfallSubscriber {
    pub conn_id: ConnId,
    pub userid: Mutex<Option<String>>,
    pub params: Mutex<WaterfallControl>,
    pub job_tx: mpsc::Sender<WaterfallJob>,
    pub queued_bytes: Arc<AtomicUsize>,
}

/// Ordered multimap key: `(l, r)` plus a process-unique serial so identical
/// slices coexist. The key doubles as the opaque retune cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SliceKey {
    pub l: i32,
    pub r: i32,
    serial: u64,
}

pub fn lock_or_recover<'a, T>(m: &'a Mutex<T>, what: &'static str) -> MutexGuard<'a, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::error!(what, "mutex poisoned; recovering");
            poisoned.into_inner()
        }
    }
}

/// Concurrent indexes from spectral slices to their consumers. The audio map
/// has one mutex; the waterfall maps have one mutex per level so retunes on
/// different zoom levels never contend.
pub struct SliceRegistry {
    serial: AtomicU64,
    audio: Mutex<BTreeMap<SliceKey, Arc<AudioSubscriber>>>,
    waterfall: Vec<Mutex<BTreeMap<SliceKey, Arc<WaterfallSubscriber>>>>,
    events: Mutex<HashMap<ConnId, mpsc::Sender<Arc<String>>>>,
    signal_changes: Mutex<HashMap<String, (i32, f64, i32)>>,
    show_other_users: bool,
}

impl SliceRegistry {
    pub fn new(downsample_levels: usize, show_other_users: bool) -> Self {
        Self {
            serial: AtomicU64::new(0),
            audio: Mutex::new(BTreeMap::new()),
            waterfall: (0..downsample_levels)
                .map(|_| Mutex::new(BTreeMap::new()))
                .collect(),
            events: Mutex::new(HashMap::new()),
            signal_changes: Mutex::new(HashMap::new()),
            show_other_users,
        }
    }

    fn next_key(&self, l: i32, r: i32) -> SliceKey {
        SliceKey {
            l,
            r,
            serial: self.serial.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn insert_audio(&self, sub: Arc<AudioSubscriber>) -> SliceKey {
        let params = *lock_or_recover(&sub.params, "audio params");
        let key = self.next_key(params.l, params.r);
        lock_or_recover(&self.audio, "audio slices").insert(key, sub);
        key
    }

    /// All four fields of the retune become visible atomically to anyone
    /// iterating under the audio mutex.
    pub fn retune_audio(
        &self,
        cursor: SliceKey,
        sub: &Arc<AudioSubscriber>,
        l: i32,
        r: i32,
        m: f64,
    ) -> SliceKey {
        let mut map = lock_or_recover(&self.audio, "audio slices");
        map.remove(&cursor);
        {
            let mut p = lock_or_recover(&sub.params, "audio params");
            p.l = l;
            p.r = r;
            p.m = m;
        }
        let key = self.next_key(l, r);
        map.insert(key, sub.clone());
        key
    }

    pub fn remove_audio(&self, cursor: SliceKey) {
        lock_or_recover(&self.audio, "audio slices").remove(&cursor);
    }

    pub fn audio_count(&self) -> usize {
        lock_or_recover(&self.audio, "audio slices").len()
    }

    /// Walk every audio subscriber under the registry mutex.
    pub fn for_each_audio(&self, mut f: impl FnMut(&SliceKey, &Arc<AudioSubscriber>)) {
        let map = lock_or_recover(&self.audio, "audio slices");
        for (key, sub) in map.iter() {
            f(key, sub);
        }
    }

    /// Current `(l, m, r)` of every audio subscriber, for the initial events
    /// snapshot.
    pub fn audio_positions(&self) -> HashMap<String, (i32, f64, i32)> {
        let map = lock_or_recover(&self.audio, "audio slices");
        map.values()
            .map(|sub| {
                let p = *lock_or_recover(&sub.params, "audio params");
                (sub.effective_id(), (p.l, p.m, p.r))
            })
            .collect()
    }

    pub fn insert_waterfall(&self, sub: Arc<WaterfallSubscriber>, level: usize) -> SliceKey {
        let params = *lock_or_recover(&sub.params, "waterfall params");
        let key = self.next_key(params.l as i32, params.r as i32);
        lock_or_recover(&self.waterfall[level], "waterfall slices").insert(key, sub);
        key
    }

    pub fn retune_waterfall(
        &self,
        cursor: SliceKey,
        sub: &Arc<WaterfallSubscriber>,
        old_level: usize,
        new_level: usize,
        l: usize,
        r: usize,
    ) -> SliceKey {
        let key = self.next_key(l as i32, r as i32);
        let update = |sub: &Arc<WaterfallSubscriber>| {
            let mut p = lock_or_recover(&sub.params, "waterfall params");
            p.level = new_level;
            p.l = l;
            p.r = r;
        };
        if old_level == new_level {
            let mut map = lock_or_recover(&self.waterfall[old_level], "waterfall slices");
            map.remove(&cursor);
            update(sub);
            map.insert(key, sub.clone());
        } else {
            // Cross-level retune takes both mutexes in ascending level order.
            let (first, second) = (old_level.min(new_level), old_level.max(new_level));
            let mut first_map = lock_or_recover(&self.waterfall[first], "waterfall slices");
            let mut second_map = lock_or_recover(&self.waterfall[second], "waterfall slices");
            let (old_map, new_map) = if old_level < new_level {
                (&mut first_map, &mut second_map)
            } else {
                (&mut second_map, &mut first_map)
            };
            old_map.remove(&cursor);
            update(sub);
            new_map.insert(key, sub.clone());
        }
        key
    }

    pub fn remove_waterfall(&self, cursor: SliceKey, level: usize) {
        lock_or_recover(&self.waterfall[level], "waterfall slices").remove(&cursor);
    }

    pub fn waterfall_count(&self) -> usize {
        self.waterfall
            .iter()
            .map(|m| lock_or_recover(m, "waterfall slices").len())
            .sum()
    }

    pub fn for_each_waterfall(
        &self,
        level: usize,
        mut f: impl FnMut(&SliceKey, &Arc<WaterfallSubscriber>),
    ) {
        let map = lock_or_recover(&self.waterfall[level], "waterfall slices");
        for (key, sub) in map.iter() {
            f(key, sub);
        }
    }

    pub fn levels(&self) -> usize {
        self.waterfall.len()
    }

    pub fn insert_events(&self, conn_id: ConnId, tx: mpsc::Sender<Arc<String>>) {
        lock_or_recover(&self.events, "events set").insert(conn_id, tx);
    }

    pub fn remove_events(&self, conn_id: ConnId) {
        lock_or_recover(&self.events, "events set").remove(&conn_id);
    }

    pub fn events_count(&self) -> usize {
        lock_or_recover(&self.events, "events set").len()
    }

    pub fn event_senders(&self) -> Vec<mpsc::Sender<Arc<String>>> {
        lock_or_recover(&self.events, "events set")
            .values()
            .cloned()
            .collect()
    }

    pub fn record_change(&self, id: String, l: i32, m: f64, r: i32) {
        if !self.show_other_users {
            return;
        }
        lock_or_recover(&self.signal_changes, "signal changes").insert(id, (l, m, r));
    }

    pub fn drain_changes(&self) -> HashMap<String, (i32, f64, i32)> {
        std::mem::take(&mut *lock_or_recover(&self.signal_changes, "signal changes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_sub(l: i32, r: i32) -> Arc<AudioSubscriber> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(AudioSubscriber {
            conn_id: 1,
            unique_id: "u".to_string(),
            userid: Mutex::new(None),
            params: Mutex::new(AudioControl {
                l,
                r,
                m: l as f64,
                mode: DemodulationMode::Usb,
                mute: false,
            }),
            agc_reset: AtomicBool::new(false),
            job_tx: tx,
            queued_bytes: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn waterfall_sub(level: usize, l: usize, r: usize) -> Arc<WaterfallSubscriber> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(WaterfallSubscriber {
            conn_id: 1,
            userid: Mutex::new(None),
            params: Mutex::new(WaterfallControl { level, l, r }),
            job_tx: tx,
            queued_bytes: Arc::new(AtomicUsize::new(0)),
        })
    }

    #[test]
    fn identical_audio_slices_coexist() {
        let reg = SliceRegistry::new(1, true);
        let k1 = reg.insert_audio(audio_sub(10, 20));
        let k2 = reg.insert_audio(audio_sub(10, 20));
        assert_ne!(k1, k2);
        assert_eq!(reg.audio_count(), 2);
        reg.remove_audio(k1);
        assert_eq!(reg.audio_count(), 1);
        reg.remove_audio(k2);
        assert_eq!(reg.audio_count(), 0);
    }

    #[test]
    fn retune_audio_updates_key_and_params_together() {
        let reg = SliceRegistry::new(1, true);
        let sub = audio_sub(10, 20);
        let k1 = reg.insert_audio(sub.clone());
        let k2 = reg.retune_audio(k1, &sub, 30, 40, 35.0);
        assert_eq!((k2.l, k2.r), (30, 40));
        assert_eq!(reg.audio_count(), 1);
        let p = *sub.params.lock().unwrap();
        assert_eq!((p.l, p.r), (30, 40));
        assert_eq!(p.m, 35.0);

        let mut seen = Vec::new();
        reg.for_each_audio(|k, _| seen.push(*k));
        assert_eq!(seen, vec![k2]);
    }

    #[test]
    fn cross_level_waterfall_retune_moves_the_entry() {
        let reg = SliceRegistry::new(4, true);
        let sub = waterfall_sub(3, 0, 128);
        let k1 = reg.insert_waterfall(sub.clone(), 3);
        let k2 = reg.retune_waterfall(k1, &sub, 3, 1, 256, 512);
        assert_eq!(reg.waterfall_count(), 1);
        let mut at_level_1 = 0;
        reg.for_each_waterfall(1, |k, _| {
            assert_eq!(*k, k2);
            at_level_1 += 1;
        });
        assert_eq!(at_level_1, 1);
        reg.for_each_waterfall(3, |_, _| panic!("entry left behind on old level"));
        let p = *sub.params.lock().unwrap();
        assert_eq!((p.level, p.l, p.r), (1, 256, 512));
    }

    #[test]
    fn signal_changes_drain_once() {
        let reg = SliceRegistry::new(1, true);
        reg.record_change("a".to_string(), 1, 2.0, 3);
        reg.record_change("a".to_string(), 4, 5.0, 6);
        let drained = reg.drain_changes();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained["a"], (4, 5.0, 6));
        assert!(reg.drain_changes().is_empty());
    }

    #[test]
    fn signal_changes_disabled_without_other_users() {
        let reg = SliceRegistry::new(1, false);
        reg.record_change("a".to_string(), 1, 2.0, 3);
        assert!(reg.drain_changes().is_empty());
    }
}
