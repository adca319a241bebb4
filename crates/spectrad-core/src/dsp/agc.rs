use std::collections::VecDeque;

/// Look-ahead peak AGC.
///
/// A monotonic deque tracks the largest |sample| over the look-ahead window,
/// so the gain reacts before a transient reaches the output. Attack smoothing
/// applies when the gain must fall, release when it may rise.
pub struct Agc {
    desired_level: f32,
    attack_coeff: f32,
    release_coeff: f32,
    look_ahead_samples: usize,
    gain: f32,
    lookahead: VecDeque<f32>,
    lookahead_max: VecDeque<f32>,
}

impl Agc {
    pub fn new(
        desired_level: f32,
        attack_ms: f32,
        release_ms: f32,
        lookahead_ms: f32,
        sample_rate: f32,
    ) -> Self {
        let look_ahead_samples = (lookahead_ms * sample_rate / 1000.0).round().max(1.0) as usize;
        let attack_coeff = 1.0 - (-1.0 / (attack_ms * 0.001 * sample_rate)).exp();
        let release_coeff = 1.0 - (-1.0 / (release_ms * 0.001 * sample_rate)).exp();
        Self {
            desired_level,
            attack_coeff,
            release_coeff,
            look_ahead_samples,
            gain: 0.0,
            lookahead: VecDeque::new(),
            lookahead_max: VecDeque::new(),
        }
    }

    pub fn reset(&mut self) {
        self.gain = 0.0;
        self.lookahead.clear();
        self.lookahead_max.clear();
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            self.push(*s);
            if self.lookahead.len() == self.look_ahead_samples {
                let current_sample = *self.lookahead.front().unwrap_or(&0.0);
                let peak = self.max();
                let desired_gain = self.desired_level / (peak + 1e-15);
                if desired_gain < self.gain {
                    self.gain -= self.attack_coeff * (self.gain - desired_gain);
                } else {
                    self.gain += self.release_coeff * (desired_gain - self.gain);
                }
                *s = current_sample * self.gain;
            } else {
                // Not enough history yet; the look-ahead delay emits silence.
                *s = 0.0;
            }
        }
    }

    fn push(&mut self, sample: f32) {
        while let Some(back) = self.lookahead_max.back().copied() {
            if back.abs() < sample.abs() {
                self.lookahead_max.pop_back();
            } else {
                break;
            }
        }
        self.lookahead_max.push_back(sample);
        self.lookahead.push_back(sample);
        if self.lookahead.len() > self.look_ahead_samples {
            self.pop();
        }
    }

    fn pop(&mut self) {
        if let Some(sample) = self.lookahead.pop_front() {
            if self.lookahead_max.front().copied() == Some(sample) {
                self.lookahead_max.pop_front();
            }
        }
    }

    fn max(&self) -> f32 {
        self.lookahead_max.front().copied().unwrap_or(0.0).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agc_converges_on_quiet_input() {
        // 1.5 s of a 0.01-peak tone must come out near the desired level.
        let sr = 12_000.0f32;
        let mut agc = Agc::new(0.2, 50.0, 300.0, 200.0, sr);
        let n = (1.5 * sr) as usize;
        let mut buf: Vec<f32> = (0..n)
            .map(|i| 0.01 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sr).sin())
            .collect();
        agc.process(&mut buf);
        let tail_peak = buf[n - 1200..].iter().fold(0.0f32, |a, v| a.max(v.abs()));
        assert!(
            (tail_peak - 0.2).abs() < 0.02,
            "expected ~0.2, got {tail_peak}"
        );
    }

    #[test]
    fn agc_recovers_from_a_loud_transient() {
        let sr = 12_000.0f32;
        let mut agc = Agc::new(0.2, 50.0, 300.0, 10.0, sr);
        // Converge on a quiet signal, then hold a loud one for a second; the
        // attack path must pull the output back to the desired level.
        let mut quiet = vec![0.01f32; 24_000];
        agc.process(&mut quiet);
        let mut loud = vec![1.0f32; 12_000];
        agc.process(&mut loud);
        let tail = loud[10_800..].iter().fold(0.0f32, |a, v| a.max(v.abs()));
        assert!(
            (0.15..=0.3).contains(&tail),
            "expected the gain to settle near 0.2, got {tail}"
        );
    }

    #[test]
    fn agc_emits_silence_during_lookahead_fill() {
        let mut agc = Agc::new(0.2, 50.0, 300.0, 100.0, 1000.0);
        let mut buf = vec![0.5f32; 50];
        agc.process(&mut buf);
        assert!(buf.iter().all(|v| *v == 0.0));
    }
}
