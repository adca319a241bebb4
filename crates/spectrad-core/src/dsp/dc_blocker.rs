use std::collections::VecDeque;

/// Ring-buffered moving average with a Neumaier-compensated running sum, so
/// long windows do not drift after hours of streaming.
pub struct MovingAverage {
    buf: VecDeque<f32>,
    sum: f32,
    compensation: f32,
    len: usize,
}

impl MovingAverage {
    pub fn new(len: usize) -> Self {
        Self {
            buf: VecDeque::from(vec![0.0; len]),
            sum: 0.0,
            compensation: 0.0,
            len,
        }
    }

    fn add(&mut self, v: f32) {
        let t = self.sum + v;
        if self.sum.abs() >= v.abs() {
            self.compensation += (self.sum - t) + v;
        } else {
            self.compensation += (v - t) + self.sum;
        }
        self.sum = t;
    }

    pub fn insert(&mut self, v: f32) -> f32 {
        let tail = self.buf.pop_back().unwrap_or(0.0);
        self.add(-tail);
        self.buf.push_front(v);
        self.add(v);
        self.get()
    }

    pub fn get(&self) -> f32 {
        (self.sum + self.compensation) / (self.len as f32)
    }

    pub fn buf(&self) -> &VecDeque<f32> {
        &self.buf
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.compensation = 0.0;
        self.buf.clear();
        self.buf.resize(self.len, 0.0);
    }
}

/// Two cascaded moving averages; the output is the delayed input minus the
/// twice-smoothed estimate of the local mean.
pub struct DcBlocker {
    delay: usize,
    ma1: MovingAverage,
    ma2: MovingAverage,
}

impl DcBlocker {
    pub fn new(delay: usize) -> Self {
        Self {
            delay,
            ma1: MovingAverage::new(delay),
            ma2: MovingAverage::new(delay),
        }
    }

    pub fn remove_dc(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let ma1 = self.ma1.insert(*s);
            let ma2 = self.ma2.insert(ma1);
            let delayed = *self.ma1.buf().get(self.delay - 1).unwrap_or(&0.0);
            *s = delayed - ma2;
        }
    }

    pub fn reset(&mut self) {
        self.ma1.reset();
        self.ma2.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_average_of_constant_input_converges_to_it() {
        let mut ma = MovingAverage::new(8);
        let mut last = 0.0;
        for _ in 0..8 {
            last = ma.insert(2.0);
        }
        assert!((last - 2.0).abs() < 1e-6);
    }

    #[test]
    fn dc_blocker_removes_steady_offset() {
        // One second of x(t) = 1.0 at 12 kHz: the tail must be ~zero.
        let sr = 12_000usize;
        let mut dc = DcBlocker::new(sr / 375);
        let mut buf = vec![1.0f32; sr];
        dc.remove_dc(&mut buf);
        for v in &buf[sr - 100..] {
            assert!(v.abs() < 1e-3, "residual DC {v}");
        }
    }

    #[test]
    fn dc_blocker_passes_fast_transitions() {
        let mut dc = DcBlocker::new(32);
        let mut buf = vec![0.0f32; 512];
        for (i, v) in buf.iter_mut().enumerate() {
            *v = if (i / 8) % 2 == 0 { 0.5 } else { -0.5 };
        }
        dc.remove_dc(&mut buf);
        let peak = buf[256..].iter().fold(0.0f32, |a, v| a.max(v.abs()));
        assert!(peak > 0.2, "square wave should survive, peak {peak}");
    }
}
