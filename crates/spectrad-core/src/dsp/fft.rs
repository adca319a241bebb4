use crate::dsp::window::hann_window;
use num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Sizing for one master FFT instance.
#[derive(Debug, Clone)]
pub struct FftParams {
    pub fft_size: usize,
    pub is_real: bool,
    pub downsample_levels: usize,
    pub audio_max_fft_size: usize,
    pub brightness_offset: i32,
}

/// Byte offset of `level` inside the concatenated quantized pyramid.
pub fn pyramid_base(fft_result_size: usize, level: usize) -> usize {
    let mut off = 0usize;
    let mut len = fft_result_size;
    for _ in 0..level {
        off += len;
        len /= 2;
    }
    off
}

pub fn pyramid_len(fft_result_size: usize, levels: usize) -> usize {
    pyramid_base(fft_result_size, levels)
}

/// Forward FFT backend: windowed two-half input load, spectrum in display
/// order (lowest frequency first) and the int8 log-power pyramid.
pub trait SpectrumFft: Send {
    fn fft_result_size(&self) -> usize;
    /// Window and stage the two input halves (old block, new block) of real
    /// samples.
    fn load_real(&mut self, old_half: &[f32], new_half: &[f32]);
    /// Same for interleaved IQ; each half holds `fft_size/2` complex samples.
    fn load_iq(&mut self, old_half: &[f32], new_half: &[f32]);
    fn execute(&mut self) -> anyhow::Result<()>;
    /// Normalised spectrum. For IQ input the array is rotated so the lowest
    /// frequency comes first (DC at `fft_result_size - (fft_size/2 + 1)`) and
    /// the first `audio_max_fft_size` bins are duplicated past the end, so
    /// modular range reads never have to split across the seam.
    fn spectrum(&self) -> &[Complex32];
    /// Concatenated int8 pyramid, level 0 first.
    fn quantized(&self) -> &[i8];
}

// The mantissa polynomial trades a third decimal of log2 accuracy for a
// branch-free conversion the compiler can vectorise.
#[inline]
fn fast_log2(v: f32) -> f32 {
    let bits = v.to_bits();
    let exp = (((bits >> 23) & 0xff) as i32 - 128) as f32;
    let mantissa = f32::from_bits((bits & 0x007f_ffff) | 0x3f80_0000);
    exp + ((-0.344_848_43 * mantissa + 2.024_665_8) * mantissa - 0.674_877_6)
}

// 6.0206 dB per power-of-two: 20 * log10(2).
const DB_PER_OCTAVE: f32 = 6.020_599_9;

#[inline]
fn quantize_log_power(power: f32, power_offset: i32) -> i8 {
    let db = (fast_log2(power) + power_offset as f32) * DB_PER_OCTAVE + 127.0;
    // `as` saturates and truncates toward zero, matching the wire format.
    db.max(-128.0) as i8
}

pub struct CpuFft {
    fft_size: usize,
    fft_result_size: usize,
    audio_max_fft_size: usize,
    downsample_levels: usize,
    size_log2: i32,
    window: Vec<f32>,
    plan: BackendPlan,
    input_real: Vec<f32>,
    input_complex: Vec<Complex32>,
    spectrum_out: Vec<Complex32>,
    power: Vec<f32>,
    quantized: Vec<i8>,
}

enum BackendPlan {
    Real {
        plan: Arc<dyn RealToComplex<f32>>,
        out: Vec<Complex32>,
        scratch: Vec<Complex32>,
    },
    Complex {
        plan: Arc<dyn Fft<f32>>,
        scratch: Vec<Complex32>,
    },
}

impl CpuFft {
    pub fn new(params: &FftParams) -> anyhow::Result<Self> {
        let fft_size = params.fft_size;
        anyhow::ensure!(fft_size.is_power_of_two(), "fft_size must be a power of two");
        let fft_result_size = if params.is_real {
            fft_size / 2
        } else {
            fft_size
        };
        anyhow::ensure!(
            params.downsample_levels >= 1
                && fft_result_size >> (params.downsample_levels - 1) >= 1,
            "downsample_levels out of range"
        );

        let size_log2 = fft_size.trailing_zeros() as i32 + params.brightness_offset;
        let pyramid = pyramid_len(fft_result_size, params.downsample_levels);

        let (plan, spectrum_len) = if params.is_real {
            let mut planner = RealFftPlanner::<f32>::new();
            let plan = planner.plan_fft_forward(fft_size);
            let scratch = plan.make_scratch_vec();
            let out = plan.make_output_vec();
            (BackendPlan::Real { plan, out, scratch }, fft_result_size)
        } else {
            let mut planner = FftPlanner::<f32>::new();
            let plan = planner.plan_fft_forward(fft_size);
            let scratch = vec![Complex32::new(0.0, 0.0); plan.get_inplace_scratch_len()];
            (
                BackendPlan::Complex { plan, scratch },
                fft_result_size + params.audio_max_fft_size,
            )
        };

        Ok(Self {
            fft_size,
            fft_result_size,
            audio_max_fft_size: params.audio_max_fft_size,
            downsample_levels: params.downsample_levels,
            size_log2,
            window: hann_window(fft_size),
            plan,
            input_real: vec![0.0; if params.is_real { fft_size } else { 0 }],
            input_complex: vec![
                Complex32::new(0.0, 0.0);
                if params.is_real { 0 } else { fft_size }
            ],
            spectrum_out: vec![Complex32::new(0.0, 0.0); spectrum_len],
            power: vec![0.0; pyramid],
            quantized: vec![0; pyramid],
        })
    }

    fn build_pyramid(&mut self) {
        for i in 0..self.fft_result_size {
            let p = self.spectrum_out[i].norm_sqr();
            self.power[i] = p;
            self.quantized[i] = quantize_log_power(p, self.size_log2);
        }

        let mut out_len = self.fft_result_size;
        let mut off = 0usize;
        for level in 1..self.downsample_levels {
            for j in 0..out_len / 2 {
                let p = self.power[off + 2 * j] + self.power[off + 2 * j + 1];
                self.power[off + out_len + j] = p;
                self.quantized[off + out_len + j] =
                    quantize_log_power(p, self.size_log2 - level as i32);
            }
            off += out_len;
            out_len /= 2;
        }
    }
}

impl SpectrumFft for CpuFft {
    fn fft_result_size(&self) -> usize {
        self.fft_result_size
    }

    fn load_real(&mut self, old_half: &[f32], new_half: &[f32]) {
        let half = self.fft_size / 2;
        for i in 0..half {
            self.input_real[i] = old_half[i] * self.window[i];
        }
        for i in 0..half {
            self.input_real[half + i] = new_half[i] * self.window[half + i];
        }
    }

    fn load_iq(&mut self, old_half: &[f32], new_half: &[f32]) {
        let half = self.fft_size / 2;
        for i in 0..half {
            self.input_complex[i] =
                Complex32::new(old_half[2 * i], old_half[2 * i + 1]) * self.window[i];
        }
        for i in 0..half {
            self.input_complex[half + i] =
                Complex32::new(new_half[2 * i], new_half[2 * i + 1]) * self.window[half + i];
        }
    }

    fn execute(&mut self) -> anyhow::Result<()> {
        let norm = 1.0 / self.fft_size as f32;
        match &mut self.plan {
            BackendPlan::Real { plan, out, scratch } => {
                plan.process_with_scratch(&mut self.input_real, out, scratch)
                    .map_err(|e| anyhow::anyhow!("forward FFT failed: {e}"))?;
                for i in 0..self.fft_result_size {
                    self.spectrum_out[i] = out[i] * norm;
                }
            }
            BackendPlan::Complex { plan, scratch } => {
                plan.process_with_scratch(&mut self.input_complex, scratch);
                // Rotate so the most negative frequency lands at index 0;
                // any in-band range is then one ascending run.
                let base = self.fft_size / 2 + 1;
                let tail = self.fft_size - base;
                for i in 0..tail {
                    self.spectrum_out[i] = self.input_complex[base + i] * norm;
                }
                for i in 0..base {
                    self.spectrum_out[tail + i] = self.input_complex[i] * norm;
                }
                for i in 0..self.audio_max_fft_size {
                    self.spectrum_out[self.fft_size + i] = self.spectrum_out[i];
                }
            }
        }
        self.build_pyramid();
        Ok(())
    }

    fn spectrum(&self) -> &[Complex32] {
        &self.spectrum_out
    }

    fn quantized(&self) -> &[i8] {
        &self.quantized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_log2_tracks_log2() {
        for v in [1e-12f32, 1e-6, 0.25, 0.9, 1.0, 3.7, 1024.0, 1e9] {
            let got = fast_log2(v);
            let want = v.log2();
            assert!((got - want).abs() < 0.02, "log2({v}): {got} vs {want}");
        }
    }

    #[test]
    fn quantize_saturates_both_ends() {
        assert_eq!(quantize_log_power(0.0, 0), -128);
        assert_eq!(quantize_log_power(1e30, 0), 127);
        // Unit power with no offset sits at the 127 reference point.
        let q = quantize_log_power(1.0, 0);
        assert!((126..=127).contains(&q), "got {q}");
    }

    #[test]
    fn pyramid_base_accumulates_halved_levels() {
        assert_eq!(pyramid_base(1024, 0), 0);
        assert_eq!(pyramid_base(1024, 1), 1024);
        assert_eq!(pyramid_base(1024, 2), 1024 + 512);
        assert_eq!(pyramid_len(1024, 3), 1024 + 512 + 256);
    }

    fn peak_bin(spectrum: &[Complex32], n: usize) -> usize {
        (0..n)
            .max_by(|a, b| {
                spectrum[*a]
                    .norm_sqr()
                    .partial_cmp(&spectrum[*b].norm_sqr())
                    .unwrap()
            })
            .unwrap()
    }

    #[test]
    fn iq_dc_lands_at_rotated_index() {
        let params = FftParams {
            fft_size: 64,
            is_real: false,
            downsample_levels: 3,
            audio_max_fft_size: 16,
            brightness_offset: 0,
        };
        let mut fft = CpuFft::new(&params).unwrap();
        let ones = vec![1.0f32; 64];
        fft.load_iq(&ones, &ones);
        fft.execute().unwrap();
        let dc = peak_bin(fft.spectrum(), 64);
        assert_eq!(dc, 64 - (64 / 2 + 1));
    }

    #[test]
    fn real_dc_lands_at_index_zero() {
        let params = FftParams {
            fft_size: 64,
            is_real: true,
            downsample_levels: 2,
            audio_max_fft_size: 16,
            brightness_offset: 0,
        };
        let mut fft = CpuFft::new(&params).unwrap();
        let ones = vec![1.0f32; 32];
        fft.load_real(&ones, &ones);
        fft.execute().unwrap();
        assert_eq!(peak_bin(fft.spectrum(), 32), 0);
    }

    #[test]
    fn iq_wraparound_bins_duplicate_the_start() {
        let params = FftParams {
            fft_size: 64,
            is_real: false,
            downsample_levels: 2,
            audio_max_fft_size: 8,
            brightness_offset: 0,
        };
        let mut fft = CpuFft::new(&params).unwrap();
        let samples: Vec<f32> = (0..64).map(|i| (i as f32 * 0.37).sin()).collect();
        fft.load_iq(&samples, &samples);
        fft.execute().unwrap();
        let s = fft.spectrum();
        for i in 0..8 {
            assert_eq!(s[64 + i], s[i]);
        }
    }

    #[test]
    fn narrow_line_fades_six_db_per_pyramid_level() {
        // A spectral line keeps its linear power when bins pair up, so the
        // level-aware brightness offset walks it down ~6 dB per level.
        let params = FftParams {
            fft_size: 64,
            is_real: true,
            downsample_levels: 3,
            audio_max_fft_size: 8,
            brightness_offset: 0,
        };
        let mut fft = CpuFft::new(&params).unwrap();
        let ones = vec![1e-3f32; 32];
        fft.load_real(&ones, &ones);
        fft.execute().unwrap();
        let q = fft.quantized();
        let l0 = q[0] as i32;
        let l1 = q[pyramid_base(32, 1)] as i32;
        let l2 = q[pyramid_base(32, 2)] as i32;
        assert!(l0 > 0 && l0 < 127, "level 0 must not saturate, got {l0}");
        assert!((3..=7).contains(&(l0 - l1)), "l0={l0} l1={l1}");
        assert!((5..=7).contains(&(l1 - l2)), "l1={l1} l2={l2}");
    }
}
