use crate::dsp::{
    agc::Agc,
    dc_blocker::DcBlocker,
    demod::{
        add_complex, add_f32, am_envelope, am_product, float_to_i16_centered, negate_complex,
        negate_f32, polar_discriminator_fm, DemodulationMode,
    },
};
use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner};
use rustfft::{Fft as RustFft, FftPlanner};
use std::sync::Arc;

/// 16-bit quantizer scale: full scale sits 12 dB below i16 max so the AGC
/// has headroom above its 0.2 target.
const PCM_SCALE: f32 = 65536.0 / 4.0;

/// Whether AM uses the carrier-locked product detector or the envelope.
const CARRIER_LOCK: bool = cfg!(feature = "am-pll");

#[derive(Debug, Clone, Copy)]
pub struct AudioParams {
    pub l: i32,
    pub r: i32,
    pub m: f64,
    pub mode: DemodulationMode,
    pub mute: bool,
}

pub struct AudioFrame<'a> {
    pub pcm: &'a [i16],
    pub average_power: f64,
}

/// Per-subscriber demodulator: narrow IFFT over the subscriber's window of
/// master FFT bins, overlap-add reconstruction, then DC removal, AGC and
/// 16-bit quantization. One instance is owned by exactly one connection task.
pub struct AudioPipeline {
    audio_rate: usize,
    audio_fft_size: usize,
    ifft: Arc<dyn RustFft<f32>>,
    c2r_ifft: Arc<dyn ComplexToReal<f32>>,
    c2r_scratch: Vec<Complex32>,
    scratch: Vec<Complex32>,
    buf_in: Vec<Complex32>,
    baseband: Vec<Complex32>,
    carrier: Vec<Complex32>,
    baseband_prev: Vec<Complex32>,
    carrier_prev: Vec<Complex32>,
    real: Vec<f32>,
    real_prev: Vec<f32>,
    pcm: Vec<i16>,
    dc: DcBlocker,
    agc: Agc,
    fm_prev: Complex32,
}

impl AudioPipeline {
    pub fn new(sample_rate: usize, audio_fft_size: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(
            audio_fft_size >= 4 && audio_fft_size % 4 == 0,
            "audio_fft_size must be a positive multiple of 4"
        );

        let mut planner = FftPlanner::<f32>::new();
        let ifft = planner.plan_fft_inverse(audio_fft_size);
        let scratch_len = ifft.get_inplace_scratch_len();

        let mut real_planner = RealFftPlanner::<f32>::new();
        let c2r_ifft = real_planner.plan_fft_inverse(audio_fft_size);
        let c2r_scratch = c2r_ifft.make_scratch_vec();

        let frame_samples = audio_fft_size / 2;

        Ok(Self {
            audio_rate: sample_rate,
            audio_fft_size,
            ifft,
            c2r_ifft,
            c2r_scratch,
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
            buf_in: vec![Complex32::new(0.0, 0.0); audio_fft_size],
            baseband: vec![Complex32::new(0.0, 0.0); audio_fft_size],
            carrier: vec![Complex32::new(0.0, 0.0); audio_fft_size],
            baseband_prev: vec![Complex32::new(0.0, 0.0); frame_samples],
            carrier_prev: vec![Complex32::new(0.0, 0.0); frame_samples],
            real: vec![0.0; audio_fft_size],
            real_prev: vec![0.0; frame_samples],
            pcm: vec![0; frame_samples],
            dc: DcBlocker::new((sample_rate / 375).max(1)),
            agc: Agc::new(0.2, 50.0, 300.0, 200.0, sample_rate as f32),
            fm_prev: Complex32::new(0.0, 0.0),
        })
    }

    pub fn frame_samples(&self) -> usize {
        self.audio_fft_size / 2
    }

    pub fn reset_agc(&mut self) {
        self.agc.reset();
    }

    /// Demodulate one master-FFT frame. `spectrum_slice` is the subscriber's
    /// `[l, r)` window of normalised bins; exactly `audio_fft_size/2` samples
    /// come out per call. A NaN anywhere in the demodulated buffer fails the
    /// call and leaves the overlap state untouched, so the next frame starts
    /// clean.
    pub fn process(
        &mut self,
        spectrum_slice: &[Complex32],
        frame_num: u64,
        params: &AudioParams,
        is_real_input: bool,
    ) -> anyhow::Result<AudioFrame<'_>> {
        let len = spectrum_slice.len() as i32;
        let audio_m_idx = params.m.floor() as i32;
        let audio_m_rel = audio_m_idx - params.l;
        let mode = params.mode;

        let n = self.audio_fft_size as i32;
        let half = self.audio_fft_size / 2;

        let average_power = spectrum_slice
            .iter()
            .map(|c| c.norm_sqr() as f64)
            .sum::<f64>()
            / (len.max(1) as f64);

        // With 50% overlap, shifting the window down by an odd number of bins
        // flips the sign of every other frame; even shifts flip for real
        // input because the half-frame advance is then a half period of the
        // mid bin. The reconstructed waveform must be negated exactly when
        // this predicate holds.
        let invert = frame_num % 2 == 1
            && ((audio_m_idx % 2 == 0 && !is_real_input)
                || (audio_m_idx % 2 != 0 && is_real_input));

        match mode {
            DemodulationMode::Usb | DemodulationMode::Lsb => {
                // Hermitian C2R input holds N/2+1 bins.
                let c2r_len = half + 1;
                self.buf_in[..c2r_len].fill(Complex32::new(0.0, 0.0));

                if mode == DemodulationMode::Usb {
                    // Requested bins [l, r) land on IFFT bins [m, m + N).
                    let copy_l = 0.max(audio_m_rel);
                    let copy_r = len.min(audio_m_rel + n);
                    for i in copy_l..copy_r {
                        let dst = (i - audio_m_rel) as usize;
                        if dst < c2r_len {
                            self.buf_in[dst] = spectrum_slice[i as usize];
                        }
                    }
                } else {
                    // LSB mirrors: bins [m - N + 1, m + 1) reversed.
                    let copy_l = 0.max(audio_m_rel - n + 1);
                    let copy_r = len.min(audio_m_rel + 1);
                    if copy_r >= copy_l {
                        let dst0 = (audio_m_rel - copy_r + 1) as usize;
                        let count = (copy_r - copy_l) as usize;
                        for k in 0..count {
                            let dst = dst0 + k;
                            if dst < c2r_len {
                                self.buf_in[dst] = spectrum_slice[(copy_r as usize) - 1 - k];
                            }
                        }
                    }
                }

                // realfft flags non-zero DC/Nyquist imaginary parts but still
                // runs the transform; arbitrary slices hit that by design.
                let _ = self.c2r_ifft.process_with_scratch(
                    &mut self.buf_in[..c2r_len],
                    &mut self.real,
                    &mut self.c2r_scratch,
                );

                if mode == DemodulationMode::Lsb {
                    self.real.reverse();
                }

                if invert {
                    negate_f32(&mut self.real);
                }
                add_f32(&mut self.real[..half], &self.real_prev);
            }
            DemodulationMode::Am | DemodulationMode::Fm => {
                self.buf_in.fill(Complex32::new(0.0, 0.0));
                // Positive half of the baseband takes bins [m, m + N/2),
                // the negative half wraps into the tail of the IFFT input.
                let pos_copy_l = 0.max(audio_m_rel);
                let pos_copy_r = len.min(audio_m_rel + half as i32);
                for i in pos_copy_l..pos_copy_r {
                    let dst = (i - audio_m_rel) as usize;
                    self.buf_in[dst] = spectrum_slice[i as usize];
                }
                let neg_copy_l = 0.max(audio_m_rel - half as i32 + 1);
                let neg_copy_r = len.min(audio_m_rel);
                for i in neg_copy_l..neg_copy_r {
                    let dst = (n - (audio_m_rel - i)) as usize;
                    if dst < self.buf_in.len() {
                        self.buf_in[dst] = spectrum_slice[i as usize];
                    }
                }

                self.baseband.copy_from_slice(&self.buf_in);
                self.ifft
                    .process_with_scratch(&mut self.baseband, &mut self.scratch);

                if mode == DemodulationMode::Am && CARRIER_LOCK {
                    // Carrier estimate: the same input low-passed to +-500 Hz.
                    self.carrier.copy_from_slice(&self.buf_in);
                    let cutoff = (500 * self.audio_fft_size / self.audio_rate).min(half);
                    for v in &mut self.carrier[cutoff..self.audio_fft_size - cutoff] {
                        *v = Complex32::new(0.0, 0.0);
                    }
                    self.ifft
                        .process_with_scratch(&mut self.carrier, &mut self.scratch);
                }

                if invert {
                    negate_complex(&mut self.baseband);
                    if mode == DemodulationMode::Am && CARRIER_LOCK {
                        negate_complex(&mut self.carrier);
                    }
                }

                add_complex(&mut self.baseband[..half], &self.baseband_prev);
                if mode == DemodulationMode::Am && CARRIER_LOCK {
                    add_complex(&mut self.carrier[..half], &self.carrier_prev);
                }

                match mode {
                    DemodulationMode::Am => {
                        if CARRIER_LOCK {
                            am_product(
                                &self.baseband[..half],
                                &self.carrier[..half],
                                &mut self.real[..half],
                            );
                        } else {
                            am_envelope(&self.baseband[..half], &mut self.real[..half]);
                        }
                    }
                    DemodulationMode::Fm => {
                        self.fm_prev = polar_discriminator_fm(
                            &self.baseband[..half],
                            self.fm_prev,
                            &mut self.real[..half],
                        );
                    }
                    _ => unreachable!(),
                }
                self.real[half..].fill(0.0);
            }
        }

        if self.real[..half].iter().any(|v| v.is_nan()) {
            anyhow::bail!("NaN in demodulated audio, dropping frame");
        }

        self.real_prev.copy_from_slice(&self.real[half..]);
        self.baseband_prev.copy_from_slice(&self.baseband[half..]);
        self.carrier_prev.copy_from_slice(&self.carrier[half..]);

        let audio_out = &mut self.real[..half];
        self.dc.remove_dc(audio_out);
        self.agc.process(audio_out);
        if params.mute {
            // Muted subscribers keep their overlap/AGC state warm and emit
            // silence, so unmuting is seamless.
            audio_out.fill(0.0);
        }

        float_to_i16_centered(audio_out, &mut self.pcm, PCM_SCALE);

        Ok(AudioFrame {
            pcm: &self.pcm,
            average_power,
        })
    }
}
