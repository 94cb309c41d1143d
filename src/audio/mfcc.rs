//! Streaming MFCC frontend feeding the wake-word model.
//!
//! `agent-edge-rs` fed its wake-word model a TFLite melspectrogram model
//! (`src/models/melspectrogram.rs`); this firmware target instead needs
//! a self-contained DSP frontend, so the FFT/windowing machinery is
//! grounded on the `rustfft` usage pattern in
//! `other_examples/713c9085_KSattaluri-MangoChat` rather than on the
//! teacher directly, with a standard mel filterbank + DCT-II stage
//! added on top to produce classic MFCCs.

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

/// Analysis window length in samples (25ms @ 16kHz).
pub const WINDOW_SAMPLES: usize = 400;
/// Hop between successive analysis windows (10ms @ 16kHz).
pub const HOP_SAMPLES: usize = 160;
/// FFT size (next power of two at or above `WINDOW_SAMPLES`).
pub const FFT_SIZE: usize = 512;
/// Mel filterbank channels.
pub const N_MELS: usize = 26;
/// Cepstral coefficients kept per frame.
pub const N_MFCC: usize = 13;
/// Frames of MFCC context the wake-word model consumes per inference.
pub const N_FRAMES: usize = 32;
/// Flattened feature vector size handed to the wake-word model.
pub const FEATURE_SIZE: usize = N_FRAMES * N_MFCC;

pub struct MfccFrontend {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    mel_filterbank: Vec<Vec<f32>>, // N_MELS x (FFT_SIZE/2 + 1)
    dct_matrix: Vec<Vec<f32>>,     // N_MFCC x N_MELS
    sample_buf: VecDeque<i16>,
    frames: VecDeque<[f32; N_MFCC]>,
}

impl MfccFrontend {
    pub fn new(sample_rate: u32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let window = hann_window(WINDOW_SAMPLES);
        let mel_filterbank = mel_filterbank(sample_rate as f32, FFT_SIZE, N_MELS);
        let dct_matrix = dct2_matrix(N_MFCC, N_MELS);
        Self {
            fft,
            window,
            mel_filterbank,
            dct_matrix,
            sample_buf: VecDeque::with_capacity(WINDOW_SAMPLES * 2),
            frames: VecDeque::with_capacity(N_FRAMES),
        }
    }

    pub fn reset(&mut self) {
        self.sample_buf.clear();
        self.frames.clear();
    }

    /// Push new PCM samples through the frontend. Returns `true` exactly
    /// on hops where a full `N_FRAMES`-deep feature window is available
    /// via `get_features`, matching the fixed-stride readiness contract
    /// the wake-word task polls.
    pub fn process_samples(&mut self, samples: &[i16]) -> bool {
        self.sample_buf.extend(samples.iter().copied());

        let mut became_ready = false;
        while self.sample_buf.len() >= WINDOW_SAMPLES {
            let window_samples: Vec<i16> = self.sample_buf.iter().take(WINDOW_SAMPLES).copied().collect();
            let mfcc = self.compute_mfcc(&window_samples);

            if self.frames.len() == N_FRAMES {
                self.frames.pop_front();
            }
            self.frames.push_back(mfcc);

            for _ in 0..HOP_SAMPLES.min(self.sample_buf.len()) {
                self.sample_buf.pop_front();
            }

            if self.frames.len() == N_FRAMES {
                became_ready = true;
            }
        }
        became_ready
    }

    /// Flattened `[frame0_mfcc..., frame1_mfcc..., ...]` feature vector,
    /// or `None` until the frame window has filled.
    pub fn get_features(&self) -> Option<Vec<f32>> {
        if self.frames.len() < N_FRAMES {
            return None;
        }
        let mut out = Vec::with_capacity(FEATURE_SIZE);
        for frame in &self.frames {
            out.extend_from_slice(frame);
        }
        Some(out)
    }

    fn compute_mfcc(&self, window_samples: &[i16]) -> [f32; N_MFCC] {
        let mut buf: Vec<Complex32> = (0..FFT_SIZE)
            .map(|i| {
                if i < window_samples.len() {
                    let s = window_samples[i] as f32 / i16::MAX as f32;
                    Complex32::new(s * self.window[i], 0.0)
                } else {
                    Complex32::new(0.0, 0.0)
                }
            })
            .collect();
        self.fft.process(&mut buf);

        let n_bins = FFT_SIZE / 2 + 1;
        let power: Vec<f32> = buf[..n_bins].iter().map(|c| c.norm_sqr()).collect();

        let mut mel_energies = vec![0.0f32; N_MELS];
        for (m, filt) in self.mel_filterbank.iter().enumerate() {
            let mut acc = 0.0;
            for (bin, coeff) in filt.iter().enumerate() {
                acc += coeff * power[bin];
            }
            mel_energies[m] = (acc.max(1e-10)).ln();
        }

        let mut mfcc = [0.0f32; N_MFCC];
        for (c, row) in self.dct_matrix.iter().enumerate() {
            mfcc[c] = row.iter().zip(mel_energies.iter()).map(|(a, b)| a * b).sum();
        }
        mfcc
    }
}

fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / (n as f32 - 1.0)).cos())
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Standard triangular mel filterbank over FFT bin power, HTK-style.
fn mel_filterbank(sample_rate: f32, fft_size: usize, n_mels: usize) -> Vec<Vec<f32>> {
    let n_bins = fft_size / 2 + 1;
    let nyquist = sample_rate / 2.0;
    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(nyquist);

    let mel_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
        .collect();
    let hz_points: Vec<f32> = mel_points.iter().map(|&m| mel_to_hz(m)).collect();
    let bin_points: Vec<usize> = hz_points
        .iter()
        .map(|&hz| ((fft_size as f32 + 1.0) * hz / sample_rate).floor() as usize)
        .map(|b| b.min(n_bins - 1))
        .collect();

    let mut filterbank = vec![vec![0.0f32; n_bins]; n_mels];
    for m in 0..n_mels {
        let (left, center, right) = (bin_points[m], bin_points[m + 1], bin_points[m + 2]);
        for bin in left..center.max(left + 1) {
            if bin >= n_bins {
                break;
            }
            if center > left {
                filterbank[m][bin] = (bin - left) as f32 / (center - left) as f32;
            }
        }
        for bin in center..right.max(center + 1) {
            if bin >= n_bins {
                break;
            }
            if right > center {
                filterbank[m][bin] = (right - bin) as f32 / (right - center) as f32;
            }
        }
    }
    filterbank
}

/// DCT-II basis, orthonormalized, as used to decorrelate log-mel energies
/// into cepstral coefficients.
fn dct2_matrix(n_mfcc: usize, n_mels: usize) -> Vec<Vec<f32>> {
    let mut matrix = vec![vec![0.0f32; n_mels]; n_mfcc];
    for k in 0..n_mfcc {
        for n in 0..n_mels {
            let scale = if k == 0 {
                (1.0 / n_mels as f32).sqrt()
            } else {
                (2.0 / n_mels as f32).sqrt()
            };
            matrix[k][n] = scale * (PI / n_mels as f32 * (n as f32 + 0.5) * k as f32).cos();
        }
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_are_none_before_window_fills() {
        let mut mfcc = MfccFrontend::new(16_000);
        assert!(mfcc.get_features().is_none());
        mfcc.process_samples(&vec![0i16; HOP_SAMPLES]);
        assert!(mfcc.get_features().is_none());
    }

    #[test]
    fn features_become_ready_after_enough_hops() {
        let mut mfcc = MfccFrontend::new(16_000);
        let needed_samples = WINDOW_SAMPLES + HOP_SAMPLES * (N_FRAMES - 1) + HOP_SAMPLES;
        let samples = vec![0i16; needed_samples];
        let mut ready = false;
        for chunk in samples.chunks(HOP_SAMPLES) {
            if mfcc.process_samples(chunk) {
                ready = true;
            }
        }
        assert!(ready);
        let features = mfcc.get_features().expect("features should be ready");
        assert_eq!(features.len(), FEATURE_SIZE);
    }

    #[test]
    fn reset_clears_accumulated_state() {
        let mut mfcc = MfccFrontend::new(16_000);
        mfcc.process_samples(&vec![100i16; WINDOW_SAMPLES]);
        mfcc.reset();
        assert!(mfcc.get_features().is_none());
    }

    #[test]
    fn mel_filterbank_rows_sum_to_nonzero_weight() {
        let fb = mel_filterbank(16_000.0, FFT_SIZE, N_MELS);
        for row in &fb {
            let sum: f32 = row.iter().sum();
            assert!(sum > 0.0);
        }
    }
}
