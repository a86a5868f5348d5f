use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::error::ConfigError;

/// Short-time analysis settings for the mel power spectrogram.
#[derive(Debug, Clone, PartialEq)]
pub struct MelConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
        }
    }
}

impl MelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_fft < 2 {
            return Err(ConfigError::Mel("n_fft must be at least 2"));
        }
        if self.hop_length == 0 {
            return Err(ConfigError::Mel("hop length must be positive"));
        }
        if self.n_mels == 0 {
            return Err(ConfigError::Mel("at least one mel band is required"));
        }
        Ok(())
    }
}

/// Mel power spectrogram with the window, FFT plan and filterbank computed once.
///
/// Immutable after construction, so one instance is shared by every worker.
pub struct MelSpectrogram {
    config: MelConfig,
    window: Vec<f32>,
    filterbank: Vec<Vec<f32>>,
    fft: Arc<dyn Fft<f32>>,
}

impl MelSpectrogram {
    pub fn new(config: MelConfig, sample_rate: u32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.n_fft);
        Self {
            window: hann_window(config.n_fft),
            filterbank: mel_filterbank(config.n_fft, config.n_mels, sample_rate),
            fft,
            config,
        }
    }

    /// Centered STFT power projected onto the mel bands, `[n_mels][frames]`.
    ///
    /// The signal is zero padded by `n_fft / 2` on both sides, so any non-empty input
    /// yields at least one frame.
    pub fn power(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let pad = n_fft / 2;
        let num_bins = n_fft / 2 + 1;

        let padded_len = samples.len() + 2 * pad;
        let num_frames = (padded_len - n_fft) / hop + 1;
        let sample_at = |i: usize| -> f32 {
            if i < pad || i - pad >= samples.len() {
                0.0
            } else {
                samples[i - pad]
            }
        };

        let mut mel = vec![vec![0.0f32; num_frames]; self.config.n_mels];
        let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];
        let mut spectrum = vec![0.0f32; num_bins];

        for frame_idx in 0..num_frames {
            let start = frame_idx * hop;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(sample_at(start + i) * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);

            for (bin, c) in buffer[..num_bins].iter().enumerate() {
                spectrum[bin] = c.norm_sqr();
            }
            for (band, filter) in self.filterbank.iter().enumerate() {
                mel[band][frame_idx] = filter
                    .iter()
                    .zip(spectrum.iter())
                    .map(|(&w, &p)| w * p)
                    .sum();
            }
        }

        mel
    }
}

/// Converts power to decibels relative to the frame's own maximum, floored at
/// `max - top_db`.
pub fn power_to_db(power: &[Vec<f32>], amin: f32, top_db: f32) -> Vec<Vec<f32>> {
    let reference = power
        .iter()
        .flat_map(|row| row.iter().copied())
        .fold(0.0f32, f32::max);
    let ref_db = 10.0 * reference.max(amin).log10();

    let mut db: Vec<Vec<f32>> = power
        .iter()
        .map(|row| row.iter().map(|&p| 10.0 * p.max(amin).log10() - ref_db).collect())
        .collect();

    let peak = db
        .iter()
        .flat_map(|row| row.iter().copied())
        .fold(f32::NEG_INFINITY, f32::max);
    let floor = peak - top_db;
    for v in db.iter_mut().flatten() {
        *v = v.max(floor);
    }
    db
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
        .collect()
}

// Slaney mel scale: linear below 1 kHz, logarithmic above.
const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        mel * F_SP
    }
}

/// Triangular filters between 0 Hz and Nyquist, each normalised to unit area.
fn mel_filterbank(n_fft: usize, n_mels: usize, sample_rate: u32) -> Vec<Vec<f32>> {
    let num_bins = n_fft / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;

    let fft_freqs: Vec<f64> = (0..num_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let max_mel = hz_to_mel(nyquist);
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            let enorm = 2.0 / (hi - lo);
            fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - lo) / (center - lo);
                    let upper = (hi - f) / (hi - center);
                    (lower.min(upper).max(0.0) * enorm) as f32
                })
                .collect()
        })
        .collect()
}
