//! Spectrogram computation: centered STFT -> mel filterbank -> log.
//!
//! Features handed to training are time-major and stored in half precision.

use crate::config::{AudioConfig, MelNorm, MelScale};
use half::f16;
use realfft::{FftError, RealFftPlanner, RealToComplex};
use std::f32::consts::PI;
use std::sync::Arc;

/// Floor applied before the log.
const LOG_FLOOR: f32 = 1e-5;

/// Spectrogram configuration.
#[derive(Debug, Clone)]
pub struct SpectrogramConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub win_length: usize,
    pub n_mels: usize,
    pub f_min: f32,
    pub f_max: f32,
    pub mel_norm: MelNorm,
    pub mel_scale: MelScale,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

impl From<&AudioConfig> for SpectrogramConfig {
    fn from(audio: &AudioConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            n_fft: audio.n_fft,
            hop_length: audio.hop_size,
            win_length: audio.win_size.min(audio.n_fft),
            n_mels: audio.n_mels,
            f_min: audio.f_min,
            f_max: audio.f_max.unwrap_or(audio.sample_rate as f32 / 2.0),
            mel_norm: audio.mel_norm,
            mel_scale: audio.mel_scale,
        }
    }
}

/// Time-major log-mel features, `[n_frames, n_mels]`, half precision.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    pub data: Vec<f16>,
    pub n_frames: usize,
    pub n_mels: usize,
}

impl Features {
    /// Transpose a mel-major `[n_mels, n_frames]` spectrogram.
    pub fn from_mel_major(spec: &[f32], n_mels: usize, n_frames: usize) -> Self {
        let mut data = Vec::with_capacity(n_mels * n_frames);
        for frame in 0..n_frames {
            for mel in 0..n_mels {
                data.push(f16::from_f32(spec[mel * n_frames + frame]));
            }
        }
        Self {
            data,
            n_frames,
            n_mels,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_frames, self.n_mels)
    }

    pub fn get(&self, frame: usize, mel: usize) -> f32 {
        self.data[frame * self.n_mels + mel].to_f32()
    }
}

/// Precomputed spectrogram transform. Immutable, shared across workers.
pub struct SpectrogramTransform {
    config: SpectrogramConfig,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    mel_filterbank: Vec<Vec<f32>>, // [n_mels, n_fft/2 + 1]
}

impl SpectrogramTransform {
    pub fn new(config: SpectrogramConfig) -> Self {
        let mut planner = RealFftPlanner::new();
        let fft = planner.plan_fft_forward(config.n_fft);

        // Periodic Hann window of win_length, centered inside n_fft
        let win_length = config.win_length.min(config.n_fft);
        let offset = (config.n_fft - win_length) / 2;
        let mut window = vec![0.0f32; config.n_fft];
        for i in 0..win_length {
            window[offset + i] = 0.5 * (1.0 - (2.0 * PI * i as f32 / win_length as f32).cos());
        }

        let mel_filterbank = create_mel_filterbank(&config);

        Self {
            config,
            fft,
            window,
            mel_filterbank,
        }
    }

    pub fn from_audio_config(audio: &AudioConfig) -> Self {
        Self::new(SpectrogramConfig::from(audio))
    }

    pub fn config(&self) -> &SpectrogramConfig {
        &self.config
    }

    /// Compute log-mel spectrogram from waveform.
    /// Input: mono audio samples at config.sample_rate
    /// Output: [n_mels, n_frames] log-mel spectrogram
    pub fn transform(&self, samples: &[f32]) -> Result<Vec<f32>, FftError> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let n_mels = self.config.n_mels;

        let padded = center_pad(samples, n_fft / 2);
        let (_, n_frames) = self.output_shape(samples.len());

        let mut spectrogram = vec![0.0f32; n_mels * n_frames];

        // Scratch buffers
        let mut input = vec![0.0f32; n_fft];
        let mut spectrum = self.fft.make_output_vec();
        let mut power = vec![0.0f32; spectrum.len()];

        for frame in 0..n_frames {
            let start = frame * hop;

            for i in 0..n_fft {
                input[i] = padded.get(start + i).copied().unwrap_or(0.0) * self.window[i];
            }

            self.fft.process(&mut input, &mut spectrum)?;

            for (p, c) in power.iter_mut().zip(&spectrum) {
                *p = c.norm_sqr();
            }

            for (mel_idx, mel_filter) in self.mel_filterbank.iter().enumerate() {
                let mel_energy: f32 = mel_filter.iter().zip(&power).map(|(w, p)| w * p).sum();
                spectrogram[mel_idx * n_frames + frame] = mel_energy.max(LOG_FLOOR).ln();
            }
        }

        Ok(spectrogram)
    }

    /// Time-major half-precision features for a waveform.
    pub fn features(&self, samples: &[f32]) -> Result<Features, FftError> {
        let spec = self.transform(samples)?;
        let (n_mels, n_frames) = self.output_shape(samples.len());
        Ok(Features::from_mel_major(&spec, n_mels, n_frames))
    }

    /// Get output shape `(n_mels, n_frames)` for a given input length.
    pub fn output_shape(&self, n_samples: usize) -> (usize, usize) {
        let pad = self.config.n_fft / 2;
        let padded = n_samples + 2 * pad;
        let n_frames = if padded >= self.config.n_fft {
            (padded - self.config.n_fft) / self.config.hop_length + 1
        } else {
            0
        };
        (self.config.n_mels, n_frames)
    }
}

/// Reflect-pad both ends; zero-pad when the signal is too short to reflect.
fn center_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    let n = samples.len();
    let mut padded = Vec::with_capacity(n + 2 * pad);
    if n > pad {
        padded.extend((1..=pad).rev().map(|i| samples[i]));
        padded.extend_from_slice(samples);
        padded.extend((0..pad).map(|i| samples[n - 2 - i]));
    } else {
        padded.resize(pad, 0.0);
        padded.extend_from_slice(samples);
        padded.resize(n + 2 * pad, 0.0);
    }
    padded
}

fn hz_to_mel(hz: f32, scale: MelScale) -> f32 {
    match scale {
        MelScale::Htk => 2595.0 * (1.0 + hz / 700.0).log10(),
        MelScale::Slaney => {
            let f_sp = 200.0 / 3.0;
            let min_log_hz = 1000.0;
            let min_log_mel = min_log_hz / f_sp;
            let logstep = 6.4f32.ln() / 27.0;
            if hz >= min_log_hz {
                min_log_mel + (hz / min_log_hz).ln() / logstep
            } else {
                hz / f_sp
            }
        }
    }
}

fn mel_to_hz(mel: f32, scale: MelScale) -> f32 {
    match scale {
        MelScale::Htk => 700.0 * (10.0f32.powf(mel / 2595.0) - 1.0),
        MelScale::Slaney => {
            let f_sp = 200.0 / 3.0;
            let min_log_hz = 1000.0;
            let min_log_mel = min_log_hz / f_sp;
            let logstep = 6.4f32.ln() / 27.0;
            if mel >= min_log_mel {
                min_log_hz * (logstep * (mel - min_log_mel)).exp()
            } else {
                mel * f_sp
            }
        }
    }
}

/// Triangular filters over the linear FFT bin frequencies.
fn create_mel_filterbank(config: &SpectrogramConfig) -> Vec<Vec<f32>> {
    let n_bins = config.n_fft / 2 + 1;
    let n_mels = config.n_mels;
    let nyquist = config.sample_rate as f32 / 2.0;

    let bin_freqs: Vec<f32> = (0..n_bins)
        .map(|k| nyquist * k as f32 / (n_bins - 1).max(1) as f32)
        .collect();

    let mel_min = hz_to_mel(config.f_min, config.mel_scale);
    let mel_max = hz_to_mel(config.f_max, config.mel_scale);

    // n_mels + 2 edges
    let hz_points: Vec<f32> = (0..=n_mels + 1)
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
        .map(|m| mel_to_hz(m, config.mel_scale))
        .collect();

    let mut filterbank = vec![vec![0.0f32; n_bins]; n_mels];

    for (m, filter) in filterbank.iter_mut().enumerate() {
        let (left, center, right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
        let enorm = match config.mel_norm {
            MelNorm::Slaney => 2.0 / (right - left),
            MelNorm::None => 1.0,
        };

        for (weight, &f) in filter.iter_mut().zip(&bin_freqs) {
            let rising = (f - left) / (center - left);
            let falling = (right - f) / (right - center);
            *weight = rising.min(falling).max(0.0) * enorm;
        }
    }

    filterbank
}
