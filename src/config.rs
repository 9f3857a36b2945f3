//! Static configuration: audio feature parameters, auxiliary resource
//! locations and sampling policy.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
}

/// Feature extraction parameters shared by every sampler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_n_fft")]
    pub n_fft: usize,
    #[serde(default = "default_n_mels")]
    pub n_mels: usize,
    #[serde(default = "default_hop_size")]
    pub hop_size: usize,
    #[serde(default = "default_win_size")]
    pub win_size: usize,
    #[serde(default)]
    pub mel_norm: MelNorm,
    #[serde(default)]
    pub mel_scale: MelScale,
    #[serde(default)]
    pub f_min: f32,
    /// Upper filterbank edge; Nyquist when unset.
    #[serde(default)]
    pub f_max: Option<f32>,
}

/// Mel filterbank area normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MelNorm {
    None,
    #[default]
    Slaney,
}

/// Hz <-> mel conversion formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MelScale {
    Htk,
    #[default]
    Slaney,
}

/// Locations of the reverberation and background-noise recordings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Newline-delimited list of impulse responses, relative to its directory.
    #[serde(default = "default_rir_manifest")]
    pub rir_manifest: PathBuf,
    /// Directory scanned recursively for `.wav` noise recordings.
    #[serde(default = "default_noise_dir")]
    pub noise_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Probability that the mixed sampler draws a real target clip.
    #[serde(default = "default_voiced_probability")]
    pub voiced_probability: f64,
    /// Consecutive decode failures tolerated before sampling gives up.
    #[serde(default = "default_max_decode_attempts")]
    pub max_decode_attempts: usize,
    /// Batches buffered per loader worker.
    #[serde(default = "default_prefetch_batches")]
    pub prefetch_batches: usize,
}

fn default_sample_rate() -> u32 {
    24000
}

fn default_n_fft() -> usize {
    1024
}

fn default_n_mels() -> usize {
    100
}

fn default_hop_size() -> usize {
    256
}

fn default_win_size() -> usize {
    1024
}

fn default_rir_manifest() -> PathBuf {
    PathBuf::from("./external_datasets/rir-1/files.txt")
}

fn default_noise_dir() -> PathBuf {
    PathBuf::from("./external_datasets/dns-noise")
}

fn default_voiced_probability() -> f64 {
    0.9
}

fn default_max_decode_attempts() -> usize {
    3
}

fn default_prefetch_batches() -> usize {
    2
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            n_fft: default_n_fft(),
            n_mels: default_n_mels(),
            hop_size: default_hop_size(),
            win_size: default_win_size(),
            mel_norm: MelNorm::default(),
            mel_scale: MelScale::default(),
            f_min: 0.0,
            f_max: None,
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            rir_manifest: default_rir_manifest(),
            noise_dir: default_noise_dir(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            voiced_probability: default_voiced_probability(),
            max_decode_attempts: default_max_decode_attempts(),
            prefetch_batches: default_prefetch_batches(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio.sample_rate must be > 0".into()));
        }
        if audio.n_fft == 0 || audio.hop_size == 0 || audio.n_mels == 0 {
            return Err(ConfigError::Invalid(
                "audio.n_fft, audio.hop_size and audio.n_mels must be > 0".into(),
            ));
        }
        if audio.win_size == 0 || audio.win_size > audio.n_fft {
            return Err(ConfigError::Invalid(format!(
                "audio.win_size must be in 1..={}, got {}",
                audio.n_fft, audio.win_size
            )));
        }
        if !(0.0..=1.0).contains(&self.sampling.voiced_probability) {
            return Err(ConfigError::Invalid(
                "sampling.voiced_probability must be within [0, 1]".into(),
            ));
        }
        if self.sampling.max_decode_attempts == 0 {
            return Err(ConfigError::Invalid(
                "sampling.max_decode_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }
}
