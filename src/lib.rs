//! Training-pair feed for speech enhancement.
//!
//! Samples raw audio, distorts it with randomized noise, reverberation and
//! competing voices, and streams (clean, distorted) log-mel feature pairs:
//! - Audio pools from manifests or recursive directory scans
//! - Random crop / random-position padding to a fixed frame
//! - Effect pipelines with a resolve/apply split for synchronized distortion
//! - Samplers producing one example per call
//! - Threaded loader yielding fixed-size batches forever

pub mod config;
pub mod decode;
pub mod effects;
pub mod feed;
pub mod loader;
pub mod sampler;
pub mod source;
pub mod spectrogram;
pub mod window;

#[cfg(test)]
mod test_util;

pub use config::{AudioConfig, Config};
pub use effects::{Distorter, EffectSpec, Pipeline, Resolved, SignalEffect};
pub use feed::{Batch, Feed};
pub use loader::{Loader, clean_loader, distorted_loader, mixed_loader};
pub use sampler::{Example, Sampler};
pub use source::{AudioPool, DatasetRoot};
pub use spectrogram::{Features, SpectrogramTransform};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Source(#[from] source::SourceError),
    #[error(transparent)]
    Effect(#[from] effects::EffectError),
    #[error("feature extraction failed: {0}")]
    Features(#[from] realfft::FftError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("example shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
    #[error("loader worker failed: {0}")]
    Worker(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
