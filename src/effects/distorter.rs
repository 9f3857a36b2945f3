//! Reverberation + background noise distortion built from the fixed
//! auxiliary resource locations.

use super::{EffectError, EffectSpec, Pipeline, SignalEffect};
use crate::config::ResourceConfig;
use crate::source::{AudioPool, SourceError};
use rand::rngs::StdRng;

/// Distorter for the distorted sampler.
#[derive(Debug, Clone)]
pub struct Distorter {
    pipeline: Pipeline,
}

impl Distorter {
    pub fn new(rir: AudioPool, bg: AudioPool) -> Self {
        let pipeline = Pipeline::new([
            EffectSpec::Reverb {
                pool: rir,
                max_ir_seconds: 1.0,
            }
            .with_probability(0.5),
            EffectSpec::BackgroundNoise {
                pool: bg,
                snr_db: 0.0..=30.0,
            }
            .with_probability(0.9),
            EffectSpec::Gain {
                gain_db: -6.0..=0.0,
            }
            .with_probability(0.5),
        ]);
        Self { pipeline }
    }

    /// Load the impulse-response manifest and the noise directory. Either
    /// missing is an error here rather than on first use.
    pub fn from_resources(resources: &ResourceConfig) -> Result<Self, SourceError> {
        if !resources.rir_manifest.is_file() {
            return Err(SourceError::MissingRoot(resources.rir_manifest.clone()));
        }
        let rir = AudioPool::from_list_file(&resources.rir_manifest)?;
        let bg = AudioPool::scan(&[&resources.noise_dir], &["wav"])?;
        Ok(Self::new(rir, bg))
    }

    pub fn with_decode_attempts(mut self, attempts: usize) -> Self {
        self.pipeline = self.pipeline.with_decode_attempts(attempts);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl SignalEffect for Distorter {
    fn process(
        &self,
        signal: &[f32],
        sample_rate: u32,
        rng: &mut StdRng,
    ) -> Result<Vec<f32>, EffectError> {
        self.pipeline.process(signal, sample_rate, rng)
    }
}
