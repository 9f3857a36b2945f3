//! Randomized effect pipelines with a resolve/apply split.
//!
//! `Pipeline::resolve` draws every random decision of every step (which noise
//! file, which impulse response, gains, offsets, noise seeds) and decodes the
//! chosen resources. `Pipeline::apply` then runs those decisions against a
//! signal without touching the RNG, so one resolved value can be replayed
//! identically on several signals.

mod distorter;
pub mod mix;
pub mod presets;
pub mod reverb;

pub use distorter::Distorter;

use crate::source::{AudioPool, SourceError};
use crate::window::Placement;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, NormalError};
use realfft::FftError;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EffectError {
    #[error("failed to load effect resource: {0}")]
    Source(#[from] SourceError),
    #[error("FFT error: {0}")]
    Fft(#[from] FftError),
    #[error("invalid gaussian noise parameters: {0}")]
    Normal(#[from] NormalError),
    #[error("parameters resolved at {resolved} Hz applied at {applied} Hz")]
    SampleRateMismatch { resolved: u32, applied: u32 },
    #[error("resolved value has {resolved} steps but the pipeline has {expected}")]
    StepCountMismatch { resolved: usize, expected: usize },
}

/// One kind of randomized transform and the ranges it draws from.
#[derive(Debug, Clone)]
pub enum EffectSpec {
    /// Additive background noise at an SNR drawn from `snr_db`.
    BackgroundNoise {
        pool: AudioPool,
        snr_db: RangeInclusive<f32>,
    },
    /// Convolution with an impulse response of at most `max_ir_seconds`.
    Reverb { pool: AudioPool, max_ir_seconds: f32 },
    /// Competing voice windowed to the signal length, `level_db` relative
    /// to the signal.
    Voice {
        pool: AudioPool,
        level_db: RangeInclusive<f32>,
    },
    Gain { gain_db: RangeInclusive<f32> },
    /// White gaussian noise with a standard deviation drawn from `amplitude`.
    GaussianNoise { amplitude: RangeInclusive<f32> },
}

impl EffectSpec {
    pub fn with_probability(self, probability: f64) -> Step {
        Step {
            effect: self,
            probability,
        }
    }
}

/// A pipeline step: an effect applied with some probability.
#[derive(Debug, Clone)]
pub struct Step {
    pub effect: EffectSpec,
    pub probability: f64,
}

impl From<EffectSpec> for Step {
    fn from(effect: EffectSpec) -> Self {
        effect.with_probability(1.0)
    }
}

/// Concrete draw for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedStep {
    Skipped,
    BackgroundNoise {
        source: PathBuf,
        clip: Arc<[f32]>,
        /// Start position as a fraction of the clip length.
        offset: f64,
        snr_db: f32,
    },
    Reverb {
        source: PathBuf,
        /// Peak-aligned, truncated, unit-energy response.
        ir: Arc<[f32]>,
    },
    Voice {
        source: PathBuf,
        clip: Arc<[f32]>,
        /// Window position in `[0, 1)`, see `Placement::at`.
        position: f64,
        level_db: f32,
    },
    Gain {
        gain_db: f32,
    },
    GaussianNoise {
        seed: u64,
        amplitude: f32,
    },
}

/// All random decisions of one pipeline, ready to be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    sample_rate: u32,
    steps: Vec<ResolvedStep>,
}

impl Resolved {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn steps(&self) -> &[ResolvedStep] {
        &self.steps
    }
}

/// Ordered composition of effect steps.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    steps: Vec<Step>,
    max_decode_attempts: usize,
}

impl Pipeline {
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
            max_decode_attempts: 1,
        }
    }

    /// Redraw resource files this many times before a decode failure is fatal.
    pub fn with_decode_attempts(mut self, attempts: usize) -> Self {
        self.max_decode_attempts = attempts.max(1);
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Draw every random decision. Decodes the chosen resources but never
    /// looks at the signal.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        sample_rate: u32,
    ) -> Result<Resolved, EffectError> {
        let mut steps = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            if !rng.gen_bool(step.probability.clamp(0.0, 1.0)) {
                steps.push(ResolvedStep::Skipped);
                continue;
            }
            steps.push(self.resolve_effect(&step.effect, rng, sample_rate)?);
        }
        Ok(Resolved { sample_rate, steps })
    }

    fn resolve_effect<R: Rng + ?Sized>(
        &self,
        effect: &EffectSpec,
        rng: &mut R,
        sample_rate: u32,
    ) -> Result<ResolvedStep, EffectError> {
        let attempts = self.max_decode_attempts.max(1);
        let resolved = match effect {
            EffectSpec::BackgroundNoise { pool, snr_db } => {
                let (source, clip) = pool.sample_one_retrying(rng, sample_rate, attempts)?;
                ResolvedStep::BackgroundNoise {
                    source,
                    clip: clip.into(),
                    offset: rng.gen_range(0.0..1.0),
                    snr_db: draw(rng, snr_db),
                }
            }
            EffectSpec::Reverb {
                pool,
                max_ir_seconds,
            } => {
                let (source, ir) = pool.sample_one_retrying(rng, sample_rate, attempts)?;
                let max_len = (*max_ir_seconds as f64 * sample_rate as f64) as usize;
                match reverb::prepare_ir(&ir, max_len) {
                    Some(ir) => ResolvedStep::Reverb {
                        source,
                        ir: ir.into(),
                    },
                    None => {
                        tracing::debug!(path = %source.display(), "Silent impulse response, skipping reverb");
                        ResolvedStep::Skipped
                    }
                }
            }
            EffectSpec::Voice { pool, level_db } => {
                let (source, clip) = pool.sample_one_retrying(rng, sample_rate, attempts)?;
                ResolvedStep::Voice {
                    source,
                    clip: clip.into(),
                    position: rng.gen_range(0.0..1.0),
                    level_db: draw(rng, level_db),
                }
            }
            EffectSpec::Gain { gain_db } => ResolvedStep::Gain {
                gain_db: draw(rng, gain_db),
            },
            EffectSpec::GaussianNoise { amplitude } => ResolvedStep::GaussianNoise {
                seed: rng.next_u64(),
                amplitude: draw(rng, amplitude),
            },
        };
        Ok(resolved)
    }

    /// Run resolved decisions against `signal`. Deterministic: the same
    /// `(signal, resolved)` always yields the same output.
    pub fn apply(
        &self,
        signal: &[f32],
        sample_rate: u32,
        resolved: &Resolved,
    ) -> Result<Vec<f32>, EffectError> {
        if resolved.sample_rate != sample_rate {
            return Err(EffectError::SampleRateMismatch {
                resolved: resolved.sample_rate,
                applied: sample_rate,
            });
        }
        if resolved.steps.len() != self.steps.len() {
            return Err(EffectError::StepCountMismatch {
                resolved: resolved.steps.len(),
                expected: self.steps.len(),
            });
        }

        let mut out = signal.to_vec();
        for step in &resolved.steps {
            out = apply_step(&out, step)?;
        }
        Ok(out)
    }

    /// Resolve and apply in one go, for signals that share nothing.
    pub fn process<R: Rng + ?Sized>(
        &self,
        signal: &[f32],
        sample_rate: u32,
        rng: &mut R,
    ) -> Result<Vec<f32>, EffectError> {
        let resolved = self.resolve(rng, sample_rate)?;
        self.apply(signal, sample_rate, &resolved)
    }
}

fn apply_step(signal: &[f32], step: &ResolvedStep) -> Result<Vec<f32>, EffectError> {
    let out = match step {
        ResolvedStep::Skipped => signal.to_vec(),
        ResolvedStep::BackgroundNoise {
            clip,
            offset,
            snr_db,
            ..
        } => {
            let noise = mix::tile(clip, *offset, signal.len());
            mix::mix_at_snr(signal, &noise, *snr_db)
        }
        ResolvedStep::Reverb { ir, .. } => reverb::reverberate(signal, ir)?,
        ResolvedStep::Voice {
            clip,
            position,
            level_db,
            ..
        } => {
            let voice = Placement::at(clip.len(), signal.len(), *position).apply(clip, signal.len());
            mix::mix_relative(signal, &voice, *level_db)
        }
        ResolvedStep::Gain { gain_db } => {
            let g = mix::db_to_amplitude(*gain_db);
            signal.iter().map(|s| s * g).collect()
        }
        ResolvedStep::GaussianNoise { seed, amplitude } => {
            let normal = Normal::new(0.0f32, *amplitude)?;
            let mut rng = StdRng::seed_from_u64(*seed);
            signal.iter().map(|s| s + normal.sample(&mut rng)).collect()
        }
    };
    Ok(out)
}

fn draw<R: Rng + ?Sized>(rng: &mut R, range: &RangeInclusive<f32>) -> f32 {
    let (lo, hi) = (*range.start(), *range.end());
    if lo >= hi { lo } else { rng.gen_range(lo..=hi) }
}

/// A randomized signal transform, as taken by the effected sampler.
pub trait SignalEffect: Send + Sync {
    fn process(
        &self,
        signal: &[f32],
        sample_rate: u32,
        rng: &mut StdRng,
    ) -> Result<Vec<f32>, EffectError>;
}

impl SignalEffect for Pipeline {
    fn process(
        &self,
        signal: &[f32],
        sample_rate: u32,
        rng: &mut StdRng,
    ) -> Result<Vec<f32>, EffectError> {
        let resolved = self.resolve(rng, sample_rate)?;
        self.apply(signal, sample_rate, &resolved)
    }
}

impl<F> SignalEffect for F
where
    F: Fn(&[f32], u32, &mut StdRng) -> Result<Vec<f32>, EffectError> + Send + Sync,
{
    fn process(
        &self,
        signal: &[f32],
        sample_rate: u32,
        rng: &mut StdRng,
    ) -> Result<Vec<f32>, EffectError> {
        self(signal, sample_rate, rng)
    }
}
