//! Samplers: one training example per call.
//!
//! Each sampler holds read-only pools, pipelines and the shared spectrogram
//! transform. All randomness comes from the RNG passed to `sample`, so one
//! sampler can be shared by any number of workers.

use crate::config::Config;
use crate::effects::presets::{
    light_noisy_common_pipeline, light_noisy_pipeline, light_noisy_voiced_pipeline,
};
use crate::effects::{Distorter, Pipeline, SignalEffect};
use crate::source::{AudioPool, DatasetRoot};
use crate::spectrogram::{Features, SpectrogramTransform};
use crate::{Error, Result, window};
use rand::Rng;
use rand::rngs::StdRng;
use std::sync::Arc;

/// One training example. `distorted` is absent only for the clean sampler;
/// waveforms are present when the sampler was built with `return_source`.
#[derive(Debug, Clone)]
pub struct Example {
    pub clean: Features,
    pub distorted: Option<Features>,
    pub clean_audio: Option<Vec<f32>>,
    pub distorted_audio: Option<Vec<f32>>,
}

/// Produces training examples from a caller-owned RNG.
pub trait Sampler: Send + Sync {
    fn sample(&self, rng: &mut StdRng) -> Result<Example>;

    /// Samples per frame.
    fn frame_len(&self) -> usize;
}

/// Framing and feature settings shared by every sampler variant.
#[derive(Clone)]
struct Framing {
    sample_rate: u32,
    frame_len: usize,
    spectrogram: Arc<SpectrogramTransform>,
    return_source: bool,
    max_decode_attempts: usize,
}

impl Framing {
    fn new(config: &Config, duration: f64, return_source: bool) -> Result<Self> {
        config.validate()?;
        let frame_len = window::frame_len(duration, config.audio.sample_rate);
        if frame_len == 0 {
            return Err(Error::InvalidArgument(format!(
                "duration {duration}s yields an empty frame"
            )));
        }
        Ok(Self {
            sample_rate: config.audio.sample_rate,
            frame_len,
            spectrogram: Arc::new(SpectrogramTransform::from_audio_config(&config.audio)),
            return_source,
            max_decode_attempts: config.sampling.max_decode_attempts,
        })
    }

    /// Random file from `pool`, cropped or padded to one frame.
    fn load_frame(&self, pool: &AudioPool, rng: &mut StdRng) -> Result<Vec<f32>> {
        let (_, audio) = pool.sample_one_retrying(rng, self.sample_rate, self.max_decode_attempts)?;
        Ok(window::fit(&audio, self.frame_len, rng))
    }

    fn single(&self, clean: Vec<f32>) -> Result<Example> {
        let features = self.spectrogram.features(&clean)?;
        Ok(Example {
            clean: features,
            distorted: None,
            clean_audio: self.return_source.then_some(clean),
            distorted_audio: None,
        })
    }

    fn pair(&self, clean: Vec<f32>, distorted: Vec<f32>) -> Result<Example> {
        let clean_features = self.spectrogram.features(&clean)?;
        let distorted_features = self.spectrogram.features(&distorted)?;
        let (clean_audio, distorted_audio) = if self.return_source {
            (Some(clean), Some(distorted))
        } else {
            (None, None)
        };
        Ok(Example {
            clean: clean_features,
            distorted: Some(distorted_features),
            clean_audio,
            distorted_audio,
        })
    }
}

/// Clean frames only, one spectrogram per example.
#[derive(Clone)]
pub struct CleanSampler {
    pool: AudioPool,
    framing: Framing,
}

impl Sampler for CleanSampler {
    fn sample(&self, rng: &mut StdRng) -> Result<Example> {
        let audio = self.framing.load_frame(&self.pool, rng)?;
        self.framing.single(audio)
    }

    fn frame_len(&self) -> usize {
        self.framing.frame_len
    }
}

/// Clean frame paired with the output of an arbitrary effect.
pub struct EffectedSampler<E> {
    pool: AudioPool,
    effect: Arc<E>,
    framing: Framing,
}

impl<E> Clone for EffectedSampler<E> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            effect: Arc::clone(&self.effect),
            framing: self.framing.clone(),
        }
    }
}

impl<E: SignalEffect> Sampler for EffectedSampler<E> {
    fn sample(&self, rng: &mut StdRng) -> Result<Example> {
        let audio = self.framing.load_frame(&self.pool, rng)?;
        let effected = self.effect.process(&audio, self.framing.sample_rate, rng)?;
        if effected.len() != audio.len() {
            return Err(Error::ShapeMismatch {
                expected: format!("{} samples", audio.len()),
                actual: format!("{} samples from effect", effected.len()),
            });
        }
        self.framing.pair(audio, effected)
    }

    fn frame_len(&self) -> usize {
        self.framing.frame_len
    }
}

/// Effected sampler distorting with reverberation and background noise.
pub type DistortedSampler = EffectedSampler<Distorter>;

/// How the mixed sampler builds its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetChoice {
    /// Real clip as target, voiced pipeline for the input.
    FromVoicedTarget,
    /// Silent target, light noise only for the input.
    FromSilence,
}

impl TargetChoice {
    pub fn draw<R: Rng + ?Sized>(rng: &mut R, voiced_probability: f64) -> Self {
        if rng.gen_bool(voiced_probability.clamp(0.0, 1.0)) {
            TargetChoice::FromVoicedTarget
        } else {
            TargetChoice::FromSilence
        }
    }
}

/// Speech-in-clutter and noise-only examples, with a common perturbation
/// shared by target and input.
#[derive(Clone)]
pub struct MixedSampler {
    pool: AudioPool,
    common: Pipeline,
    clean: Pipeline,
    voiced: Pipeline,
    voiced_probability: f64,
    framing: Framing,
}

impl MixedSampler {
    /// Target is a real clip; input is that clip under noise and maybe a
    /// competing voice.
    pub fn voiced_branch(&self, rng: &mut StdRng) -> Result<(Vec<f32>, Vec<f32>)> {
        let target = self.framing.load_frame(&self.pool, rng)?;
        let distorted = self
            .voiced
            .process(&target, self.framing.sample_rate, rng)?;
        Ok((target, distorted))
    }

    /// Target is silence; input is light noise over silence.
    pub fn silence_branch(&self, rng: &mut StdRng) -> Result<(Vec<f32>, Vec<f32>)> {
        let target = vec![0.0; self.framing.frame_len];
        let distorted = self.clean.process(&target, self.framing.sample_rate, rng)?;
        Ok((target, distorted))
    }

    pub fn draw_choice(&self, rng: &mut StdRng) -> TargetChoice {
        TargetChoice::draw(rng, self.voiced_probability)
    }
}

impl Sampler for MixedSampler {
    fn sample(&self, rng: &mut StdRng) -> Result<Example> {
        let (target, distorted) = match self.draw_choice(rng) {
            TargetChoice::FromVoicedTarget => self.voiced_branch(rng)?,
            TargetChoice::FromSilence => self.silence_branch(rng)?,
        };

        // One draw of the common perturbation for both signals
        let sample_rate = self.framing.sample_rate;
        let resolved = self.common.resolve(rng, sample_rate)?;
        let distorted = self.common.apply(&distorted, sample_rate, &resolved)?;
        let target = self.common.apply(&target, sample_rate, &resolved)?;

        self.framing.pair(target, distorted)
    }

    fn frame_len(&self) -> usize {
        self.framing.frame_len
    }
}

/// Clean sampler over `datasets`.
pub fn clean_sampler(
    config: &Config,
    datasets: &DatasetRoot,
    duration: f64,
    return_source: bool,
) -> Result<CleanSampler> {
    let framing = Framing::new(config, duration, return_source)?;
    let pool = AudioPool::from_root(datasets)?;
    Ok(CleanSampler { pool, framing })
}

/// Sampler pairing each clean frame with `effect(frame)`.
pub fn effected_sampler<E: SignalEffect>(
    config: &Config,
    datasets: &DatasetRoot,
    effect: E,
    duration: f64,
    return_source: bool,
) -> Result<EffectedSampler<E>> {
    let framing = Framing::new(config, duration, return_source)?;
    let pool = AudioPool::from_root(datasets)?;
    Ok(EffectedSampler {
        pool,
        effect: Arc::new(effect),
        framing,
    })
}

/// Effected sampler using the distorter built from `config.resources`.
pub fn distorted_sampler(
    config: &Config,
    datasets: &DatasetRoot,
    duration: f64,
    return_source: bool,
) -> Result<DistortedSampler> {
    let distorter = Distorter::from_resources(&config.resources)?
        .with_decode_attempts(config.sampling.max_decode_attempts);
    effected_sampler(config, datasets, distorter, duration, return_source)
}

/// Mixed sampler; the dataset doubles as the pool of competing voices.
pub fn mixed_sampler(
    config: &Config,
    datasets: &DatasetRoot,
    duration: f64,
    return_source: bool,
) -> Result<MixedSampler> {
    let framing = Framing::new(config, duration, return_source)?;
    let pool = AudioPool::from_root(datasets)?;
    let bg = AudioPool::scan(&[&config.resources.noise_dir], &["wav"])?;

    let attempts = config.sampling.max_decode_attempts;
    Ok(MixedSampler {
        common: light_noisy_common_pipeline(),
        clean: light_noisy_pipeline(bg.clone()).with_decode_attempts(attempts),
        voiced: light_noisy_voiced_pipeline(bg, pool.clone()).with_decode_attempts(attempts),
        voiced_probability: config.sampling.voiced_probability,
        pool,
        framing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{EffectError, EffectSpec};
    use crate::test_util::{TempDir, noise, test_config, write_resources, write_wav};
    use rand::SeedableRng;

    fn speech_dataset(dir: &TempDir) -> DatasetRoot {
        let root = dir.path().join("speech");
        write_wav(&root.join("a.wav"), &noise(24000, 0.4, 1), 16000);
        write_wav(&root.join("nested/b.wav"), &noise(6000, 0.4, 2), 16000);
        DatasetRoot::scan([root])
    }

    #[test]
    fn test_clean_sampler_silent_file_end_to_end() {
        let dir = TempDir::new("sampler-silence");
        let root = dir.path().join("silence");
        write_wav(&root.join("quiet.wav"), &vec![0.0; 32000], 16000);

        let config = test_config();
        let sampler = clean_sampler(&config, &DatasetRoot::scan([root]), 1.0, true).unwrap();
        assert_eq!(sampler.frame_len(), 16000);

        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..3 {
            let example = sampler.sample(&mut rng).unwrap();
            assert_eq!(example.clean.shape(), (16000 / 128 + 1, 40));
            assert!(example.distorted.is_none());
            let audio = example.clean_audio.unwrap();
            assert_eq!(audio.len(), 16000);
            assert!(audio.iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn test_clean_sampler_without_source() {
        let dir = TempDir::new("sampler-clean");
        let sampler = clean_sampler(&test_config(), &speech_dataset(&dir), 0.5, false).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let example = sampler.sample(&mut rng).unwrap();
        assert_eq!(example.clean.shape(), (8000 / 128 + 1, 40));
        assert!(example.clean_audio.is_none());
    }

    #[test]
    fn test_effected_sampler_applies_effect() {
        let dir = TempDir::new("sampler-effected");
        let halve = |s: &[f32], _: u32, _: &mut StdRng| -> std::result::Result<Vec<f32>, EffectError> {
            Ok(s.iter().map(|x| x * 0.5).collect())
        };
        let sampler =
            effected_sampler(&test_config(), &speech_dataset(&dir), halve, 1.0, true).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let example = sampler.sample(&mut rng).unwrap();

        let distorted = example.distorted.unwrap();
        assert_eq!(example.clean.shape(), distorted.shape());
        let clean_audio = example.clean_audio.unwrap();
        let distorted_audio = example.distorted_audio.unwrap();
        for (c, d) in clean_audio.iter().zip(&distorted_audio) {
            assert_eq!(c * 0.5, *d);
        }
    }

    #[test]
    fn test_effected_sampler_rejects_length_change() {
        let dir = TempDir::new("sampler-bad-effect");
        let truncate = |s: &[f32], _: u32, _: &mut StdRng| -> std::result::Result<Vec<f32>, EffectError> {
            Ok(s[..s.len() / 2].to_vec())
        };
        let sampler =
            effected_sampler(&test_config(), &speech_dataset(&dir), truncate, 0.25, false).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(matches!(
            sampler.sample(&mut rng),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_distorted_sampler() {
        let dir = TempDir::new("sampler-distorted");
        let mut config = test_config();
        config.resources = write_resources(&dir.path().join("external"), 16000);

        let sampler = distorted_sampler(&config, &speech_dataset(&dir), 0.5, true).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..5 {
            let example = sampler.sample(&mut rng).unwrap();
            assert_eq!(example.clean.shape(), example.distorted.unwrap().shape());
            assert_eq!(example.distorted_audio.unwrap().len(), 8000);
        }
    }

    #[test]
    fn test_distorted_sampler_missing_resources() {
        let dir = TempDir::new("sampler-no-resources");
        let mut config = test_config();
        config.resources.rir_manifest = dir.path().join("absent/files.txt");
        assert!(distorted_sampler(&config, &speech_dataset(&dir), 0.5, false).is_err());
    }

    fn mixed(dir: &TempDir, return_source: bool) -> MixedSampler {
        let mut config = test_config();
        config.resources = write_resources(&dir.path().join("external"), 16000);
        mixed_sampler(&config, &speech_dataset(dir), 0.5, return_source).unwrap()
    }

    #[test]
    fn test_mixed_sampler_pairs_share_shape() {
        let dir = TempDir::new("sampler-mixed");
        let sampler = mixed(&dir, true);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..20 {
            let example = sampler.sample(&mut rng).unwrap();
            let distorted = example.distorted.unwrap();
            assert_eq!(example.clean.shape(), distorted.shape());
            assert_eq!(example.clean_audio.unwrap().len(), 8000);
            assert_eq!(example.distorted_audio.unwrap().len(), 8000);
        }
    }

    #[test]
    fn test_target_choice_ratio() {
        let mut rng = StdRng::seed_from_u64(6);
        let draws = 10_000;
        let voiced = (0..draws)
            .filter(|_| TargetChoice::draw(&mut rng, 0.9) == TargetChoice::FromVoicedTarget)
            .count();
        let fraction = voiced as f64 / draws as f64;
        assert!((fraction - 0.9).abs() < 0.05, "fraction {fraction}");
    }

    /// Mixed sampler whose branch pipelines do nothing, so the pair differs
    /// only by what `common` does to each signal.
    fn mixed_with_common(dir: &TempDir, common: Pipeline) -> MixedSampler {
        let config = test_config();
        MixedSampler {
            pool: AudioPool::from_root(&speech_dataset(dir)).unwrap(),
            common,
            clean: Pipeline::default(),
            voiced: Pipeline::default(),
            voiced_probability: config.sampling.voiced_probability,
            framing: Framing::new(&config, 0.5, true).unwrap(),
        }
    }

    #[test]
    fn test_mixed_sampler_common_perturbation_is_shared() {
        let dir = TempDir::new("sampler-mixed-common");
        let sampler = mixed_with_common(
            &dir,
            Pipeline::new([
                EffectSpec::Gain {
                    gain_db: -6.0..=0.0,
                },
                EffectSpec::GaussianNoise {
                    amplitude: 0.01..=0.05,
                },
            ]),
        );
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let example = sampler.sample(&mut rng).unwrap();
            let clean_audio = example.clean_audio.unwrap();
            assert_eq!(example.distorted_audio.unwrap(), clean_audio);
            assert_eq!(example.distorted.unwrap(), example.clean);
            // Gaussian noise always lands, even on a silent target
            assert!(clean_audio.iter().any(|&s| s != 0.0));
        }
    }

    #[test]
    fn test_mixed_sampler_silent_target_ratio() {
        let dir = TempDir::new("sampler-mixed-ratio");
        let sampler = mixed_with_common(&dir, Pipeline::default());
        let mut rng = StdRng::seed_from_u64(9);
        let draws = 2000;
        let silent = (0..draws)
            .map(|_| sampler.sample(&mut rng).unwrap())
            .filter(|example| {
                example
                    .clean_audio
                    .as_ref()
                    .is_some_and(|audio| audio.iter().all(|&s| s == 0.0))
            })
            .count();
        let fraction = silent as f64 / draws as f64;
        assert!((fraction - 0.1).abs() < 0.03, "silent fraction {fraction}");
    }

    #[test]
    fn test_mixed_branches() {
        let dir = TempDir::new("sampler-mixed-branches");
        let sampler = mixed(&dir, false);
        let mut rng = StdRng::seed_from_u64(8);

        let (target, distorted) = sampler.silence_branch(&mut rng).unwrap();
        assert_eq!(target.len(), 8000);
        assert!(target.iter().all(|&s| s == 0.0));
        assert_eq!(distorted.len(), 8000);

        let (target, distorted) = sampler.voiced_branch(&mut rng).unwrap();
        assert_eq!(distorted.len(), target.len());
        assert!(target.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_invalid_duration() {
        let dir = TempDir::new("sampler-duration");
        assert!(matches!(
            clean_sampler(&test_config(), &speech_dataset(&dir), 0.0, false),
            Err(Error::InvalidArgument(_))
        ));
    }
}
