//! Unbounded example streams and fixed-size batching.

use crate::sampler::{Example, Sampler};
use crate::{Error, Result};
use half::f16;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;

/// Endless stream of examples from one sampler and one RNG.
///
/// `next` never returns `None`; errors are yielded in place of an example.
pub struct Feed<S: Sampler + ?Sized> {
    sampler: Arc<S>,
    rng: StdRng,
}

impl<S: Sampler + ?Sized> Feed<S> {
    pub fn new(sampler: Arc<S>, rng: StdRng) -> Self {
        Self { sampler, rng }
    }

    pub fn from_entropy(sampler: Arc<S>) -> Self {
        Self::new(sampler, StdRng::from_entropy())
    }

    pub fn seeded(sampler: Arc<S>, seed: u64) -> Self {
        Self::new(sampler, StdRng::seed_from_u64(seed))
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    /// Group examples into batches of `batch_size`.
    pub fn batches(self, batch_size: usize) -> Batches<Self> {
        Batches::new(self, batch_size)
    }
}

impl<S: Sampler + ?Sized> Iterator for Feed<S> {
    type Item = Result<Example>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.sampler.sample(&mut self.rng))
    }
}

/// Collates every `batch_size` examples of an example stream into a `Batch`.
pub struct Batches<I> {
    inner: I,
    batch_size: usize,
}

impl<I> Batches<I>
where
    I: Iterator<Item = Result<Example>>,
{
    pub fn new(inner: I, batch_size: usize) -> Self {
        Self {
            inner,
            batch_size: batch_size.max(1),
        }
    }
}

impl<I> Iterator for Batches<I>
where
    I: Iterator<Item = Result<Example>>,
{
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut examples = Vec::with_capacity(self.batch_size);
        while examples.len() < self.batch_size {
            match self.inner.next()? {
                Ok(example) => examples.push(example),
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Batch::collate(examples))
    }
}

/// Stacked examples. Features are `[size, n_frames, n_mels]` row-major,
/// waveforms `[size, frame_len]`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub size: usize,
    pub n_frames: usize,
    pub n_mels: usize,
    /// Samples per waveform, zero without waveforms.
    pub frame_len: usize,
    pub clean: Vec<f16>,
    pub distorted: Option<Vec<f16>>,
    pub clean_audio: Option<Vec<f32>>,
    pub distorted_audio: Option<Vec<f32>>,
}

impl Batch {
    /// Stack examples that all share the first example's shapes.
    pub fn collate(examples: Vec<Example>) -> Result<Self> {
        let Some(first) = examples.first() else {
            return Err(Error::InvalidArgument("cannot collate an empty batch".into()));
        };
        let (n_frames, n_mels) = first.clean.shape();
        let has_distorted = first.distorted.is_some();
        let frame_len = first.clean_audio.as_ref().map_or(0, Vec::len);
        let has_audio = first.clean_audio.is_some();

        let size = examples.len();
        let feature_len = n_frames * n_mels;
        let mut clean = Vec::with_capacity(size * feature_len);
        let mut distorted = has_distorted.then(|| Vec::with_capacity(size * feature_len));
        let mut clean_audio = has_audio.then(|| Vec::with_capacity(size * frame_len));
        let mut distorted_audio = (has_audio && has_distorted)
            .then(|| Vec::with_capacity(size * frame_len));

        for (i, example) in examples.into_iter().enumerate() {
            check_features(i, "clean", (n_frames, n_mels), Some(&example.clean))?;
            clean.extend_from_slice(&example.clean.data);

            match (&mut distorted, example.distorted) {
                (Some(out), Some(features)) => {
                    check_features(i, "distorted", (n_frames, n_mels), Some(&features))?;
                    out.extend_from_slice(&features.data);
                }
                (None, None) => {}
                (Some(_), None) => check_features(i, "distorted", (n_frames, n_mels), None)?,
                (None, Some(_)) => {
                    return Err(Error::ShapeMismatch {
                        expected: "no distorted features".into(),
                        actual: format!("distorted features at example {i}"),
                    });
                }
            }

            extend_audio(i, "clean", &mut clean_audio, example.clean_audio, frame_len)?;
            if has_distorted {
                extend_audio(
                    i,
                    "distorted",
                    &mut distorted_audio,
                    example.distorted_audio,
                    frame_len,
                )?;
            }
        }

        Ok(Self {
            size,
            n_frames,
            n_mels,
            frame_len,
            clean,
            distorted,
            clean_audio,
            distorted_audio,
        })
    }

    /// Clean features of one example.
    pub fn clean_features(&self, index: usize) -> &[f16] {
        let len = self.n_frames * self.n_mels;
        &self.clean[index * len..(index + 1) * len]
    }
}

fn check_features(
    index: usize,
    field: &str,
    expected: (usize, usize),
    actual: Option<&crate::spectrogram::Features>,
) -> Result<()> {
    match actual {
        Some(features) if features.shape() == expected => Ok(()),
        Some(features) => Err(Error::ShapeMismatch {
            expected: format!("{field} features {expected:?}"),
            actual: format!("{:?} at example {index}", features.shape()),
        }),
        None => Err(Error::ShapeMismatch {
            expected: format!("{field} features {expected:?}"),
            actual: format!("none at example {index}"),
        }),
    }
}

fn extend_audio(
    index: usize,
    field: &str,
    out: &mut Option<Vec<f32>>,
    audio: Option<Vec<f32>>,
    frame_len: usize,
) -> Result<()> {
    match (out, audio) {
        (Some(out), Some(audio)) if audio.len() == frame_len => {
            out.extend_from_slice(&audio);
            Ok(())
        }
        (None, None) => Ok(()),
        (_, audio) => Err(Error::ShapeMismatch {
            expected: if frame_len > 0 {
                format!("{field} waveform of {frame_len} samples")
            } else {
                format!("no {field} waveform")
            },
            actual: match audio {
                Some(a) => format!("{} samples at example {index}", a.len()),
                None => format!("none at example {index}"),
            },
        }),
    }
}
