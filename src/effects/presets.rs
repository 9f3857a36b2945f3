//! Named pipelines used by the mixed sampler.

use super::{EffectSpec, Pipeline};
use crate::source::AudioPool;

/// Background noise only: the distorted input for a silent target.
pub fn light_noisy_pipeline(bg: AudioPool) -> Pipeline {
    Pipeline::new([EffectSpec::BackgroundNoise {
        pool: bg,
        snr_db: 5.0..=30.0,
    }
    .with_probability(0.9)])
}

/// Background noise plus a competing voice under the target.
pub fn light_noisy_voiced_pipeline(bg: AudioPool, voices: AudioPool) -> Pipeline {
    Pipeline::new([
        EffectSpec::Voice {
            pool: voices,
            level_db: -20.0..=-5.0,
        }
        .with_probability(0.5),
        EffectSpec::BackgroundNoise {
            pool: bg,
            snr_db: 5.0..=30.0,
        }
        .with_probability(0.9),
    ])
}

/// Small perturbations shared by target and distorted signal. Gain stays at
/// or below unity so no step needs to peak-limit.
pub fn light_noisy_common_pipeline() -> Pipeline {
    Pipeline::new([
        EffectSpec::Gain {
            gain_db: -6.0..=0.0,
        }
        .with_probability(0.5),
        EffectSpec::GaussianNoise {
            amplitude: 0.0001..=0.002,
        }
        .with_probability(0.5),
    ])
}
