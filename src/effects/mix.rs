//! Level measurement and mixing arithmetic.

/// Stand-in level for a silent reference signal (about -26 dBFS).
pub const REFERENCE_RMS: f32 = 0.05;

/// Signals quieter than this are treated as silent.
const SILENCE_RMS: f32 = 1e-6;

pub fn db_to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    let energy: f64 = signal.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (energy / signal.len() as f64).sqrt() as f32
}

pub fn peak(signal: &[f32]) -> f32 {
    signal.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

/// Scale the whole signal down if its peak exceeds full scale.
pub fn peak_limit(signal: &mut [f32]) {
    let max = peak(signal);
    if max > 1.0 {
        let f = 1.0 / max;
        signal.iter_mut().for_each(|s| *s *= f);
    }
}

/// Read `len` samples from `clip`, starting at `offset` (a fraction of the
/// clip length) and wrapping around as often as needed.
pub fn tile(clip: &[f32], offset: f64, len: usize) -> Vec<f32> {
    if clip.is_empty() {
        return vec![0.0; len];
    }
    let start = ((offset.clamp(0.0, 1.0) * clip.len() as f64) as usize).min(clip.len() - 1);
    clip.iter().cycle().skip(start).take(len).copied().collect()
}

/// Add `interferer` to `signal` so that the interferer sits `relative_db`
/// relative to the signal's level, then peak-limit the sum.
///
/// A silent signal is measured as `REFERENCE_RMS`. A silent interferer
/// leaves the signal untouched.
pub fn mix_relative(signal: &[f32], interferer: &[f32], relative_db: f32) -> Vec<f32> {
    let interferer_rms = rms(interferer);
    if interferer_rms < SILENCE_RMS {
        return signal.to_vec();
    }
    let mut reference = rms(signal);
    if reference < SILENCE_RMS {
        reference = REFERENCE_RMS;
    }
    let gain = reference * db_to_amplitude(relative_db) / interferer_rms;

    let mut mixed: Vec<f32> = signal
        .iter()
        .zip(interferer.iter().chain(std::iter::repeat(&0.0)))
        .map(|(&s, &n)| s + n * gain)
        .collect();
    peak_limit(&mut mixed);
    mixed
}

/// Mix noise into `signal` at `snr_db`.
pub fn mix_at_snr(signal: &[f32], noise: &[f32], snr_db: f32) -> Vec<f32> {
    mix_relative(signal, noise, -snr_db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::noise;

    #[test]
    fn test_mix_at_snr_hits_target() {
        let speech: Vec<f32> = (0..8000).map(|i| 0.3 * (i as f32 * 0.05).sin()).collect();
        let ns = noise(8000, 0.8, 1);

        for snr in [0.0f32, 10.0, 20.0] {
            let mixed = mix_at_snr(&speech, &ns, snr);
            let added: Vec<f32> = mixed.iter().zip(&speech).map(|(m, s)| m - s).collect();
            let measured = 20.0 * (rms(&speech) / rms(&added)).log10();
            assert!((measured - snr).abs() < 0.1, "snr {snr}: measured {measured}");
        }
    }

    #[test]
    fn test_mix_is_peak_limited() {
        let loud = vec![0.9; 1000];
        let ns = noise(1000, 1.0, 2);
        let mixed = mix_at_snr(&loud, &ns, -10.0);
        assert!(peak(&mixed) <= 1.0 + 1e-6);
    }

    #[test]
    fn test_silent_signal_uses_reference_level() {
        let silence = vec![0.0; 4000];
        let ns = noise(4000, 0.5, 3);
        let mixed = mix_at_snr(&silence, &ns, 0.0);
        assert!((rms(&mixed) - REFERENCE_RMS).abs() < 1e-3);
    }

    #[test]
    fn test_silent_interferer_is_noop() {
        let speech = noise(100, 0.5, 4);
        assert_eq!(mix_at_snr(&speech, &[0.0; 100], 5.0), speech);
    }

    #[test]
    fn test_tile_wraps() {
        let clip = [1.0, 2.0, 3.0];
        assert_eq!(tile(&clip, 0.5, 7), vec![2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0]);
        assert_eq!(tile(&clip, 1.0, 2), vec![3.0, 1.0]);
        assert_eq!(tile(&[], 0.3, 3), vec![0.0; 3]);
    }
}
