//! Convolutional reverberation with recorded impulse responses.

use super::mix::{peak_limit, rms};
use realfft::{FftError, RealFftPlanner};

/// Trim an impulse response to start at its direct-path peak, cut it to
/// `max_len` samples and normalize it to unit energy.
///
/// Returns `None` for an empty or silent response.
pub fn prepare_ir(ir: &[f32], max_len: usize) -> Option<Vec<f32>> {
    let (peak_idx, _) = ir
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))?;

    let end = ir.len().min(peak_idx + max_len.max(1));
    let mut trimmed = ir[peak_idx..end].to_vec();

    let energy: f32 = trimmed.iter().map(|s| s * s).sum::<f32>().sqrt();
    if energy <= f32::EPSILON {
        return None;
    }
    trimmed.iter_mut().for_each(|s| *s /= energy);
    Some(trimmed)
}

/// Linear convolution cut to the signal length.
pub fn convolve(signal: &[f32], ir: &[f32]) -> Result<Vec<f32>, FftError> {
    if signal.is_empty() || ir.is_empty() {
        return Ok(signal.to_vec());
    }
    let n = (signal.len() + ir.len() - 1).next_power_of_two();

    let mut planner = RealFftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut a = forward.make_input_vec();
    a[..signal.len()].copy_from_slice(signal);
    let mut b = forward.make_input_vec();
    b[..ir.len()].copy_from_slice(ir);

    let mut spec_a = forward.make_output_vec();
    let mut spec_b = forward.make_output_vec();
    forward.process(&mut a, &mut spec_a)?;
    forward.process(&mut b, &mut spec_b)?;

    for (x, y) in spec_a.iter_mut().zip(&spec_b) {
        *x *= *y;
    }
    // Imaginary parts of DC and Nyquist must be zero for the inverse
    if let Some(first) = spec_a.first_mut() {
        first.im = 0.0;
    }
    if let Some(last) = spec_a.last_mut() {
        last.im = 0.0;
    }

    let mut out = inverse.make_output_vec();
    inverse.process(&mut spec_a, &mut out)?;

    let scale = 1.0 / n as f32;
    out.truncate(signal.len());
    out.iter_mut().for_each(|s| *s *= scale);
    Ok(out)
}

/// Convolve with a prepared impulse response, keeping the input's RMS.
pub fn reverberate(signal: &[f32], ir: &[f32]) -> Result<Vec<f32>, FftError> {
    let mut wet = convolve(signal, ir)?;
    let (dry_rms, wet_rms) = (rms(signal), rms(&wet));
    if wet_rms > f32::EPSILON {
        let g = dry_rms / wet_rms;
        wet.iter_mut().for_each(|s| *s *= g);
    }
    peak_limit(&mut wet);
    Ok(wet)
}
