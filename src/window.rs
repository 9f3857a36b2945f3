//! Fixed-length framing: random crop for long signals, random-position
//! zero padding for short ones.

use rand::Rng;

/// Sample count of a frame of `duration` seconds, truncated.
pub fn frame_len(duration: f64, sample_rate: u32) -> usize {
    (duration * sample_rate as f64) as usize
}

/// Where a signal lands inside (or is cut from) a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Signal shorter than the frame: zeros on both sides.
    Pad { left: usize, right: usize },
    /// Signal at least as long as the frame: `[start, start + frame_len)`.
    Crop { start: usize },
}

impl Placement {
    /// Draw a uniformly random placement.
    pub fn draw<R: Rng + ?Sized>(len: usize, frame_len: usize, rng: &mut R) -> Self {
        if len < frame_len {
            let pad = frame_len - len;
            let left = rng.gen_range(0..=pad);
            Placement::Pad {
                left,
                right: pad - left,
            }
        } else {
            Placement::Crop {
                start: rng.gen_range(0..=len - frame_len),
            }
        }
    }

    /// Deterministic placement from a position `u` in `[0, 1)`. Every valid
    /// placement is reached by an equally wide interval of `u`.
    pub fn at(len: usize, frame_len: usize, u: f64) -> Self {
        let u = u.clamp(0.0, 1.0);
        let pick = |slack: usize| ((u * (slack + 1) as f64) as usize).min(slack);
        if len < frame_len {
            let pad = frame_len - len;
            let left = pick(pad);
            Placement::Pad {
                left,
                right: pad - left,
            }
        } else {
            Placement::Crop {
                start: pick(len - frame_len),
            }
        }
    }

    /// Produce the framed signal. `frame_len` must be the length the
    /// placement was computed for.
    pub fn apply(&self, signal: &[f32], frame_len: usize) -> Vec<f32> {
        match *self {
            Placement::Pad { left, .. } => {
                let mut framed = vec![0.0; frame_len];
                let left = left.min(frame_len);
                let n = signal.len().min(frame_len - left);
                framed[left..left + n].copy_from_slice(&signal[..n]);
                framed
            }
            Placement::Crop { start } => {
                let start = start.min(signal.len().saturating_sub(frame_len));
                let end = (start + frame_len).min(signal.len());
                let mut framed = signal[start..end].to_vec();
                framed.resize(frame_len, 0.0);
                framed
            }
        }
    }
}

/// Random crop or random-position zero pad to exactly `frame_len` samples.
pub fn fit<R: Rng + ?Sized>(signal: &[f32], frame_len: usize, rng: &mut R) -> Vec<f32> {
    Placement::draw(signal.len(), frame_len, rng).apply(signal, frame_len)
}
