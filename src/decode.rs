//! Audio file decoding using symphonia.
//!
//! Every file is reduced to a mono `f32` signal at the requested sample rate.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Symphonia error: {0}")]
    Symphonia(#[from] SymphoniaError),
    #[error("No audio track found")]
    NoAudioTrack,
    #[error("Unsupported codec")]
    UnsupportedCodec,
    #[error("Resampler setup failed: {0}")]
    ResamplerSetup(#[from] rubato::ResamplerConstructionError),
    #[error("Resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
}

/// Decoded audio samples, interleaved.
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    /// Convert to mono by averaging channels.
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }

        self.samples
            .chunks_exact(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / self.channels as f32)
            .collect()
    }

    /// Mono signal at `target_rate`, resampled with sinc interpolation when
    /// the file rate differs.
    pub fn resample(&self, target_rate: u32) -> Result<Vec<f32>, DecodeError> {
        let mono = self.to_mono();
        if self.sample_rate == target_rate || mono.is_empty() {
            return Ok(mono);
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let resample_ratio = target_rate as f64 / self.sample_rate as f64;
        let chunk_size = 1024;

        // Ratio headroom must cover the actual ratio in both directions
        let max_ratio = resample_ratio.max(1.0 / resample_ratio) * 1.1;

        let mut resampler = SincFixedIn::<f32>::new(resample_ratio, max_ratio, params, chunk_size, 1)?;

        let delay = resampler.output_delay();
        let expected_len = (mono.len() as f64 * resample_ratio).round() as usize;

        let mut output = Vec::with_capacity(delay + expected_len + chunk_size);
        let mut padded = vec![0.0f32; chunk_size];
        let mut chunks = mono.chunks(chunk_size);

        // Keep feeding zeros after the input until the delayed tail is out
        while output.len() < delay + expected_len {
            let chunk = chunks.next().unwrap_or(&[]);
            padded[..chunk.len()].copy_from_slice(chunk);
            padded[chunk.len()..].fill(0.0);

            let resampled = resampler.process(std::slice::from_ref(&padded), None)?;
            output.extend_from_slice(&resampled[0]);
        }

        output.drain(..delay);
        output.truncate(expected_len);

        Ok(output)
    }
}

/// Decode an audio file. The extension is used as a probe hint.
pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<DecodedAudio, DecodeError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    decode_stream(mss, &hint)
}

/// Decode a file straight to mono at `sample_rate`.
pub fn load_mono_audio<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Vec<f32>, DecodeError> {
    decode_file(path)?.resample(sample_rate)
}

fn decode_stream(mss: MediaSourceStream, hint: &Hint) -> Result<DecodedAudio, DecodeError> {
    let format_opts = FormatOptions::default();
    let metadata_opts = MetadataOptions::default();

    let probed = symphonia::default::get_probe().format(hint, mss, &format_opts, &metadata_opts)?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;

    let decoder_opts = DecoderOptions::default();
    let mut decoder = symphonia::default::get_codecs().make(&track.codec_params, &decoder_opts)?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(DecodeError::UnsupportedCodec)?;
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);

    let track_id = track.id;
    let mut samples = Vec::new();
    let mut buffer: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) if is_recoverable(&e) => {
                tracing::debug!(error = %e, ts = packet.ts(), "Skipping corrupt packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        channels = decoded.spec().channels.count();
        let buf = buffer.get_or_insert_with(|| {
            SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
        });
        if buf.capacity() < decoded.frames() * decoded.spec().channels.count() {
            *buf = SampleBuffer::new(decoded.capacity() as u64, *decoded.spec());
        }
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// A malformed packet only loses its own frames.
fn is_recoverable(err: &SymphoniaError) -> bool {
    matches!(err, SymphoniaError::DecodeError(_))
}
