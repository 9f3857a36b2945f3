//! Fixtures shared by the unit tests.

use std::path::{Path, PathBuf};
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};

static INIT: Once = Once::new();
static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Install a test-friendly tracing subscriber once per process.
pub fn setup() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Scratch directory removed on drop.
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new(tag: &str) -> Self {
        setup();
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "enhance-feed-{}-{}-{}",
            tag,
            std::process::id(),
            n
        ));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Write a mono 16-bit WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) {
    write_wav_channels(path, samples, sample_rate, 1);
}

/// Write interleaved samples as a 16-bit WAV file.
pub fn write_wav_channels(path: &Path, samples: &[f32], sample_rate: u32, channels: u16) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer
            .write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .unwrap();
    }
    writer.finalize().unwrap();
}

/// Deterministic pseudo-noise in [-amplitude, amplitude].
pub fn noise(len: usize, amplitude: f32, seed: u64) -> Vec<f32> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| rng.gen_range(-amplitude..=amplitude))
        .collect()
}

/// Small, fast feature configuration at 16 kHz.
pub fn test_config() -> crate::config::Config {
    let mut config = crate::config::Config::default();
    config.audio.sample_rate = 16000;
    config.audio.n_fft = 512;
    config.audio.win_size = 512;
    config.audio.hop_size = 128;
    config.audio.n_mels = 40;
    config
}

/// Impulse-response manifest and noise directory laid out like the
/// conventional `external_datasets` tree.
pub fn write_resources(root: &Path, sample_rate: u32) -> crate::config::ResourceConfig {
    let rir_dir = root.join("rir-1");
    let decay: Vec<f32> = (0..2000).map(|i| (-(i as f32) / 300.0).exp()).collect();
    write_wav(&rir_dir.join("rooms/small.wav"), &decay, sample_rate);
    std::fs::write(rir_dir.join("files.txt"), "rooms/small.wav\n").unwrap();
    write_wav(
        &root.join("dns-noise/n.wav"),
        &noise(sample_rate as usize / 2, 0.5, 99),
        sample_rate,
    );
    crate::config::ResourceConfig {
        rir_manifest: rir_dir.join("files.txt"),
        noise_dir: root.join("dns-noise"),
    }
}
