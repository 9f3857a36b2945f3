//! Audio source index: flat pools of audio files built from dataset roots.
//!
//! A pool only holds paths. Files are decoded on demand, one random pick at a
//! time, so pools are cheap to clone into loader workers.

use crate::decode::{DecodeError, load_mono_audio};
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Manifest listing relative stems inside a manifest-style dataset root.
pub const MANIFEST_NAME: &str = "files_all.txt";
/// Extension appended to every manifest stem.
pub const MANIFEST_EXTENSION: &str = "flac";
/// Extensions picked up when scanning dataset directories.
pub const SCAN_EXTENSIONS: [&str; 2] = ["wav", "flac"];

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("missing audio root: {0}")]
    MissingRoot(PathBuf),
    #[error("invalid scan pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("scan failed: {0}")]
    Scan(#[from] glob::GlobError),
    #[error("no audio files found in {0}")]
    Empty(String),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error("gave up after {attempts} consecutive decode failures: {last}")]
    DecodeAttemptsExhausted {
        attempts: usize,
        #[source]
        last: Box<SourceError>,
    },
}

/// Where a dataset's files come from.
#[derive(Debug, Clone)]
pub enum DatasetRoot {
    /// Directory holding `files_all.txt` with one stem per line.
    Manifest(PathBuf),
    /// Directories scanned recursively for `.wav` and `.flac` files.
    Scan(Vec<PathBuf>),
}

impl DatasetRoot {
    pub fn manifest<P: Into<PathBuf>>(dir: P) -> Self {
        Self::Manifest(dir.into())
    }

    pub fn scan<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::Scan(dirs.into_iter().map(Into::into).collect())
    }
}

/// Read-only pool of audio file paths. Never empty.
#[derive(Debug, Clone)]
pub struct AudioPool {
    name: String,
    files: Arc<[PathBuf]>,
}

impl AudioPool {
    /// Build a pool from a dataset root.
    pub fn from_root(root: &DatasetRoot) -> Result<Self, SourceError> {
        match root {
            DatasetRoot::Manifest(dir) => Self::from_manifest(dir),
            DatasetRoot::Scan(dirs) => Self::scan(dirs, &SCAN_EXTENSIONS),
        }
    }

    /// Resolve the stems listed in `<dir>/files_all.txt` to `.flac` files.
    pub fn from_manifest<P: AsRef<Path>>(dir: P) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let manifest = dir.join(MANIFEST_NAME);
        let files = read_lines(&manifest)?
            .into_iter()
            .map(|stem| dir.join(format!("{stem}.{MANIFEST_EXTENSION}")))
            .collect();
        Self::from_files(manifest.display().to_string(), files)
    }

    /// Resolve a newline-delimited list of paths relative to the list's directory.
    pub fn from_list_file<P: AsRef<Path>>(list: P) -> Result<Self, SourceError> {
        let list = list.as_ref();
        let base = list.parent().unwrap_or_else(|| Path::new("."));
        let files = read_lines(list)?.into_iter().map(|entry| base.join(entry)).collect();
        Self::from_files(list.display().to_string(), files)
    }

    /// Recursively collect files with any of `extensions` under every directory.
    pub fn scan<P: AsRef<Path>>(dirs: &[P], extensions: &[&str]) -> Result<Self, SourceError> {
        let mut files = Vec::new();
        for dir in dirs {
            let dir = dir.as_ref();
            if !dir.is_dir() {
                return Err(SourceError::MissingRoot(dir.to_path_buf()));
            }
            let escaped = glob::Pattern::escape(&dir.to_string_lossy());
            for ext in extensions {
                let mut found = glob::glob(&format!("{escaped}/**/*.{ext}"))?
                    .collect::<Result<Vec<_>, _>>()?;
                found.sort();
                files.extend(found);
            }
        }
        let name = dirs
            .iter()
            .map(|d| d.as_ref().display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Self::from_files(name, files)
    }

    /// Wrap an explicit file list. Fails if it is empty.
    pub fn from_files(name: impl Into<String>, files: Vec<PathBuf>) -> Result<Self, SourceError> {
        let name = name.into();
        if files.is_empty() {
            return Err(SourceError::Empty(name));
        }
        tracing::info!(files = files.len(), source = %name, "Loaded audio pool");
        Ok(Self {
            name,
            files: files.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Uniformly pick one file.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &Path {
        &self.files[rng.gen_range(0..self.files.len())]
    }

    /// Decode one random file to mono at `sample_rate`.
    pub fn sample_one<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        sample_rate: u32,
    ) -> Result<(PathBuf, Vec<f32>), SourceError> {
        let path = self.choose(rng).to_path_buf();
        match load_mono_audio(&path, sample_rate) {
            Ok(audio) => Ok((path, audio)),
            Err(source) => Err(SourceError::Decode { path, source }),
        }
    }

    /// Like `sample_one`, redrawing a fresh file after each decode failure.
    /// Fails after `max_attempts` consecutive failures.
    pub fn sample_one_retrying<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        sample_rate: u32,
        max_attempts: usize,
    ) -> Result<(PathBuf, Vec<f32>), SourceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sample_one(rng, sample_rate) {
                Ok(sampled) => return Ok(sampled),
                Err(e) if attempt >= max_attempts.max(1) => {
                    return Err(SourceError::DecodeAttemptsExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Decode failed, drawing another file");
                }
            }
        }
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, SourceError> {
    let text = fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{TempDir, write_wav};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_manifest_root() {
        let dir = TempDir::new("source-manifest");
        fs::write(dir.path().join(MANIFEST_NAME), "a/one\n\nb/two\n").unwrap();

        let pool = AudioPool::from_root(&DatasetRoot::manifest(dir.path())).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.files()[0], dir.path().join("a/one.flac"));
        assert_eq!(pool.files()[1], dir.path().join("b/two.flac"));
    }

    #[test]
    fn test_scan_finds_both_extensions_recursively() {
        let dir = TempDir::new("source-scan");
        fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        fs::write(dir.path().join("top.wav"), b"").unwrap();
        fs::write(dir.path().join("nested/mid.flac"), b"").unwrap();
        fs::write(dir.path().join("nested/deeper/low.wav"), b"").unwrap();
        fs::write(dir.path().join("nested/notes.txt"), b"").unwrap();

        let pool = AudioPool::from_root(&DatasetRoot::scan([dir.path()])).unwrap();
        assert_eq!(pool.len(), 3);
        assert!(pool.files().iter().all(|p| {
            let ext = p.extension().unwrap();
            ext == "wav" || ext == "flac"
        }));
    }

    #[test]
    fn test_scan_empty_is_an_error() {
        let dir = TempDir::new("source-empty");
        let err = AudioPool::scan(&[dir.path()], &SCAN_EXTENSIONS).unwrap_err();
        assert!(matches!(err, SourceError::Empty(_)));
    }

    #[test]
    fn test_scan_missing_root() {
        let err = AudioPool::scan(&[Path::new("/nonexistent/enhance-feed")], &["wav"]).unwrap_err();
        assert!(matches!(err, SourceError::MissingRoot(_)));
    }

    #[test]
    fn test_list_file_entries_are_relative_to_list() {
        let dir = TempDir::new("source-list");
        let list = dir.path().join("files.txt");
        fs::write(&list, "  rooms/small.wav \nrooms/hall.wav\n").unwrap();

        let pool = AudioPool::from_list_file(&list).unwrap();
        assert_eq!(
            pool.files(),
            &[
                dir.path().join("rooms/small.wav"),
                dir.path().join("rooms/hall.wav")
            ]
        );
    }

    #[test]
    fn test_sample_one_decodes() {
        let dir = TempDir::new("source-sample");
        write_wav(&dir.path().join("clip.wav"), &[0.25; 400], 16000);

        let pool = AudioPool::scan(&[dir.path()], &["wav"]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let (path, audio) = pool.sample_one(&mut rng, 16000).unwrap();
        assert_eq!(path, dir.path().join("clip.wav"));
        assert_eq!(audio.len(), 400);
    }

    #[test]
    fn test_decode_failure_propagates() {
        let dir = TempDir::new("source-broken");
        fs::write(dir.path().join("broken.wav"), b"not a wav").unwrap();

        let pool = AudioPool::scan(&[dir.path()], &["wav"]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            pool.sample_one(&mut rng, 16000),
            Err(SourceError::Decode { .. })
        ));
        let err = pool.sample_one_retrying(&mut rng, 16000, 3).unwrap_err();
        assert!(matches!(
            err,
            SourceError::DecodeAttemptsExhausted { attempts: 3, .. }
        ));
    }

    #[test]
    fn test_retry_recovers_from_broken_files() {
        let dir = TempDir::new("source-mixed");
        fs::write(dir.path().join("a_broken.wav"), b"not a wav").unwrap();
        write_wav(&dir.path().join("b_good.wav"), &[0.1; 100], 16000);

        let pool = AudioPool::scan(&[dir.path()], &["wav"]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let (path, _) = pool.sample_one_retrying(&mut rng, 16000, 64).unwrap();
            assert_eq!(path.file_name().unwrap(), "b_good.wav");
        }
    }
}
