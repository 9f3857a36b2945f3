//! Threaded batch loader.
//!
//! Architecture:
//! Worker Threads (one Feed each) -> Bounded Channel -> Consumer (batching)
//!
//! - Every worker owns its RNG and pulls examples from the shared sampler forever
//! - The bounded channel holds a few batches per worker of prefetched examples
//! - The consumer stacks `batch_size` examples per `next` call
//! - Dropping the loader stops and joins the workers

use crate::config::Config;
use crate::feed::{Batch, Batches, Feed};
use crate::sampler::{self, Example, Sampler};
use crate::source::DatasetRoot;
use crate::{Error, Result};

use crossbeam::channel::{Receiver, SendTimeoutError, Sender, bounded};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Infinite iterator of batches.
///
/// Yields `Some(Ok(batch))` until a sampling error occurs; that error is
/// yielded once and every later call returns `None`.
pub struct Loader {
    batch_size: usize,
    frame_len: usize,
    source: BatchSource,
    finished: bool,
}

enum BatchSource {
    /// `num_workers == 0`: sample on the consumer thread.
    Inline(Batches<Feed<dyn Sampler>>),
    Workers(WorkerPool),
}

impl Loader {
    /// Workers seeded from OS entropy.
    pub fn new(
        sampler: Arc<dyn Sampler>,
        batch_size: usize,
        num_workers: usize,
        prefetch_batches: usize,
    ) -> Result<Self> {
        Self::start(sampler, batch_size, num_workers, prefetch_batches, None)
    }

    /// Worker `i` seeded with `seed + i`.
    pub fn with_seed(
        sampler: Arc<dyn Sampler>,
        batch_size: usize,
        num_workers: usize,
        prefetch_batches: usize,
        seed: u64,
    ) -> Result<Self> {
        Self::start(sampler, batch_size, num_workers, prefetch_batches, Some(seed))
    }

    fn start(
        sampler: Arc<dyn Sampler>,
        batch_size: usize,
        num_workers: usize,
        prefetch_batches: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument("batch_size must be > 0".into()));
        }
        let frame_len = sampler.frame_len();

        let source = if num_workers == 0 {
            let feed = Feed::new(sampler, worker_rng(seed, 0));
            BatchSource::Inline(Batches::new(feed, batch_size))
        } else {
            let capacity = prefetch_batches.max(1) * num_workers * batch_size;
            BatchSource::Workers(WorkerPool::spawn(sampler, num_workers, capacity, seed)?)
        };

        tracing::info!(batch_size, num_workers, frame_len, "Started loader");
        Ok(Self {
            batch_size,
            frame_len,
            source,
            finished: false,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Samples per waveform in every batch.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn finish(&mut self) {
        self.finished = true;
        if let BatchSource::Workers(pool) = &mut self.source {
            pool.stop();
        }
    }
}

impl Iterator for Loader {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let batch = match &mut self.source {
            BatchSource::Inline(batches) => batches.next(),
            BatchSource::Workers(pool) => Some(pool.next_batch(self.batch_size)),
        };
        match batch {
            Some(Ok(batch)) => Some(Ok(batch)),
            Some(Err(e)) => {
                tracing::error!(error = %e, "Loader stopping after sampling error");
                self.finish();
                Some(Err(e))
            }
            None => {
                self.finish();
                None
            }
        }
    }
}

struct WorkerPool {
    rx: Receiver<Result<Example>>,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(
        sampler: Arc<dyn Sampler>,
        num_workers: usize,
        capacity: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        let (tx, rx) = bounded(capacity);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut pool = Self {
            rx,
            shutdown: Arc::clone(&shutdown),
            handles: Vec::with_capacity(num_workers),
        };
        for id in 0..num_workers {
            let tx = tx.clone();
            let shutdown = Arc::clone(&shutdown);
            let feed = Feed::new(Arc::clone(&sampler), worker_rng(seed, id));
            let handle = thread::Builder::new()
                .name(format!("enhance-feed-worker-{id}"))
                .spawn(move || worker_thread_main(id, feed, tx, shutdown))
                .map_err(|e| Error::Worker(format!("failed to spawn worker {id}: {e}")))?;
            pool.handles.push(handle);
        }
        Ok(pool)
    }

    fn next_batch(&self, batch_size: usize) -> Result<Batch> {
        let mut examples = Vec::with_capacity(batch_size);
        while examples.len() < batch_size {
            match self.rx.recv() {
                Ok(example) => examples.push(example?),
                Err(_) => return Err(Error::Worker("all workers exited".into())),
            }
        }
        Batch::collate(examples)
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_rng(seed: Option<u64>, id: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
        None => StdRng::from_entropy(),
    }
}

// --- Worker Thread ---

fn worker_thread_main(
    id: usize,
    feed: Feed<dyn Sampler>,
    tx: Sender<Result<Example>>,
    shutdown: Arc<AtomicBool>,
) {
    tracing::debug!(worker = id, "Worker started");
    for item in feed {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let failed = item.is_err();
        if let Err(e) = &item {
            tracing::error!(worker = id, error = %e, "Sampling failed, stopping worker");
        }
        if !send_example(&tx, &shutdown, item) || failed {
            break;
        }
    }
    tracing::debug!(worker = id, "Worker stopped");
}

/// Send with retry on timeout, checking shutdown between attempts.
fn send_example(
    tx: &Sender<Result<Example>>,
    shutdown: &AtomicBool,
    mut item: Result<Example>,
) -> bool {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        match tx.send_timeout(item, Duration::from_millis(100)) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                item = returned; // Retry with same example
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

// --- Factories ---

/// Batches of clean features (and waveforms with `return_source`).
pub fn clean_loader(
    config: &Config,
    datasets: &DatasetRoot,
    duration: f64,
    batch_size: usize,
    num_workers: usize,
    return_source: bool,
) -> Result<Loader> {
    let sampler = sampler::clean_sampler(config, datasets, duration, return_source)?;
    Loader::new(
        Arc::new(sampler),
        batch_size,
        num_workers,
        config.sampling.prefetch_batches,
    )
}

/// Batches of (clean, reverberant and noisy) pairs.
pub fn distorted_loader(
    config: &Config,
    datasets: &DatasetRoot,
    duration: f64,
    batch_size: usize,
    num_workers: usize,
    return_source: bool,
) -> Result<Loader> {
    let sampler = sampler::distorted_sampler(config, datasets, duration, return_source)?;
    Loader::new(
        Arc::new(sampler),
        batch_size,
        num_workers,
        config.sampling.prefetch_batches,
    )
}

/// Batches of (target, input) pairs from the voiced/silence mixture.
pub fn mixed_loader(
    config: &Config,
    datasets: &DatasetRoot,
    duration: f64,
    batch_size: usize,
    num_workers: usize,
    return_source: bool,
) -> Result<Loader> {
    let sampler = sampler::mixed_sampler(config, datasets, duration, return_source)?;
    Loader::new(
        Arc::new(sampler),
        batch_size,
        num_workers,
        config.sampling.prefetch_batches,
    )
}
