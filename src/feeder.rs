//! Worker pool that keeps the sample queue full.
//!
//! Each worker runs its own infinite sequence of epochs:
//!
//! Idle -> DecodingEpoch -> Windowing -> Enqueuing -> DecodingEpoch ... -> Stopped
//!
//! The stop signal is checked before every file and before every enqueue;
//! the enqueue itself is interruptible, so a worker blocked on a full
//! queue still stops within one poll interval.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::decode::DecodeError;
use crate::error::FeederError;
use crate::queue::{QueueItem, SampleQueue, StopSignal};

/// Why a file contributed nothing on this visit. Never fatal.
#[derive(Error, Debug)]
pub enum SkipReason {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error(
        "contains only silence. Consider decreasing trim_silence threshold, or adjust volume of the audio"
    )]
    SilenceOnly,
    #[error("too short ({len} < {min} samples)")]
    TooShort { len: usize, min: usize },
    #[error("no labels for file")]
    Unlabelled,
}

impl SkipReason {
    fn log(&self, path: &Path) {
        match self {
            SkipReason::TooShort { .. } => {
                debug!("[feeder] {} was ignored: {}", path.display(), self)
            }
            _ => warn!("[feeder] {} was ignored: {}", path.display(), self),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    DecodingEpoch = 1,
    Windowing = 2,
    Enqueuing = 3,
    Stopped = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::DecodingEpoch,
            2 => WorkerState::Windowing,
            3 => WorkerState::Enqueuing,
            _ => WorkerState::Stopped,
        }
    }
}

/// The per-corpus part of a worker: which files to visit and how a file
/// becomes queue items.
pub trait Producer: Send + Sync + 'static {
    /// State owned by one worker for its whole lifetime.
    type Worker: Send;
    /// A decoded, preprocessed file.
    type Clip;

    fn new_worker(&self, index: usize) -> Self::Worker;

    /// File visitation order for the next epoch.
    fn epoch_order(&self, worker: &mut Self::Worker, rng: &mut StdRng) -> Vec<PathBuf>;

    fn load(&self, path: &Path) -> Result<Self::Clip, SkipReason>;

    fn windows(
        &self,
        worker: &mut Self::Worker,
        path: &Path,
        clip: Self::Clip,
        rng: &mut StdRng,
    ) -> Result<Vec<QueueItem>, SkipReason>;
}

/// Running worker threads feeding one queue.
pub struct FeederPool {
    queue: Arc<SampleQueue>,
    stop: StopSignal,
    states: Arc<Vec<AtomicU8>>,
    workers_alive: Arc<AtomicUsize>,
    handles: Vec<JoinHandle<()>>,
}

impl FeederPool {
    /// Spawn `thread_count` workers. Worker `i` seeds its RNG with `seed + i`.
    pub fn start<P: Producer>(
        producer: Arc<P>,
        queue: Arc<SampleQueue>,
        thread_count: usize,
        seed: u64,
    ) -> Result<Self, FeederError> {
        if thread_count == 0 {
            return Err(FeederError::Config("thread_count must be > 0".into()));
        }

        let stop = queue.stop_signal().clone();
        let states: Arc<Vec<AtomicU8>> = Arc::new(
            (0..thread_count)
                .map(|_| AtomicU8::new(WorkerState::Idle as u8))
                .collect(),
        );
        let workers_alive = Arc::new(AtomicUsize::new(0));

        let mut pool = Self {
            queue,
            stop,
            states,
            workers_alive,
            handles: Vec::with_capacity(thread_count),
        };

        for index in 0..thread_count {
            let ctx = WorkerContext {
                index,
                producer: Arc::clone(&producer),
                queue: Arc::clone(&pool.queue),
                stop: pool.stop.clone(),
                states: Arc::clone(&pool.states),
                seed: seed.wrapping_add(index as u64),
            };
            pool.workers_alive.fetch_add(1, Ordering::SeqCst);
            let workers_alive = Arc::clone(&pool.workers_alive);

            let spawned = thread::Builder::new()
                .name(format!("feeder-{}", index))
                .spawn(move || {
                    let _guard = CounterGuard(workers_alive);
                    ctx.run();
                });

            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(source) => {
                    pool.workers_alive.fetch_sub(1, Ordering::SeqCst);
                    pool.stop();
                    return Err(FeederError::Spawn { index, source });
                }
            }
        }

        info!("[feeder] started {} worker threads", thread_count);
        Ok(pool)
    }

    pub fn queue(&self) -> &Arc<SampleQueue> {
        &self.queue
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.states
            .iter()
            .map(|s| WorkerState::from_u8(s.load(Ordering::SeqCst)))
            .collect()
    }

    /// Workers whose thread has not yet finished.
    pub fn live_workers(&self) -> usize {
        self.workers_alive.load(Ordering::SeqCst)
    }

    /// Raise the stop signal and join every worker. Idempotent.
    pub fn stop(&mut self) {
        self.stop.raise();
        for h in self.handles.drain(..) {
            if h.join().is_err() {
                warn!("[feeder] worker thread panicked");
            }
        }
    }
}

impl Drop for FeederPool {
    fn drop(&mut self) {
        self.stop();
    }
}

// Decrements the live counter even if the worker panics.
struct CounterGuard(Arc<AtomicUsize>);

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct WorkerContext<P> {
    index: usize,
    producer: Arc<P>,
    queue: Arc<SampleQueue>,
    stop: StopSignal,
    states: Arc<Vec<AtomicU8>>,
    seed: u64,
}

impl<P: Producer> WorkerContext<P> {
    fn set_state(&self, state: WorkerState) {
        self.states[self.index].store(state as u8, Ordering::SeqCst);
    }

    fn run(&self) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut worker = self.producer.new_worker(self.index);
        let mut epoch: u64 = 0;

        'epochs: loop {
            let order = self.producer.epoch_order(&mut worker, &mut rng);
            if order.is_empty() {
                warn!("[feeder] worker {} has no files to visit", self.index);
                break;
            }

            let mut enqueued = 0usize;
            for path in &order {
                if self.stop.is_raised() {
                    break 'epochs;
                }

                self.set_state(WorkerState::DecodingEpoch);
                let clip = match self.producer.load(path) {
                    Ok(c) => c,
                    Err(reason) => {
                        reason.log(path);
                        continue;
                    }
                };

                self.set_state(WorkerState::Windowing);
                let items = match self.producer.windows(&mut worker, path, clip, &mut rng) {
                    Ok(items) => items,
                    Err(reason) => {
                        reason.log(path);
                        continue;
                    }
                };

                self.set_state(WorkerState::Enqueuing);
                for item in items {
                    if self.stop.is_raised() || self.queue.enqueue(item).is_err() {
                        break 'epochs;
                    }
                    enqueued += 1;
                }
            }

            epoch = epoch.wrapping_add(1);
            if enqueued == 0 {
                // Every file was skipped; back off before revisiting them.
                warn!(
                    "[feeder] worker {} produced nothing in epoch {} of {} files",
                    self.index,
                    epoch,
                    order.len()
                );
                self.set_state(WorkerState::Idle);
                thread::sleep(self.queue.poll_interval());
            }
        }

        self.set_state(WorkerState::Stopped);
        debug!(
            "[feeder] worker {} stopped after {} epochs",
            self.index, epoch
        );
    }
}
