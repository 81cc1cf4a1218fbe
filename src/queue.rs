//! Bounded producer/consumer queue between feeder workers and the
//! training loop.
//!
//! Both blocking operations wait in short timeouts and re-check the shared
//! [`StopSignal`] between attempts, so shutdown is bounded by one poll
//! interval even while a producer is blocked on a full queue.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Default wait between stop-signal checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue stopped")]
    Stopped,
    #[error("Requested an empty batch")]
    EmptyBatch,
}

/// Shared, set-once stop flag.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One training example as produced by a worker.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueItem {
    pub window: Vec<f32>,
    pub category_id: Option<u32>,
    pub labels: Option<Vec<f32>>,
}

impl QueueItem {
    pub fn new(window: Vec<f32>) -> Self {
        Self {
            window,
            category_id: None,
            labels: None,
        }
    }

    pub fn with_category(mut self, category_id: Option<u32>) -> Self {
        self.category_id = category_id;
        self
    }

    pub fn with_labels(mut self, labels: Vec<f32>) -> Self {
        self.labels = Some(labels);
        self
    }
}

/// Capacity-bounded FIFO with stop-aware blocking.
pub struct BoundedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    // Held for a whole dequeue_many so concurrent consumers get contiguous batches.
    consumer: Mutex<()>,
    stop: StopSignal,
    capacity: usize,
    poll_interval: Duration,
}

pub type SampleQueue = BoundedQueue<QueueItem>;

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize, stop: StopSignal) -> Self {
        Self::with_poll_interval(capacity, stop, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(capacity: usize, stop: StopSignal, poll_interval: Duration) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        let (tx, rx) = channel::bounded(capacity);
        Self {
            tx,
            rx,
            consumer: Mutex::new(()),
            stop,
            capacity,
            poll_interval,
        }
    }

    /// Push an item, blocking while the queue is full.
    /// Fails once the stop signal is observed; the item is dropped.
    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let mut item = item;
        loop {
            if self.stop.is_raised() {
                return Err(QueueError::Stopped);
            }
            match self.tx.send_timeout(item, self.poll_interval) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => {
                    item = returned; // Retry with same item
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(QueueError::Stopped),
            }
        }
    }

    /// Block until `n` items are available and return them in arrival order.
    ///
    /// If the stop signal is raised mid-wait, items already taken for this
    /// batch are discarded along with the rest of the queue.
    pub fn dequeue_many(&self, n: usize) -> Result<Vec<T>, QueueError> {
        if n == 0 {
            return Err(QueueError::EmptyBatch);
        }
        let _consumer = self.consumer.lock().map_err(|_| QueueError::Stopped)?;

        let mut items = Vec::with_capacity(n);
        while items.len() < n {
            if self.stop.is_raised() {
                return Err(QueueError::Stopped);
            }
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(item) => items.push(item),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(QueueError::Stopped),
            }
        }
        Ok(items)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl BoundedQueue<QueueItem> {
    /// [`dequeue_many`](Self::dequeue_many) assembled into parallel arrays.
    pub fn dequeue_batch(&self, n: usize) -> Result<Batch, QueueError> {
        Ok(Batch::assemble(self.dequeue_many(n)?))
    }
}

/// Row-major batch of windows with optional parallel labels.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub batch_size: usize,
    pub window_len: usize,
    /// `[batch_size, window_len]`
    pub windows: Vec<f32>,
    /// Present only if every item carries a category id.
    pub category_ids: Option<Vec<u32>>,
    pub n_classes: usize,
    /// `[batch_size, n_classes]`, present only if every item carries labels.
    pub labels: Option<Vec<f32>>,
}

impl Batch {
    /// Shapes follow the first item; shorter rows are zero-padded and
    /// longer rows truncated.
    pub fn assemble(items: Vec<QueueItem>) -> Self {
        let batch_size = items.len();
        let window_len = items.first().map_or(0, |i| i.window.len());
        let n_classes = items
            .first()
            .and_then(|i| i.labels.as_ref())
            .map_or(0, Vec::len);

        let mut windows = vec![0.0f32; batch_size * window_len];
        for (row, item) in items.iter().enumerate() {
            let src_len = item.window.len().min(window_len);
            windows[row * window_len..row * window_len + src_len]
                .copy_from_slice(&item.window[..src_len]);
        }

        let category_ids = items.iter().map(|i| i.category_id).collect();

        let labels = if items.iter().all(|i| i.labels.is_some()) && batch_size > 0 {
            let mut labels = vec![0.0f32; batch_size * n_classes];
            for (row, item) in items.iter().enumerate() {
                if let Some(src) = &item.labels {
                    let src_len = src.len().min(n_classes);
                    labels[row * n_classes..row * n_classes + src_len]
                        .copy_from_slice(&src[..src_len]);
                }
            }
            Some(labels)
        } else {
            None
        };

        Self {
            batch_size,
            window_len,
            windows,
            category_ids,
            n_classes,
            labels,
        }
    }

    pub fn window(&self, row: usize) -> &[f32] {
        &self.windows[row * self.window_len..(row + 1) * self.window_len]
    }
}
