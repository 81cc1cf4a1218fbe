//! Background reader for the speech corpus.
//!
//! All validation happens in [`SpeechReader::new`], before any worker
//! exists: a missing or non-conforming dataset fails there instead of
//! inside a thread.

use rand::Rng;
use rand::rngs::StdRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::catalog::{self, FileRecord, TranscriptIndex};
use crate::config::{FeederConfig, SpeechConfig};
use crate::decode::AudioDecoder;
use crate::embed::{TextEmbedder, ZeroEmbedder};
use crate::error::FeederError;
use crate::feeder::{FeederPool, Producer, SkipReason};
use crate::labels::compute_cardinality;
use crate::preprocess::{reject_if_short, trim_silence};
use crate::queue::{Batch, DEFAULT_POLL_INTERVAL, QueueError, QueueItem, SampleQueue, StopSignal};
use crate::window::{RollingWindower, whole_clip};

pub struct SpeechReader {
    config: SpeechConfig,
    files: Arc<[FileRecord]>,
    gc_category_cardinality: Option<usize>,
    transcripts: TranscriptIndex,
    decoder: Arc<dyn AudioDecoder>,
    embedder: Arc<dyn TextEmbedder>,
    queue: Arc<SampleQueue>,
    threads: usize,
}

impl SpeechReader {
    /// Build from the `[speech]` section of a feeder config, taking the
    /// poll interval and default thread count from the top level.
    pub fn from_config(
        config: &FeederConfig,
        decoder: Arc<dyn AudioDecoder>,
        stop: StopSignal,
    ) -> Result<Self, FeederError> {
        config.validate()?;
        let speech = config
            .speech
            .clone()
            .ok_or_else(|| FeederError::Config("missing [speech] section".into()))?;
        let mut reader = Self::with_poll_interval(speech, decoder, stop, config.poll_interval())?;
        reader.threads = config.threads;
        Ok(reader)
    }

    pub fn new(
        config: SpeechConfig,
        decoder: Arc<dyn AudioDecoder>,
        stop: StopSignal,
    ) -> Result<Self, FeederError> {
        Self::with_poll_interval(config, decoder, stop, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        config: SpeechConfig,
        decoder: Arc<dyn AudioDecoder>,
        stop: StopSignal,
        poll_interval: Duration,
    ) -> Result<Self, FeederError> {
        config.validate()?;

        let paths = catalog::discover(&config.audio_dir, &config.pattern)?;
        info!("[feeder:speech] files length: {}", paths.len());

        if config.gc_enabled {
            if let Some(path) = catalog::first_without_identity(&paths) {
                return Err(FeederError::IdentityMismatch {
                    path: path.to_path_buf(),
                });
            }
        }

        let files: Vec<FileRecord> = paths.iter().map(catalog::extract_identity).collect();

        // Ids index the embedding table directly, so the table is max id + 1 wide.
        let gc_category_cardinality = if config.gc_enabled {
            let cardinality = compute_cardinality(&files)
                .map(|c| c.cardinality())
                .ok_or_else(|| FeederError::Config("no speaker ids found".into()))?;
            info!("[feeder:speech] Detected --gc_cardinality={}", cardinality);
            Some(cardinality)
        } else {
            None
        };

        let texts = catalog::find_files(&config.audio_dir, &config.text_pattern)?;
        let transcripts = TranscriptIndex::from_paths(&texts);

        let queue = Arc::new(SampleQueue::with_poll_interval(
            config.queue_size,
            stop,
            poll_interval,
        ));

        Ok(Self {
            config,
            files: files.into(),
            gc_category_cardinality,
            transcripts,
            decoder,
            embedder: Arc::new(ZeroEmbedder::default()),
            queue,
            threads: FeederConfig::default().threads,
        })
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn TextEmbedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn gc_category_cardinality(&self) -> Option<usize> {
        self.gc_category_cardinality
    }

    pub fn queue(&self) -> &Arc<SampleQueue> {
        &self.queue
    }

    pub fn dequeue(&self, num_elements: usize) -> Result<Vec<QueueItem>, QueueError> {
        self.queue.dequeue_many(num_elements)
    }

    pub fn dequeue_batch(&self, num_elements: usize) -> Result<Batch, QueueError> {
        self.queue.dequeue_batch(num_elements)
    }

    /// Embedding of the transcript paired with `record`, or zeros if the
    /// record has none.
    pub fn transcript_embedding(&self, record: &FileRecord) -> Result<Vec<f32>, FeederError> {
        match self.transcripts.get(record) {
            Some(path) => {
                let text = fs::read_to_string(path)?;
                Ok(self.embedder.embed(text.trim()))
            }
            None => Ok(self.embedder.zeros()),
        }
    }

    pub fn transcript_path(&self, record: &FileRecord) -> Option<&Path> {
        self.transcripts.get(record)
    }

    /// Start the configured number of workers.
    pub fn start(&self) -> Result<FeederPool, FeederError> {
        self.start_threads(self.threads)
    }

    pub fn start_threads(&self, n_threads: usize) -> Result<FeederPool, FeederError> {
        let producer = SpeechProducer {
            files: Arc::clone(&self.files),
            decoder: Arc::clone(&self.decoder),
            config: self.config.clone(),
        };
        FeederPool::start(
            Arc::new(producer),
            Arc::clone(&self.queue),
            n_threads,
            self.config.seed,
        )
    }
}

struct SpeechProducer {
    files: Arc<[FileRecord]>,
    decoder: Arc<dyn AudioDecoder>,
    config: SpeechConfig,
}

struct SpeechWorker {
    windower: Option<RollingWindower>,
}

struct SpeechClip {
    samples: Vec<f32>,
    category_id: Option<u32>,
}

impl Producer for SpeechProducer {
    type Worker = SpeechWorker;
    type Clip = SpeechClip;

    fn new_worker(&self, _index: usize) -> SpeechWorker {
        SpeechWorker {
            windower: self.config.sample_size.map(RollingWindower::new),
        }
    }

    /// As many uniform draws, with replacement, as there are files.
    fn epoch_order(&self, worker: &mut SpeechWorker, rng: &mut StdRng) -> Vec<PathBuf> {
        if self.config.reset_buffer_each_epoch {
            if let Some(windower) = worker.windower.as_mut() {
                windower.reset();
            }
        }
        let n = self.files.len();
        (0..n)
            .map(|_| self.files[rng.gen_range(0..n)].path.clone())
            .collect()
    }

    fn load(&self, path: &Path) -> Result<SpeechClip, SkipReason> {
        let mut samples = self.decoder.decode(path, self.config.sample_rate)?.samples;

        if let Some(threshold) = self.config.silence_threshold {
            let trimmed = trim_silence(&samples, threshold);
            if trimmed.is_empty() {
                return Err(SkipReason::SilenceOnly);
            }
            samples = trimmed.to_vec();
        }

        if reject_if_short(&samples, self.config.min_samples) {
            return Err(SkipReason::TooShort {
                len: samples.len(),
                min: self.config.min_samples,
            });
        }

        let category_id = if self.config.gc_enabled {
            catalog::extract_identity(path).speaker_id
        } else {
            None
        };

        Ok(SpeechClip {
            samples,
            category_id,
        })
    }

    fn windows(
        &self,
        worker: &mut SpeechWorker,
        _path: &Path,
        clip: SpeechClip,
        _rng: &mut StdRng,
    ) -> Result<Vec<QueueItem>, SkipReason> {
        let windows = match worker.windower.as_mut() {
            Some(windower) => windower.push(&clip.samples),
            None => {
                let clip_len = self.config.clip_samples;
                let window = whole_clip(&clip.samples, clip_len).ok_or(SkipReason::TooShort {
                    len: clip.samples.len(),
                    min: clip_len,
                })?;
                vec![window]
            }
        };

        Ok(windows
            .into_iter()
            .map(|w| QueueItem::new(w).with_category(clip.category_id))
            .collect())
    }
}
