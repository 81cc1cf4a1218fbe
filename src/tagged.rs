//! Tagged-audio dataset: fixed-duration random crops paired with
//! multi-label tag vectors.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{FeederConfig, TagConfig};
use crate::decode::AudioDecoder;
use crate::error::FeederError;
use crate::feeder::{FeederPool, Producer, SkipReason};
use crate::labels::{RawTable, TagTable, build_tag_table};
use crate::queue::{Batch, DEFAULT_POLL_INTERVAL, QueueError, QueueItem, SampleQueue, StopSignal};
use crate::splits::{SplitAssignment, SplitLabel, split_by_prefix, split_random_with};
use crate::window::{CropCache, random_crop};

/// Label table, split and decoded-audio cache for one annotation file.
pub struct TagDataset {
    config: TagConfig,
    table: Arc<TagTable>,
    split: SplitAssignment,
    cache: Arc<CropCache>,
    poll_interval: Duration,
    threads: usize,
}

impl TagDataset {
    /// Read the annotation table named by `config` and build labels and splits.
    pub fn load(config: TagConfig) -> Result<Self, FeederError> {
        config.validate()?;
        let raw = RawTable::from_tsv_path(
            config.annotations_path(),
            &config.root,
            &config.path_column,
            &config.id_column,
        )?;
        Self::from_raw(config, &raw)
    }

    /// Load the `[tagged]` section of a feeder config. Feeders built from
    /// the result use its poll interval and thread count.
    pub fn from_feeder_config(config: &FeederConfig) -> Result<Self, FeederError> {
        config.validate()?;
        let tagged = config
            .tagged
            .clone()
            .ok_or_else(|| FeederError::Config("missing [tagged] section".into()))?;
        let mut dataset = Self::load(tagged)?;
        dataset.poll_interval = config.poll_interval();
        dataset.threads = config.threads;
        Ok(dataset)
    }

    pub fn from_raw(config: TagConfig, raw: &RawTable) -> Result<Self, FeederError> {
        config.validate()?;
        let groups: &[Vec<String>] = if config.merge_tags {
            &config.synonyms
        } else {
            &[]
        };
        let table = build_tag_table(raw, groups, config.top_n)?;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut split = if config.split_randomly {
            // No test split in this mode.
            split_random_with(table.paths(), config.train_fraction, &mut rng)
        } else {
            split_by_prefix(table.paths(), &config.root, &config.prefixes)?
        };
        split.shuffle(&mut rng);

        info!("[feeder:tagged] {} train", split.train.len());
        info!("[feeder:tagged] {} val", split.val.len());
        info!("[feeder:tagged] {} test", split.test.len());

        Ok(Self {
            config,
            table: Arc::new(table),
            split,
            cache: Arc::new(CropCache::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            threads: FeederConfig::default().threads,
        })
    }

    pub fn header(&self) -> &[String] {
        &self.table.row_labels
    }

    pub fn table(&self) -> &TagTable {
        &self.table
    }

    pub fn split(&self) -> &SplitAssignment {
        &self.split
    }

    pub fn cache(&self) -> &Arc<CropCache> {
        &self.cache
    }

    /// Decode every split file once and drop those that cannot yield a
    /// full crop. Returns the number of files removed.
    pub fn retain_croppable(&mut self, decoder: &dyn AudioDecoder) -> usize {
        let crop_len = self.config.crop_samples();
        let before = self.split.len();
        let mut unusable = HashSet::new();

        let all: Vec<PathBuf> = [SplitLabel::Train, SplitLabel::Validation, SplitLabel::Test]
            .iter()
            .flat_map(|&label| self.split.get(label).iter().cloned())
            .collect();
        for path in all {
            match self.cache.get_or_decode(&path, decoder, self.config.sample_rate) {
                Ok(samples) if samples.len() >= crop_len => {}
                Ok(samples) => {
                    warn!(
                        "[feeder:tagged] {} excluded: {} samples < crop of {}",
                        path.display(),
                        samples.len(),
                        crop_len
                    );
                    unusable.insert(path);
                }
                Err(e) => {
                    warn!("[feeder:tagged] {} excluded: {}", path.display(), e);
                    unusable.insert(path);
                }
            }
        }

        self.split.retain(|p| !unusable.contains(p));
        before - self.split.len()
    }

    /// Feeder over one split's files.
    pub fn feeder(
        &self,
        label: SplitLabel,
        decoder: Arc<dyn AudioDecoder>,
        stop: StopSignal,
    ) -> Result<TagFeeder, FeederError> {
        self.feeder_with_poll_interval(label, decoder, stop, self.poll_interval)
    }

    pub fn feeder_with_poll_interval(
        &self,
        label: SplitLabel,
        decoder: Arc<dyn AudioDecoder>,
        stop: StopSignal,
        poll_interval: Duration,
    ) -> Result<TagFeeder, FeederError> {
        let fnames = self.split.get(label).to_vec();
        if fnames.is_empty() {
            return Err(FeederError::Config(format!("{:?} split is empty", label)));
        }

        let producer = TagProducer {
            fnames: fnames.into(),
            table: Arc::clone(&self.table),
            cache: Arc::clone(&self.cache),
            decoder,
            sample_rate: self.config.sample_rate,
            crop_len: self.config.crop_samples(),
        };
        let queue = Arc::new(SampleQueue::with_poll_interval(
            self.config.queue_capacity,
            stop,
            poll_interval,
        ));

        Ok(TagFeeder {
            producer: Arc::new(producer),
            queue,
            seed: self.config.seed,
            threads: self.threads,
        })
    }
}

/// Queue plus the producer that fills it from one split.
pub struct TagFeeder {
    producer: Arc<TagProducer>,
    queue: Arc<SampleQueue>,
    seed: u64,
    threads: usize,
}

impl TagFeeder {
    pub fn n_classes(&self) -> usize {
        self.producer.table.n_classes()
    }

    pub fn crop_len(&self) -> usize {
        self.producer.crop_len
    }

    pub fn queue(&self) -> &Arc<SampleQueue> {
        &self.queue
    }

    pub fn dequeue(&self, n: usize) -> Result<Vec<QueueItem>, QueueError> {
        self.queue.dequeue_many(n)
    }

    pub fn dequeue_batch(&self, n: usize) -> Result<Batch, QueueError> {
        self.queue.dequeue_batch(n)
    }

    /// Start the configured number of workers.
    pub fn start(&self) -> Result<FeederPool, FeederError> {
        self.start_threads(self.threads)
    }

    pub fn start_threads(&self, n_threads: usize) -> Result<FeederPool, FeederError> {
        FeederPool::start(
            Arc::clone(&self.producer),
            Arc::clone(&self.queue),
            n_threads,
            self.seed,
        )
    }
}

struct TagProducer {
    fnames: Arc<[PathBuf]>,
    table: Arc<TagTable>,
    cache: Arc<CropCache>,
    decoder: Arc<dyn AudioDecoder>,
    sample_rate: u32,
    crop_len: usize,
}

impl Producer for TagProducer {
    type Worker = ();
    type Clip = Arc<[f32]>;

    fn new_worker(&self, _index: usize) {}

    /// Same file order every epoch; randomness comes from the crop offset.
    fn epoch_order(&self, _worker: &mut (), _rng: &mut StdRng) -> Vec<PathBuf> {
        self.fnames.to_vec()
    }

    fn load(&self, path: &Path) -> Result<Arc<[f32]>, SkipReason> {
        Ok(self
            .cache
            .get_or_decode(path, self.decoder.as_ref(), self.sample_rate)?)
    }

    fn windows(
        &self,
        _worker: &mut (),
        path: &Path,
        clip: Arc<[f32]>,
        rng: &mut StdRng,
    ) -> Result<Vec<QueueItem>, SkipReason> {
        let labels = self.table.get(path).ok_or(SkipReason::Unlabelled)?;
        let crop = random_crop(&clip, self.crop_len, rng).ok_or(SkipReason::TooShort {
            len: clip.len(),
            min: self.crop_len,
        })?;
        let labels = labels.iter().map(|&v| v as f32).collect();
        Ok(vec![QueueItem::new(crop).with_labels(labels)])
    }
}
