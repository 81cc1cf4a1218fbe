//! Feeder configuration.
//!
//! Every component takes its settings from these structs at construction;
//! nothing is read from process-wide state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FeederError;

/// Speech corpus reader configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub audio_dir: PathBuf,
    pub pattern: String,
    pub text_pattern: String,
    pub sample_rate: u32,
    /// Attach per-speaker category ids (global conditioning).
    pub gc_enabled: bool,
    /// Fixed window length. `None` feeds whole clips of `clip_samples`.
    pub sample_size: Option<usize>,
    pub clip_samples: usize,
    pub silence_threshold: Option<f32>,
    /// Waveforms shorter than this (after trimming) are dropped.
    pub min_samples: usize,
    pub queue_size: usize,
    pub seed: u64,
    pub reset_buffer_each_epoch: bool,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            audio_dir: PathBuf::from("."),
            pattern: "*.wav".to_string(),
            text_pattern: "*.txt".to_string(),
            sample_rate: 16000,
            gc_enabled: false,
            sample_size: None,
            clip_samples: 16000,
            silence_threshold: None,
            min_samples: 0,
            queue_size: 32,
            seed: 0,
            reset_buffer_each_epoch: false,
        }
    }
}

impl SpeechConfig {
    pub fn validate(&self) -> Result<(), FeederError> {
        if self.sample_rate == 0 {
            return Err(FeederError::Config("sample_rate must be > 0".into()));
        }
        if self.queue_size == 0 {
            return Err(FeederError::Config("queue_size must be > 0".into()));
        }
        if self.sample_size == Some(0) {
            return Err(FeederError::Config("sample_size must be > 0".into()));
        }
        if self.sample_size.is_none() && self.clip_samples == 0 {
            return Err(FeederError::Config("clip_samples must be > 0".into()));
        }
        if let Some(t) = self.silence_threshold {
            if !t.is_finite() || t < 0.0 {
                return Err(FeederError::Config(
                    "silence_threshold must be a non-negative number".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Maps the first character of a root-relative path to a split.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrefixTable {
    pub train: BTreeSet<char>,
    pub val: BTreeSet<char>,
    pub test: BTreeSet<char>,
}

impl Default for PrefixTable {
    fn default() -> Self {
        Self {
            train: "0123456789ab".chars().collect(),
            val: "c".chars().collect(),
            test: "def".chars().collect(),
        }
    }
}

impl PrefixTable {
    pub fn validate(&self) -> Result<(), FeederError> {
        let overlap = self
            .train
            .intersection(&self.val)
            .chain(self.train.intersection(&self.test))
            .chain(self.val.intersection(&self.test))
            .next();
        match overlap {
            Some(c) => Err(FeederError::Config(format!(
                "prefix '{}' is assigned to more than one split",
                c
            ))),
            None => Ok(()),
        }
    }
}

/// Tagged-audio dataset configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    pub root: PathBuf,
    /// Tab-separated annotation file, relative to `root` unless absolute.
    pub annotations: PathBuf,
    pub path_column: String,
    pub id_column: String,
    pub sample_rate: u32,
    pub seconds_of_audio: f32,
    pub top_n: usize,
    pub merge_tags: bool,
    pub synonyms: Vec<Vec<String>>,
    pub split_randomly: bool,
    pub train_fraction: f64,
    pub seed: u64,
    pub queue_capacity: usize,
    pub prefixes: PrefixTable,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            annotations: PathBuf::from("annotations_final.csv"),
            path_column: "mp3_path".to_string(),
            id_column: "clip_id".to_string(),
            sample_rate: 16000,
            seconds_of_audio: 3.0,
            top_n: 50,
            merge_tags: true,
            synonyms: default_synonyms(),
            split_randomly: true,
            train_fraction: 0.95,
            seed: 42,
            queue_capacity: 32,
            prefixes: PrefixTable::default(),
        }
    }
}

impl TagConfig {
    /// Number of samples in one crop.
    pub fn crop_samples(&self) -> usize {
        (self.seconds_of_audio * self.sample_rate as f32) as usize
    }

    pub fn annotations_path(&self) -> PathBuf {
        if self.annotations.is_absolute() {
            self.annotations.clone()
        } else {
            self.root.join(&self.annotations)
        }
    }

    pub fn validate(&self) -> Result<(), FeederError> {
        if self.sample_rate == 0 {
            return Err(FeederError::Config("sample_rate must be > 0".into()));
        }
        if self.crop_samples() == 0 {
            return Err(FeederError::Config("seconds_of_audio too small".into()));
        }
        if self.queue_capacity == 0 {
            return Err(FeederError::Config("queue_capacity must be > 0".into()));
        }
        if self.top_n == 0 {
            return Err(FeederError::Config("top_n must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.train_fraction) {
            return Err(FeederError::Config(
                "train_fraction must be within [0, 1]".into(),
            ));
        }
        self.prefixes.validate()
    }
}

/// Top-level configuration file layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FeederConfig {
    pub speech: Option<SpeechConfig>,
    pub tagged: Option<TagConfig>,
    pub threads: usize,
    pub poll_interval_ms: u64,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            speech: None,
            tagged: None,
            threads: 1,
            poll_interval_ms: 100,
        }
    }
}

impl FeederConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, FeederError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_path<P: AsRef<Path>>(path: P) -> Result<Self, FeederError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Wait between stop-signal checks in the queue.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), FeederError> {
        if self.threads == 0 {
            return Err(FeederError::Config("threads must be > 0".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(FeederError::Config("poll_interval_ms must be > 0".into()));
        }
        if let Some(speech) = &self.speech {
            speech.validate()?;
        }
        if let Some(tagged) = &self.tagged {
            tagged.validate()?;
        }
        Ok(())
    }
}

/// Synonymous tag columns of the MagnaTagATune annotation set.
/// The first entry of each group is the canonical tag.
pub fn default_synonyms() -> Vec<Vec<String>> {
    const GROUPS: &[&[&str]] = &[
        &["beat", "beats"],
        &["chant", "chanting"],
        &["choir", "choral"],
        &["classical", "clasical", "classic"],
        &["drum", "drums"],
        &["electro", "electronic", "electronica", "electric"],
        &["fast", "fast beat", "quick"],
        &[
            "female",
            "female singer",
            "female singing",
            "female vocals",
            "female voice",
            "woman",
            "woman singing",
            "women",
            "female vocal",
        ],
        &["flute", "flutes"],
        &["guitar", "guitars"],
        &["hard", "hard rock"],
        &["harpsichord", "harpsicord"],
        &["heavy", "heavy metal", "metal"],
        &["horn", "horns"],
        &["india", "indian"],
        &["jazz", "jazzy"],
        &[
            "male",
            "male singer",
            "male vocal",
            "male vocals",
            "male voice",
            "man",
            "man singing",
            "men",
        ],
        &["no beat", "no drums"],
        &[
            "no singer",
            "no singing",
            "no vocal",
            "no vocals",
            "no voice",
            "no voices",
            "instrumental",
        ],
        &["opera", "operatic"],
        &["orchestra", "orchestral"],
        &["quiet", "silence"],
        &["singer", "singing"],
        &["space", "spacey"],
        &["string", "strings"],
        &["synth", "synthesizer"],
        &["violin", "violins"],
        &["vocal", "vocals", "voice", "voices"],
        &["strange", "weird"],
    ];
    GROUPS
        .iter()
        .map(|g| g.iter().map(|s| s.to_string()).collect())
        .collect()
}
