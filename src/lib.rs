//! Background data feeder for WaveNet-style audio model training.
//!
//! Multi-threaded producers feeding one bounded queue:
//! - Recursive file discovery with `p<speaker>_<seq>` identity extraction
//! - Speaker category ids or tag-vector labels
//! - Audio decoding (symphonia) with resampling and silence trimming
//! - Fixed-size windowing, whole clips, or cached random crops
//! - Stop-aware bounded queue consumed in batches by the training loop

pub mod catalog;
pub mod config;
pub mod decode;
pub mod embed;
pub mod error;
pub mod feeder;
pub mod labels;
pub mod preprocess;
pub mod queue;
pub mod speech;
pub mod splits;
pub mod tagged;
pub mod window;

pub use config::{FeederConfig, PrefixTable, SpeechConfig, TagConfig};
pub use decode::{AudioDecoder, DecodeError, SymphoniaDecoder, Waveform};
pub use embed::{TextEmbedder, ZeroEmbedder};
pub use error::FeederError;
pub use feeder::{FeederPool, Producer, SkipReason, WorkerState};
pub use queue::{Batch, BoundedQueue, QueueError, QueueItem, SampleQueue, StopSignal};
pub use speech::SpeechReader;
pub use splits::{SplitAssignment, SplitLabel};
pub use tagged::{TagDataset, TagFeeder};
