//! Construction-time failures.
//!
//! Everything here is fatal and is raised before any worker thread is
//! spawned. Per-file problems during steady-state feeding are
//! [`crate::feeder::SkipReason`] instead.

use std::path::PathBuf;
use thiserror::Error;

use crate::decode::DecodeError;

#[derive(Error, Debug)]
pub enum FeederError {
    #[error("No audio files found in '{root}' matching '{pattern}'")]
    NotFound { root: PathBuf, pattern: String },
    #[error(
        "Global conditioning is enabled, but file name '{path}' does not conform to pattern having id"
    )]
    IdentityMismatch { path: PathBuf },
    #[error("Annotation table has no column '{0}'")]
    Schema(String),
    #[error("Could not parse split prefix of '{path}'")]
    UnparseableAssignment { path: PathBuf },
    #[error("Annotation table error: {0}")]
    Table(#[from] csv::Error),
    #[error("Invalid annotation value '{value}' in column '{column}'")]
    TableValue { column: String, value: String },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to spawn worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },
}
