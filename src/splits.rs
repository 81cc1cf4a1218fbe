//! Train/validation/test partitioning of the file universe.

use rand::prelude::*;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};

use crate::config::PrefixTable;
use crate::error::FeederError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SplitLabel {
    Train,
    Validation,
    Test,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitAssignment {
    pub train: Vec<PathBuf>,
    pub val: Vec<PathBuf>,
    pub test: Vec<PathBuf>,
}

impl SplitAssignment {
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, label: SplitLabel) -> &[PathBuf] {
        match label {
            SplitLabel::Train => &self.train,
            SplitLabel::Validation => &self.val,
            SplitLabel::Test => &self.test,
        }
    }

    /// Shuffle each split in place.
    pub fn shuffle(&mut self, rng: &mut StdRng) {
        self.train.shuffle(rng);
        self.val.shuffle(rng);
        self.test.shuffle(rng);
    }

    /// Drop every path for which `keep` returns false, from all splits.
    pub fn retain<F: FnMut(&Path) -> bool>(&mut self, mut keep: F) {
        self.train.retain(|p| keep(p));
        self.val.retain(|p| keep(p));
        self.test.retain(|p| keep(p));
    }
}

/// Sort, shuffle under `seed`, and cut at `floor(train_fraction * len)`.
/// The test split is always empty in this mode.
pub fn split_random(paths: &[PathBuf], train_fraction: f64, seed: u64) -> SplitAssignment {
    let mut rng = StdRng::seed_from_u64(seed);
    split_random_with(paths, train_fraction, &mut rng)
}

pub(crate) fn split_random_with(
    paths: &[PathBuf],
    train_fraction: f64,
    rng: &mut StdRng,
) -> SplitAssignment {
    let mut all = paths.to_vec();
    all.sort();
    all.shuffle(rng);

    let split_point = ((all.len() as f64 * train_fraction).floor() as usize).min(all.len());
    let val = all.split_off(split_point);
    SplitAssignment {
        train: all,
        val,
        test: Vec::new(),
    }
}

/// Assign each path by the first character of its `root`-relative path.
pub fn split_by_prefix(
    paths: &[PathBuf],
    root: &Path,
    table: &PrefixTable,
) -> Result<SplitAssignment, FeederError> {
    let mut split = SplitAssignment::default();
    for path in paths {
        match prefix_label(path, root, table) {
            Some(SplitLabel::Train) => split.train.push(path.clone()),
            Some(SplitLabel::Validation) => split.val.push(path.clone()),
            Some(SplitLabel::Test) => split.test.push(path.clone()),
            None => {
                return Err(FeederError::UnparseableAssignment { path: path.clone() });
            }
        }
    }
    Ok(split)
}

fn prefix_label(path: &Path, root: &Path, table: &PrefixTable) -> Option<SplitLabel> {
    let first = path.strip_prefix(root).ok()?.to_str()?.chars().next()?;
    if table.train.contains(&first) {
        Some(SplitLabel::Train)
    } else if table.val.contains(&first) {
        Some(SplitLabel::Validation)
    } else if table.test.contains(&first) {
        Some(SplitLabel::Test)
    } else {
        None
    }
}
