//! File discovery and identity extraction.
//!
//! Speech files follow the `p<speaker>_<sequence>.<ext>` naming convention
//! (e.g. `p225_001.wav`); the numeric fields become the sample identity.

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::FeederError;

/// Identity parsed from a file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub speaker_id: Option<u32>,
    pub sequence_id: Option<u32>,
}

impl FileRecord {
    pub fn has_identity(&self) -> bool {
        self.speaker_id.is_some() && self.sequence_id.is_some()
    }
}

fn identity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^p([0-9]+)_([0-9]+)\.[A-Za-z0-9]+$").expect("identity pattern is valid")
    })
}

/// Recursively lists files under `root` whose name matches the glob `pattern`.
///
/// The result is sorted so that discovery order does not depend on the
/// filesystem. Unreadable entries are skipped.
pub fn find_files<P: AsRef<Path>>(root: P, pattern: &str) -> Result<Vec<PathBuf>, FeederError> {
    let matcher = glob::Pattern::new(pattern)
        .map_err(|e| FeederError::Config(format!("invalid file pattern '{}': {}", pattern, e)))?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root.as_ref()).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("[feeder:catalog] skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if matcher.matches(name) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    debug!(
        "[feeder:catalog] {} files matching '{}' under {}",
        files.len(),
        pattern,
        root.as_ref().display()
    );
    Ok(files)
}

/// Like [`find_files`], but an empty result is an error.
pub fn discover<P: AsRef<Path>>(root: P, pattern: &str) -> Result<Vec<PathBuf>, FeederError> {
    let files = find_files(root.as_ref(), pattern)?;
    if files.is_empty() {
        return Err(FeederError::NotFound {
            root: root.as_ref().to_path_buf(),
            pattern: pattern.to_string(),
        });
    }
    Ok(files)
}

pub fn extract_identity<P: AsRef<Path>>(path: P) -> FileRecord {
    let path = path.as_ref();
    let captures = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|name| identity_regex().captures(name));

    let (speaker_id, sequence_id) = match captures {
        Some(c) => (
            c.get(1).and_then(|m| m.as_str().parse().ok()),
            c.get(2).and_then(|m| m.as_str().parse().ok()),
        ),
        None => (None, None),
    };

    FileRecord {
        path: path.to_path_buf(),
        speaker_id,
        sequence_id,
    }
}

pub fn validate_all_have_identity<P: AsRef<Path>>(paths: &[P]) -> bool {
    first_without_identity(paths).is_none()
}

/// First path whose name does not carry an identity, if any.
pub fn first_without_identity<P: AsRef<Path>>(paths: &[P]) -> Option<&Path> {
    paths
        .iter()
        .map(|p| p.as_ref())
        .find(|p| !extract_identity(p).has_identity())
}

/// Transcript files keyed by the (speaker, sequence) identity of their name.
#[derive(Debug, Default)]
pub struct TranscriptIndex {
    by_identity: HashMap<(u32, u32), PathBuf>,
}

impl TranscriptIndex {
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Self {
        let mut by_identity = HashMap::new();
        for path in paths {
            let record = extract_identity(path);
            if let (Some(speaker), Some(sequence)) = (record.speaker_id, record.sequence_id) {
                by_identity.insert((speaker, sequence), record.path);
            }
        }
        Self { by_identity }
    }

    pub fn get(&self, record: &FileRecord) -> Option<&Path> {
        let key = (record.speaker_id?, record.sequence_id?);
        self.by_identity.get(&key).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn test_find_files_recursive() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "p1_0.wav");
        touch(dir.path(), "nested/deeper/p2_3.wav");
        touch(dir.path(), "nested/p2_3.txt");

        let wavs = find_files(dir.path(), "*.wav").unwrap();
        assert_eq!(wavs.len(), 2);
        assert!(wavs.iter().all(|p| p.extension().unwrap() == "wav"));

        let texts = find_files(dir.path(), "*.txt").unwrap();
        assert_eq!(texts.len(), 1);
    }

    #[test]
    fn test_discover_empty_is_not_found() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "notes.txt");
        assert!(matches!(
            discover(dir.path(), "*.wav"),
            Err(FeederError::NotFound { .. })
        ));
    }

    #[test]
    fn test_extract_identity() {
        let record = extract_identity("/data/vctk/p225/p225_017.wav");
        assert_eq!(record.speaker_id, Some(225));
        assert_eq!(record.sequence_id, Some(17));

        let record = extract_identity("/data/other/speech.wav");
        assert_eq!(record.speaker_id, None);
        assert_eq!(record.sequence_id, None);
        assert!(!record.has_identity());
    }

    #[test]
    fn test_identity_is_basename_only() {
        // A conforming directory name must not lend identity to the file.
        assert!(!extract_identity("/p1_2.wav/clip.wav").has_identity());
        assert!(!extract_identity("xp1_2.wav").has_identity());
    }

    #[test]
    fn test_validate_all_have_identity() {
        assert!(validate_all_have_identity(&["a/p1_0.wav", "b/p3_9.flac"]));
        assert!(!validate_all_have_identity(&["a/p1_0.wav", "b/anon.wav"]));
        assert_eq!(
            first_without_identity(&["a/p1_0.wav", "b/anon.wav"]),
            Some(Path::new("b/anon.wav"))
        );
    }

    #[test]
    fn test_transcript_index() {
        let index = TranscriptIndex::from_paths(&["x/p1_0.txt", "x/p1_1.txt", "x/readme.txt"]);
        assert_eq!(index.len(), 2);

        let record = extract_identity("y/p1_1.wav");
        assert_eq!(index.get(&record), Some(Path::new("x/p1_1.txt")));
        assert_eq!(index.get(&extract_identity("y/p2_1.wav")), None);
    }
}
