//! Label derivation.
//!
//! - Speech corpus: per-speaker category ids, sized by the largest id seen.
//! - Tagged corpus: binary tag vectors read from a tab-separated annotation
//!   table, with synonym merging and top-N tag selection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::catalog::FileRecord;
use crate::error::FeederError;

/// Range of speaker ids observed in a catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CategoryCardinality {
    pub min_id: u32,
    pub max_id: u32,
}

impl CategoryCardinality {
    /// Embedding table size. Ids are used directly as zero-based indices,
    /// so slots below `min_id` stay unused.
    pub fn cardinality(&self) -> usize {
        self.max_id as usize + 1
    }
}

/// Running min/max over the speaker ids of `records`.
/// Returns `None` when no record carries a speaker id.
pub fn compute_cardinality(records: &[FileRecord]) -> Option<CategoryCardinality> {
    records
        .iter()
        .filter_map(|r| r.speaker_id)
        .fold(None, |acc, id| match acc {
            None => Some(CategoryCardinality {
                min_id: id,
                max_id: id,
            }),
            Some(c) => Some(CategoryCardinality {
                min_id: c.min_id.min(id),
                max_id: c.max_id.max(id),
            }),
        })
}

/// Annotation table as loaded, before any tag processing.
///
/// Stored column-major: `data[c][r]` is tag column `c` at row `r`.
#[derive(Clone, Debug, Default)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub data: Vec<Vec<u32>>,
    pub paths: Vec<PathBuf>,
}

impl RawTable {
    /// Read a tab-separated table. Every column other than `path_column`
    /// and `id_column` is a tag column of non-negative integers. Paths are
    /// joined onto `root`.
    pub fn from_tsv_path<P: AsRef<Path>>(
        path: P,
        root: &Path,
        path_column: &str,
        id_column: &str,
    ) -> Result<Self, FeederError> {
        let reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_path(path)?;
        Self::from_reader(reader, root, path_column, id_column)
    }

    pub fn from_tsv_str(
        text: &str,
        root: &Path,
        path_column: &str,
        id_column: &str,
    ) -> Result<Self, FeederError> {
        let reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_reader(text.as_bytes());
        Self::from_reader(reader, root, path_column, id_column)
    }

    fn from_reader<R: std::io::Read>(
        mut reader: csv::Reader<R>,
        root: &Path,
        path_column: &str,
        id_column: &str,
    ) -> Result<Self, FeederError> {
        let headers = reader.headers()?.clone();
        let path_idx = headers
            .iter()
            .position(|h| h == path_column)
            .ok_or_else(|| FeederError::Schema(path_column.to_string()))?;
        let id_idx = headers.iter().position(|h| h == id_column);

        let tag_indices: Vec<usize> = (0..headers.len())
            .filter(|&i| i != path_idx && Some(i) != id_idx)
            .collect();
        let columns: Vec<String> = tag_indices.iter().map(|&i| headers[i].to_string()).collect();
        let mut data = vec![Vec::new(); columns.len()];
        let mut paths = Vec::new();

        for record in reader.records() {
            let record = record?;
            paths.push(root.join(&record[path_idx]));
            for (c, &i) in tag_indices.iter().enumerate() {
                let raw = record.get(i).unwrap_or("").trim();
                let value = raw.parse::<u32>().map_err(|_| FeederError::TableValue {
                    column: columns[c].clone(),
                    value: raw.to_string(),
                })?;
                data[c].push(value);
            }
        }

        Ok(Self {
            columns,
            data,
            paths,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.paths.len()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Selected tags and the per-file binary label vector aligned to them.
#[derive(Clone, Debug, Default)]
pub struct TagTable {
    pub row_labels: Vec<String>,
    rows: HashMap<PathBuf, Vec<u8>>,
    order: Vec<PathBuf>,
}

impl TagTable {
    pub fn get(&self, path: &Path) -> Option<&[u8]> {
        self.rows.get(path).map(Vec::as_slice)
    }

    /// Labelled paths in table order, without duplicates.
    pub fn paths(&self) -> &[PathBuf] {
        &self.order
    }

    pub fn n_classes(&self) -> usize {
        self.row_labels.len()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Merge synonym groups into their first (canonical) member, clamp to
/// {0, 1}, then keep the `top_n` tags with the most positive rows.
///
/// Ranking is by descending column sum; equal sums keep table column order.
pub fn build_tag_table(
    raw: &RawTable,
    synonym_groups: &[Vec<String>],
    top_n: usize,
) -> Result<TagTable, FeederError> {
    let mut columns = raw.columns.clone();
    let mut data = raw.data.clone();
    info!(
        "[feeder:labels] ({}, {}) pre-merge",
        raw.n_rows(),
        columns.len()
    );

    for group in synonym_groups {
        let Some((canonical, synonyms)) = group.split_first() else {
            continue;
        };
        let find = |columns: &[String], name: &str| {
            columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| FeederError::Schema(name.to_string()))
        };
        find(&columns, canonical)?;
        for syn in synonyms {
            find(&columns, syn)?;
        }

        for syn in synonyms {
            let syn_idx = find(&columns, syn)?;
            let syn_values = data.remove(syn_idx);
            columns.remove(syn_idx);
            let canon_idx = find(&columns, canonical)?;
            for (dst, src) in data[canon_idx].iter_mut().zip(syn_values) {
                *dst = dst.saturating_add(src);
            }
        }
    }

    let clamped: Vec<Vec<u8>> = data
        .iter()
        .map(|col| col.iter().map(|&v| u8::from(v > 0)).collect())
        .collect();
    info!(
        "[feeder:labels] ({}, {}) post-merge",
        raw.n_rows(),
        columns.len()
    );

    let sums: Vec<usize> = clamped
        .iter()
        .map(|col| col.iter().map(|&v| v as usize).sum())
        .collect();
    let mut ranked: Vec<usize> = (0..columns.len()).collect();
    ranked.sort_by(|&a, &b| sums[b].cmp(&sums[a]));
    ranked.truncate(top_n);

    let row_labels = ranked.iter().map(|&c| columns[c].clone()).collect();
    let mut rows = HashMap::with_capacity(raw.n_rows());
    let mut order = Vec::with_capacity(raw.n_rows());
    for (r, path) in raw.paths.iter().enumerate() {
        let vector = ranked.iter().map(|&c| clamped[c][r]).collect();
        if rows.insert(path.clone(), vector).is_none() {
            order.push(path.clone());
        }
    }

    Ok(TagTable {
        row_labels,
        rows,
        order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::extract_identity;

    fn records(names: &[&str]) -> Vec<FileRecord> {
        names.iter().map(extract_identity).collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    const TABLE: &str = "clip_id\tbeat\tbeats\tguitar\tquiet\tsilence\tmp3_path\n\
                         1\t1\t1\t0\t0\t1\t0/a.mp3\n\
                         2\t0\t1\t1\t0\t0\t1/b.mp3\n\
                         3\t0\t0\t1\t0\t0\tc/c.mp3\n\
                         4\t0\t0\t0\t0\t0\td/d.mp3\n";

    fn raw() -> RawTable {
        RawTable::from_tsv_str(TABLE, Path::new("/root"), "mp3_path", "clip_id").unwrap()
    }

    #[test]
    fn test_cardinality_is_max_plus_one() {
        let c = compute_cardinality(&records(&["p3_0.wav", "p7_1.wav", "p5_2.wav"])).unwrap();
        assert_eq!(c.min_id, 3);
        assert_eq!(c.max_id, 7);
        assert_eq!(c.cardinality(), 8);
    }

    #[test]
    fn test_cardinality_single_file() {
        let c = compute_cardinality(&records(&["p1_0.wav"])).unwrap();
        assert_eq!((c.min_id, c.max_id), (1, 1));
        assert_eq!(c.cardinality(), 2);
    }

    #[test]
    fn test_cardinality_descending_input() {
        // Running max must be updated even when the first id is the smallest seen later.
        let c = compute_cardinality(&records(&["p9_0.wav", "p2_0.wav", "p4_0.wav"])).unwrap();
        assert_eq!((c.min_id, c.max_id), (2, 9));
    }

    #[test]
    fn test_cardinality_empty() {
        assert!(compute_cardinality(&[]).is_none());
        assert!(compute_cardinality(&records(&["anon.wav"])).is_none());
    }

    #[test]
    fn test_load_tsv() {
        let table = raw();
        assert_eq!(table.columns, strings(&["beat", "beats", "guitar", "quiet", "silence"]));
        assert_eq!(table.n_rows(), 4);
        assert_eq!(table.paths[2], PathBuf::from("/root/c/c.mp3"));
        assert_eq!(table.data[table.column_index("beats").unwrap()], vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_missing_path_column() {
        let err = RawTable::from_tsv_str("a\tb\n1\t0\n", Path::new("/"), "mp3_path", "clip_id");
        assert!(matches!(err, Err(FeederError::Schema(c)) if c == "mp3_path"));
    }

    #[test]
    fn test_non_numeric_tag() {
        let err = RawTable::from_tsv_str("beat\tmp3_path\nyes\ta.mp3\n", Path::new("/"), "mp3_path", "clip_id");
        assert!(matches!(err, Err(FeederError::TableValue { .. })));
    }

    #[test]
    fn test_merge_is_logical_or() {
        let table = raw();
        let groups = vec![strings(&["beat", "beats"]), strings(&["quiet", "silence"])];
        let tags = build_tag_table(&table, &groups, 10).unwrap();

        assert_eq!(tags.n_classes(), 3);
        assert!(!tags.row_labels.contains(&"beats".to_string()));
        assert!(!tags.row_labels.contains(&"silence".to_string()));

        let beat = tags.row_labels.iter().position(|l| l == "beat").unwrap();
        let quiet = tags.row_labels.iter().position(|l| l == "quiet").unwrap();
        let beat_col = table.column_index("beat").unwrap();
        let beats_col = table.column_index("beats").unwrap();
        for (r, path) in table.paths.iter().enumerate() {
            let expected = u8::from(table.data[beat_col][r] > 0 || table.data[beats_col][r] > 0);
            assert_eq!(tags.get(path).unwrap()[beat], expected);
        }
        assert_eq!(tags.get(Path::new("/root/0/a.mp3")).unwrap()[quiet], 1);
    }

    #[test]
    fn test_top_n_ranking_and_ties() {
        let table = raw();
        let groups = vec![strings(&["beat", "beats"])];
        // Sums after merge: beat=2, guitar=2, quiet=0, silence=1.
        let tags = build_tag_table(&table, &groups, 3).unwrap();
        assert_eq!(tags.row_labels, strings(&["beat", "guitar", "silence"]));
        assert_eq!(tags.get(Path::new("/root/1/b.mp3")).unwrap(), &[1, 1, 0]);
    }

    #[test]
    fn test_unknown_synonym_is_schema_error() {
        let groups = vec![strings(&["beat", "beatz"])];
        let err = build_tag_table(&raw(), &groups, 5);
        assert!(matches!(err, Err(FeederError::Schema(c)) if c == "beatz"));
    }

    #[test]
    fn test_no_merge_keeps_all_columns() {
        let tags = build_tag_table(&raw(), &[], 50).unwrap();
        assert_eq!(tags.n_classes(), 5);
        assert_eq!(tags.len(), 4);
        assert_eq!(tags.paths()[0], PathBuf::from("/root/0/a.mp3"));
    }
}
