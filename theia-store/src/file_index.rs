//! In-memory index over the partition files in a store's root directory.

use std::path::{Path, PathBuf};

use regex::Regex;
use std::sync::LazyLock;

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+-\d+$").unwrap());

/// One persisted time partition: `start`/`end` are inclusive integer
/// seconds and the filename is exactly `"<start>-<end>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub path: PathBuf,
    pub start: i64,
    pub end: i64,
}

impl DataFile {
    pub fn name(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }
}

/// Returns the index of the first entry with `entry.end >= t`, or `None` if
/// the list is empty, `t` is before the first entry's start, or after the
/// last entry's end.
///
/// Contract: for a non-empty sorted `files` and `t` within
/// `[files[0].start, files.last().end]`, this returns `i` such that
/// `files[i].end >= t` and (`i == 0` or `files[i - 1].end < t`).
pub fn binary_search(files: &[DataFile], t: f64) -> Option<usize> {
    let first = files.first()?;
    let last = files.last()?;
    if (first.start as f64) > t || (last.end as f64) < t {
        return None;
    }

    let mut lo = 0usize;
    let mut hi = files.len() - 1;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if files[mid].end as f64 >= t {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Some(lo)
}

/// Ordered, in-memory view of the partitions under a root directory.
#[derive(Debug, Clone)]
pub struct FileIndex {
    root: PathBuf,
    files: Vec<DataFile>,
}

impl FileIndex {
    /// Scans `root` once, adopting every entry whose name matches
    /// `^\d+-\d+$`. Non-matching entries (and read errors on individual
    /// entries) are skipped rather than failing the whole scan.
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(df) = Self::parse_data_file(&root, name) {
                    files.push(df);
                }
            }
        }
        files.sort_by_key(|f| f.start);
        tracing::info!(count = files.len(), root = %root.display(), "loaded file index");
        Ok(Self { root, files })
    }

    fn parse_data_file(root: &Path, name: &str) -> Option<DataFile> {
        if !FILENAME_RE.is_match(name) {
            return None;
        }
        let (start, end) = name.split_once('-')?;
        Some(DataFile {
            path: root.join(name),
            start: start.parse().ok()?,
            end: end.parse().ok()?,
        })
    }

    /// Registers a newly created partition file, keeping the index sorted.
    pub fn add_file(&mut self, name: &str) {
        if let Some(df) = Self::parse_data_file(&self.root, name) {
            self.files.push(df);
            self.files.sort_by_key(|f| f.start);
        }
    }

    /// Every partition whose range intersects `[from, to]` (`to = None`
    /// meaning open-ended), in ascending start order.
    pub fn find(&self, from: f64, to: Option<f64>) -> Vec<DataFile> {
        let start_idx = self.files.partition_point(|f| (f.end as f64) < from);
        let mut found = Vec::new();
        for df in &self.files[start_idx..] {
            if let Some(to) = to {
                if df.start as f64 > to {
                    break;
                }
            }
            found.push(df.clone());
        }
        found
    }

    /// The partition containing `timestamp`, or the next later partition if
    /// `timestamp` falls in a gap. `None` if `timestamp` is outside the
    /// index's total span.
    pub fn find_event_file(&self, timestamp: f64) -> Option<DataFile> {
        let idx = binary_search(&self.files, timestamp)?;
        self.files.get(idx).cloned()
    }

    /// An immutable, owned snapshot of the current sorted partitions —
    /// readers should take this once and iterate it rather than holding a
    /// reference across a search.
    pub fn snapshot(&self) -> Vec<DataFile> {
        self.files.clone()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn df(start: i64, end: i64) -> DataFile {
        DataFile {
            path: PathBuf::from(format!("{start}-{end}")),
            start,
            end,
        }
    }

    #[test]
    fn binary_search_empty_list() {
        assert_eq!(binary_search(&[], 3.0), None);
    }

    #[test]
    fn binary_search_scenario_6() {
        let files = vec![df(5, 7), df(8, 12), df(13, 14), df(14, 15), df(15, 20)];
        assert_eq!(binary_search(&files, 9.0), Some(1));
    }

    #[test]
    fn binary_search_out_of_span_is_none() {
        let files = vec![df(10, 19), df(30, 39)];
        assert_eq!(binary_search(&files, 5.0), None);
        assert_eq!(binary_search(&files, 45.0), None);
    }

    #[test]
    fn find_event_file_returns_next_on_gap() {
        let mut idx = FileIndex {
            root: PathBuf::from("/tmp"),
            files: vec![df(10, 19), df(30, 39)],
        };
        idx.add_file("not-a-datafile"); // ignored
        let found = idx.find_event_file(27.0).unwrap();
        assert_eq!((found.start, found.end), (30, 39));
    }

    #[test]
    fn find_event_file_outside_span_is_none() {
        let idx = FileIndex {
            root: PathBuf::from("/tmp"),
            files: vec![df(10, 19), df(30, 39)],
        };
        assert!(idx.find_event_file(5.0).is_none());
        assert!(idx.find_event_file(45.0).is_none());
    }

    #[test]
    fn find_scenario_3() {
        let idx = FileIndex {
            root: PathBuf::from("/tmp"),
            files: vec![df(10, 19), df(20, 25), df(30, 39)],
        };
        assert_eq!(idx.find(5.0, Some(105.0)).len(), 3);
        assert!(idx.find(26.0, Some(29.0)).is_empty());
    }

    #[test]
    fn find_open_ended_upper_bound() {
        let idx = FileIndex {
            root: PathBuf::from("/tmp"),
            files: vec![df(10, 19), df(20, 25), df(30, 39)],
        };
        assert_eq!(idx.find(21.0, None).len(), 2);
    }
}
