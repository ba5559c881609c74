//! Per-file bookkeeping for incremental synchronization.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::walker::DiscoveredFile;

/// What the index remembers about one source file.
///
/// # Examples
///
/// ```
/// use docindex::ledger::FileRecord;
///
/// let record = FileRecord {
///     last_modified: 1_700_000_000_000_000_000,
///     passage_ids: vec![4, 5, 6],
/// };
/// let json = serde_json::to_string(&record).unwrap();
/// let back: FileRecord = serde_json::from_str(&json).unwrap();
/// assert_eq!(record, back);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Modification time seen when the file was indexed, in nanoseconds
    /// since the Unix epoch.
    pub last_modified: u64,
    /// Passages produced by the file, in document order. Empty for files
    /// that were skipped or had no text.
    pub passage_ids: Vec<u64>,
}

/// Work computed by [`FileLedger::plan`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Tracked files to purge: gone from disk, or modified since indexing.
    pub remove: Vec<String>,
    /// Files to (re)index: untracked, or modified since indexing.
    pub add: Vec<DiscoveredFile>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

/// Source files keyed by their `/`-separated path relative to the
/// documentation folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileLedger {
    records: BTreeMap<String, FileRecord>,
}

impl FileLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.records.get(path)
    }

    /// Replace the record for `path` wholesale.
    pub fn insert(&mut self, path: String, record: FileRecord) {
        self.records.insert(path, record);
    }

    pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.records.remove(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileRecord)> {
        self.records.iter().map(|(path, record)| (path.as_str(), record))
    }

    /// Every passage id owned by some file.
    pub fn passage_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.records
            .values()
            .flat_map(|record| record.passage_ids.iter().copied())
    }

    /// Remove and return every record matching `predicate`.
    pub fn drain_where(
        &mut self,
        mut predicate: impl FnMut(&str, &FileRecord) -> bool,
    ) -> Vec<(String, FileRecord)> {
        let doomed: Vec<String> = self
            .records
            .iter()
            .filter(|(path, record)| predicate(path, record))
            .map(|(path, _)| path.clone())
            .collect();
        doomed
            .into_iter()
            .filter_map(|path| {
                let record = self.records.remove(&path)?;
                Some((path, record))
            })
            .collect()
    }

    /// Compare the ledger against the files currently on disk.
    ///
    /// A tracked file is removed when it is gone or when its on-disk
    /// modification time is strictly greater than the recorded one; in the
    /// latter case it is also re-added. A file whose clock went backwards is
    /// left alone. Untracked files are added.
    pub fn plan(&self, discovered: &[DiscoveredFile]) -> SyncPlan {
        let on_disk: HashMap<&str, &DiscoveredFile> = discovered
            .iter()
            .map(|file| (file.relative_path.as_str(), file))
            .collect();

        let remove: Vec<String> = self
            .records
            .iter()
            .filter(|(path, record)| match on_disk.get(path.as_str()) {
                None => true,
                Some(file) => file.mtime > record.last_modified,
            })
            .map(|(path, _)| path.clone())
            .collect();

        let removed: HashSet<&str> =
            remove.iter().map(String::as_str).collect();
        let add = discovered
            .iter()
            .filter(|file| {
                let path = file.relative_path.as_str();
                !self.records.contains_key(path) || removed.contains(path)
            })
            .cloned()
            .collect();

        SyncPlan { remove, add }
    }
}

impl FromIterator<(String, FileRecord)> for FileLedger {
    fn from_iter<I: IntoIterator<Item = (String, FileRecord)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
