//! The cache index: subject to recorded entries.
//!
//! Stored as `index.json` in the cache directory. Every entry carries the
//! command fingerprint and the dependency fingerprints it was captured
//! under; the entry's files live in the [`EntryStore`](crate::store::EntryStore)
//! under the same identifier. The index is loaded wholesale and replaced
//! atomically on every write, so a reader never sees a partial file.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::fingerprint::{CommandFingerprint, FileFingerprint};
use crate::options::ContentHashing;

/// Name of the index file within the cache directory.
pub const INDEX_FILE: &str = "index.json";

/// Current index format version. Increment on breaking changes.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Identifier of a stored entry. A counter, never derived from content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl EntryId {
    /// Directory name of this entry inside the store.
    pub fn dir_name(self) -> String {
        format!("entry_{:06}", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// Metadata of one recorded execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Link to the stored files and execution record.
    pub id: EntryId,
    /// Command the entry was recorded for.
    pub command: CommandFingerprint,
    /// Dependencies in effect at capture time, in detection order.
    pub dependencies: Vec<FileFingerprint>,
    /// Hashing mode the dependency hashes were computed with.
    #[serde(default)]
    pub hashing: ContentHashing,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
}

/// Subject key to its entries, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheIndex {
    /// Format version of this file.
    pub version: u32,
    /// Lowest identifier not yet handed out. Survives [`CacheIndex::clear`].
    pub next_entry_id: u64,
    /// Entries per subject key.
    pub subjects: BTreeMap<String, Vec<IndexEntry>>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            version: INDEX_FORMAT_VERSION,
            next_entry_id: 1,
            subjects: BTreeMap::new(),
        }
    }

    /// Loads the index from the cache directory, returning `None` if the
    /// file doesn't exist, can't be parsed, or has a different format
    /// version.
    pub fn load(cache_dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(cache_dir.join(INDEX_FILE)).ok()?;
        let index: Self = serde_json::from_str(&content).ok()?;
        (index.version == INDEX_FORMAT_VERSION).then_some(index)
    }

    /// Loads the index, starting empty if it is missing or unreadable.
    /// An unreadable index is logged; it is never an error.
    pub fn load_or_default(cache_dir: &Path) -> Self {
        match Self::load(cache_dir) {
            Some(index) => index,
            None => {
                let path = cache_dir.join(INDEX_FILE);
                if path.exists() {
                    tracing::warn!(index = %path.display(), "unreadable cache index, starting empty");
                }
                Self::new()
            }
        }
    }

    /// Writes the index atomically (temporary file, then rename).
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        write_atomic(&cache_dir.join(INDEX_FILE), &json)
    }

    /// Entries recorded for `subject` under `command`, newest first.
    pub fn candidates(&self, subject: &str, command: &CommandFingerprint) -> Vec<&IndexEntry> {
        let mut entries: Vec<&IndexEntry> = self
            .subjects
            .get(subject)
            .map(|list| list.iter().filter(|e| &e.command == command).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        entries
    }

    /// Appends an entry under `subject`.
    pub fn insert(&mut self, subject: &str, entry: IndexEntry) {
        self.next_entry_id = self.next_entry_id.max(entry.id.0 + 1);
        self.subjects
            .entry(subject.to_string())
            .or_default()
            .push(entry);
    }

    /// Drops one entry, e.g. after its stored files proved unreadable.
    pub fn remove(&mut self, subject: &str, id: EntryId) -> bool {
        let Some(list) = self.subjects.get_mut(subject) else {
            return false;
        };
        let before = list.len();
        list.retain(|e| e.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.subjects.remove(subject);
        }
        removed
    }

    /// Removes every entry. The id counter is kept so identifiers are never
    /// reused while a concurrent writer may still hold one.
    pub fn clear(&mut self) {
        self.subjects.clear();
    }

    /// Total number of entries.
    pub fn entry_count(&self) -> usize {
        self.subjects.values().map(Vec::len).sum()
    }

    /// Number of distinct subjects.
    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    /// Iterates over every entry with its subject key.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.subjects
            .iter()
            .flat_map(|(subject, list)| list.iter().map(move |e| (subject.as_str(), e)))
    }
}

/// Writes `bytes` to `path` through a sibling temporary file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let tmp = parent.join(format!(".{name}.tmp.{}", std::process::id()));
    {
        let mut f = std::fs::File::create(&tmp).map_err(|e| CacheError::io(&tmp, e))?;
        f.write_all(bytes).map_err(|e| CacheError::io(&tmp, e))?;
        f.sync_all().map_err(|e| CacheError::io(&tmp, e))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        CacheError::io(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_common::{ContentHash, RepoPath};

    fn command(args: &[&str]) -> CommandFingerprint {
        CommandFingerprint {
            tool: "cl".to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn entry(id: u64, args: &[&str]) -> IndexEntry {
        IndexEntry {
            id: EntryId(id),
            command: command(args),
            dependencies: vec![FileFingerprint {
                path: RepoPath::from_relative("main.cpp"),
                size: 12,
                mtime_ns: 1_700_000_000_000_000_000,
                ctime_ns: None,
                hash: Some(ContentHash::from_bytes(b"int main();")),
            }],
            hashing: ContentHashing::Normalized,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn new_index_is_empty() {
        let index = CacheIndex::new();
        assert_eq!(index.entry_count(), 0);
        assert_eq!(index.next_entry_id, 1);
    }

    #[test]
    fn entry_dir_name_format() {
        assert_eq!(EntryId(7).dir_name(), "entry_000007");
        assert_eq!(EntryId(1_234_567).to_string(), "entry_1234567");
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CacheIndex::new();
        index.insert("main.cpp", entry(1, &["/c", "/W4"]));
        index.save(dir.path()).unwrap();

        let loaded = CacheIndex::load(dir.path()).unwrap();
        assert_eq!(loaded.entry_count(), 1);
        assert_eq!(loaded.next_entry_id, 2);
        assert_eq!(loaded.subjects["main.cpp"][0], index.subjects["main.cpp"][0]);
    }

    #[test]
    fn load_corrupt_json_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), "not valid json {{{").unwrap();
        assert!(CacheIndex::load(dir.path()).is_none());
        assert_eq!(CacheIndex::load_or_default(dir.path()).entry_count(), 0);
    }

    #[test]
    fn load_other_version_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CacheIndex::new();
        index.version = 99;
        index.save(dir.path()).unwrap();
        assert!(CacheIndex::load(dir.path()).is_none());
    }

    #[test]
    fn candidates_filter_by_command_newest_first() {
        let mut index = CacheIndex::new();
        index.insert("main.cpp", entry(1, &["/c", "/W4"]));
        index.insert("main.cpp", entry(2, &["/c", "/W3"]));
        index.insert("main.cpp", entry(3, &["/c", "/W4"]));
        let w4 = command(&["/c", "/W4"]);
        let ids: Vec<u64> = index.candidates("main.cpp", &w4).iter().map(|e| e.id.0).collect();
        assert_eq!(ids, [3, 1]);
        assert_eq!(index.candidates("other.cpp", &w4).len(), 0);
    }

    #[test]
    fn remove_and_clear() {
        let mut index = CacheIndex::new();
        index.insert("a.cpp", entry(1, &[]));
        index.insert("b.cpp", entry(2, &[]));
        assert!(index.remove("a.cpp", EntryId(1)));
        assert!(!index.remove("a.cpp", EntryId(1)));
        assert_eq!(index.subject_count(), 1);
        index.clear();
        assert_eq!(index.entry_count(), 0);
        assert_eq!(index.next_entry_id, 3);
    }

    #[test]
    fn save_leaves_no_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        CacheIndex::new().save(dir.path()).unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(INDEX_FILE)]);
    }
}
