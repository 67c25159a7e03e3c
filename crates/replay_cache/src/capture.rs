//! Artifact capture and restore.
//!
//! Capture snapshots the output directory before a real run, diffs it
//! afterwards and copies every new or rewritten file into the entry.
//! Restore copies stored files back with a fresh modification time and
//! rewrites absolute paths in the captured text to the current checkout.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::error::CacheError;
use crate::index::EntryId;
use crate::store::EntryStore;

/// State of a directory tree at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    files: HashMap<PathBuf, (u64, FileTime)>,
}

impl Snapshot {
    /// Records every file under `root`, skipping the `excluded` directories
    /// and, below the root, hidden directories such as `.git`.
    pub fn take(root: &Path, excluded: &[PathBuf]) -> Self {
        let files = walk_files(root, excluded)
            .into_iter()
            .filter_map(|path| {
                let meta = std::fs::metadata(&path).ok()?;
                Some((path, (meta.len(), FileTime::from_last_modification_time(&meta))))
            })
            .collect();
        Self { files }
    }

    /// Files present in `after` that are new or changed relative to `self`,
    /// sorted.
    pub fn changed_in(&self, after: &Snapshot) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = after
            .files
            .iter()
            .filter(|(path, state)| self.files.get(*path) != Some(state))
            .map(|(path, _)| path.clone())
            .collect();
        changed.sort();
        changed
    }

    /// Every file in the snapshot, sorted.
    pub fn all_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.files.keys().cloned().collect();
        files.sort();
        files
    }

    /// Number of files recorded.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if no files were recorded.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn walk_files(root: &Path, excluded: &[PathBuf]) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            if excluded.iter().any(|ex| e.path() == ex.as_path()) {
                return false;
            }
            let hidden = e.depth() > 0
                && e.file_type().is_dir()
                && e.file_name().to_str().is_some_and(|n| n.starts_with('.'));
            !hidden
        })
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// `path` relative to `root` with `/` separators.
pub(crate) fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Copies `files` (absolute, under `capture_root`) into entry `id` in
/// parallel. Returns their capture-root-relative names and the bytes stored.
pub fn capture_files(
    store: &EntryStore,
    id: EntryId,
    capture_root: &Path,
    files: &[PathBuf],
) -> Result<(Vec<String>, u64), CacheError> {
    let stored = files
        .par_iter()
        .filter_map(|path| relative_to(capture_root, path).map(|rel| (rel, path)))
        .map(|(rel, path)| store.store_file(id, &rel, path).map(|bytes| (rel, bytes)))
        .collect::<Result<Vec<_>, CacheError>>()?;
    let total = stored.iter().map(|(_, bytes)| bytes).sum();
    Ok((stored.into_iter().map(|(rel, _)| rel).collect(), total))
}

/// Copies stored files of entry `id` to their destinations in parallel,
/// overwriting what is there and stamping each with the current time.
/// Each item pairs a stored name with the absolute path it is restored to.
pub fn restore_files(
    store: &EntryStore,
    id: EntryId,
    files: &[(String, PathBuf)],
) -> Result<(), CacheError> {
    let now = FileTime::now();
    files.par_iter().try_for_each(|(rel, dest)| {
        let src = store.stored_file(id, rel);
        if !src.is_file() {
            return Err(CacheError::Corruption {
                entry: id.to_string(),
                reason: format!("stored file {rel} is missing"),
            });
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        std::fs::copy(&src, dest).map_err(|e| CacheError::io(dest, e))?;
        filetime::set_file_mtime(dest, now).map_err(|e| CacheError::io(dest, e))
    })
}

/// `relative` (`/`-separated) placed under `root`.
pub(crate) fn under_root(root: &Path, relative: &str) -> PathBuf {
    relative.split('/').fold(root.to_path_buf(), |acc, p| acc.join(p))
}

/// Rewrites absolute paths recorded at capture time to their current
/// locations in one left-to-right pass, longest match first, so a
/// replacement is never rewritten again.
#[derive(Debug, Clone, Default)]
pub struct PathRewriter {
    pairs: Vec<(String, String)>,
}

impl PathRewriter {
    /// Builds a rewriter from `(old, new)` pairs. Identical and empty pairs
    /// are dropped.
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut seen = HashSet::new();
        let mut pairs: Vec<(String, String)> = pairs
            .into_iter()
            .filter(|(old, new)| !old.is_empty() && old != new)
            .filter(|(old, _)| seen.insert(old.clone()))
            .collect();
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { pairs }
    }

    /// Returns `true` if there is nothing to rewrite.
    pub fn is_identity(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Applies the rewrite to captured output. Matching is on bytes, so
    /// text in any code page passes through untouched around the paths.
    pub fn apply(&self, text: &[u8]) -> Vec<u8> {
        if self.is_identity() {
            return text.to_vec();
        }
        let mut out = Vec::with_capacity(text.len());
        let mut rest = text;
        'outer: while let Some((&first, tail)) = rest.split_first() {
            for (old, new) in &self.pairs {
                if let Some(after) = rest.strip_prefix(old.as_bytes()) {
                    out.extend_from_slice(new.as_bytes());
                    rest = after;
                    continue 'outer;
                }
            }
            out.push(first);
            rest = tail;
        }
        out
    }
}

/// Both spellings a tool may print for `path`: native and `/`-separated.
pub(crate) fn path_spellings(old: &Path, new: &Path) -> Vec<(String, String)> {
    let (old, new) = (old.display().to_string(), new.display().to_string());
    let mut out = vec![(old.replace('\\', "/"), new.replace('\\', "/"))];
    if old.contains('\\') {
        out.push((old, new));
    }
    out
}
