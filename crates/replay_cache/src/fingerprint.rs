//! File and command fingerprints.
//!
//! A [`FileFingerprint`] records what a dependency looked like when an entry
//! was captured; a [`CommandFingerprint`] records the tool and the arguments
//! that affect its output. Both are stored in the index and compared by the
//! decider.

use std::collections::HashMap;
use std::path::Path;

use filetime::FileTime;
use replay_common::{ContentHash, RepoPath};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::normalize::{is_normalized_extension, normalize_source};
use crate::options::ContentHashing;

/// Filesystem metadata used by the fast path of the decider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Size in bytes.
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
    /// Inode change time in nanoseconds since the Unix epoch (unix only).
    pub ctime_ns: Option<i64>,
}

impl FileStat {
    /// Reads metadata for `path`, failing with [`CacheError::NotFound`] if
    /// the path does not exist.
    pub fn read(path: &Path) -> Result<Self, CacheError> {
        let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CacheError::NotFound {
                path: path.to_path_buf(),
            },
            _ => CacheError::io(path, e),
        })?;
        if !meta.is_file() {
            return Err(CacheError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Ok(Self {
            size: meta.len(),
            mtime_ns: to_nanos(FileTime::from_last_modification_time(&meta)),
            ctime_ns: change_time(&meta),
        })
    }
}

fn to_nanos(t: FileTime) -> i64 {
    t.unix_seconds()
        .saturating_mul(1_000_000_000)
        .saturating_add(i64::from(t.nanoseconds()))
}

#[cfg(unix)]
fn change_time(meta: &std::fs::Metadata) -> Option<i64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ctime().saturating_mul(1_000_000_000).saturating_add(meta.ctime_nsec()))
}

#[cfg(not(unix))]
fn change_time(_meta: &std::fs::Metadata) -> Option<i64> {
    None
}

/// Recorded identity of one dependency file.
///
/// Equality compares the logical path, size and content hash only, so two
/// fingerprints of identical content at the same repository-relative path
/// are equal wherever the checkout lives and whenever it was touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// Repository-relative path.
    pub path: RepoPath,
    /// Size in bytes.
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
    /// Inode change time, where the platform has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctime_ns: Option<i64>,
    /// Content hash, when one was computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
}

impl PartialEq for FileFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.size == other.size && self.hash == other.hash
    }
}

impl Eq for FileFingerprint {}

impl FileFingerprint {
    /// Returns `true` if `stat` matches the recorded metadata exactly.
    pub fn metadata_matches(&self, stat: &FileStat) -> bool {
        if self.size != stat.size || self.mtime_ns != stat.mtime_ns {
            return false;
        }
        match (self.ctime_ns, stat.ctime_ns) {
            (Some(recorded), Some(current)) => recorded == current,
            _ => true,
        }
    }

    fn from_stat(path: RepoPath, stat: FileStat) -> Self {
        Self {
            path,
            size: stat.size,
            mtime_ns: stat.mtime_ns,
            ctime_ns: stat.ctime_ns,
            hash: None,
        }
    }
}

/// Fingerprints a file from metadata alone; no content is read.
pub fn fingerprint_file(repo_root: &Path, path: &Path) -> Result<FileFingerprint, CacheError> {
    let repo_path = RepoPath::new(repo_root, path)?;
    let stat = FileStat::read(&repo_path.to_absolute(repo_root))?;
    Ok(FileFingerprint::from_stat(repo_path, stat))
}

/// Fingerprints a file and records its content hash.
///
/// Metadata is read before the content, so a write racing with the hash
/// leaves a fingerprint that can only miss later, never falsely hit.
pub fn fingerprint_file_hashed(
    repo_root: &Path,
    path: &Path,
    hashing: ContentHashing,
) -> Result<FileFingerprint, CacheError> {
    let mut fp = fingerprint_file(repo_root, path)?;
    fp.hash = Some(hash_file(&fp.path.to_absolute(repo_root), hashing)?);
    Ok(fp)
}

/// Hashes a file's content.
///
/// In [`ContentHashing::Normalized`] mode, C-family sources are hashed after
/// [`normalize_source`]; everything else hashes its raw bytes. Sources that
/// are not valid UTF-8 (legacy code pages) are also hashed raw, since a lossy
/// decode would map distinct bytes to the same replacement character.
pub fn hash_file(path: &Path, hashing: ContentHashing) -> Result<ContentHash, CacheError> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CacheError::NotFound {
            path: path.to_path_buf(),
        },
        _ => CacheError::io(path, e),
    })?;
    let normalize = hashing == ContentHashing::Normalized
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| is_normalized_extension(&e.to_ascii_lowercase()));
    match std::str::from_utf8(&bytes) {
        Ok(text) if normalize => Ok(ContentHash::from_bytes(normalize_source(text).as_bytes())),
        _ => Ok(ContentHash::from_bytes(&bytes)),
    }
}

/// Memoizes content hashes within one lookup, keyed by path and metadata,
/// so several candidate entries sharing a dependency hash it once.
#[derive(Debug, Default)]
pub struct HashMemo {
    hashes: HashMap<(RepoPath, u64, i64, ContentHashing), ContentHash>,
}

impl HashMemo {
    /// Creates an empty memo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the hash of `path`, computing it on first request.
    pub fn hash(
        &mut self,
        repo_root: &Path,
        path: &RepoPath,
        stat: &FileStat,
        hashing: ContentHashing,
    ) -> Result<ContentHash, CacheError> {
        let key = (path.clone(), stat.size, stat.mtime_ns, hashing);
        if let Some(hash) = self.hashes.get(&key) {
            return Ok(*hash);
        }
        let hash = hash_file(&path.to_absolute(repo_root), hashing)?;
        self.hashes.insert(key, hash);
        Ok(hash)
    }

    /// Number of distinct hashes computed.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Returns `true` if nothing has been hashed yet.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Normalized identity of a tool invocation: the tool and the arguments
/// that affect its output, in their original order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandFingerprint {
    /// Logical tool name.
    pub tool: String,
    /// Normalized input arguments.
    pub args: Vec<String>,
}

impl CommandFingerprint {
    /// Stable 64-bit digest, used in the request log.
    pub fn digest(&self) -> ContentHash {
        let mut hasher = replay_common::ContentHasher::new();
        hasher.update(self.tool.as_bytes());
        for arg in &self.args {
            hasher.update(&[0]);
            hasher.update(arg.as_bytes());
        }
        hasher.finish()
    }
}

/// Builds the fingerprint of a tool invocation.
///
/// Arguments are kept byte-for-byte, including surrounding whitespace and
/// empty arguments, because the tool receives them that way. The only
/// rewrite: absolute paths inside the repository become repository-relative
/// so the fingerprint survives relocating the checkout. Order is preserved.
pub fn fingerprint_command(tool: &str, input_args: &[String], repo_root: &Path) -> CommandFingerprint {
    let args = input_args
        .iter()
        .map(|a| {
            let p = Path::new(a);
            if p.is_absolute() {
                if let Ok(rel) = RepoPath::new(repo_root, p) {
                    return rel.to_string();
                }
            }
            a.clone()
        })
        .collect();
    CommandFingerprint {
        tool: tool.to_string(),
        args,
    }
}
