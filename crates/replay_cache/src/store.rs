//! Entry storage: one directory per recorded execution.
//!
//! ```text
//! <cache_dir>/entries/entry_000042/
//!     record.bin        execution record (header + bincode payload)
//!     files/<relative>  captured output files
//! ```
//!
//! `record.bin` starts with a 4-byte little-endian header length, then a
//! bincode header carrying magic bytes, the format version and a checksum
//! of the payload. Any validation failure reads as
//! [`CacheError::Corruption`], which the engine treats as a miss.

use std::path::{Path, PathBuf};

use replay_common::ContentHash;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::CacheError;
use crate::index::EntryId;

/// Magic bytes identifying an execution record.
const RECORD_MAGIC: [u8; 4] = *b"RPLY";

/// Current record format version. Increment on breaking changes to the
/// header or payload format.
const RECORD_FORMAT_VERSION: u32 = 2;

/// Subdirectory of the cache directory holding entry directories.
pub const ENTRIES_DIR: &str = "entries";

const RECORD_FILE: &str = "record.bin";
const FILES_DIR: &str = "files";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordHeader {
    magic: [u8; 4],
    format_version: u32,
    checksum: ContentHash,
}

/// Everything needed to replay an execution besides the dependency list,
/// which lives in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Subject key the entry is filed under.
    pub subject: String,
    /// Logical tool name.
    pub tool: String,
    /// Captured standard output, as the tool wrote it.
    pub stdout: Vec<u8>,
    /// Captured standard error, as the tool wrote it.
    pub stderr: Vec<u8>,
    /// Captured exit code.
    pub return_code: i32,
    /// Absolute repository root at capture time.
    pub repo_root: String,
    /// Absolute directory the outputs were captured from.
    pub capture_root: String,
    /// Captured files, `/`-separated and relative to the capture root.
    pub files: Vec<String>,
    /// For each output path argument, in order, the captured file it
    /// produced. `None` when nothing was captured at that path.
    pub outputs: Vec<Option<String>>,
}

/// Owns the `entries/` directory.
#[derive(Debug, Clone)]
pub struct EntryStore {
    root: PathBuf,
}

impl EntryStore {
    /// Creates a store rooted at `<cache_dir>/entries`.
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            root: cache_dir.join(ENTRIES_DIR),
        }
    }

    /// Directory of one entry.
    pub fn entry_dir(&self, id: EntryId) -> PathBuf {
        self.root.join(id.dir_name())
    }

    /// Path of a stored file inside an entry.
    pub fn stored_file(&self, id: EntryId, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.entry_dir(id).join(FILES_DIR), |acc, part| acc.join(part))
    }

    /// Reserves a fresh entry identifier, starting the search at `from`.
    ///
    /// The reservation is the creation of the entry directory itself, which
    /// only one process can win, so identifiers stay unique across
    /// concurrent writers.
    pub fn reserve(&self, from: u64) -> Result<EntryId, CacheError> {
        std::fs::create_dir_all(&self.root).map_err(|e| CacheError::io(&self.root, e))?;
        let mut n = from.max(1);
        loop {
            let id = EntryId(n);
            let dir = self.entry_dir(id);
            match std::fs::create_dir(&dir) {
                Ok(()) => return Ok(id),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(CacheError::io(dir, e)),
            }
        }
    }

    /// Writes the execution record of a reserved entry.
    pub fn write_record(&self, id: EntryId, record: &ExecutionRecord) -> Result<(), CacheError> {
        let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;
        let header = RecordHeader {
            magic: RECORD_MAGIC,
            format_version: RECORD_FORMAT_VERSION,
            checksum: ContentHash::from_bytes(&payload),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&payload);

        let path = self.entry_dir(id).join(RECORD_FILE);
        std::fs::write(&path, &output).map_err(|e| CacheError::io(path, e))
    }

    /// Reads and validates the execution record of an entry.
    pub fn read_record(&self, id: EntryId) -> Result<ExecutionRecord, CacheError> {
        let corrupt = |reason: &str| CacheError::Corruption {
            entry: id.to_string(),
            reason: reason.to_string(),
        };
        let raw = std::fs::read(self.entry_dir(id).join(RECORD_FILE))
            .map_err(|e| corrupt(&format!("record unreadable: {e}")))?;

        if raw.len() < 4 {
            return Err(corrupt("truncated header length"));
        }
        let header_len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        if raw.len() < 4 + header_len {
            return Err(corrupt("truncated header"));
        }
        let (header, _): (RecordHeader, _) =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .map_err(|_| corrupt("malformed header"))?;
        if header.magic != RECORD_MAGIC {
            return Err(corrupt("bad magic"));
        }
        if header.format_version != RECORD_FORMAT_VERSION {
            return Err(corrupt("unsupported format version"));
        }
        let payload = &raw[4 + header_len..];
        if ContentHash::from_bytes(payload) != header.checksum {
            return Err(corrupt("checksum mismatch"));
        }
        let (record, _) = bincode::serde::decode_from_slice(payload, bincode::config::standard())
            .map_err(|_| corrupt("malformed payload"))?;
        Ok(record)
    }

    /// Copies `source` into an entry as `relative`, keeping its timestamps.
    pub fn store_file(&self, id: EntryId, relative: &str, source: &Path) -> Result<u64, CacheError> {
        let dest = self.stored_file(id, relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        let bytes = std::fs::copy(source, &dest).map_err(|e| CacheError::io(source, e))?;
        preserve_mtime(source, &dest);
        Ok(bytes)
    }

    /// Removes one entry directory. A missing directory is not an error.
    pub fn remove(&self, id: EntryId) -> Result<(), CacheError> {
        remove_dir_if_present(&self.entry_dir(id))
    }

    /// Removes every entry directory.
    pub fn clear(&self) -> Result<(), CacheError> {
        remove_dir_if_present(&self.root)
    }

    /// Total bytes stored under `entries/`.
    pub fn disk_usage(&self) -> u64 {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }
}

/// Copies the mtime of `source` onto `dest`. A failure only costs the
/// timestamp, so it is logged and otherwise ignored.
fn preserve_mtime(source: &Path, dest: &Path) {
    let Ok(meta) = std::fs::metadata(source) else {
        return;
    };
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    if let Err(e) = filetime::set_file_mtime(dest, mtime) {
        tracing::debug!(path = %dest.display(), error = %e, "could not preserve stored file mtime");
    }
}

fn remove_dir_if_present(dir: &Path) -> Result<(), CacheError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(dir, e)),
    }
}
