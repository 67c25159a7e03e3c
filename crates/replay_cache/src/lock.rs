//! Cross-process lock serializing index read-modify-write cycles.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::CacheError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A lock older than this is assumed to belong to a crashed process.
const STALE_AFTER: Duration = Duration::from_secs(120);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

/// Exclusive lock backed by a `create_new` lock file. Released on drop.
///
/// The file holds a token unique to this acquisition, so a holder only
/// ever removes its own lock and a breaker can tell whether the file it
/// judged stale is still the one on disk.
#[derive(Debug)]
pub struct IndexLock {
    path: PathBuf,
    token: String,
}

impl IndexLock {
    /// Acquires the lock at `path`, waiting up to `timeout`.
    ///
    /// A lock file older than two minutes is broken and the acquisition
    /// retried.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        let token = new_token();
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(token.as_bytes()) {
                        let _ = fs::remove_file(path);
                        return Err(CacheError::io(path, e));
                    }
                    return Ok(Self {
                        path: path.to_path_buf(),
                        token,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(path) {
                        if let Ok(observed) = fs::read_to_string(path) {
                            let broken = break_if_unchanged(path, &observed)
                                .map_err(|e| CacheError::io(path, e))?;
                            if broken {
                                tracing::warn!(
                                    lock = %path.display(),
                                    holder = %observed.trim(),
                                    "broke stale index lock"
                                );
                                continue;
                            }
                        }
                    }
                    if started.elapsed() >= timeout {
                        return Err(CacheError::LockTimeout {
                            path: path.to_path_buf(),
                            timeout,
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(CacheError::io(path, e)),
            }
        }
    }
}

fn new_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    format!("{} {nanos} {seq}", std::process::id())
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_AFTER)
}

/// Removes the lock at `path` only if it still holds `observed`.
///
/// Breakers serialize on a `.break` guard file, so of several waiters that
/// judged the same lock stale only one removes it, and none removes a fresh
/// lock taken in the meantime. Returns `true` if the stale lock was removed.
fn break_if_unchanged(path: &Path, observed: &str) -> std::io::Result<bool> {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".break");
    let guard = path.with_file_name(name);
    match OpenOptions::new().write(true).create_new(true).open(&guard) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            // Left behind by a breaker that died mid-break.
            if is_stale(&guard) {
                let _ = fs::remove_file(&guard);
            }
            return Ok(false);
        }
        Err(e) => return Err(e),
    }
    let unchanged = fs::read_to_string(path).is_ok_and(|now| now == observed);
    let removed = if unchanged { fs::remove_file(path) } else { Ok(()) };
    let _ = fs::remove_file(&guard);
    match removed {
        Ok(()) => Ok(unchanged),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        // A lock held past the stale age may have been broken and retaken.
        if fs::read_to_string(&self.path).is_ok_and(|held| held == self.token) {
            let _ = fs::remove_file(&self.path);
        }
    }
}
