//! Engine options.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default deadline for a single tool or include-listing process.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(600);

/// Default wait for the cross-process index lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// How dependency drift is decided once metadata alone is not conclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationPolicy {
    /// Size and timestamps first, content hash when they differ.
    #[default]
    Hybrid,
    /// Size and timestamps only. Any drift is a miss; never reads content.
    MetadataOnly,
}

/// How file content is reduced to a hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentHashing {
    /// C-family sources are normalized (whitespace and comment text
    /// ignored) before hashing; other files hash their raw bytes.
    #[default]
    Normalized,
    /// Every file hashes its raw bytes.
    Exact,
}

/// Configuration injected into an [`Engine`](crate::Engine) at open time.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Root of the repository. Subjects and dependencies are recorded
    /// relative to it; files outside it are never tracked.
    pub repo_root: PathBuf,
    /// Directory holding the index, the request log and entry storage.
    pub cache_dir: PathBuf,
    /// Invalidation policy used by the decider.
    pub policy: InvalidationPolicy,
    /// Hashing mode used when recording new entries.
    pub hashing: ContentHashing,
    /// Deadline for every spawned process.
    pub tool_timeout: Duration,
    /// Exit code that marks a run as cacheable.
    pub success_code: i32,
    /// Maximum wait for the index lock before giving up on a write.
    pub lock_timeout: Duration,
}

impl CacheOptions {
    /// Creates options with defaults for everything but the two roots.
    pub fn new(repo_root: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            cache_dir: cache_dir.into(),
            policy: InvalidationPolicy::default(),
            hashing: ContentHashing::default(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            success_code: 0,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Creates options using the per-user cache directory
    /// (`~/.replay/cache`), falling back to `.replay-cache` under the
    /// repository when no home directory is known.
    pub fn with_default_cache_dir(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        let cache_dir = default_cache_dir().unwrap_or_else(|| repo_root.join(".replay-cache"));
        Self::new(repo_root, cache_dir)
    }

    /// Sets the invalidation policy.
    #[must_use]
    pub fn with_policy(mut self, policy: InvalidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the content hashing mode.
    #[must_use]
    pub fn with_hashing(mut self, hashing: ContentHashing) -> Self {
        self.hashing = hashing;
        self
    }

    /// Sets the per-process deadline.
    #[must_use]
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Sets the exit code treated as success.
    #[must_use]
    pub fn with_success_code(mut self, code: i32) -> Self {
        self.success_code = code;
        self
    }

    /// Sets the index lock timeout.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Returns `true` if `path` lies inside the cache directory.
    pub(crate) fn is_cache_path(&self, path: &Path) -> bool {
        path.starts_with(&self.cache_dir)
    }
}

/// Returns `~/.replay/cache`, if a home directory is known.
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(replay_config::USER_DIR_NAME).join("cache"))
}
