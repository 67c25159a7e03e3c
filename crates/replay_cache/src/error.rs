//! Error types for cache operations.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur during cache operations.
///
/// Variants split into two groups. Fatal errors (see [`CacheError::is_fatal`])
/// make caching unsafe and are surfaced to the caller. The rest only make
/// caching less effective: the engine logs them and degrades to a miss or an
/// uncached run instead of failing the request.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The tool configuration is missing or does not name the requested tool.
    #[error("configuration error: {0}")]
    Configuration(#[from] replay_config::ConfigError),

    /// The include-listing pass could not enumerate dependencies.
    #[error("dependency detection failed for {path}: {reason}")]
    DependencyDetectionFailed {
        /// The source file whose dependencies were being detected.
        path: PathBuf,
        /// Description of the failure.
        reason: String,
    },

    /// The tool process could not be started.
    #[error("failed to execute {program}: {source}")]
    ToolExecutionFailed {
        /// The program that failed to start.
        program: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The tool process ran past its deadline and was killed.
    #[error("{program} timed out after {}s", timeout.as_secs())]
    ToolTimedOut {
        /// The program that timed out.
        program: PathBuf,
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// Stored entry data is missing, truncated, or fails validation.
    #[error("corrupt cache entry {entry}: {reason}")]
    Corruption {
        /// The entry identifier.
        entry: String,
        /// Description of the problem.
        reason: String,
    },

    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A file required for fingerprinting does not exist.
    #[error("file not found: {path}")]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// The index lock could not be acquired in time.
    #[error("timed out after {}ms waiting for lock {path}", timeout.as_millis())]
    LockTimeout {
        /// The lock file path.
        path: PathBuf,
        /// How long the engine waited.
        timeout: Duration,
    },

    /// A subject or main file lies outside the repository root.
    #[error(transparent)]
    OutsideRepo(#[from] replay_common::OutsideRepoError),
}

impl CacheError {
    /// Returns `true` if this error must fail the request.
    ///
    /// Errors that leave dependencies or identity unverifiable are fatal.
    /// Storage problems and corrupt entries only cost a cache hit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CacheError::Configuration(_)
                | CacheError::DependencyDetectionFailed { .. }
                | CacheError::ToolExecutionFailed { .. }
                | CacheError::ToolTimedOut { .. }
                | CacheError::NotFound { .. }
                | CacheError::OutsideRepo(_)
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}
