//! The invalidation decider.
//!
//! Each recorded dependency is checked cheapest first: existence, then size
//! and timestamps, then (under [`InvalidationPolicy::Hybrid`]) a content
//! hash. Drifted timestamps are never trusted on their own; once metadata
//! differs, only an equal hash keeps the dependency valid.

use std::path::{Path, PathBuf};

use replay_common::RepoPath;

use crate::fingerprint::{FileStat, HashMemo};
use crate::index::IndexEntry;
use crate::options::InvalidationPolicy;

/// Outcome of checking one entry against the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Every dependency is unchanged.
    Valid,
    /// A dependency no longer exists.
    Missing(RepoPath),
    /// A dependency's content changed (or could not be verified).
    Changed(RepoPath),
}

impl Decision {
    /// Returns `true` for [`Decision::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, Decision::Valid)
    }
}

/// Evaluates candidate entries for one request.
///
/// Holds a [`HashMemo`], so dependencies shared by several candidates are
/// hashed at most once per request.
#[derive(Debug)]
pub struct Decider {
    repo_root: PathBuf,
    policy: InvalidationPolicy,
    memo: HashMemo,
}

impl Decider {
    /// Creates a decider for a repository checkout.
    pub fn new(repo_root: &Path, policy: InvalidationPolicy) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            policy,
            memo: HashMemo::new(),
        }
    }

    /// Checks every dependency of `entry`, stopping at the first failure.
    pub fn evaluate(&mut self, entry: &IndexEntry) -> Decision {
        for dep in &entry.dependencies {
            let stat = match FileStat::read(&dep.path.to_absolute(&self.repo_root)) {
                Ok(stat) => stat,
                Err(_) => return Decision::Missing(dep.path.clone()),
            };
            if dep.metadata_matches(&stat) {
                continue;
            }
            if self.policy == InvalidationPolicy::MetadataOnly {
                return Decision::Changed(dep.path.clone());
            }
            let Some(recorded) = dep.hash else {
                return Decision::Changed(dep.path.clone());
            };
            match self.memo.hash(&self.repo_root, &dep.path, &stat, entry.hashing) {
                Ok(current) if current == recorded => {
                    tracing::trace!(path = %dep.path, "metadata drifted, content unchanged");
                }
                Ok(_) => return Decision::Changed(dep.path.clone()),
                Err(e) => {
                    tracing::debug!(path = %dep.path, error = %e, "dependency unreadable");
                    return Decision::Changed(dep.path.clone());
                }
            }
        }
        Decision::Valid
    }

    /// Number of dependency hashes computed so far.
    pub fn hashes_computed(&self) -> usize {
        self.memo.len()
    }
}
