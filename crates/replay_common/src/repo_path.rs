//! Repository-relative paths.
//!
//! Cache identity must survive moving a checkout to a different absolute
//! location, so every path the cache persists is stored relative to the
//! repository root, lexically normalized and with `/` separators.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A normalized path relative to a repository root.
///
/// The file it names does not have to exist. Construction fails for paths
/// that resolve outside the repository.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoPath(String);

/// Error returned when a path does not lie inside the repository root.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} is outside repository {}", path.display(), repo_root.display())]
pub struct OutsideRepoError {
    /// The offending path after normalization.
    pub path: PathBuf,
    /// The repository root it was checked against.
    pub repo_root: PathBuf,
}

impl RepoPath {
    /// Converts `path` (absolute, or relative to `repo_root`) into a
    /// repository-relative path.
    pub fn new(repo_root: &Path, path: &Path) -> Result<Self, OutsideRepoError> {
        Self::resolve(repo_root, repo_root, path)
    }

    /// Converts `path` (absolute, or relative to `base`) into a
    /// repository-relative path.
    pub fn resolve(repo_root: &Path, base: &Path, path: &Path) -> Result<Self, OutsideRepoError> {
        let absolute = if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&base.join(path))
        };
        let root = normalize_path(repo_root);
        let relative = absolute
            .strip_prefix(&root)
            .map_err(|_| OutsideRepoError {
                path: absolute.clone(),
                repo_root: root.clone(),
            })?;

        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            return Err(OutsideRepoError {
                path: absolute,
                repo_root: root,
            });
        }
        Ok(Self(parts.join("/")))
    }

    /// Wraps a path string that is already repository-relative, such as one
    /// read back from the cache index.
    pub fn from_relative(path: &str) -> Self {
        Self(path.replace('\\', "/"))
    }

    /// Joins this path onto a repository root.
    pub fn to_absolute(&self, repo_root: &Path) -> PathBuf {
        self.0
            .split('/')
            .fold(repo_root.to_path_buf(), |acc, part| acc.join(part))
    }

    /// Returns the path as a `/`-separated string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the final path component.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Returns the lowercase extension of the final component, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepoPath({:?})", self.0)
    }
}

/// Lexically normalizes a path: drops `.` components and folds `..` into the
/// preceding component. Does not touch the filesystem or follow symlinks.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
