//! Dependency detection.
//!
//! Toolchain subjects are scanned with the compiler's own include listing
//! (`/showIncludes /Zs`, a syntax-only pass). Repository-level subjects use
//! glob patterns over the tree. Both produce repository-relative paths;
//! anything outside the repository is dropped.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use replay_common::RepoPath;
use walkdir::WalkDir;

use crate::error::CacheError;
use crate::executor::{ProcessSpec, ToolExecutor};

/// Marker MSVC prints before every included file under `/showIncludes`.
const INCLUDE_NOTE: &str = "Note: including file:";

/// Result of an include scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Every repository-local dependency, the source first.
    Complete(Vec<RepoPath>),
    /// The scan ran but exited non-zero (usually a syntax error), so the
    /// listing cannot be trusted. The request runs uncached.
    Incomplete {
        /// Exit code of the scan.
        code: i32,
    },
}

/// Extracts included paths from `/showIncludes` output, in first-seen order.
pub fn parse_show_includes(output: &str) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    output
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix(INCLUDE_NOTE))
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .filter(|path| seen.insert(path.to_string()))
        .map(PathBuf::from)
        .collect()
}

/// Lists the repository-local files `source` depends on by running the
/// toolchain's include listing.
///
/// `input_args` are passed through so include directories and defines
/// match the real compile. A tool that cannot be started fails with
/// [`CacheError::DependencyDetectionFailed`]; a timeout is
/// [`CacheError::ToolTimedOut`].
pub fn detect_file_dependencies<E: ToolExecutor + ?Sized>(
    executor: &E,
    program: &Path,
    input_args: &[String],
    source: &Path,
    repo_root: &Path,
    working_root: &Path,
    timeout: std::time::Duration,
) -> Result<Detection, CacheError> {
    let source_path = RepoPath::resolve(repo_root, working_root, source)?;
    let source_abs = source_path.to_absolute(repo_root);

    let mut args = input_args.to_vec();
    args.push("/showIncludes".to_string());
    args.push("/Zs".to_string());
    args.push(source_abs.display().to_string());

    let spec = ProcessSpec {
        program: program.to_path_buf(),
        args,
        cwd: working_root.to_path_buf(),
        timeout,
    };
    let output = executor.run(&spec).map_err(|e| match e {
        CacheError::ToolExecutionFailed { program, source: err } => {
            CacheError::DependencyDetectionFailed {
                path: source_abs.clone(),
                reason: format!("could not run {}: {err}", program.display()),
            }
        }
        other => other,
    })?;
    if output.code != 0 {
        return Ok(Detection::Incomplete { code: output.code });
    }

    let mut deps = vec![source_path];
    let mut listed = parse_show_includes(&String::from_utf8_lossy(&output.stdout));
    listed.extend(parse_show_includes(&String::from_utf8_lossy(&output.stderr)));
    for include in listed {
        match RepoPath::resolve(repo_root, working_root, &include) {
            Ok(path) if !deps.contains(&path) => deps.push(path),
            Ok(_) => {}
            Err(_) => tracing::trace!(path = %include.display(), "external include ignored"),
        }
    }
    Ok(Detection::Complete(deps))
}

/// Compiled dependency glob patterns.
///
/// A pattern without `/` matches a file name at any depth (`*.cpp`); a
/// pattern with `/` matches the repository-relative path (`src/**/*.h`).
#[derive(Debug, Clone)]
pub struct GlobSet {
    patterns: Vec<(glob::Pattern, bool)>,
}

impl GlobSet {
    /// Compiles `patterns`, rejecting malformed ones.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, CacheError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref().trim();
                glob::Pattern::new(p)
                    .map(|compiled| (compiled, p.contains('/')))
                    .map_err(|e| {
                        CacheError::from(replay_config::ConfigError::ValidationError(format!(
                            "invalid glob pattern '{p}': {e}"
                        )))
                    })
            })
            .collect::<Result<Vec<_>, CacheError>>()?;
        Ok(Self { patterns })
    }

    /// Returns `true` if any pattern matches.
    pub fn matches(&self, path: &RepoPath) -> bool {
        self.patterns.iter().any(|(pattern, full_path)| {
            if *full_path {
                pattern.matches(path.as_str())
            } else {
                pattern.matches(path.file_name())
            }
        })
    }
}

/// Expands glob patterns under `repo_root`, skipping everything below the
/// `excluded` directories. The result is sorted and duplicate-free, so an
/// unchanged tree always yields the same list.
pub fn detect_repo_dependencies(
    repo_root: &Path,
    globs: &GlobSet,
    excluded: &[PathBuf],
) -> Result<Vec<RepoPath>, CacheError> {
    let mut found = BTreeSet::new();
    let walker = WalkDir::new(repo_root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !excluded.iter().any(|ex| e.path() == ex.as_path()));
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(repo_root).to_path_buf();
            CacheError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = RepoPath::new(repo_root, entry.path())?;
        if globs.matches(&path) {
            found.insert(path);
        }
    }
    Ok(found.into_iter().collect())
}
