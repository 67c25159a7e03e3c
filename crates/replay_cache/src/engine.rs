//! High-level cache engine.
//!
//! The [`Engine`] ties together the index, the entry store, the decider and
//! the executor. A request is looked up first; on a hit the recorded
//! outcome is replayed without spawning the tool. On a miss the
//! dependencies are detected and fingerprinted, the tool runs, and a
//! successful run is captured as a new entry.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use rayon::prelude::*;
use replay_common::{normalize_path, RepoPath};
use replay_config::{resolve_tool, ToolsConfig};

use crate::capture::{
    capture_files, path_spellings, relative_to, restore_files, under_root, PathRewriter, Snapshot,
};
use crate::command::{ToolCommand, ToolKind};
use crate::decide::Decider;
use crate::deps::{detect_file_dependencies, detect_repo_dependencies, Detection, GlobSet};
use crate::error::CacheError;
use crate::executor::{ProcessExecutor, ProcessOutput, ProcessSpec, ToolExecutor};
use crate::fingerprint::{fingerprint_command, fingerprint_file_hashed, CommandFingerprint, FileFingerprint};
use crate::index::{CacheIndex, EntryId, IndexEntry};
use crate::lock::IndexLock;
use crate::options::CacheOptions;
use crate::request_log::{Outcome, RequestLog};
use crate::store::{EntryStore, ExecutionRecord};

/// Name of the lock file guarding index writes.
const LOCK_FILE: &str = "index.lock";

/// Prefix of subject keys for repository-level runs.
const TREE_SUBJECT_PREFIX: &str = "tree:";

/// What a request produced, whether replayed or freshly run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    /// Standard output bytes.
    pub stdout: Vec<u8>,
    /// Standard error bytes.
    pub stderr: Vec<u8>,
    /// Exit code of the tool.
    pub return_code: i32,
}

impl ToolOutput {
    /// Standard output decoded for display; invalid UTF-8 is replaced.
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Standard error decoded for display; invalid UTF-8 is replaced.
    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

impl From<ProcessOutput> for ToolOutput {
    fn from(out: ProcessOutput) -> Self {
        Self {
            stdout: out.stdout,
            stderr: out.stderr,
            return_code: out.code,
        }
    }
}

/// A tool run over a whole tree, keyed on a main file (such as a
/// `Doxyfile`) rather than a single source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRequest {
    /// File identifying the run configuration. Absolute or repo-relative.
    pub main_file: PathBuf,
    /// Logical tool name.
    pub tool: String,
    /// Tool arguments; the main file is appended.
    pub args: Vec<String>,
    /// Patterns selecting the files the run depends on.
    pub globs: Vec<String>,
    /// Directory the tool writes its tree into. Absolute or repo-relative.
    pub output_root: PathBuf,
}

/// Summary of cache contents.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Number of entries.
    pub entries: usize,
    /// Number of distinct subjects.
    pub subjects: usize,
    /// Bytes stored in entry directories.
    pub stored_bytes: u64,
    /// Entries per logical tool name.
    pub per_tool: BTreeMap<String, usize>,
}

/// How outputs are found after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureMode {
    /// Files new or changed since the pre-run snapshot.
    Diff,
    /// Every file under the capture root.
    WholeTree,
}

/// One request, resolved and fingerprinted.
#[derive(Debug)]
struct Prepared {
    subject: String,
    command: CommandFingerprint,
    spec: ProcessSpec,
    capture_root: PathBuf,
    capture: CaptureMode,
    /// Absolute destinations named by output path arguments, in order.
    outputs: Vec<PathBuf>,
}

/// A build-artifact cache bound to one repository and one cache directory.
///
/// Engines hold no global state; several may share a cache directory, in
/// one process or many.
pub struct Engine<E: ToolExecutor = ProcessExecutor> {
    options: CacheOptions,
    tools: ToolsConfig,
    executor: E,
    index: CacheIndex,
    store: EntryStore,
    log: RequestLog,
}

impl<E: ToolExecutor> Engine<E> {
    /// Opens (creating if needed) the cache directory and loads the index.
    pub fn open(mut options: CacheOptions, tools: ToolsConfig, executor: E) -> Result<Self, CacheError> {
        options.repo_root = normalize_path(&options.repo_root);
        options.cache_dir = normalize_path(&options.cache_dir);
        std::fs::create_dir_all(&options.cache_dir)
            .map_err(|e| CacheError::io(&options.cache_dir, e))?;

        let index = CacheIndex::load_or_default(&options.cache_dir);
        tracing::debug!(
            cache = %options.cache_dir.display(),
            entries = index.entry_count(),
            "opened cache"
        );
        Ok(Self {
            store: EntryStore::new(&options.cache_dir),
            log: RequestLog::new(&options.cache_dir),
            options,
            tools,
            executor,
            index,
        })
    }

    /// The options the engine was opened with (roots normalized).
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// The in-memory index.
    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    /// The executor used to run tools.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Runs `command` on `subject`, or replays a recorded run.
    ///
    /// `subject` and the command's output root may be relative to
    /// `working_root`, which is also the tool's working directory.
    pub fn execute(
        &mut self,
        subject: &Path,
        command: &ToolCommand,
        working_root: &Path,
    ) -> Result<ToolOutput, CacheError> {
        let repo_root = self.options.repo_root.clone();
        let working_root = normalize_path(&repo_root.join(working_root));
        let tool = resolve_tool(&self.tools, &command.tool)?;
        let subject_path = RepoPath::resolve(&repo_root, &working_root, subject)?;

        let capture_root = match &command.output_root {
            Some(dir) => normalize_path(&working_root.join(dir)),
            None => working_root.clone(),
        };
        let prepared = Prepared {
            subject: subject_path.to_string(),
            command: fingerprint_command(&command.tool, &command.input_args, &repo_root),
            spec: ProcessSpec {
                program: tool.executable.clone(),
                args: command.command_line(subject),
                cwd: working_root.clone(),
                timeout: self.options.tool_timeout,
            },
            capture_root,
            capture: CaptureMode::Diff,
            outputs: command
                .output_paths()
                .map(|p| normalize_path(&working_root.join(p)))
                .collect(),
        };

        if let Some(output) = self.lookup(&prepared) {
            return Ok(output);
        }

        let deps = match command.kind {
            ToolKind::Direct => vec![subject_path],
            ToolKind::Toolchain => match detect_file_dependencies(
                &self.executor,
                &tool.executable,
                &command.input_args,
                subject,
                &repo_root,
                &working_root,
                self.options.tool_timeout,
            )? {
                Detection::Complete(deps) => deps,
                Detection::Incomplete { code } => {
                    tracing::debug!(subject = %prepared.subject, code, "include scan failed, running uncached");
                    return self.run_uncached(&prepared);
                }
            },
        };
        self.run_and_record(&prepared, &deps)
    }

    /// Runs a tool over the repository tree, or replays a recorded run
    /// into the output root.
    ///
    /// The subject is the main file; the dependencies are the main file
    /// plus every file the globs select, outside the output root. The
    /// returned [`ToolOutput::return_code`] mirrors the tool's exit code.
    pub fn execute_over_tree(&mut self, request: &TreeRequest) -> Result<ToolOutput, CacheError> {
        let repo_root = self.options.repo_root.clone();
        let tool = resolve_tool(&self.tools, &request.tool)?;
        let main = RepoPath::new(&repo_root, &request.main_file)?;
        let output_root = normalize_path(&repo_root.join(&request.output_root));

        let mut args = request.args.clone();
        args.push(request.main_file.display().to_string());
        let prepared = Prepared {
            subject: format!("{TREE_SUBJECT_PREFIX}{main}"),
            command: fingerprint_command(&request.tool, &request.args, &repo_root),
            spec: ProcessSpec {
                program: tool.executable.clone(),
                args,
                cwd: repo_root.clone(),
                timeout: self.options.tool_timeout,
            },
            capture_root: output_root.clone(),
            capture: CaptureMode::WholeTree,
            outputs: Vec::new(),
        };

        if let Some(output) = self.lookup(&prepared) {
            return Ok(output);
        }

        let globs = GlobSet::new(&request.globs)?;
        let excluded = [output_root, self.options.cache_dir.clone()];
        let mut deps = vec![main.clone()];
        deps.extend(
            detect_repo_dependencies(&repo_root, &globs, &excluded)?
                .into_iter()
                .filter(|p| *p != main),
        );
        self.run_and_record(&prepared, &deps)
    }

    /// Removes every entry and resets the index to empty.
    ///
    /// The empty index is published before entry files are deleted, so a
    /// concurrent reader sees either the old entries or none.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        let _lock = IndexLock::acquire(&self.lock_path(), self.options.lock_timeout)?;
        let mut index = CacheIndex::load_or_default(&self.options.cache_dir);
        index.clear();
        index.save(&self.options.cache_dir)?;
        self.index = index;
        self.store.clear()?;
        tracing::info!(cache = %self.options.cache_dir.display(), "cache cleared");
        Ok(())
    }

    /// Reports entry counts and stored bytes.
    pub fn stats(&self) -> CacheStats {
        let mut per_tool = BTreeMap::new();
        for (_, entry) in self.index.entries() {
            *per_tool.entry(entry.command.tool.clone()).or_insert(0) += 1;
        }
        CacheStats {
            entries: self.index.entry_count(),
            subjects: self.index.subject_count(),
            stored_bytes: self.store.disk_usage(),
            per_tool,
        }
    }

    /// Closes the engine. Every write is already durable.
    pub fn close(self) {
        tracing::debug!(cache = %self.options.cache_dir.display(), "closed cache");
    }

    fn lock_path(&self) -> PathBuf {
        self.options.cache_dir.join(LOCK_FILE)
    }

    /// Finds the newest valid entry and replays it.
    fn lookup(&self, req: &Prepared) -> Option<ToolOutput> {
        let candidates = self.index.candidates(&req.subject, &req.command);
        if candidates.is_empty() {
            return None;
        }
        let mut decider = Decider::new(&self.options.repo_root, self.options.policy);
        for entry in candidates {
            let decision = decider.evaluate(entry);
            if !decision.is_valid() {
                tracing::debug!(subject = %req.subject, entry = %entry.id, ?decision, "entry invalidated");
                continue;
            }
            match self.replay(entry, req) {
                Ok(output) => {
                    self.log.record(Outcome::Hit, &req.subject, &req.command, Some(entry.id));
                    return Some(output);
                }
                Err(e) => {
                    tracing::warn!(subject = %req.subject, error = %e, "unusable cache entry, treating as miss");
                }
            }
        }
        None
    }

    /// Restores an entry's files and returns its rewritten output.
    ///
    /// A file recorded as the k-th output path goes to the k-th output path
    /// of this request; every other file goes under the capture root.
    fn replay(&self, entry: &IndexEntry, req: &Prepared) -> Result<ToolOutput, CacheError> {
        let record = self.store.read_record(entry.id)?;
        if record.subject != req.subject || record.tool != req.command.tool {
            return Err(CacheError::Corruption {
                entry: entry.id.to_string(),
                reason: format!("record belongs to {} ({})", record.subject, record.tool),
            });
        }
        let targets: Vec<(String, PathBuf)> = record
            .files
            .iter()
            .map(|file| {
                let requested = record
                    .outputs
                    .iter()
                    .zip(&req.outputs)
                    .find(|(recorded, _)| recorded.as_deref() == Some(file.as_str()))
                    .map(|(_, dest)| dest.clone());
                let dest = requested.unwrap_or_else(|| under_root(&req.capture_root, file));
                (file.clone(), dest)
            })
            .collect();
        restore_files(&self.store, entry.id, &targets)?;

        let old_repo = Path::new(&record.repo_root);
        let old_capture = Path::new(&record.capture_root);
        let mut pairs = Vec::new();
        for dep in &entry.dependencies {
            pairs.extend(path_spellings(
                &dep.path.to_absolute(old_repo),
                &dep.path.to_absolute(&self.options.repo_root),
            ));
        }
        for (file, dest) in &targets {
            pairs.extend(path_spellings(&under_root(old_capture, file), dest));
        }
        let rewriter = PathRewriter::new(pairs);
        Ok(ToolOutput {
            stdout: rewriter.apply(&record.stdout),
            stderr: rewriter.apply(&record.stderr),
            return_code: record.return_code,
        })
    }

    fn run_uncached(&self, req: &Prepared) -> Result<ToolOutput, CacheError> {
        let output = self.executor.run(&req.spec)?;
        self.log.record(Outcome::Uncacheable, &req.subject, &req.command, None);
        Ok(output.into())
    }

    fn run_and_record(&mut self, req: &Prepared, deps: &[RepoPath]) -> Result<ToolOutput, CacheError> {
        let repo_root = &self.options.repo_root;
        let hashing = self.options.hashing;
        let fingerprints = deps
            .par_iter()
            .map(|p| fingerprint_file_hashed(repo_root, &p.to_absolute(repo_root), hashing))
            .collect::<Result<Vec<_>, CacheError>>()?;

        let excluded = [self.options.cache_dir.clone()];
        let before = match req.capture {
            CaptureMode::Diff => Snapshot::take(&req.capture_root, &excluded),
            CaptureMode::WholeTree => Snapshot::default(),
        };

        let output = self.executor.run(&req.spec)?;
        if output.code != self.options.success_code {
            self.log.record(Outcome::Miss, &req.subject, &req.command, None);
            return Ok(output.into());
        }

        let after = Snapshot::take(&req.capture_root, &excluded);
        let dep_paths: HashSet<PathBuf> = deps.iter().map(|p| p.to_absolute(repo_root)).collect();
        let outputs: Vec<PathBuf> = before
            .changed_in(&after)
            .into_iter()
            .filter(|p| !dep_paths.contains(p))
            .collect();

        let entry = match self.record(req, fingerprints, &outputs, &output) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(subject = %req.subject, error = %e, "could not record cache entry");
                None
            }
        };
        self.log.record(Outcome::Miss, &req.subject, &req.command, entry);
        Ok(output.into())
    }

    /// Stores outputs and the execution record, then publishes the entry.
    fn record(
        &mut self,
        req: &Prepared,
        dependencies: Vec<FileFingerprint>,
        outputs: &[PathBuf],
        output: &ProcessOutput,
    ) -> Result<EntryId, CacheError> {
        // Another engine may have cleared and refilled the cache since this
        // index was loaded; never start below the published counter.
        let on_disk = CacheIndex::load_or_default(&self.options.cache_dir).next_entry_id;
        let id = self.store.reserve(self.index.next_entry_id.max(on_disk))?;
        let result = self.write_entry(id, req, dependencies, outputs, output);
        if result.is_err() {
            let _ = self.store.remove(id);
        }
        result.map(|()| id)
    }

    fn write_entry(
        &mut self,
        id: EntryId,
        req: &Prepared,
        dependencies: Vec<FileFingerprint>,
        outputs: &[PathBuf],
        output: &ProcessOutput,
    ) -> Result<(), CacheError> {
        let (files, bytes) = capture_files(&self.store, id, &req.capture_root, outputs)?;
        let produced = req
            .outputs
            .iter()
            .map(|path| relative_to(&req.capture_root, path).filter(|rel| files.contains(rel)))
            .collect();
        let record = ExecutionRecord {
            subject: req.subject.clone(),
            tool: req.command.tool.clone(),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            return_code: output.code,
            repo_root: self.options.repo_root.display().to_string(),
            capture_root: req.capture_root.display().to_string(),
            files,
            outputs: produced,
        };
        self.store.write_record(id, &record)?;

        let entry = IndexEntry {
            id,
            command: req.command.clone(),
            dependencies,
            hashing: self.options.hashing,
            created_at: Utc::now(),
        };
        let _lock = IndexLock::acquire(&self.lock_path(), self.options.lock_timeout)?;
        let mut index = CacheIndex::load_or_default(&self.options.cache_dir);
        index.insert(&req.subject, entry);
        index.save(&self.options.cache_dir)?;
        self.index = index;
        tracing::debug!(subject = %req.subject, entry = %id, files = record.files.len(), bytes, "recorded entry");
        Ok(())
    }
}
