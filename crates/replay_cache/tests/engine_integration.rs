//! Integration tests for the cache engine.
//!
//! A scripted executor stands in for the real toolchain: it answers include
//! scans from `#include "..."` lines, "compiles" by writing an object file
//! derived from the source, and "generates docs" by writing an HTML tree.
//! Counters shared across engines show whether a tool actually ran.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use filetime::FileTime;
use replay_cache::{
    CacheError, CacheOptions, Engine, OutputArg, ProcessOutput, ProcessSpec, ToolCommand,
    ToolExecutor, TreeRequest,
};
use replay_config::{load_config_from_str, ToolsConfig};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helper: scripted toolchain
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Counters {
    runs: AtomicUsize,
    scans: AtomicUsize,
}

impl Counters {
    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

struct FakeTools {
    counters: Arc<Counters>,
}

fn includes_of(source: &Path, seen: &mut Vec<PathBuf>) {
    let Ok(text) = fs::read_to_string(source) else {
        return;
    };
    let dir = source.parent().unwrap();
    for line in text.lines() {
        if let Some(name) = line
            .trim()
            .strip_prefix("#include \"")
            .and_then(|rest| rest.strip_suffix('"'))
        {
            let path = dir.join(name);
            if path.is_file() && !seen.contains(&path) {
                seen.push(path.clone());
                includes_of(&path, seen);
            }
        }
    }
}

impl FakeTools {
    fn scan(&self, spec: &ProcessSpec) -> ProcessOutput {
        self.counters.scans.fetch_add(1, Ordering::SeqCst);
        let source = PathBuf::from(spec.args.last().unwrap());
        let text = fs::read_to_string(&source).unwrap_or_default();
        if text.contains("#syntax-error") {
            return ProcessOutput {
                stdout: Vec::new(),
                stderr: b"error C2143: syntax error".to_vec(),
                code: 2,
            };
        }
        let mut found = Vec::new();
        includes_of(&source, &mut found);
        let stdout: String = found
            .iter()
            .map(|p| format!("Note: including file: {}\n", p.display()))
            .collect();
        ProcessOutput {
            stdout: stdout.into_bytes(),
            stderr: Vec::new(),
            code: 0,
        }
    }

    fn compile(&self, spec: &ProcessSpec) -> ProcessOutput {
        let source_arg = spec.args.iter().find(|a| a.ends_with(".cpp")).unwrap();
        let source = spec.cwd.join(source_arg);
        let text = fs::read_to_string(&source).unwrap();
        if text.contains("#error") {
            return ProcessOutput {
                stdout: Vec::new(),
                stderr: format!("{}(1): fatal error C1189\n", source.display()).into_bytes(),
                code: 2,
            };
        }
        let object = match spec.args.iter().find_map(|a| a.strip_prefix("/Fo")) {
            Some(path) => spec.cwd.join(path),
            None => {
                let stem = source.file_stem().unwrap().to_string_lossy();
                spec.cwd.join(format!("{stem}.obj"))
            }
        };
        if let Some(parent) = object.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let flags: Vec<&str> = spec
            .args
            .iter()
            .filter(|a| a.starts_with("/W"))
            .map(String::as_str)
            .collect();
        fs::write(&object, format!("OBJ {flags:?}\n{text}")).unwrap();
        // Console code page output: "caf\xE9" is not UTF-8.
        let mut stderr = Vec::new();
        if text.contains("#pragma codepage") {
            let note = format!("{}(1): warning C4819: caf", source.display());
            stderr.extend_from_slice(note.as_bytes());
            stderr.extend_from_slice(b"\xE9\n");
        }
        ProcessOutput {
            stdout: format!("{}\n", source.display()).into_bytes(),
            stderr,
            code: 0,
        }
    }

    fn doxygen(&self, spec: &ProcessSpec) -> ProcessOutput {
        let main = spec.cwd.join(spec.args.last().unwrap());
        let config = fs::read_to_string(&main).unwrap();
        let out_dir = config
            .lines()
            .find_map(|l| l.strip_prefix("OUTPUT_DIRECTORY = "))
            .unwrap();
        let html = spec.cwd.join(out_dir).join("html");
        fs::create_dir_all(html.join("search")).unwrap();
        fs::write(html.join("index.html"), format!("<html>{config}</html>")).unwrap();
        fs::write(html.join("search").join("all.js"), "var index = [];").unwrap();
        ProcessOutput {
            stdout: b"Generating docs...\n".to_vec(),
            stderr: Vec::new(),
            code: 0,
        }
    }
}

impl ToolExecutor for FakeTools {
    fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, CacheError> {
        if spec.args.iter().any(|a| a == "/showIncludes") {
            return Ok(self.scan(spec));
        }
        self.counters.runs.fetch_add(1, Ordering::SeqCst);
        match spec.program.file_name().and_then(|n| n.to_str()) {
            Some("cl") => Ok(self.compile(spec)),
            Some("doxygen") => Ok(self.doxygen(spec)),
            _ => Err(CacheError::ToolTimedOut {
                program: spec.program.clone(),
                timeout: spec.timeout,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Helper: fixtures
// ---------------------------------------------------------------------------

fn tools() -> ToolsConfig {
    load_config_from_str(
        r#"{ "cl": "/fake/cl", "doxygen": "/fake/doxygen", "hang": "/fake/hang" }"#,
    )
    .unwrap()
}

fn open(repo: &Path, cache: &Path, counters: &Arc<Counters>) -> Engine<FakeTools> {
    let options = CacheOptions::new(repo, cache).with_lock_timeout(Duration::from_secs(5));
    Engine::open(
        options,
        tools(),
        FakeTools {
            counters: Arc::clone(counters),
        },
    )
    .unwrap()
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn sample_repo() -> TempDir {
    let repo = tempfile::tempdir().unwrap();
    write(
        repo.path(),
        "main.cpp",
        "#include \"util.h\"\nint main() { return util(); }\n",
    );
    write(repo.path(), "util.h", "#include \"config.h\"\ninline int util() { return 0; }\n");
    write(repo.path(), "config.h", "#define LEVEL 3\n");
    repo
}

fn cl(args: &[&str]) -> ToolCommand {
    ToolCommand::toolchain("cl", args.iter().map(|s| s.to_string()).collect())
}

fn bump_mtime(path: &Path) {
    let meta = fs::metadata(path).unwrap();
    let t = FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(path, FileTime::from_unix_time(t.unix_seconds() + 5, 0)).unwrap();
}

// ===========================================================================
// Category A: hits and misses
// ===========================================================================

#[test]
fn second_identical_run_is_replayed() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let cmd = cl(&["/c", "/W4"]);

    let first = engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(first.return_code, 0);
    assert_eq!(counters.runs(), 1);
    assert_eq!(counters.scans(), 1);
    let object = repo.path().join("main.obj");
    let produced = fs::read(&object).unwrap();
    fs::remove_file(&object).unwrap();

    let second = engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 1, "a hit must not spawn the tool");
    assert_eq!(counters.scans(), 1, "a hit must not rescan includes");
    assert_eq!(second, first);
    assert_eq!(fs::read(&object).unwrap(), produced);
}

#[test]
fn touched_dependency_without_edit_is_hit() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let cmd = cl(&["/c", "/W4"]);

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    bump_mtime(&repo.path().join("config.h"));
    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 1);
}

#[test]
fn trailing_whitespace_edit_is_hit() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let cmd = cl(&["/c", "/W4"]);

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    let header = repo.path().join("util.h");
    let mut text = fs::read_to_string(&header).unwrap();
    text.push_str("   \n");
    fs::write(&header, text).unwrap();
    bump_mtime(&header);

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 1);
}

#[test]
fn content_edit_in_nested_include_is_miss() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let cmd = cl(&["/c", "/W4"]);

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    write(repo.path(), "config.h", "#define LEVEL 4\n");
    bump_mtime(&repo.path().join("config.h"));

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 2);
    let object = fs::read_to_string(repo.path().join("main.obj")).unwrap();
    assert!(object.contains("int main()"));

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 2, "the new entry serves the edited tree");
}

#[cfg(unix)]
#[test]
fn same_size_edit_with_forged_mtime_is_miss() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let cmd = cl(&["/c", "/W4"]);

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    let header = repo.path().join("config.h");
    let original = FileTime::from_last_modification_time(&fs::metadata(&header).unwrap());
    std::thread::sleep(Duration::from_millis(50));
    fs::write(&header, "#define LEVEL 9\n").unwrap();
    filetime::set_file_mtime(&header, original).unwrap();

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 2);
}

#[test]
fn missing_dependency_is_miss() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let cmd = cl(&["/c"]);

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    fs::remove_file(repo.path().join("config.h")).unwrap();
    write(repo.path(), "util.h", "inline int util() { return 0; }\n");
    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 2);
}

// ===========================================================================
// Category B: command identity
// ===========================================================================

#[test]
fn input_args_select_independent_entries() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);

    engine.execute(Path::new("main.cpp"), &cl(&["/c", "/W4"]), repo.path()).unwrap();
    fs::remove_file(repo.path().join("main.obj")).unwrap();
    engine.execute(Path::new("main.cpp"), &cl(&["/c", "/W3"]), repo.path()).unwrap();
    assert_eq!(counters.runs(), 2);
    assert_eq!(engine.index().entry_count(), 2);

    engine.execute(Path::new("main.cpp"), &cl(&["/c", "/W4"]), repo.path()).unwrap();
    let w4 = fs::read_to_string(repo.path().join("main.obj")).unwrap();
    assert!(w4.contains("/W4"));
    engine.execute(Path::new("main.cpp"), &cl(&["/c", "/W3"]), repo.path()).unwrap();
    let w3 = fs::read_to_string(repo.path().join("main.obj")).unwrap();
    assert!(w3.contains("/W3"));
    assert_eq!(counters.runs(), 2);
}

#[test]
fn output_args_do_not_affect_identity() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);

    let a = cl(&["/c"]).with_output_args(OutputArg::parse_all(&["/Foa.obj"]));
    let b = cl(&["/c"]).with_output_args(OutputArg::parse_all(&["/Fob.obj"]));
    engine.execute(Path::new("main.cpp"), &a, repo.path()).unwrap();
    let produced = fs::read(repo.path().join("a.obj")).unwrap();
    fs::remove_file(repo.path().join("a.obj")).unwrap();

    engine.execute(Path::new("main.cpp"), &b, repo.path()).unwrap();
    assert_eq!(counters.runs(), 1);
    assert_eq!(engine.index().entry_count(), 1);
    assert_eq!(fs::read(repo.path().join("b.obj")).unwrap(), produced);
    assert!(!repo.path().join("a.obj").exists(), "only the requested name is written");
}

#[test]
fn output_path_in_subdirectory_is_created_on_replay() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);

    let first = cl(&["/c"]).with_output_args(vec![OutputArg::joined("/Fo", "main.obj")]);
    let nested = cl(&["/c"]).with_output_args(vec![OutputArg::joined("/Fo", "obj/x64/main.obj")]);
    engine.execute(Path::new("main.cpp"), &first, repo.path()).unwrap();
    engine.execute(Path::new("main.cpp"), &nested, repo.path()).unwrap();
    assert_eq!(counters.runs(), 1);
    let object = fs::read_to_string(repo.path().join("obj/x64/main.obj")).unwrap();
    assert!(object.starts_with("OBJ"));
}

#[test]
fn unknown_tool_is_configuration_error() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);

    let cmd = ToolCommand::direct("moc", vec![]);
    let err = engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap_err();
    assert!(matches!(err, CacheError::Configuration(_)));
    assert!(err.is_fatal());
}

#[test]
fn tool_timeout_is_surfaced() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);

    let cmd = ToolCommand::direct("hang", vec![]);
    let err = engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap_err();
    assert!(matches!(err, CacheError::ToolTimedOut { .. }));
}

// ===========================================================================
// Category C: failures are never cached
// ===========================================================================

#[test]
fn failing_run_is_never_replayed() {
    let repo = sample_repo();
    write(repo.path(), "bad.cpp", "#error not ready\n");
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let cmd = cl(&["/c"]);

    for expected_runs in 1..=3 {
        let out = engine.execute(Path::new("bad.cpp"), &cmd, repo.path()).unwrap();
        assert_eq!(out.return_code, 2);
        assert!(out.stderr_text().contains("C1189"));
        assert_eq!(counters.runs(), expected_runs);
    }
    assert_eq!(engine.index().entry_count(), 0);
}

#[test]
fn failed_include_scan_runs_uncached() {
    let repo = sample_repo();
    write(repo.path(), "odd.cpp", "#syntax-error\nint f();\n");
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let cmd = cl(&["/c"]);

    engine.execute(Path::new("odd.cpp"), &cmd, repo.path()).unwrap();
    engine.execute(Path::new("odd.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 2);
    assert_eq!(engine.index().entry_count(), 0);

    let log = fs::read_to_string(cache.path().join("requests.log")).unwrap();
    assert_eq!(log.lines().filter(|l| l.contains(" UNCACHEABLE ")).count(), 2);
}

// ===========================================================================
// Category D: portability and robustness
// ===========================================================================

#[test]
fn relocated_checkout_is_hit_with_rewritten_paths() {
    let first = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let cmd = cl(&["/c", "/W4"]);
    {
        let mut engine = open(first.path(), cache.path(), &counters);
        let out = engine.execute(Path::new("main.cpp"), &cmd, first.path()).unwrap();
        assert!(out.stdout_text().contains(&first.path().display().to_string()));
        engine.close();
    }

    let second = tempfile::tempdir().unwrap();
    for file in ["main.cpp", "util.h", "config.h"] {
        fs::copy(first.path().join(file), second.path().join(file)).unwrap();
    }
    let mut engine = open(second.path(), cache.path(), &counters);
    let out = engine.execute(Path::new("main.cpp"), &cmd, second.path()).unwrap();
    assert_eq!(counters.runs(), 1);
    assert_eq!(
        out.stdout_text(),
        format!("{}\n", second.path().join("main.cpp").display())
    );
    assert!(second.path().join("main.obj").is_file());
}

#[test]
fn non_utf8_diagnostics_replayed_byte_for_byte() {
    let first = sample_repo();
    write(first.path(), "legacy.cpp", "#pragma codepage\nint f();\n");
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let cmd = cl(&["/c"]);

    let mut engine = open(first.path(), cache.path(), &counters);
    let recorded = engine.execute(Path::new("legacy.cpp"), &cmd, first.path()).unwrap();
    assert!(recorded.stderr.ends_with(b"caf\xE9\n"));
    let replayed = engine.execute(Path::new("legacy.cpp"), &cmd, first.path()).unwrap();
    assert_eq!(counters.runs(), 1);
    assert_eq!(replayed, recorded);

    let second = tempfile::tempdir().unwrap();
    fs::copy(first.path().join("legacy.cpp"), second.path().join("legacy.cpp")).unwrap();
    let mut moved = open(second.path(), cache.path(), &counters);
    let out = moved.execute(Path::new("legacy.cpp"), &cmd, second.path()).unwrap();
    assert_eq!(counters.runs(), 1);
    let source = second.path().join("legacy.cpp");
    let mut expected = format!("{}(1): warning C4819: caf", source.display()).into_bytes();
    expected.extend_from_slice(b"\xE9\n");
    assert_eq!(out.stderr, expected);
}

#[test]
fn corrupt_record_falls_back_to_real_run() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let cmd = cl(&["/c"]);

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    let record = cache.path().join("entries/entry_000001/record.bin");
    fs::write(&record, b"garbage").unwrap();

    let out = engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(out.return_code, 0);
    assert_eq!(counters.runs(), 2);

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 2, "the fresh entry is served");
}

#[test]
fn vanished_entry_storage_is_miss() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let cmd = cl(&["/c"]);

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    fs::remove_dir_all(cache.path().join("entries")).unwrap();
    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 2);
}

#[test]
fn corrupt_index_starts_empty() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    fs::write(cache.path().join("index.json"), "{ not json").unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    assert_eq!(engine.index().entry_count(), 0);

    engine.execute(Path::new("main.cpp"), &cl(&["/c"]), repo.path()).unwrap();
    assert_eq!(engine.index().entry_count(), 1);
}

#[test]
fn entries_written_by_one_engine_are_seen_by_another() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut a = open(repo.path(), cache.path(), &counters);
    let mut b = open(repo.path(), cache.path(), &counters);

    a.execute(Path::new("main.cpp"), &cl(&["/c", "/W1"]), repo.path()).unwrap();
    b.execute(Path::new("main.cpp"), &cl(&["/c", "/W2"]), repo.path()).unwrap();
    assert_eq!(b.index().entry_count(), 2, "b merged a's entry on write");

    let ids: Vec<u64> = b.index().entries().map(|(_, e)| e.id.0).collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[test]
fn engines_recording_the_same_key_keep_both_entries_intact() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let cmd = cl(&["/c", "/W4"]);
    // Both load an empty index, so neither sees the other's entry before running.
    let mut a = open(repo.path(), cache.path(), &counters);
    let mut b = open(repo.path(), cache.path(), &counters);

    a.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    let produced = fs::read(repo.path().join("main.obj")).unwrap();
    fs::remove_file(repo.path().join("main.obj")).unwrap();
    b.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 2);

    let entries = cache.path().join("entries");
    for dir in ["entry_000001", "entry_000002"] {
        assert!(entries.join(dir).join("record.bin").is_file(), "{dir}");
        assert_eq!(fs::read(entries.join(dir).join("files/main.obj")).unwrap(), produced);
    }
    let mut fresh = open(repo.path(), cache.path(), &counters);
    assert_eq!(fresh.index().entry_count(), 2);

    // The older entry still replays on its own.
    fs::remove_dir_all(entries.join("entry_000002")).unwrap();
    fs::remove_file(repo.path().join("main.obj")).unwrap();
    let out = fresh.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 2);
    assert_eq!(out.return_code, 0);
    assert_eq!(fs::read(repo.path().join("main.obj")).unwrap(), produced);
}

#[test]
fn stale_engine_after_clear_never_replays_another_subject() {
    let repo = sample_repo();
    write(repo.path(), "other.cpp", "int other() { return 1; }\n");
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let cmd = cl(&["/c"]);
    let mut c = open(repo.path(), cache.path(), &counters);
    let mut b = open(repo.path(), cache.path(), &counters);
    let mut a = open(repo.path(), cache.path(), &counters);

    b.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    a.clear().unwrap();
    c.execute(Path::new("other.cpp"), &cmd, repo.path()).unwrap();
    assert!(
        !cache.path().join("entries/entry_000001").exists(),
        "a cleared id is not handed out again"
    );

    let out = b.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 3);
    assert_eq!(
        out.stdout_text(),
        format!("{}\n", repo.path().join("main.cpp").display())
    );
}

#[test]
fn record_of_another_subject_is_not_replayed() {
    let repo = sample_repo();
    write(repo.path(), "other.cpp", "int other() { return 1; }\n");
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let cmd = cl(&["/c"]);
    let mut engine = open(repo.path(), cache.path(), &counters);

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    engine.execute(Path::new("other.cpp"), &cmd, repo.path()).unwrap();
    let entries = cache.path().join("entries");
    fs::copy(
        entries.join("entry_000002/record.bin"),
        entries.join("entry_000001/record.bin"),
    )
    .unwrap();

    let out = engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 3);
    assert!(out.stdout_text().contains("main.cpp"));
    assert!(!out.stdout_text().contains("other.cpp"));
}

// ===========================================================================
// Category E: repository-level runs
// ===========================================================================

fn docs_repo() -> TempDir {
    let repo = tempfile::tempdir().unwrap();
    write(repo.path(), "src/a.cpp", "int a() { return 1; }\n");
    write(repo.path(), "src/a.h", "int a();\n");
    write(repo.path(), "README.md", "readme\n");
    write(repo.path(), "docs/api.Doxyfile", "OUTPUT_DIRECTORY = out/api\n");
    write(repo.path(), "docs/internal.Doxyfile", "OUTPUT_DIRECTORY = out/internal\n");
    repo
}

fn doxygen(main: &str, out: &str) -> TreeRequest {
    TreeRequest {
        main_file: PathBuf::from(main),
        tool: "doxygen".to_string(),
        args: vec![],
        globs: vec!["*.cpp".to_string(), "*.h".to_string()],
        output_root: PathBuf::from(out),
    }
}

#[test]
fn tree_runs_with_distinct_main_files_are_independent() {
    let repo = docs_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let api = doxygen("docs/api.Doxyfile", "out/api");
    let internal = doxygen("docs/internal.Doxyfile", "out/internal");

    engine.execute_over_tree(&api).unwrap();
    engine.execute_over_tree(&internal).unwrap();
    assert_eq!(counters.runs(), 2);
    assert_eq!(engine.index().subject_count(), 2);

    fs::remove_dir_all(repo.path().join("out")).unwrap();
    let replayed = engine.execute_over_tree(&api).unwrap();
    engine.execute_over_tree(&internal).unwrap();
    assert_eq!(counters.runs(), 2);
    assert_eq!(replayed.return_code, 0);
    assert_eq!(replayed.stdout, b"Generating docs...\n");
    assert!(repo.path().join("out/api/html/index.html").is_file());
    assert!(repo.path().join("out/api/html/search/all.js").is_file());
    assert!(repo.path().join("out/internal/html/index.html").is_file());
}

#[test]
fn editing_a_tracked_file_invalidates_every_tree_subject() {
    let repo = docs_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let api = doxygen("docs/api.Doxyfile", "out/api");
    let internal = doxygen("docs/internal.Doxyfile", "out/internal");

    engine.execute_over_tree(&api).unwrap();
    engine.execute_over_tree(&internal).unwrap();
    write(repo.path(), "src/a.h", "int a(int);\n");
    bump_mtime(&repo.path().join("src/a.h"));

    engine.execute_over_tree(&api).unwrap();
    engine.execute_over_tree(&internal).unwrap();
    assert_eq!(counters.runs(), 4);
}

#[test]
fn untracked_files_do_not_invalidate_tree_runs() {
    let repo = docs_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let api = doxygen("docs/api.Doxyfile", "out/api");

    engine.execute_over_tree(&api).unwrap();
    write(repo.path(), "README.md", "changed readme\n");
    engine.execute_over_tree(&api).unwrap();
    assert_eq!(counters.runs(), 1);
}

#[test]
fn tree_replay_repairs_stale_output_root() {
    let repo = docs_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let api = doxygen("docs/api.Doxyfile", "out/api");

    engine.execute_over_tree(&api).unwrap();
    let index_html = repo.path().join("out/api/html/index.html");
    let search = repo.path().join("out/api/html/search/all.js");
    let expected_index = fs::read(&index_html).unwrap();
    let expected_search = fs::read(&search).unwrap();

    fs::write(&index_html, "tampered").unwrap();
    fs::remove_file(&search).unwrap();
    engine.execute_over_tree(&api).unwrap();
    assert_eq!(counters.runs(), 1);
    assert_eq!(fs::read(&index_html).unwrap(), expected_index);
    assert_eq!(fs::read(&search).unwrap(), expected_search);
}

#[test]
fn tree_replay_recreates_missing_output_root() {
    let repo = docs_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let api = doxygen("docs/api.Doxyfile", "out/api");

    engine.execute_over_tree(&api).unwrap();
    let expected = fs::read(repo.path().join("out/api/html/index.html")).unwrap();
    fs::remove_dir_all(repo.path().join("out")).unwrap();

    let out = engine.execute_over_tree(&api).unwrap();
    assert_eq!(counters.runs(), 1);
    assert_eq!(out.return_code, 0);
    assert_eq!(fs::read(repo.path().join("out/api/html/index.html")).unwrap(), expected);
    assert!(repo.path().join("out/api/html/search/all.js").is_file());
}

#[test]
fn tree_entry_stores_relative_hierarchy() {
    let repo = docs_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    engine.execute_over_tree(&doxygen("docs/api.Doxyfile", "out/api")).unwrap();

    let stored = cache.path().join("entries/entry_000001/files");
    assert!(stored.join("html/index.html").is_file());
    assert!(stored.join("html/search/all.js").is_file());
}

// ===========================================================================
// Category F: administration
// ===========================================================================

#[test]
fn clear_removes_entries_and_files() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let cmd = cl(&["/c"]);

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    engine.clear().unwrap();
    assert_eq!(engine.index().entry_count(), 0);
    assert!(!cache.path().join("entries").exists());

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    assert_eq!(counters.runs(), 2);
    let reopened = open(repo.path(), cache.path(), &counters);
    assert_eq!(reopened.index().entry_count(), 1);
}

#[test]
fn stats_count_entries_per_tool() {
    let repo = docs_repo();
    write(repo.path(), "main.cpp", "int main() {}\n");
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);

    engine.execute(Path::new("main.cpp"), &cl(&["/c"]), repo.path()).unwrap();
    engine.execute(Path::new("main.cpp"), &cl(&["/c", "/O2"]), repo.path()).unwrap();
    engine.execute_over_tree(&doxygen("docs/api.Doxyfile", "out/api")).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.entries, 3);
    assert_eq!(stats.subjects, 2);
    assert_eq!(stats.per_tool["cl"], 2);
    assert_eq!(stats.per_tool["doxygen"], 1);
    assert!(stats.stored_bytes > 0);
}

#[test]
fn request_log_records_each_outcome() {
    let repo = sample_repo();
    let cache = tempfile::tempdir().unwrap();
    let counters = Arc::new(Counters::default());
    let mut engine = open(repo.path(), cache.path(), &counters);
    let cmd = cl(&["/c"]);

    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();
    engine.execute(Path::new("main.cpp"), &cmd, repo.path()).unwrap();

    let log = fs::read_to_string(cache.path().join("requests.log")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains(" MISS main.cpp tool=cl "));
    assert!(lines[0].ends_with("entry=entry_000001"));
    assert!(lines[1].contains(" HIT main.cpp tool=cl "));
    assert!(!log.contains("int main"));
}
