//! Process execution seam.
//!
//! The engine never spawns processes directly; it hands a [`ProcessSpec`] to
//! a [`ToolExecutor`]. [`ProcessExecutor`] is the real implementation; tests
//! substitute a scripted one.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::CacheError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Deadline; the process is killed when it expires.
    pub timeout: Duration,
}

/// What a finished process produced. Streams are kept as raw bytes;
/// toolchains print in whatever code page the console uses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
    /// Exit code; `-1` when the process was terminated by a signal.
    pub code: i32,
}

/// Runs external processes on behalf of the engine.
///
/// A non-zero exit is a normal [`ProcessOutput`], not an error. Errors are
/// reserved for processes that could not start
/// ([`CacheError::ToolExecutionFailed`]) or overran their deadline
/// ([`CacheError::ToolTimedOut`]).
pub trait ToolExecutor {
    /// Runs `spec` to completion.
    fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, CacheError>;
}

/// Executes tools as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    env: Option<BTreeMap<String, String>>,
}

impl ProcessExecutor {
    /// Creates an executor that inherits the current environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor that runs every process in exactly `env`, for
    /// toolchains whose environment was prepared by a setup script.
    pub fn with_environment(env: BTreeMap<String, String>) -> Self {
        Self { env: Some(env) }
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut s) = stream {
            let _ = s.read_to_end(&mut buf);
        }
        buf
    })
}

impl ToolExecutor for ProcessExecutor {
    fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, CacheError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(env) = &self.env {
            cmd.env_clear().envs(env);
        }

        let mut child = cmd.spawn().map_err(|source| CacheError::ToolExecutionFailed {
            program: spec.program.clone(),
            source,
        })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= spec.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(program = %spec.program.display(), "process timed out");
                    return Err(CacheError::ToolTimedOut {
                        program: spec.program.clone(),
                        timeout: spec.timeout,
                    });
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    return Err(CacheError::ToolExecutionFailed {
                        program: spec.program.clone(),
                        source,
                    })
                }
            }
        };

        Ok(ProcessOutput {
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            code: status.code().unwrap_or(-1),
        })
    }
}
