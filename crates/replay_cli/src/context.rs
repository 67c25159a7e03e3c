//! Shared setup: locating the repository, loading `tools.json` and opening
//! the engine.

use std::path::PathBuf;
use std::time::Duration;

use replay_cache::{CacheOptions, ContentHashing, Engine, InvalidationPolicy, ProcessExecutor};
use replay_config::{load_config, locate_config, ToolsConfig};

use crate::{GlobalArgs, TuningArgs};

/// Boxed error used by every command.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Returns the repository root: `--repo` if given, else the current directory.
pub fn repo_root(global: &GlobalArgs) -> CliResult<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(match &global.repo {
        Some(repo) => cwd.join(repo),
        None => cwd,
    })
}

/// Loads the tool configuration from `--config` or by discovery.
pub fn load_tools(global: &GlobalArgs) -> CliResult<ToolsConfig> {
    let (path, config) = match &global.config {
        Some(path) => (path.clone(), load_config(path)?),
        None => locate_config()?,
    };
    tracing::debug!(config = %path.display(), tools = config.tools.len(), "loaded tool configuration");
    Ok(config)
}

/// Builds engine options from the global flags and per-command tuning.
pub fn options(global: &GlobalArgs, tuning: &TuningArgs) -> CliResult<CacheOptions> {
    let repo = repo_root(global)?;
    let mut options = match &global.cache_dir {
        Some(dir) => CacheOptions::new(repo, std::env::current_dir()?.join(dir)),
        None => CacheOptions::with_default_cache_dir(repo),
    };
    if let Some(secs) = tuning.timeout {
        options = options.with_tool_timeout(Duration::from_secs(secs));
    }
    if tuning.metadata_only {
        options = options.with_policy(InvalidationPolicy::MetadataOnly);
    }
    if tuning.exact_hash {
        options = options.with_hashing(ContentHashing::Exact);
    }
    Ok(options)
}

/// Opens an engine that runs tools as child processes.
pub fn open_engine(options: CacheOptions, tools: ToolsConfig) -> CliResult<Engine> {
    Ok(Engine::open(options, tools, ProcessExecutor::new())?)
}
