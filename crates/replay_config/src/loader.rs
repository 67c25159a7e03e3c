//! Configuration file discovery, loading and validation.

use crate::error::ConfigError;
use crate::types::ToolsConfig;
use std::path::{Path, PathBuf};

/// File name of the tool configuration.
pub const CONFIG_FILE_NAME: &str = "tools.json";

/// Directory under the user's home that holds user-level Replay state.
pub const USER_DIR_NAME: &str = ".replay";

/// Locations consulted when discovering `tools.json`, in priority order.
#[derive(Debug, Clone, Default)]
pub struct ConfigSearch {
    /// Directory containing the running executable.
    pub exe_dir: Option<PathBuf>,
    /// The current working directory.
    pub cwd: Option<PathBuf>,
    /// The user's home directory.
    pub home_dir: Option<PathBuf>,
}

impl ConfigSearch {
    /// Builds the search from the current process environment.
    pub fn from_env() -> Self {
        Self {
            exe_dir: std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
            cwd: std::env::current_dir().ok(),
            home_dir: dirs::home_dir(),
        }
    }

    /// Returns every candidate path in the order they are checked: next to
    /// the executable, then the working directory, then `~/.replay`.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(3);
        if let Some(dir) = &self.exe_dir {
            out.push(dir.join(CONFIG_FILE_NAME));
        }
        if let Some(dir) = &self.cwd {
            out.push(dir.join(CONFIG_FILE_NAME));
        }
        if let Some(home) = &self.home_dir {
            out.push(home.join(USER_DIR_NAME).join(CONFIG_FILE_NAME));
        }
        out
    }
}

/// Finds the first existing `tools.json` among the search candidates.
pub fn discover_config(search: &ConfigSearch) -> Result<PathBuf, ConfigError> {
    let candidates = search.candidates();
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or(ConfigError::NotFound {
            searched: candidates,
        })
}

/// Discovers and loads `tools.json` using the process environment.
pub fn locate_config() -> Result<(PathBuf, ToolsConfig), ConfigError> {
    let path = discover_config(&ConfigSearch::from_env())?;
    let config = load_config(&path)?;
    Ok((path, config))
}

/// Loads and validates a `tools.json` file.
pub fn load_config(path: &Path) -> Result<ToolsConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `tools.json` document from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<ToolsConfig, ConfigError> {
    let config: ToolsConfig =
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that every configured path is non-empty.
fn validate_config(config: &ToolsConfig) -> Result<(), ConfigError> {
    for (name, path) in &config.tools {
        if name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "tool names must not be empty".to_string(),
            ));
        }
        if path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "empty path for '{name}'"
            )));
        }
    }
    if config
        .vcvarsall
        .as_ref()
        .is_some_and(|p| p.as_os_str().is_empty())
    {
        return Err(ConfigError::ValidationError(
            "empty path for 'vcvarsall'".to_string(),
        ));
    }
    if config.msvc_arch.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "msvc_arch must not be empty".to_string(),
        ));
    }
    Ok(())
}
