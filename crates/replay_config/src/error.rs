//! Error types for configuration loading and validation.

use std::path::PathBuf;

/// Errors that can occur when locating, loading or validating `tools.json`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The JSON content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// No configuration file exists in any of the searched locations.
    #[error("no tools.json found (searched {})", display_paths(.searched))]
    NotFound {
        /// Candidate paths in the order they were checked.
        searched: Vec<PathBuf>,
    },

    /// A requested tool name is not present in the configuration.
    #[error("tool '{0}' is not configured in tools.json")]
    UnknownTool(String),

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
