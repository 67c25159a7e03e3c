//! Discovery, parsing and validation of the `tools.json` tool configuration.
//!
//! This crate locates the configuration file (next to the executable, then
//! the working directory, then `~/.replay`), parses it into a strongly-typed
//! [`ToolsConfig`] and resolves logical tool names to executables.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{
    discover_config, load_config, load_config_from_str, locate_config, ConfigSearch,
    CONFIG_FILE_NAME, USER_DIR_NAME,
};
pub use resolve::{resolve_tool, EnvironmentScript, ResolvedTool};
pub use types::*;
