//! Configuration types deserialized from `tools.json`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default architecture passed to the toolchain environment script.
pub const DEFAULT_MSVC_ARCH: &str = "x64";

/// The tool configuration parsed from `tools.json`.
///
/// The file is a flat JSON object mapping logical tool names to executable
/// paths. Two keys are reserved: `vcvarsall` (the environment-setup script
/// for toolchains that need one) and `msvc_arch` (the architecture argument
/// for that script).
///
/// ```json
/// {
///   "cl": "C:/VS/bin/cl.exe",
///   "doxygen": "C:/Doxygen/bin/doxygen.exe",
///   "vcvarsall": "C:/VS/VC/Auxiliary/Build/vcvarsall.bat",
///   "msvc_arch": "x64"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the toolchain environment-setup script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcvarsall: Option<PathBuf>,

    /// Architecture selector for the environment-setup script.
    #[serde(default = "default_msvc_arch")]
    pub msvc_arch: String,

    /// Logical tool name to executable path.
    #[serde(flatten)]
    pub tools: BTreeMap<String, PathBuf>,
}

fn default_msvc_arch() -> String {
    DEFAULT_MSVC_ARCH.to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            vcvarsall: None,
            msvc_arch: default_msvc_arch(),
            tools: BTreeMap::new(),
        }
    }
}

impl ToolsConfig {
    /// Returns `true` if a tool with this logical name is configured.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Iterates over configured tool names in sorted order.
    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }
}
