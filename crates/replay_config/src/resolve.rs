//! Tool resolution: mapping a logical tool name to what is needed to run it.

use crate::error::ConfigError;
use crate::types::ToolsConfig;
use std::path::PathBuf;

/// Environment-setup script a toolchain must be initialized with before it
/// can run (for example `vcvarsall.bat x64`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentScript {
    /// Path to the script.
    pub script: PathBuf,
    /// Architecture argument passed to the script.
    pub arch: String,
}

/// A logical tool name resolved against the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
    /// The logical tool name (e.g. `cl`, `doxygen`).
    pub name: String,
    /// Absolute or `PATH`-relative executable.
    pub executable: PathBuf,
    /// Environment script, when the configuration provides one.
    pub environment: Option<EnvironmentScript>,
}

/// Resolves a logical tool name to its executable.
///
/// Fails with [`ConfigError::UnknownTool`] if the name is absent; callers
/// treat that as fatal to the request.
pub fn resolve_tool(config: &ToolsConfig, name: &str) -> Result<ResolvedTool, ConfigError> {
    let executable = config
        .tools
        .get(name)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownTool(name.to_string()))?;

    let environment = config.vcvarsall.as_ref().map(|script| EnvironmentScript {
        script: script.clone(),
        arch: config.msvc_arch.clone(),
    });

    Ok(ResolvedTool {
        name: name.to_string(),
        executable,
        environment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    #[test]
    fn resolve_known_tool() {
        let config = load_config_from_str(r#"{ "clang-tidy": "/usr/bin/clang-tidy" }"#).unwrap();
        let tool = resolve_tool(&config, "clang-tidy").unwrap();
        assert_eq!(tool.name, "clang-tidy");
        assert_eq!(tool.executable, PathBuf::from("/usr/bin/clang-tidy"));
        assert!(tool.environment.is_none());
    }

    #[test]
    fn resolve_carries_environment_script() {
        let json = r#"{ "cl": "cl.exe", "vcvarsall": "vcvarsall.bat", "msvc_arch": "arm64" }"#;
        let config = load_config_from_str(json).unwrap();
        let tool = resolve_tool(&config, "cl").unwrap();
        assert_eq!(
            tool.environment,
            Some(EnvironmentScript {
                script: PathBuf::from("vcvarsall.bat"),
                arch: "arm64".to_string(),
            })
        );
    }

    #[test]
    fn resolve_unknown_tool_errors() {
        let config = load_config_from_str(r#"{ "cl": "cl.exe" }"#).unwrap();
        let err = resolve_tool(&config, "moc").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTool(name) if name == "moc"));
    }

    #[test]
    fn reserved_keys_do_not_resolve_as_tools() {
        let config = load_config_from_str(r#"{ "vcvarsall": "vcvarsall.bat" }"#).unwrap();
        assert!(resolve_tool(&config, "vcvarsall").is_err());
    }
}
