//! Tool invocations.

use std::path::{Path, PathBuf};

/// How a tool's dependencies are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// A compiler-style toolchain that can list the files a source includes
    /// (`/showIncludes /Zs`). Every repository-local include is tracked.
    Toolchain,
    /// A standalone executable with no include introspection. Only the
    /// source file itself is tracked.
    Direct,
}

/// Option prefixes that take a destination joined to them (`/Foout.obj`).
/// Longer prefixes come first.
const JOINED_PATH_PREFIXES: &[&str] = &[
    "/Fo", "/Fe", "/Fd", "/Fp", "/Fa", "/Fi", "/Fm", "-Fo", "-Fe", "-Fd", "-Fp", "-o",
];

/// Options whose destination is the following argument (`-o out.o`).
const SEPARATE_PATH_OPTIONS: &[&str] = &["-o", "-MF", "--output"];

/// A destination-only argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputArg {
    /// Passed through unchanged, such as a directory destination (`/Foout/`).
    Flag(String),
    /// A file destination. A `" "` separator spells it as two arguments;
    /// any other separator joins prefix and path into one.
    Path {
        /// Option prefix, such as `/Fo`.
        prefix: String,
        /// Text between prefix and path: `""`, `"="` or `" "`.
        separator: String,
        /// Destination, absolute or relative to the working directory.
        path: PathBuf,
    },
}

impl OutputArg {
    /// A destination written as `<prefix><path>`.
    pub fn joined(prefix: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Path {
            prefix: prefix.into(),
            separator: String::new(),
            path: path.into(),
        }
    }

    /// Classifies raw command-line arguments. Known output options become
    /// [`OutputArg::Path`], pulling in the next argument when the option
    /// takes it separately; everything else stays a [`OutputArg::Flag`].
    pub fn parse_all<S: AsRef<str>>(args: &[S]) -> Vec<Self> {
        let mut out = Vec::with_capacity(args.len());
        let mut iter = args.iter().map(AsRef::as_ref);
        while let Some(arg) = iter.next() {
            if SEPARATE_PATH_OPTIONS.contains(&arg) {
                if let Some(path) = iter.next() {
                    out.push(Self::Path {
                        prefix: arg.to_string(),
                        separator: " ".to_string(),
                        path: PathBuf::from(path),
                    });
                    continue;
                }
            }
            out.push(Self::parse(arg));
        }
        out
    }

    /// Classifies one self-contained argument.
    pub fn parse(arg: &str) -> Self {
        let names_file = |rest: &str| !rest.is_empty() && !rest.ends_with(['/', '\\']);
        for prefix in JOINED_PATH_PREFIXES {
            if let Some(rest) = arg.strip_prefix(prefix) {
                if names_file(rest) {
                    return Self::joined(*prefix, rest);
                }
            }
        }
        if let Some((option, rest)) = arg.split_once('=') {
            if option.starts_with("--") && names_file(rest) {
                return Self::Path {
                    prefix: option.to_string(),
                    separator: "=".to_string(),
                    path: PathBuf::from(rest),
                };
            }
        }
        Self::Flag(arg.to_string())
    }

    /// The destination path, if this argument names one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Flag(_) => None,
            Self::Path { path, .. } => Some(path),
        }
    }

    /// The argument as passed to the tool.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Self::Flag(arg) => vec![arg.clone()],
            Self::Path { prefix, separator, path } if separator == " " => {
                vec![prefix.clone(), path.display().to_string()]
            }
            Self::Path { prefix, separator, path } => {
                vec![format!("{prefix}{separator}{}", path.display())]
            }
        }
    }
}

/// One tool invocation on one source file, with its arguments split into
/// those that affect the output and those that only say where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// How dependencies are discovered.
    pub kind: ToolKind,
    /// Logical tool name from `tools.json`.
    pub tool: String,
    /// Arguments that participate in the command fingerprint.
    pub input_args: Vec<String>,
    /// Arguments that only select destinations; excluded from the fingerprint.
    pub output_args: Vec<OutputArg>,
    /// Directory the tool writes into. When set, only this tree is diffed
    /// for outputs; otherwise the working root is.
    pub output_root: Option<PathBuf>,
}

impl ToolCommand {
    /// A toolchain invocation (include detection enabled).
    pub fn toolchain(tool: impl Into<String>, input_args: Vec<String>) -> Self {
        Self {
            kind: ToolKind::Toolchain,
            tool: tool.into(),
            input_args,
            output_args: Vec::new(),
            output_root: None,
        }
    }

    /// A direct executable invocation (only the source is tracked).
    pub fn direct(tool: impl Into<String>, input_args: Vec<String>) -> Self {
        Self {
            kind: ToolKind::Direct,
            ..Self::toolchain(tool, input_args)
        }
    }

    /// Sets the destination-only arguments.
    #[must_use]
    pub fn with_output_args(mut self, output_args: Vec<OutputArg>) -> Self {
        self.output_args = output_args;
        self
    }

    /// Sets the directory outputs are written into.
    #[must_use]
    pub fn with_output_root(mut self, output_root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(output_root.into());
        self
    }

    /// Destination paths of the output arguments, in order.
    pub fn output_paths(&self) -> impl Iterator<Item = &Path> {
        self.output_args.iter().filter_map(OutputArg::path)
    }

    /// Full argument list for a run on `source`:
    /// input arguments, the source, then output arguments.
    pub fn command_line(&self, source: &Path) -> Vec<String> {
        let mut args = Vec::with_capacity(self.input_args.len() + self.output_args.len() + 1);
        args.extend(self.input_args.iter().cloned());
        args.push(source.display().to_string());
        args.extend(self.output_args.iter().flat_map(OutputArg::to_args));
        args
    }
}
