//! Replay CLI: runs compilers and analyzers through the build-artifact cache.
//!
//! `replay run` caches one tool invocation on one source file, `replay
//! run-tree` caches a whole-repository run keyed on a main file, and
//! `replay clear` / `replay stats` manage the cache directory.

#![warn(missing_docs)]

mod admin;
mod context;
mod run;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Replay: a build-artifact cache for compiler and analyzer runs.
#[derive(Parser, Debug)]
#[command(name = "replay", version, about = "Build-artifact cache for tool invocations")]
pub struct Cli {
    /// Suppress everything except tool output and errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase log verbosity (`-v` info, `-vv` debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to a `tools.json` file, bypassing discovery.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache directory (default `~/.replay/cache`).
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Repository root (default: the current directory).
    #[arg(long, global = true)]
    pub repo: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a tool on one source file, replaying a cached result if valid.
    Run(RunArgs),
    /// Run a tool over the repository tree, keyed on a main file.
    RunTree(TreeArgs),
    /// Remove every cache entry.
    Clear,
    /// Show what the cache holds.
    Stats {
        /// Output format.
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },
}

/// Arguments for `replay run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Logical tool name from `tools.json`.
    pub tool: String,

    /// Source file the tool is run on.
    pub source: PathBuf,

    /// How the tool's dependencies are found.
    #[arg(short, long, value_enum, default_value_t = ToolKindArg::Toolchain)]
    pub kind: ToolKindArg,

    /// Output-location argument; not part of the cache key. Repeatable.
    /// File destinations (`/Fo<file>`, `-o <file>`) receive the cached file
    /// on a hit, whatever name it was recorded under.
    #[arg(long = "output-arg", allow_hyphen_values = true)]
    pub output_args: Vec<String>,

    /// Directory the tool writes into, relative to the working directory.
    #[arg(long)]
    pub output_root: Option<PathBuf>,

    /// Working directory of the tool (default: the current directory).
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Engine tuning.
    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Tool arguments that select what is produced (after `--`).
    #[arg(last = true)]
    pub args: Vec<String>,
}

/// Arguments for `replay run-tree`.
#[derive(Parser, Debug)]
pub struct TreeArgs {
    /// Logical tool name from `tools.json`.
    pub tool: String,

    /// File identifying the run, such as a `Doxyfile`.
    pub main_file: PathBuf,

    /// Directory the tool generates its output tree into.
    #[arg(short, long)]
    pub output_root: PathBuf,

    /// Pattern selecting tracked files (e.g. `--glob '*.h'`). Repeatable.
    #[arg(short, long = "glob", required = true)]
    pub globs: Vec<String>,

    /// Engine tuning.
    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Extra tool arguments (after `--`).
    #[arg(last = true)]
    pub args: Vec<String>,
}

/// Engine knobs shared by `run` and `run-tree`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct TuningArgs {
    /// Tool timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Trust size and timestamps alone; never hash.
    #[arg(long)]
    pub metadata_only: bool,

    /// Hash file bytes as-is instead of normalized source text.
    #[arg(long)]
    pub exact_hash: bool,
}

/// Dependency detection strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ToolKindArg {
    /// Scan includes with the tool itself (`/showIncludes`).
    Toolchain,
    /// Depend on the source file only.
    Direct,
}

/// Report output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable text.
    Text,
    /// Machine-readable JSON.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress informational output.
    pub quiet: bool,
    /// Explicit configuration file.
    pub config: Option<PathBuf>,
    /// Explicit cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Explicit repository root.
    pub repo: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let global = GlobalArgs {
        quiet: cli.quiet,
        config: cli.config,
        cache_dir: cli.cache_dir,
        repo: cli.repo,
    };

    let result = match cli.command {
        Command::Run(ref args) => run::run(args, &global),
        Command::RunTree(ref args) => run::run_tree(args, &global),
        Command::Clear => admin::clear(&global),
        Command::Stats { format } => admin::stats(format, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// Installs the log subscriber. `RUST_LOG` wins over the flags.
fn init_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match (quiet, verbose) {
            (true, _) => "error",
            (false, 0) => "warn",
            (false, 1) => "info",
            (false, _) => "debug",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}
