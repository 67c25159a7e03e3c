//! `replay run` and `replay run-tree`.
//!
//! Both print the tool's stdout and stderr as recorded (or as just
//! produced) and exit with the tool's own code.

use std::io::Write;

use replay_cache::{OutputArg, ToolCommand, ToolOutput, TreeRequest};

use crate::context::{self, CliResult};
use crate::{GlobalArgs, RunArgs, ToolKindArg, TreeArgs};

/// Runs the `replay run` command.
pub fn run(args: &RunArgs, global: &GlobalArgs) -> CliResult<i32> {
    let tools = context::load_tools(global)?;
    let options = context::options(global, &args.tuning)?;
    let working_root = match &args.cwd {
        Some(dir) => std::env::current_dir()?.join(dir),
        None => std::env::current_dir()?,
    };

    let mut command = match args.kind {
        ToolKindArg::Toolchain => ToolCommand::toolchain(&args.tool, args.args.clone()),
        ToolKindArg::Direct => ToolCommand::direct(&args.tool, args.args.clone()),
    }
    .with_output_args(OutputArg::parse_all(&args.output_args));
    if let Some(root) = &args.output_root {
        command = command.with_output_root(root);
    }

    let mut engine = context::open_engine(options, tools)?;
    let output = engine.execute(&args.source, &command, &working_root)?;
    engine.close();
    emit(&output)?;
    Ok(output.return_code)
}

/// Runs the `replay run-tree` command.
pub fn run_tree(args: &TreeArgs, global: &GlobalArgs) -> CliResult<i32> {
    let tools = context::load_tools(global)?;
    let options = context::options(global, &args.tuning)?;
    let cwd = std::env::current_dir()?;

    let request = TreeRequest {
        main_file: cwd.join(&args.main_file),
        tool: args.tool.clone(),
        args: args.args.clone(),
        globs: args.globs.clone(),
        output_root: cwd.join(&args.output_root),
    };

    let mut engine = context::open_engine(options, tools)?;
    let output = engine.execute_over_tree(&request)?;
    engine.close();
    emit(&output)?;
    if !global.quiet && output.return_code == 0 {
        eprintln!("   Generated {}", args.output_root.display());
    }
    Ok(output.return_code)
}

fn emit(output: &ToolOutput) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&output.stdout)?;
    stdout.flush()?;
    let mut stderr = std::io::stderr().lock();
    stderr.write_all(&output.stderr)?;
    stderr.flush()
}
