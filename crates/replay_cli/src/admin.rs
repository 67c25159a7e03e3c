//! `replay clear` and `replay stats`.

use replay_config::ToolsConfig;

use crate::context::{self, CliResult};
use crate::{GlobalArgs, ReportFormat, TuningArgs};

/// Runs the `replay clear` command.
pub fn clear(global: &GlobalArgs) -> CliResult<i32> {
    let options = context::options(global, &TuningArgs::default())?;
    let cache_dir = options.cache_dir.clone();
    let mut engine = context::open_engine(options, ToolsConfig::default())?;
    engine.clear()?;
    if !global.quiet {
        eprintln!("    Cleared {}", cache_dir.display());
    }
    Ok(0)
}

/// Runs the `replay stats` command.
pub fn stats(format: ReportFormat, global: &GlobalArgs) -> CliResult<i32> {
    let options = context::options(global, &TuningArgs::default())?;
    let engine = context::open_engine(options, ToolsConfig::default())?;
    let stats = engine.stats();
    let cache_dir = engine.options().cache_dir.display().to_string();

    match format {
        ReportFormat::Text => {
            println!("cache:    {cache_dir}");
            println!("entries:  {}", stats.entries);
            println!("subjects: {}", stats.subjects);
            println!("stored:   {}", human_bytes(stats.stored_bytes));
            for (tool, count) in &stats.per_tool {
                println!("  {tool:<12} {count}");
            }
        }
        ReportFormat::Json => {
            let json = serde_json::json!({
                "cache_dir": cache_dir,
                "entries": stats.entries,
                "subjects": stats.subjects,
                "stored_bytes": stats.stored_bytes,
                "per_tool": stats.per_tool,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(0)
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
