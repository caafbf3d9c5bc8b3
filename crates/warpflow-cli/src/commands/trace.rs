//! `warpflow trace` - summarize the most recent trace artifact.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use warpflow::config::EngineConfig;
use warpflow::trace::ExecutionTrace;

#[derive(Args)]
pub struct TraceArgs {
    /// Trace file to summarize; defaults to the newest in the workspace
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Print the full trace JSON instead of a summary
    #[arg(long)]
    pub full: bool,
}

pub fn execute(args: TraceArgs) -> Result<i32> {
    let path = match args.file {
        Some(path) => path,
        None => {
            let debug_dir = EngineConfig::from_env().debug_dir();
            match newest_trace(&debug_dir) {
                Some(path) => path,
                None => {
                    eprintln!("no trace files under {}", debug_dir.display());
                    return Ok(crate::EXIT_FAILED);
                }
            }
        }
    };

    let text = std::fs::read_to_string(&path)?;
    if args.full {
        println!("{text}");
        return Ok(0);
    }

    let trace: ExecutionTrace = serde_json::from_str(&text)?;
    println!("trace: {}", path.display());
    println!(
        "{} · {} · {} ms · {} node(s)",
        trace.workflow_name,
        trace.final_status,
        trace.duration_ms,
        trace.nodes.len()
    );
    for event in &trace.nodes {
        let marker = if event.success { "ok " } else { "ERR" };
        println!(
            "  {marker} {:<24} {:>6} ms{}",
            event.node_id,
            event.duration_ms,
            if event.cached { "  (cached)" } else { "" }
        );
    }
    if let Some(error) = &trace.error {
        println!("error: {error}");
        if let Some(suggestion) = &error.suggestion {
            println!("suggestion: {suggestion}");
        }
    }
    for warning in &trace.warnings {
        println!("warning: {warning}");
    }
    Ok(0)
}

fn newest_trace(debug_dir: &std::path::Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(debug_dir).ok()?;
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("workflow-trace-") && n.ends_with(".json"))
        })
        .max_by_key(|p| {
            p.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        })
}
