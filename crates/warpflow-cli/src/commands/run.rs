//! `warpflow run` - validate, compile and execute a workflow file.

use crate::output;
use anyhow::Result;
use clap::Args;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use warpflow::{validate, ExecutionOptions, Executor, FinalStatus};

#[derive(Args)]
pub struct RunArgs {
    /// Workflow file (.json or .md)
    pub file: PathBuf,

    /// Workflow input as key=value; repeat for multiple inputs. Values
    /// parse as JSON when possible, otherwise as strings.
    #[arg(long = "input", short = 'i')]
    pub inputs: Vec<String>,

    /// Enable the iteration cache
    #[arg(long)]
    pub cache: bool,

    /// Node types excluded from caching (repeatable)
    #[arg(long = "no-cache-for")]
    pub cache_exclude: Vec<String>,

    /// Workflow deadline in milliseconds
    #[arg(long)]
    pub deadline_ms: Option<u64>,

    /// Also write the smart debug Markdown next to the trace
    #[arg(long)]
    pub debug_markdown: bool,

    /// Let a configured repair hook retry once on fixable failures
    #[arg(long)]
    pub auto_repair: bool,

    /// Emit the execution report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: RunArgs) -> Result<i32> {
    let workflow = match crate::commands::load_workflow(&args.file) {
        Ok(workflow) => workflow,
        Err(err) => {
            output::print_error(&format!("{err:#}"), args.json);
            return Ok(crate::EXIT_VALIDATION);
        }
    };
    let (registry, node_ctx) = crate::commands::build_environment().await?;

    let ir = match validate(&workflow, &registry) {
        Ok(ir) => ir,
        Err(report) => {
            output::print_validation_report(&report, args.json);
            return Ok(crate::EXIT_VALIDATION);
        }
    };

    let mut inputs = serde_json::Map::new();
    for pair in &args.inputs {
        let Some((key, raw)) = pair.split_once('=') else {
            output::print_error(&format!("input '{pair}' is not key=value"), args.json);
            return Ok(crate::EXIT_VALIDATION);
        };
        let value = serde_json::from_str::<Value>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()));
        inputs.insert(key.to_string(), value);
    }

    let opts = ExecutionOptions {
        inputs,
        cache_enabled: args.cache,
        cache_exclude: args.cache_exclude.clone(),
        write_trace: true,
        write_debug_markdown: args.debug_markdown,
        deadline: args.deadline_ms.map(Duration::from_millis),
        auto_repair: args.auto_repair,
        ..ExecutionOptions::default()
    };

    let executor = Executor::new(Arc::clone(&registry), node_ctx);
    let report = executor.execute(&ir, opts).await;
    output::print_report(&report, args.json);

    Ok(match report.final_status {
        FinalStatus::Success | FinalStatus::Degraded => 0,
        FinalStatus::Failed => crate::EXIT_FAILED,
    })
}
