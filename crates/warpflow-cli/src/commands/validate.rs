//! `warpflow validate` - report every diagnostic for a workflow file.

use crate::output;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use warpflow::validate;

#[derive(Args)]
pub struct ValidateArgs {
    /// Workflow file (.json or .md)
    pub file: PathBuf,

    /// Emit diagnostics as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ValidateArgs) -> Result<i32> {
    let workflow = match crate::commands::load_workflow(&args.file) {
        Ok(workflow) => workflow,
        Err(err) => {
            output::print_error(&format!("{err:#}"), args.json);
            return Ok(crate::EXIT_VALIDATION);
        }
    };
    let (registry, _) = crate::commands::build_environment().await?;

    match validate(&workflow, &registry) {
        Ok(ir) => {
            if args.json {
                println!(
                    "{}",
                    serde_json::json!({"valid": true, "name": ir.display_name()})
                );
            } else {
                println!(
                    "workflow '{}' is valid ({} nodes, {} edges)",
                    ir.display_name(),
                    ir.nodes.len(),
                    ir.edges.len()
                );
            }
            Ok(0)
        }
        Err(report) => {
            output::print_validation_report(&report, args.json);
            Ok(crate::EXIT_VALIDATION)
        }
    }
}
