//! `warpflow discover` - rank nodes and saved workflows by intent.

use anyhow::Result;
use clap::Args;
use warpflow::discovery::{DiscoveryIndex, WorkflowMeta};

#[derive(Args)]
pub struct DiscoverArgs {
    /// Free-form description of what the workflow should do
    pub intent: String,

    /// How many candidates to return
    #[arg(long, short = 'k', default_value_t = 5)]
    pub top: usize,

    /// Emit as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: DiscoverArgs) -> Result<i32> {
    let (registry, node_ctx) = crate::commands::build_environment().await?;
    let workflows = load_saved_workflow_metadata(&node_ctx.config.workspace_dir);
    let index = DiscoveryIndex::build(&registry, &workflows);
    let hits = index.query(&args.intent, args.top);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else if hits.is_empty() {
        println!("nothing matched '{}'", args.intent);
    } else {
        for hit in &hits {
            println!(
                "{:<28} {:>5.2}  {}",
                hit.entry.name, hit.score, hit.entry.description
            );
        }
    }
    Ok(0)
}

/// Saved workflows live under `<workspace>/workflows/*.json`; their
/// metadata feeds the index alongside registry interfaces.
fn load_saved_workflow_metadata(workspace: &std::path::Path) -> Vec<WorkflowMeta> {
    let dir = workspace.join("workflows");
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut metas = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(workflow) = warpflow::Workflow::from_json(&text) else {
            tracing::warn!(path = %path.display(), "skipping unparseable saved workflow");
            continue;
        };
        metas.push(WorkflowMeta {
            name: workflow.display_name().to_string(),
            description: workflow.description.clone().unwrap_or_default(),
            inputs: workflow.inputs.keys().cloned().collect(),
        });
    }
    metas.sort_by(|a, b| a.name.cmp(&b.name));
    metas
}
