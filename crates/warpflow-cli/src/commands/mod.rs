pub mod discover;
pub mod nodes;
pub mod run;
pub mod trace;
pub mod validate;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use warpflow::config::EngineConfig;
use warpflow::{MockLlm, NodeContext, NodeRegistry, Workflow};

/// Load a workflow document by extension: `.md` uses the
/// Markdown-with-frontmatter form, anything else is treated as JSON.
pub fn load_workflow(path: &Path) -> Result<Workflow> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read workflow file {}", path.display()))?;
    let workflow = if path.extension().and_then(|e| e.to_str()) == Some("md") {
        warpflow::markdown::from_markdown(&text)?
    } else {
        Workflow::from_json(&text)?
    };
    Ok(workflow)
}

/// Build the registry and node context the way every subcommand needs:
/// environment config, built-in nodes, synthetic tool nodes when a
/// tool-protocol config file is present, and the LLM seam from the
/// `WARPFLOW_LLM_REPLY` stub variable (a real embedding application
/// injects its own client instead).
pub async fn build_environment() -> Result<(Arc<NodeRegistry>, NodeContext)> {
    let config = EngineConfig::from_env();
    let registry = Arc::new(NodeRegistry::new());
    warpflow_nodes::register_builtin_nodes(&registry, &config)?;

    let toolproto_config = config.workspace_dir.join("toolproto.json");
    if toolproto_config.exists() {
        let cache = config.workspace_dir.join("toolproto-cache.json");
        warpflow_toolproto::register_from_config(&registry, &toolproto_config, &cache)
            .await
            .with_context(|| "failed to connect tool-protocol servers")?;
    }

    let llm = std::env::var("WARPFLOW_LLM_REPLY")
        .ok()
        .map(|reply| Arc::new(MockLlm::new(reply)) as Arc<dyn warpflow::LlmClient>);

    Ok((registry, NodeContext { config, llm }))
}
