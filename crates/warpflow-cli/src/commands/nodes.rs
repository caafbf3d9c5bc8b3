//! `warpflow nodes` - list registered nodes and their interfaces.

use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct NodesArgs {
    /// Substring filter over names and descriptions
    #[arg(long, short = 'f')]
    pub filter: Option<String>,

    /// Show the full interface of one node instead of the listing
    #[arg(long)]
    pub show: Option<String>,

    /// Emit as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: NodesArgs) -> Result<i32> {
    let (registry, _) = crate::commands::build_environment().await?;

    if let Some(name) = &args.show {
        let Some(node) = registry.lookup(name) else {
            crate::output::print_error(&format!("no node named '{name}'"), args.json);
            return Ok(crate::EXIT_FAILED);
        };
        if args.json {
            println!("{}", serde_json::to_string_pretty(&node.interface)?);
        } else {
            println!("{name} (v{})", node.version);
            println!("  {}", node.interface.description);
            for param in &node.interface.params {
                let required = if param.is_required() { " (required)" } else { "" };
                println!("  param {}: {}{}", param.name, param.value_type, required);
            }
            for path in node.interface.write_paths() {
                println!("  writes {path}");
            }
            for action in &node.interface.actions {
                match &action.when {
                    Some(when) => println!("  action {} ({when})", action.name),
                    None => println!("  action {}", action.name),
                }
            }
        }
        return Ok(0);
    }

    let listing = registry.list(args.filter.as_deref());
    if args.json {
        let entries: Vec<serde_json::Value> = listing
            .iter()
            .map(|(name, summary)| serde_json::json!({"name": name, "summary": summary}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for (name, summary) in &listing {
            println!("{name:<28} {summary}");
        }
        println!("\n{} node(s)", listing.len());
    }
    Ok(0)
}
