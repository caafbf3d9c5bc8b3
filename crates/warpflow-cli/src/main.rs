// Allow clippy pedantry for the CLI binary; library crates stay strict.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{discover, nodes, run, trace, validate};

/// Warpflow CLI - compile and run declarative workflows
///
/// Workflows are JSON or Markdown-with-frontmatter documents describing a
/// graph of typed nodes. The CLI is the deterministic runner surface:
/// validate a document, run it with inputs, inspect the node registry,
/// query discovery, or review the latest trace.
#[derive(Parser)]
#[command(name = "warpflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile and run declarative node workflows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, compile and execute a workflow file
    Run(run::RunArgs),

    /// Validate a workflow file and report every diagnostic
    Validate(validate::ValidateArgs),

    /// List registered nodes and their interfaces
    Nodes(nodes::NodesArgs),

    /// Find nodes and saved workflows by free-form intent
    Discover(discover::DiscoverArgs),

    /// Summarize the most recent trace in the workspace
    Trace(trace::TraceArgs),
}

/// Exit code for a failed execution.
const EXIT_FAILED: i32 = 1;
/// Exit code for validation errors.
const EXIT_VALIDATION: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays parseable in --json mode.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run(args) => run::execute(args).await?,
        Commands::Validate(args) => validate::execute(args).await?,
        Commands::Nodes(args) => nodes::execute(args).await?,
        Commands::Discover(args) => discover::execute(args).await?,
        Commands::Trace(args) => trace::execute(args)?,
    };
    std::process::exit(code);
}
