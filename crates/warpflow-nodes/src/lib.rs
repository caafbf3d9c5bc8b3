//! Built-in warpflow nodes
//!
//! The standard node set every workflow can assume: file reads and writes,
//! shell command execution, HTTP requests, and LLM calls. Each node carries
//! its Interface as a docstring const next to the implementation, and all
//! of them honor the binary data contract and the semantic non-success
//! conventions (shell exit != 0 and HTTP 4xx/5xx return the response and
//! emit the `"error"` action instead of raising).

pub mod http;
pub mod llm_node;
pub mod read_file;
pub mod safety;
pub mod shell;
pub mod test_nodes;
mod util;
pub mod write_file;

pub use http::HttpNode;
pub use llm_node::LlmNode;
pub use read_file::ReadFileNode;
pub use safety::{analyze_command, CommandVerdict};
pub use shell::ShellNode;
pub use write_file::WriteFileNode;

use warpflow::config::EngineConfig;
use warpflow::{NodeRegistry, Result};

/// Register the built-in node set. Test-only nodes join the registry when
/// `INCLUDE_TEST_NODES` is set.
pub fn register_builtin_nodes(registry: &NodeRegistry, config: &EngineConfig) -> Result<()> {
    read_file::register(registry)?;
    write_file::register(registry)?;
    shell::register(registry)?;
    http::register(registry)?;
    llm_node::register(registry)?;
    if config.include_test_nodes {
        test_nodes::register(registry)?;
    }
    tracing::debug!(
        include_test_nodes = config.include_test_nodes,
        "built-in nodes registered"
    );
    Ok(())
}
