//! Tool-protocol client for warpflow
//!
//! Integrates out-of-process tool servers into the workflow engine. Each
//! configured server (child process speaking JSON-Lines over stdio, or an
//! HTTP endpoint) advertises tools; every tool is mirrored into the node
//! registry as a synthetic `tool-<server>-<tool>` node, so workflows route
//! external capabilities exactly like built-in ones.
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use warpflow::NodeRegistry;
//! use warpflow_toolproto::{register_from_config, ToolProtoClient};
//!
//! # async fn run() -> warpflow::Result<()> {
//! let registry = Arc::new(NodeRegistry::new());
//! let client = register_from_config(
//!     &registry,
//!     Path::new(".warpflow/toolproto.json"),
//!     Path::new(".warpflow/toolproto-cache.json"),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod synthetic;
pub mod transport;

pub use client::{ToolCallResult, ToolDescriptor, ToolProtoClient, DEFAULT_CALL_TIMEOUT};
pub use config::{LoadedConfig, ServerConfig, ToolProtoConfig};
pub use synthetic::{register_tools, synthetic_name, tool_interface};
pub use transport::MAX_IN_FLIGHT;

use std::path::Path;
use std::sync::Arc;
use warpflow::{NodeRegistry, Result};

/// Load a config file, connect every server, discover tools (through the
/// cache) and register synthetic nodes. Returns the connected client, which
/// must outlive the registry's use of the nodes.
pub async fn register_from_config(
    registry: &NodeRegistry,
    config_path: &Path,
    cache_path: &Path,
) -> Result<Arc<ToolProtoClient>> {
    let loaded = ToolProtoConfig::load(config_path)?;
    let version: String = loaded.hash.chars().take(12).collect();
    let client = Arc::new(ToolProtoClient::connect(&loaded).await?);
    let tools = client.discover(cache_path).await?;
    register_tools(registry, &client, &tools, &version)?;
    Ok(client)
}
