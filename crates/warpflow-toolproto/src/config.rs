//! Tool-protocol server configuration
//!
//! One JSON file lists every configured server: child-process servers with
//! `{command, args, env}`, HTTP servers with `{url, headers}`. The file's
//! content hash drives discovery-cache invalidation: tool lists are
//! re-enumerated only when the configuration actually changed.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use warpflow::{EngineError, Result};

/// One configured server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerConfig {
    /// Child process speaking JSON-Lines over stdin/stdout
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_alias: Option<String>,
    },
    /// HTTP endpoint accepting the JSON envelope via POST
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_alias: Option<String>,
    },
}

impl ServerConfig {
    /// The per-server convenience alias under which `result` is mirrored.
    pub fn result_alias(&self) -> Option<&str> {
        match self {
            ServerConfig::Stdio { result_alias, .. } | ServerConfig::Http { result_alias, .. } => {
                result_alias.as_deref()
            }
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolProtoConfig {
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

impl ToolProtoConfig {
    /// Load and hash a configuration file.
    pub fn load(path: &Path) -> Result<LoadedConfig> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::tool_protocol(format!(
                "cannot read tool-protocol config {}: {e}",
                path.display()
            ))
        })?;
        let config: ToolProtoConfig = serde_json::from_str(&text).map_err(|e| {
            EngineError::tool_protocol(format!(
                "invalid tool-protocol config {}: {e}",
                path.display()
            ))
            .with_fixable(true)
        })?;
        let mtime = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(LoadedConfig {
            hash: content_hash(&text),
            mtime,
            config,
        })
    }
}

/// A parsed config plus its change-detection fingerprint.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ToolProtoConfig,
    /// sha256 of the file content
    pub hash: String,
    /// Modification time in epoch seconds, for cheap pre-checks
    pub mtime: u64,
}

fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
