//! The tool-protocol client pool
//!
//! One client owns one connected transport per configured server and
//! multiplexes all calls through it. Tool discovery is cached on disk,
//! keyed by the configuration file's content hash, so servers are only
//! re-enumerated after a real configuration change.

use crate::config::{LoadedConfig, ServerConfig, ToolProtoConfig};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use warpflow::{EngineError, Result};

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// One advertised tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-schema-shaped input declaration
    #[serde(default)]
    pub input_schema: Value,
}

/// The outcome of one tool call.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    /// The tool's structured return, preserved verbatim
    pub result: Value,
    pub warnings: Vec<String>,
    /// Semantic failure reported by the tool (routed, not raised)
    pub error: Option<String>,
}

/// On-disk discovery cache: tool lists per server, keyed by config hash.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DiscoveryCache {
    config_hash: String,
    servers: BTreeMap<String, Vec<ToolDescriptor>>,
}

/// The client pool: one transport per server.
pub struct ToolProtoClient {
    servers: HashMap<String, ServerEntry>,
    config_hash: String,
}

struct ServerEntry {
    transport: Arc<Transport>,
    config: ServerConfig,
}

impl ToolProtoClient {
    /// Connect every server in a loaded configuration.
    pub async fn connect(loaded: &LoadedConfig) -> Result<Self> {
        let mut servers = HashMap::new();
        for (name, config) in &loaded.config.servers {
            let transport = Transport::connect(name, config).await?;
            servers.insert(
                name.clone(),
                ServerEntry {
                    transport: Arc::new(transport),
                    config: config.clone(),
                },
            );
        }
        Ok(Self {
            servers,
            config_hash: loaded.hash.clone(),
        })
    }

    /// Convenience: load a config file and connect.
    pub async fn from_config_file(path: &Path) -> Result<Self> {
        let loaded = ToolProtoConfig::load(path)?;
        Self::connect(&loaded).await
    }

    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn server_config(&self, server: &str) -> Option<&ServerConfig> {
        self.servers.get(server).map(|entry| &entry.config)
    }

    /// Enumerate every server's tools, reading through the discovery cache.
    ///
    /// The cache at `cache_path` is reused while its recorded config hash
    /// matches the live configuration; otherwise servers are re-enumerated
    /// and the cache rewritten.
    pub async fn discover(
        &self,
        cache_path: &Path,
    ) -> Result<BTreeMap<String, Vec<ToolDescriptor>>> {
        if let Ok(text) = std::fs::read_to_string(cache_path) {
            if let Ok(cache) = serde_json::from_str::<DiscoveryCache>(&text) {
                if cache.config_hash == self.config_hash {
                    tracing::debug!(path = %cache_path.display(), "tool discovery cache hit");
                    return Ok(cache.servers);
                }
            }
        }

        let mut servers = BTreeMap::new();
        for name in self.server_names() {
            let tools = self.list_tools(&name).await?;
            servers.insert(name, tools);
        }

        let cache = DiscoveryCache {
            config_hash: self.config_hash.clone(),
            servers: servers.clone(),
        };
        if let Some(parent) = cache_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&cache) {
            Ok(text) => {
                if let Err(err) = std::fs::write(cache_path, text) {
                    tracing::warn!(error = %err, "failed to write tool discovery cache");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to serialize tool discovery cache"),
        }
        Ok(servers)
    }

    /// Ask one server for its tool list.
    pub async fn list_tools(&self, server: &str) -> Result<Vec<ToolDescriptor>> {
        let entry = self.entry(server)?;
        let outcome = entry
            .transport
            .request("tools/list", json!({}), DEFAULT_CALL_TIMEOUT)
            .await?;
        let result = outcome.map_err(|e| {
            EngineError::tool_protocol(format!("tool list from '{server}' failed: {}", e.message))
        })?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                EngineError::tool_protocol(format!(
                    "tool server '{server}' returned no 'tools' array"
                ))
            })?;
        tools
            .iter()
            .map(|tool| {
                serde_json::from_value(tool.clone()).map_err(|e| {
                    EngineError::tool_protocol(format!(
                        "tool server '{server}' advertised a malformed tool: {e}"
                    ))
                })
            })
            .collect()
    }

    /// Invoke a tool. Transport failures and server-flagged retryable
    /// errors raise (and retry under node policy); semantic tool errors
    /// come back inside the result for action routing.
    pub async fn call(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolCallResult> {
        let entry = self.entry(server)?;
        let outcome = entry
            .transport
            .request(
                "tools/call",
                json!({ "name": tool, "arguments": arguments }),
                timeout,
            )
            .await?;

        let result = match outcome {
            Ok(result) => result,
            Err(wire) if wire.retryable => {
                return Err(EngineError::tool_protocol(format!(
                    "tool '{tool}' on '{server}' failed transiently: {}",
                    wire.message
                )));
            }
            // Non-retryable server errors are semantic: surface for routing.
            Err(wire) => {
                return Ok(ToolCallResult {
                    result: Value::Null,
                    warnings: Vec::new(),
                    error: Some(wire.message),
                });
            }
        };

        let warnings = result
            .get("warnings")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|w| w.as_str().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let error = result
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let payload = result.get("result").cloned().unwrap_or(result);

        Ok(ToolCallResult {
            result: payload,
            warnings,
            error,
        })
    }

    fn entry(&self, server: &str) -> Result<&ServerEntry> {
        self.servers.get(server).ok_or_else(|| {
            EngineError::tool_protocol(format!("no configured tool server named '{server}'"))
                .with_fixable(true)
                .with_suggestion(format!(
                    "known servers: {}",
                    self.server_names().join(", ")
                ))
        })
    }
}
