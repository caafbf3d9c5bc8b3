//! Iteration cache
//!
//! Speeds up the inner development loop: each node execution is keyed by a
//! hash of its resolved input envelope, and cache hits replay the recorded
//! namespace deltas and action instead of re-running `exec`. The cache is
//! workspace-local, one JSON file per workflow, and keyed additionally by
//! the node type's registry version so implementation bumps invalidate
//! stale entries automatically.

use crate::{EngineError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The replayable outcome of one node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Keys the node wrote in its own namespace
    pub deltas: Map<String, Value>,
    /// The action its `post` phase returned
    pub action: String,
}

/// The hashed input envelope of one node execution.
#[derive(Debug, Serialize)]
struct CacheEnvelope<'a> {
    node_type: &'a str,
    params_resolved: &'a Value,
    inputs_view: &'a Value,
    version: &'a str,
}

/// Compute a cache key from the resolved input envelope.
///
/// Hashing goes through canonical JSON (sorted object keys), so formatting
/// and key-order differences never change the key while any resolved value
/// change does.
pub fn cache_key(
    node_type: &str,
    params_resolved: &Value,
    inputs_view: &Value,
    version: &str,
) -> String {
    let envelope = CacheEnvelope {
        node_type,
        params_resolved,
        inputs_view,
        version,
    };
    let value = serde_json::to_value(&envelope).unwrap_or(Value::Null);
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&value));
    hex::encode(hasher.finalize())
}

/// Render a value as canonical JSON: object keys sorted recursively,
/// no insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&serde_json::to_string(other).unwrap_or_default()),
    }
}

/// Workspace-local replay cache for one workflow.
pub struct IterationCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl IterationCache {
    /// Open (or create) the cache for a workflow under `cache_dir`.
    pub fn open(cache_dir: &Path, workflow_name: &str) -> Result<Self> {
        let path = cache_dir.join(format!("{workflow_name}.json"));
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                EngineError::internal(format!(
                    "corrupt iteration cache {}: {e}",
                    path.display()
                ))
            })?,
            Err(_) => HashMap::new(),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// In-memory cache for tests and one-shot executions.
    pub fn ephemeral() -> Self {
        Self {
            path: PathBuf::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    pub fn put(&self, key: String, entry: CacheEntry) {
        self.entries.lock().insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Persist to disk. A cache with no backing path (ephemeral) is a no-op.
    pub fn flush(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries = self.entries.lock();
        let text = serde_json::to_string_pretty(&*entries)
            .map_err(|e| EngineError::internal(format!("cache serialization failed: {e}")))?;
        std::fs::write(&self.path, text)?;
        tracing::debug!(path = %self.path.display(), entries = entries.len(), "iteration cache flushed");
        Ok(())
    }
}
