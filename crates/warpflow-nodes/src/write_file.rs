//! Write shared-state content to a file on disk.

use crate::util::{optional_bool, optional_str, required_str};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use warpflow::binary;
use warpflow::ir::NodeSpec;
use warpflow::node::{Action, ExecContext, FnNodeFactory, Node, NodeContext};
use warpflow::{EngineError, ErrorCategory, Namespace, NodeRegistry, Result, StoreView};

const INTERFACE: &str = "\
Write content to a file, creating parent directories by default. When
content_is_binary is true the content is treated as base64 and decoded to
raw bytes before writing, so binary payloads round-trip byte-identical.

Interface:
- Writes: shared[\"path\"]: string
- Writes: shared[\"bytes_written\"]: int
- Params: path: string
- Params: content: string   # default \"\", stdin if piped
- Params: content_is_binary: bool   # default false
- Params: mkdirs: bool   # default true
- Actions: default (file written)
";

/// File-writing node; the standard consumer of the binary data contract.
pub struct WriteFileNode;

#[async_trait]
impl Node for WriteFileNode {
    async fn prep(&self, _view: &StoreView<'_>, params: &Value) -> Result<Value> {
        let path = required_str(params, "path", ErrorCategory::File)?;
        let content = optional_str(params, "content", "");
        let is_binary = optional_bool(params, "content_is_binary", false);
        let mkdirs = optional_bool(params, "mkdirs", true);
        Ok(json!({
            "path": path,
            "content": content,
            "is_binary": is_binary,
            "mkdirs": mkdirs,
        }))
    }

    async fn exec(&self, prep: Value, _ctx: &ExecContext) -> Result<Value> {
        let path = prep["path"].as_str().unwrap_or_default().to_string();
        let content = prep["content"].as_str().unwrap_or_default();
        let bytes = if prep["is_binary"].as_bool().unwrap_or(false) {
            binary::decode(content)?
        } else {
            content.as_bytes().to_vec()
        };

        if prep["mkdirs"].as_bool().unwrap_or(true) {
            if let Some(parent) = Path::new(&path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        EngineError::file(format!(
                            "cannot create parent directories for '{path}': {e}"
                        ))
                    })?;
                }
            }
        }

        let size = bytes.len();
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            EngineError::file(format!("cannot write '{path}': {e}"))
                .with_suggestion(format!("check that '{path}' is writable"))
        })?;
        Ok(json!({ "path": path, "bytes_written": size }))
    }

    async fn post(&self, ns: &mut Namespace<'_>, _prep: &Value, exec: Value) -> Result<Action> {
        ns.set("path", exec["path"].clone());
        ns.set("bytes_written", exec["bytes_written"].clone());
        Ok(Action::default_action())
    }
}

pub fn register(registry: &NodeRegistry) -> Result<()> {
    registry.register(
        "write-file",
        "1.0.0",
        INTERFACE,
        Arc::new(FnNodeFactory(|_spec: &NodeSpec, _ctx: &NodeContext| {
            Ok(Arc::new(WriteFileNode) as Arc<dyn Node>)
        })),
    )
}
