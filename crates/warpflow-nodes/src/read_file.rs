//! Read a file from disk into shared state.

use crate::util::required_str;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use warpflow::binary;
use warpflow::ir::NodeSpec;
use warpflow::node::{Action, ExecContext, FnNodeFactory, Node, NodeContext};
use warpflow::{
    EngineError, ErrorCategory, Namespace, NodeRegistry, Result, StoreView,
};

const INTERFACE: &str = "\
Read a file from disk. Text files land as plain strings; anything that is
not valid UTF-8 is base64-encoded with the binary flag set.

Interface:
- Writes: shared[\"content\"]: string | bytes
- Writes: shared[\"content_is_binary\"]: bool
- Writes: shared[\"path\"]: string
- Writes: shared[\"size\"]: int
- Params: path: string
- Actions: default (file read)
";

/// File-reading node.
pub struct ReadFileNode;

#[async_trait]
impl Node for ReadFileNode {
    async fn prep(&self, _view: &StoreView<'_>, params: &Value) -> Result<Value> {
        let path = required_str(params, "path", ErrorCategory::File)?;
        Ok(json!({ "path": path }))
    }

    async fn exec(&self, prep: Value, _ctx: &ExecContext) -> Result<Value> {
        let path = prep["path"].as_str().unwrap_or_default().to_string();
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            EngineError::file(format!("cannot read '{path}': {e}"))
                .with_suggestion(format!("check that '{path}' exists and is readable"))
        })?;
        let size = bytes.len();
        match String::from_utf8(bytes) {
            Ok(text) => Ok(json!({
                "path": path,
                "content": text,
                "is_binary": false,
                "size": size,
            })),
            Err(err) => Ok(json!({
                "path": path,
                "content": binary::encode(err.as_bytes()),
                "is_binary": true,
                "size": size,
            })),
        }
    }

    async fn post(&self, ns: &mut Namespace<'_>, _prep: &Value, exec: Value) -> Result<Action> {
        let is_binary = exec["is_binary"].as_bool().unwrap_or(false);
        ns.set("content", exec["content"].clone());
        ns.set("content_is_binary", Value::Bool(is_binary));
        ns.set("path", exec["path"].clone());
        ns.set("size", exec["size"].clone());
        Ok(Action::default_action())
    }

    async fn exec_fallback(
        &self,
        prep: Value,
        error: EngineError,
        _ctx: &ExecContext,
    ) -> Result<Value> {
        let path = prep["path"].as_str().unwrap_or_default();
        Err(match error.suggestion {
            Some(_) => error,
            None => error.with_suggestion(format!("check the path '{path}'")),
        })
    }
}

pub fn register(registry: &NodeRegistry) -> Result<()> {
    registry.register(
        "read-file",
        "1.0.0",
        INTERFACE,
        Arc::new(FnNodeFactory(|_spec: &NodeSpec, _ctx: &NodeContext| {
            Ok(Arc::new(ReadFileNode) as Arc<dyn Node>)
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use warpflow::SharedStore;

    async fn run(params: Value) -> Result<(SharedStore, Action)> {
        let mut store = SharedStore::new();
        let node = ReadFileNode;
        let ctx = ExecContext::new("t", "read");
        let view_prep = {
            let view = store.view();
            node.prep(&view, &params).await?
        };
        let exec = node.exec(view_prep.clone(), &ctx).await?;
        let action = {
            let mut ns = store.namespace("read");
            node.post(&mut ns, &view_prep, exec).await?
        };
        Ok((store, action))
    }

    #[tokio::test]
    async fn test_reads_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "hello warp").unwrap();

        let (store, action) = run(json!({"path": path.to_string_lossy()})).await.unwrap();
        assert_eq!(action, Action::default_action());
        let outputs = store.node_outputs("read").unwrap();
        assert_eq!(outputs["content"], json!("hello warp"));
        assert_eq!(outputs["content_is_binary"], json!(false));
        assert_eq!(outputs["size"], json!(10));
    }

    #[tokio::test]
    async fn test_reads_binary_file_with_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let payload = vec![0u8, 159, 146, 150, 255];
        std::fs::write(&path, &payload).unwrap();

        let (store, _) = run(json!({"path": path.to_string_lossy()})).await.unwrap();
        let outputs = store.node_outputs("read").unwrap();
        assert_eq!(outputs["content_is_binary"], json!(true));
        let decoded = binary::decode(outputs["content"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_missing_file_raises_file_error() {
        let err = run(json!({"path": "/nonexistent/really/not"}))
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::File);
        assert!(err.suggestion.is_some());
    }

    #[tokio::test]
    async fn test_missing_path_param() {
        let err = run(json!({})).await.unwrap_err();
        assert!(err.message.contains("'path'"));
    }

    #[test]
    fn test_interface_parses() {
        let iface = warpflow::Interface::parse(INTERFACE).unwrap();
        assert!(iface.param("path").unwrap().is_required());
        assert!(iface.covers_write_path(&["content"]));
    }
}
