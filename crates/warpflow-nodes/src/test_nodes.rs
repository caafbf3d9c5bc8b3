//! Test-only nodes, registered behind `INCLUDE_TEST_NODES`.
//!
//! `echo` writes its resolved params back verbatim; `fail-n-times` fails a
//! configured number of exec attempts before succeeding. Both exist so
//! executor, batch and cache behavior can be exercised without touching
//! disk, network or a model.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use warpflow::ir::NodeSpec;
use warpflow::node::{Action, ExecContext, FnNodeFactory, Node, NodeContext};
use warpflow::{EngineError, Namespace, NodeRegistry, Result, StoreView};

const ECHO_INTERFACE: &str = "\
Write every resolved param verbatim into this node's namespace.

Interface:
- Params: value: string   # default \"\"
- Actions: default
";

const FAIL_INTERFACE: &str = "\
Fail the first N exec attempts with a retryable error, then succeed.

Interface:
- Writes: shared[\"attempts\"]: int
- Params: fails: int   # default 1
- Actions: default (after N failures)
";

/// Echoes resolved params into its own namespace.
pub struct EchoNode;

#[async_trait]
impl Node for EchoNode {
    async fn prep(&self, _view: &StoreView<'_>, params: &Value) -> Result<Value> {
        Ok(params.clone())
    }

    async fn exec(&self, prep: Value, _ctx: &ExecContext) -> Result<Value> {
        Ok(prep)
    }

    async fn post(&self, ns: &mut Namespace<'_>, _prep: &Value, exec: Value) -> Result<Action> {
        if let Value::Object(map) = exec {
            for (key, value) in map {
                ns.set(key, value);
            }
        }
        Ok(Action::default_action())
    }
}

/// Fails deterministically, then recovers.
pub struct FailNTimesNode {
    fails: u64,
    attempts: AtomicU64,
}

#[async_trait]
impl Node for FailNTimesNode {
    async fn prep(&self, _view: &StoreView<'_>, params: &Value) -> Result<Value> {
        Ok(params.clone())
    }

    async fn exec(&self, _prep: Value, _ctx: &ExecContext) -> Result<Value> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fails {
            Err(EngineError::http(format!(
                "scripted failure {attempt} of {}",
                self.fails
            )))
        } else {
            Ok(json!({ "attempts": attempt }))
        }
    }

    async fn post(&self, ns: &mut Namespace<'_>, _prep: &Value, exec: Value) -> Result<Action> {
        ns.set("attempts", exec["attempts"].clone());
        Ok(Action::default_action())
    }
}

pub fn register(registry: &NodeRegistry) -> Result<()> {
    registry.register(
        "echo",
        "1.0.0",
        ECHO_INTERFACE,
        Arc::new(FnNodeFactory(|_spec: &NodeSpec, _ctx: &NodeContext| {
            Ok(Arc::new(EchoNode) as Arc<dyn Node>)
        })),
    )?;
    registry.register(
        "fail-n-times",
        "1.0.0",
        FAIL_INTERFACE,
        Arc::new(FnNodeFactory(|spec: &NodeSpec, _ctx: &NodeContext| {
            let fails = spec
                .params
                .get("fails")
                .and_then(Value::as_u64)
                .unwrap_or(1);
            Ok(Arc::new(FailNTimesNode {
                fails,
                attempts: AtomicU64::new(0),
            }) as Arc<dyn Node>)
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use warpflow::SharedStore;

    #[tokio::test]
    async fn test_echo_writes_params_verbatim() {
        let node = EchoNode;
        let mut store = SharedStore::new();
        let ctx = ExecContext::new("t", "e");
        let params = json!({"item": "a", "n": 3});
        let prep = {
            let view = store.view();
            node.prep(&view, &params).await.unwrap()
        };
        let exec = node.exec(prep.clone(), &ctx).await.unwrap();
        let mut ns = store.namespace("e");
        node.post(&mut ns, &prep, exec).await.unwrap();
        drop(ns);
        let outputs = store.node_outputs("e").unwrap();
        assert_eq!(outputs["item"], json!("a"));
        assert_eq!(outputs["n"], json!(3));
    }

    #[tokio::test]
    async fn test_fail_n_times_recovers() {
        let node = FailNTimesNode {
            fails: 2,
            attempts: AtomicU64::new(0),
        };
        let ctx = ExecContext::new("t", "f");
        assert!(node.exec(json!({}), &ctx).await.is_err());
        assert!(node.exec(json!({}), &ctx).await.is_err());
        let exec = node.exec(json!({}), &ctx).await.unwrap();
        assert_eq!(exec["attempts"], json!(3));
    }
}
