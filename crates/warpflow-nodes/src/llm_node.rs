//! Call a language model through the configured client seam.

use crate::util::required_str;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use warpflow::ir::NodeSpec;
use warpflow::llm::{LlmCallRecord, LlmClient};
use warpflow::node::{Action, ExecContext, FnNodeFactory, Node, NodeContext};
use warpflow::{EngineError, ErrorCategory, Namespace, NodeRegistry, Result, StoreView};

const INTERFACE: &str = "\
Send a prompt to the configured language model and store the reply with
usage metadata. The provider is an opaque text-in/text-out seam; which
model answers is decided by the embedding application, not the workflow.

Interface:
- Writes: shared[\"response\"]: string
- Writes: shared[\"model\"]: string
- Writes: shared[\"usage\"]: dict
    - input_tokens: int
    - output_tokens: int
- Params: prompt: string   # stdin if piped
- Params: system: string   # default \"\"
- Actions: default (model replied)
";

/// LLM call node.
pub struct LlmNode {
    client: Arc<dyn LlmClient>,
}

impl LlmNode {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Node for LlmNode {
    async fn prep(&self, _view: &StoreView<'_>, params: &Value) -> Result<Value> {
        let prompt = required_str(params, "prompt", ErrorCategory::Llm)?;
        let system = params
            .get("system")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let full_prompt = if system.is_empty() {
            prompt
        } else {
            format!("{system}\n\n{prompt}")
        };
        Ok(json!({ "prompt": full_prompt }))
    }

    async fn exec(&self, prep: Value, ctx: &ExecContext) -> Result<Value> {
        let prompt = prep["prompt"].as_str().unwrap_or_default();
        let started = Instant::now();
        let response = self.client.complete(prompt).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        ctx.record_llm_call(LlmCallRecord {
            model: response.model.clone(),
            prompt: prompt.to_string(),
            response: response.text.clone(),
            usage: response.usage,
            duration_ms,
        });

        Ok(json!({
            "response": response.text,
            "model": response.model,
            "usage": {
                "input_tokens": response.usage.input_tokens,
                "output_tokens": response.usage.output_tokens,
            },
        }))
    }

    async fn post(&self, ns: &mut Namespace<'_>, _prep: &Value, exec: Value) -> Result<Action> {
        ns.set("response", exec["response"].clone());
        ns.set("model", exec["model"].clone());
        ns.set("usage", exec["usage"].clone());
        Ok(Action::default_action())
    }

    async fn exec_fallback(
        &self,
        _prep: Value,
        error: EngineError,
        _ctx: &ExecContext,
    ) -> Result<Value> {
        Err(match error.suggestion {
            Some(_) => error,
            None => error
                .with_suggestion("check the model configuration and provider availability".to_string()),
        })
    }
}

pub fn register(registry: &NodeRegistry) -> Result<()> {
    registry.register(
        "llm",
        "1.0.0",
        INTERFACE,
        Arc::new(FnNodeFactory(|_spec: &NodeSpec, ctx: &NodeContext| {
            let client = ctx.llm.clone().ok_or_else(|| {
                EngineError::llm("no LLM client is configured")
                    .with_fixable(true)
                    .with_suggestion(
                        "construct the executor with an LlmClient in its NodeContext".to_string(),
                    )
            })?;
            Ok(Arc::new(LlmNode::new(client)) as Arc<dyn Node>)
        })),
    )
}
