//! Synthetic node registration
//!
//! Every tool a configured server advertises becomes a first-class
//! registry node named `tool-<server>-<tool>`. The interface's params come
//! from the tool's JSON input schema (best-effort mapping into the closed
//! type set); the writes contract is fixed: `result` holds the tool's
//! structured return verbatim, `error` the semantic failure message, plus
//! the server's configured convenience alias mirroring `result`.

use crate::client::{ToolCallResult, ToolDescriptor, ToolProtoClient};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use warpflow::interface::{ActionSpec, Interface, ParamSpec, ValueType, WriteNode};
use warpflow::ir::NodeSpec;
use warpflow::node::{Action, ExecContext, Node, NodeContext, NodeFactory};
use warpflow::{Namespace, NodeRegistry, Result, StoreView};

/// Default call timeout when the node spec sets none; the wrapper's
/// per-node timeout still applies on top.
const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Map a JSON-schema type name into the closed interface type set.
fn map_schema_type(schema_type: Option<&str>) -> ValueType {
    match schema_type {
        Some("integer") => ValueType::Int,
        Some("number") => ValueType::Float,
        Some("boolean") => ValueType::Bool,
        Some("object") => ValueType::Dict,
        Some("array") => ValueType::List,
        // Strings, unknowns and missing types all land on string: tool
        // arguments are serialized anyway.
        _ => ValueType::String,
    }
}

/// Derive the synthetic interface for one tool.
pub fn tool_interface(descriptor: &ToolDescriptor, result_alias: Option<&str>) -> Interface {
    let mut params = Vec::new();
    let properties = descriptor
        .input_schema
        .get("properties")
        .and_then(Value::as_object);
    let required: Vec<&str> = descriptor
        .input_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if let Some(properties) = properties {
        for (name, prop) in properties {
            let value_type = map_schema_type(prop.get("type").and_then(Value::as_str));
            params.push(ParamSpec {
                name: name.clone(),
                value_type,
                default: (!required.contains(&name.as_str())).then_some(Value::Null),
                stdin: false,
            });
        }
    }

    let mut writes = std::collections::BTreeMap::new();
    writes.insert("result".to_string(), WriteNode::leaf(ValueType::Dict));
    writes.insert("error".to_string(), WriteNode::leaf(ValueType::String));
    if let Some(alias) = result_alias {
        writes.insert(alias.to_string(), WriteNode::leaf(ValueType::Dict));
    }

    Interface {
        description: descriptor.description.clone(),
        reads: Vec::new(),
        writes,
        params,
        actions: vec![
            ActionSpec {
                name: "default".to_string(),
                when: Some("tool succeeded".to_string()),
            },
            ActionSpec {
                name: "error".to_string(),
                when: Some("tool reported a semantic error".to_string()),
            },
        ],
    }
}

/// The synthetic node routing calls to an external tool.
pub struct ToolProtoNode {
    client: Arc<ToolProtoClient>,
    server: String,
    tool: String,
    result_alias: Option<String>,
}

#[async_trait]
impl Node for ToolProtoNode {
    async fn prep(&self, _view: &StoreView<'_>, params: &Value) -> Result<Value> {
        // The resolved params object is the tool's argument object.
        Ok(params.clone())
    }

    async fn exec(&self, prep: Value, _ctx: &ExecContext) -> Result<Value> {
        let outcome = self
            .client
            .call(&self.server, &self.tool, prep, TOOL_CALL_TIMEOUT)
            .await?;
        Ok(call_result_to_value(outcome))
    }

    async fn post(&self, ns: &mut Namespace<'_>, _prep: &Value, exec: Value) -> Result<Action> {
        let result = exec.get("result").cloned().unwrap_or(Value::Null);
        ns.set("result", result.clone());
        if let Some(alias) = &self.result_alias {
            ns.set(alias.clone(), result);
        }
        if let Some(warnings) = exec.get("warnings").and_then(Value::as_array) {
            for warning in warnings.iter().filter_map(Value::as_str) {
                ns.push_warning(format!(
                    "tool '{}' on '{}': {warning}",
                    self.tool, self.server
                ));
            }
        }
        match exec.get("error").and_then(Value::as_str) {
            Some(message) => {
                ns.set("error", Value::String(message.to_string()));
                Ok(Action::error_action())
            }
            None => Ok(Action::default_action()),
        }
    }
}

fn call_result_to_value(outcome: ToolCallResult) -> Value {
    let mut map = Map::new();
    map.insert("result".to_string(), outcome.result);
    map.insert(
        "warnings".to_string(),
        Value::Array(outcome.warnings.into_iter().map(Value::String).collect()),
    );
    if let Some(error) = outcome.error {
        map.insert("error".to_string(), Value::String(error));
    }
    Value::Object(map)
}

struct ToolProtoFactory {
    client: Arc<ToolProtoClient>,
    server: String,
    tool: String,
    result_alias: Option<String>,
}

impl NodeFactory for ToolProtoFactory {
    fn create(&self, _spec: &NodeSpec, _ctx: &NodeContext) -> Result<Arc<dyn Node>> {
        Ok(Arc::new(ToolProtoNode {
            client: Arc::clone(&self.client),
            server: self.server.clone(),
            tool: self.tool.clone(),
            result_alias: self.result_alias.clone(),
        }))
    }
}

/// Registry name of a synthetic tool node.
pub fn synthetic_name(server: &str, tool: &str) -> String {
    format!("tool-{}-{}", sanitize(server), sanitize(tool))
}

fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

/// Register every discovered tool as a synthetic node.
///
/// The registry version is derived from the config hash prefix so a
/// configuration change invalidates cached outputs of synthetic nodes.
pub fn register_tools(
    registry: &NodeRegistry,
    client: &Arc<ToolProtoClient>,
    tools: &std::collections::BTreeMap<String, Vec<ToolDescriptor>>,
    version: &str,
) -> Result<usize> {
    let mut registered = 0usize;
    for (server, descriptors) in tools {
        let alias = client
            .server_config(server)
            .and_then(|config| config.result_alias())
            .map(ToString::to_string);
        for descriptor in descriptors {
            let name = synthetic_name(server, &descriptor.name);
            let interface = tool_interface(descriptor, alias.as_deref());
            registry.register_synthetic(
                &name,
                version,
                interface,
                Arc::new(ToolProtoFactory {
                    client: Arc::clone(client),
                    server: server.clone(),
                    tool: descriptor.name.clone(),
                    result_alias: alias.clone(),
                }),
            )?;
            registered += 1;
        }
    }
    tracing::info!(registered, "synthetic tool nodes registered");
    Ok(registered)
}
