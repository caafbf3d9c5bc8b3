//! Markdown-with-frontmatter workflow serialization
//!
//! The second on-disk form of the IR: YAML frontmatter carries metadata,
//! inputs and outputs; the body carries one `## node: <id>` section per
//! node with its settings, a fenced JSON params block, an optional fenced
//! JSON batch block, and `-> action: target` edge lines.
//!
//! Round-trips losslessly through [`crate::ir::Workflow`] modulo
//! insignificant whitespace; edges are normalized to node-section order.
//!
//! ```markdown
//! ---
//! name: fetch-and-save
//! ---
//!
//! ## node: fetch
//!
//! - type: http
//! - retries: 2
//!
//! ```json
//! { "url": "${inputs.url}" }
//! ```
//!
//! -> default: save
//! -> error: notify
//! ```

use crate::ir::{BatchSpec, EdgeSpec, InputSpec, NodeSpec, Workflow};
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Frontmatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_node: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    inputs: BTreeMap<String, InputSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<String>,
}

/// Serialize a workflow to the Markdown form.
pub fn to_markdown(workflow: &Workflow) -> Result<String> {
    let frontmatter = Frontmatter {
        name: workflow.name.clone(),
        version: workflow.version.clone(),
        description: workflow.description.clone(),
        start_node: workflow.start_node.clone(),
        inputs: workflow.inputs.clone(),
        outputs: workflow.outputs.clone(),
    };
    let yaml = serde_yml::to_string(&frontmatter)
        .map_err(|e| EngineError::internal(format!("frontmatter serialization failed: {e}")))?;

    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&yaml);
    out.push_str("---\n");

    for node in &workflow.nodes {
        out.push('\n');
        out.push_str(&format!("## node: {}\n\n", node.id));
        out.push_str(&format!("- type: {}\n", node.node_type));
        if node.retries > 0 {
            out.push_str(&format!("- retries: {}\n", node.retries));
        }
        if node.wait_ms > 0 {
            out.push_str(&format!("- wait_ms: {}\n", node.wait_ms));
        }
        if let Some(timeout_ms) = node.timeout_ms {
            out.push_str(&format!("- timeout_ms: {timeout_ms}\n"));
        }

        if !node.params.is_empty() {
            let params = serde_json::to_string_pretty(&Value::Object(node.params.clone()))
                .map_err(|e| EngineError::internal(format!("params serialization failed: {e}")))?;
            out.push('\n');
            out.push_str("```json\n");
            out.push_str(&params);
            out.push_str("\n```\n");
        }

        if let Some(batch) = &node.batch {
            let rendered = serde_json::to_string_pretty(&batch)
                .map_err(|e| EngineError::internal(format!("batch serialization failed: {e}")))?;
            out.push('\n');
            out.push_str("```json batch\n");
            out.push_str(&rendered);
            out.push_str("\n```\n");
        }

        let outgoing: Vec<&EdgeSpec> = workflow
            .edges
            .iter()
            .filter(|edge| edge.from == node.id)
            .collect();
        if !outgoing.is_empty() {
            out.push('\n');
            for edge in outgoing {
                out.push_str(&format!("-> {}: {}\n", edge.action, edge.to));
            }
        }
    }

    Ok(out)
}

/// Parse the Markdown form back into a workflow.
pub fn from_markdown(text: &str) -> Result<Workflow> {
    let (frontmatter_text, body) = split_frontmatter(text)?;
    let frontmatter: Frontmatter = serde_yml::from_str(frontmatter_text)
        .map_err(|e| EngineError::validation(format!("invalid workflow frontmatter: {e}")))?;

    let mut nodes: Vec<NodeSpec> = Vec::new();
    let mut edges: Vec<EdgeSpec> = Vec::new();

    let mut lines = body.lines().peekable();
    while let Some(line) = lines.next() {
        let Some(id) = line.trim().strip_prefix("## node:") else {
            if !line.trim().is_empty() && !line.trim().starts_with("<!--") {
                // Prose outside node sections is tolerated (it reads as
                // documentation), but anything shaped like a directive is
                // probably a mistake worth failing loudly on.
                if line.trim().starts_with("->") || line.trim().starts_with("```") {
                    return Err(EngineError::validation(format!(
                        "workflow markdown has a directive outside any node section: '{}'",
                        line.trim()
                    )));
                }
            }
            continue;
        };
        let id = id.trim().to_string();
        if id.is_empty() {
            return Err(EngineError::validation("node section with empty id"));
        }

        let mut node = NodeSpec {
            id,
            node_type: String::new(),
            params: serde_json::Map::new(),
            retries: 0,
            wait_ms: 0,
            timeout_ms: None,
            batch: None,
        };

        // Consume the section until the next node heading.
        while let Some(peeked) = lines.peek() {
            if peeked.trim().starts_with("## node:") {
                break;
            }
            #[allow(clippy::expect_used)]
            let line = lines.next().expect("peeked");
            let trimmed = line.trim();

            if let Some(setting) = trimmed.strip_prefix("- ") {
                let (key, value) = setting.split_once(':').ok_or_else(|| {
                    EngineError::validation(format!(
                        "node '{}': malformed setting line '{trimmed}'",
                        node.id
                    ))
                })?;
                let value = value.trim();
                match key.trim() {
                    "type" => node.node_type = value.to_string(),
                    "retries" => {
                        node.retries = value.parse().map_err(|_| {
                            EngineError::validation(format!(
                                "node '{}': retries must be an integer, got '{value}'",
                                node.id
                            ))
                        })?;
                    }
                    "wait_ms" => {
                        node.wait_ms = value.parse().map_err(|_| {
                            EngineError::validation(format!(
                                "node '{}': wait_ms must be an integer, got '{value}'",
                                node.id
                            ))
                        })?;
                    }
                    "timeout_ms" => {
                        node.timeout_ms = Some(value.parse().map_err(|_| {
                            EngineError::validation(format!(
                                "node '{}': timeout_ms must be an integer, got '{value}'",
                                node.id
                            ))
                        })?);
                    }
                    other => {
                        return Err(EngineError::validation(format!(
                            "node '{}': unknown setting '{other}'",
                            node.id
                        )));
                    }
                }
            } else if let Some(fence) = trimmed.strip_prefix("```") {
                let kind = fence.trim();
                let mut block = String::new();
                for fenced in lines.by_ref() {
                    if fenced.trim() == "```" {
                        break;
                    }
                    block.push_str(fenced);
                    block.push('\n');
                }
                match kind {
                    "json" | "json params" => {
                        let value: Value = serde_json::from_str(&block).map_err(|e| {
                            EngineError::validation(format!(
                                "node '{}': params block is not valid JSON: {e}",
                                node.id
                            ))
                        })?;
                        node.params = value.as_object().cloned().ok_or_else(|| {
                            EngineError::validation(format!(
                                "node '{}': params block must be a JSON object",
                                node.id
                            ))
                        })?;
                    }
                    "json batch" => {
                        let batch: BatchSpec = serde_json::from_str(&block).map_err(|e| {
                            EngineError::validation(format!(
                                "node '{}': batch block is not valid JSON: {e}",
                                node.id
                            ))
                        })?;
                        node.batch = Some(batch);
                    }
                    other => {
                        return Err(EngineError::validation(format!(
                            "node '{}': unknown fenced block kind '{other}'",
                            node.id
                        )));
                    }
                }
            } else if let Some(edge_text) = trimmed.strip_prefix("->") {
                let (action, target) = edge_text.split_once(':').ok_or_else(|| {
                    EngineError::validation(format!(
                        "node '{}': malformed edge line '{trimmed}' (expected '-> action: target')",
                        node.id
                    ))
                })?;
                edges.push(EdgeSpec {
                    from: node.id.clone(),
                    to: target.trim().to_string(),
                    action: action.trim().to_string(),
                });
            } else if !trimmed.is_empty() {
                return Err(EngineError::validation(format!(
                    "node '{}': unexpected line '{trimmed}'",
                    node.id
                )));
            }
        }

        if node.node_type.is_empty() {
            return Err(EngineError::validation(format!(
                "node '{}' has no '- type:' setting",
                node.id
            )));
        }
        nodes.push(node);
    }

    Ok(Workflow {
        name: frontmatter.name,
        version: frontmatter.version,
        description: frontmatter.description,
        nodes,
        edges,
        start_node: frontmatter.start_node,
        inputs: frontmatter.inputs,
        outputs: frontmatter.outputs,
    })
}

fn split_frontmatter(text: &str) -> Result<(&str, &str)> {
    let rest = text.strip_prefix("---\n").ok_or_else(|| {
        EngineError::validation("workflow markdown must start with '---' frontmatter")
    })?;
    let end = rest.find("\n---").ok_or_else(|| {
        EngineError::validation("workflow markdown frontmatter is not terminated by '---'")
    })?;
    let frontmatter = &rest[..end + 1];
    let body = rest[end + 4..].strip_prefix('\n').unwrap_or(&rest[end + 4..]);
    Ok((frontmatter, body))
}
