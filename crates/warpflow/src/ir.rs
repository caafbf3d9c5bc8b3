//! Workflow intermediate representation
//!
//! The IR is a JSON-shaped, immutable document: an ordered list of node
//! specs, an ordered list of action-labeled edges, optional workflow-level
//! inputs and surfaced outputs, and metadata. It is authored by humans or
//! agents, validated once, then compiled per execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Action name followed when a node's `post` phase returns no explicit action.
pub const DEFAULT_ACTION: &str = "default";

/// Conventional action emitted for semantic non-success (HTTP 4xx/5xx,
/// shell exit != 0, tool-protocol semantic errors).
pub const ERROR_ACTION: &str = "error";

fn default_action() -> String {
    DEFAULT_ACTION.to_string()
}

fn default_batch_concurrency() -> usize {
    4
}

/// A complete workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name, used for trace and cache file naming
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Free-form version string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Human/agent readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Ordered node specs; the first is the default start node
    pub nodes: Vec<NodeSpec>,

    /// Ordered action-labeled edges
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,

    /// Explicit start node id; defaults to the first node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_node: Option<String>,

    /// Named workflow-level inputs, seeded at the store root
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, InputSpec>,

    /// Paths into shared state surfaced at completion (e.g. `"save.path"`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
}

impl Workflow {
    /// Parse a workflow from its JSON serialization.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            crate::EngineError::validation(format!("workflow document is not valid IR: {e}"))
        })
    }

    /// Serialize to pretty JSON. `Workflow → JSON → Workflow` is the identity.
    pub fn to_json(&self) -> String {
        // Workflow contains no map keys that can fail to serialize.
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// The effective start node id.
    pub fn start_node_id(&self) -> Option<&str> {
        self.start_node
            .as_deref()
            .or_else(|| self.nodes.first().map(|n| n.id.as_str()))
    }

    /// Workflow name or a placeholder for unnamed documents.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    /// Look up a node spec by id.
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// One node in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique id within the workflow
    pub id: String,

    /// Registry name of the node implementation (kebab-case)
    #[serde(rename = "type")]
    pub node_type: String,

    /// Declared params; string values may contain `${path}` templates
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub params: serde_json::Map<String, Value>,

    /// Extra attempts after the first failure of `exec`
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub retries: u32,

    /// Fixed wait between retry attempts, in milliseconds
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub wait_ms: u64,

    /// Per-node `exec` timeout in milliseconds; network nodes default to 30s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Fan this node out over a collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchSpec>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

/// Batch fan-out declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSpec {
    /// Template or literal list the node iterates over
    pub over: Value,

    /// Max concurrent iterations; results always merge in input order
    #[serde(default = "default_batch_concurrency")]
    pub concurrency: usize,
}

/// A directed, action-labeled edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: String,
    pub to: String,

    /// Action selecting this edge; `"default"` when omitted
    #[serde(default = "default_action")]
    pub action: String,
}

/// A declared workflow-level input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InputSpec {
    /// Declared type from the closed type set
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Value used when the caller supplies none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Callers must supply this input
    #[serde(default)]
    pub required: bool,
}

/// A workflow document that has passed validation.
///
/// Compilation only accepts canonical IR, so an unvalidated document cannot
/// reach the executor by construction.
#[derive(Debug, Clone)]
pub struct CanonicalIr {
    workflow: Workflow,
}

impl CanonicalIr {
    /// Crate-internal: only the validator constructs canonical IR.
    pub(crate) fn new_validated(workflow: Workflow) -> Self {
        Self { workflow }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// The start node id; validation guarantees one exists.
    pub fn start(&self) -> &str {
        self.workflow.start_node_id().unwrap_or_default()
    }
}

impl std::ops::Deref for CanonicalIr {
    type Target = Workflow;

    fn deref(&self) -> &Self::Target {
        &self.workflow
    }
}
