//! Per-execution tracing and aggregate metrics
//!
//! Every node run is captured as a [`NodeEvent`] with timings, filtered and
//! truncated before/after store snapshots, the mutation set, and any LLM
//! calls. One JSON artifact is written per execution; the derived debug
//! Markdown lives in [`crate::debug_report`].
//!
//! Truncation limits come from the environment (`PROMPT_MAX`,
//! `RESPONSE_MAX`, `STORE_MAX`, `DICT_MAX`, `LLM_CALLS_MAX`) and the
//! filter+truncate pass is idempotent: applying it twice yields the value
//! the first pass produced.

use crate::binary;
use crate::config::EngineConfig;
use crate::llm::{LlmCallRecord, LlmUsage};
use crate::store::{MutationSet, EXECUTION_KEY};
use crate::template::Resolution;
use crate::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Marker appended to truncated strings.
pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// Marker key inserted into truncated dicts.
pub const TRUNCATED_DICT_KEY: &str = "…truncated";

/// Terminal status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalStatus {
    /// Every node ran, non-error actions only, zero warnings
    Success,
    /// Every node ran but warnings, stderr output or binary-suspicious
    /// values were observed
    Degraded,
    /// A node failed after retries and fallbacks, or validation failed
    Failed,
}

impl std::fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinalStatus::Success => f.write_str("success"),
            FinalStatus::Degraded => f.write_str("degraded"),
            FinalStatus::Failed => f.write_str("failed"),
        }
    }
}

/// One node execution as recorded in the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEvent {
    pub node_id: String,
    pub node_type: String,
    pub duration_ms: u64,
    pub success: bool,
    /// Filtered + truncated snapshot before the node ran
    pub shared_before: Value,
    /// Filtered + truncated snapshot after the node ran
    pub shared_after: Value,
    pub mutations: MutationSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_call: Option<LlmCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_resolutions: Option<Vec<Resolution>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_stderr: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    /// Replayed from the iteration cache instead of executed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::EngineError>,
}

/// Aggregated LLM usage across the execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmSummary {
    pub calls: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub models: Vec<String>,
}

/// Aggregate counters embedded in the trace artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub nodes_run: usize,
    pub nodes_cached: usize,
    pub retries_total: u64,
    pub warnings_total: usize,
}

/// The complete per-execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub execution_id: String,
    pub workflow_name: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_ms: u64,
    pub final_status: FinalStatus,
    pub nodes: Vec<NodeEvent>,
    pub llm_summary: LlmSummary,
    pub warnings: Vec<String>,
    pub metrics: ExecutionMetrics,
    /// The `__execution__` checkpoint at termination, for external resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::EngineError>,
}

impl ExecutionTrace {
    /// Recompute the LLM summary from recorded node events.
    pub fn summarize_llm(&mut self) {
        let mut summary = LlmSummary::default();
        for event in &self.nodes {
            if let Some(call) = &event.llm_call {
                summary.calls += 1;
                summary.input_tokens += call.usage.input_tokens;
                summary.output_tokens += call.usage.output_tokens;
                if !summary.models.contains(&call.model) {
                    summary.models.push(call.model.clone());
                }
            }
        }
        self.llm_summary = summary;
    }
}

/// Collects node events while an execution runs.
#[derive(Default)]
pub struct TraceCollector {
    events: Mutex<Vec<NodeEvent>>,
    llm_calls_recorded: Mutex<usize>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one node event, enforcing the per-trace LLM call cap.
    pub fn record(&self, mut event: NodeEvent, config: &EngineConfig) {
        if event.llm_call.is_some() {
            let mut count = self.llm_calls_recorded.lock();
            if *count >= config.llm_calls_max {
                event.llm_call = None;
            } else {
                *count += 1;
            }
        }
        tracing::debug!(
            node_id = %event.node_id,
            node_type = %event.node_type,
            duration_ms = event.duration_ms,
            success = event.success,
            cached = event.cached,
            "node event recorded"
        );
        self.events.lock().push(event);
    }

    pub fn take_events(&self) -> Vec<NodeEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

/// Filter and truncate a store snapshot for inclusion in a trace.
///
/// Removes the bulky `__execution__` checkpoint (it is recorded once at the
/// trace top level), redacts values flagged binary, truncates long strings
/// to `store_max` characters and wide dicts to `dict_max` entries. The pass
/// is idempotent under repeated application.
pub fn filter_snapshot(snapshot: &Value, config: &EngineConfig) -> Value {
    match snapshot {
        Value::Object(map) => {
            let mut filtered = Map::new();
            for (key, value) in map {
                if key == EXECUTION_KEY {
                    continue;
                }
                filtered.insert(key.clone(), truncate_value(value, map, key, config));
            }
            Value::Object(filtered)
        }
        other => truncate_value(other, &Map::new(), "", config),
    }
}

fn truncate_value(
    value: &Value,
    siblings: &Map<String, Value>,
    key: &str,
    config: &EngineConfig,
) -> Value {
    // Binary payloads are redacted, never truncated: a truncated base64
    // string would decode to garbage and invite confusion.
    if let Value::String(s) = value {
        if binary::is_marked_binary(siblings, key) {
            if s.starts_with("<binary data:") {
                return value.clone();
            }
            return Value::String(binary::redacted(s.len()));
        }
        return Value::String(truncate_string(s, config.store_max));
    }
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            let already_truncated = map.contains_key(TRUNCATED_DICT_KEY);
            for (i, (k, v)) in map.iter().enumerate() {
                if !already_truncated && i >= config.dict_max {
                    out.insert(
                        TRUNCATED_DICT_KEY.to_string(),
                        Value::String(format!("{} more entries", map.len() - config.dict_max)),
                    );
                    break;
                }
                out.insert(k.clone(), truncate_value(v, map, k, config));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| truncate_value(v, &Map::new(), "", config))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Truncate a string to `max` characters, idempotently.
pub fn truncate_string(text: &str, max: usize) -> String {
    if text.chars().count() <= max
        || (text.ends_with(TRUNCATION_MARKER)
            && text.chars().count() <= max + TRUNCATION_MARKER.chars().count())
    {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{head}{TRUNCATION_MARKER}")
}

/// Truncate an LLM call record to the prompt/response limits.
pub fn truncate_llm_call(call: &LlmCallRecord, config: &EngineConfig) -> LlmCallRecord {
    LlmCallRecord {
        model: call.model.clone(),
        prompt: truncate_string(&call.prompt, config.prompt_max),
        response: truncate_string(&call.response, config.response_max),
        usage: call.usage,
        duration_ms: call.duration_ms,
    }
}

/// Merge several call records into the single per-node trace slot, keeping
/// the first prompt/response and summing usage.
pub fn merge_llm_calls(calls: Vec<LlmCallRecord>, config: &EngineConfig) -> Option<LlmCallRecord> {
    let mut iter = calls.into_iter();
    let first = iter.next()?;
    let mut merged = truncate_llm_call(&first, config);
    for call in iter {
        merged.usage = LlmUsage {
            input_tokens: merged.usage.input_tokens + call.usage.input_tokens,
            output_tokens: merged.usage.output_tokens + call.usage.output_tokens,
        };
        merged.duration_ms += call.duration_ms;
    }
    Some(merged)
}

/// File name of a trace artifact: `workflow-trace-<name>-<YYYYMMDD-HHMMSS>.json`.
pub fn trace_file_name(workflow_name: &str, timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    format!(
        "workflow-trace-{workflow_name}-{}.json",
        timestamp.format("%Y%m%d-%H%M%S")
    )
}

/// Write a trace artifact to the debug directory, returning its path.
///
/// If a file for the same second already exists, the execution id
/// disambiguates the name rather than overwriting a prior trace.
pub fn write_trace(trace: &ExecutionTrace, debug_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(debug_dir)?;
    let timestamp = chrono::DateTime::parse_from_rfc3339(&trace.start_time)
        .map(|t| t.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now());
    let mut path = debug_dir.join(trace_file_name(&trace.workflow_name, &timestamp));
    if path.exists() {
        let short_id: String = trace.execution_id.chars().take(8).collect();
        path = debug_dir.join(format!(
            "workflow-trace-{}-{}-{short_id}.json",
            trace.workflow_name,
            timestamp.format("%Y%m%d-%H%M%S")
        ));
    }
    let text = serde_json::to_string_pretty(trace)
        .map_err(|e| crate::EngineError::internal(format!("trace serialization failed: {e}")))?;
    std::fs::write(&path, text)?;
    tracing::info!(path = %path.display(), status = %trace.final_status, "trace written");
    Ok(path)
}
