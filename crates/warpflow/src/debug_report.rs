//! Smart debug Markdown
//!
//! A derived, human-oriented view of one trace. The selected sections
//! depend on the final status: failures lead with the failing node, its
//! input envelope and (for template errors) the available fields and
//! nearest matches; successful runs get a thin timeline plus warnings.

use crate::trace::{ExecutionTrace, FinalStatus, NodeEvent};
use crate::{ErrorCategory, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Render the debug Markdown for a trace.
pub fn render(trace: &ExecutionTrace) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Workflow debug: {}", trace.workflow_name);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "- execution: `{}`\n- status: **{}**\n- duration: {} ms\n- nodes: {}",
        trace.execution_id,
        trace.final_status,
        trace.duration_ms,
        trace.nodes.len()
    );
    let _ = writeln!(out);

    match trace.final_status {
        FinalStatus::Failed => render_failure(trace, &mut out),
        _ => render_timeline(trace, &mut out),
    }

    if !trace.warnings.is_empty() {
        let _ = writeln!(out, "## Warnings");
        let _ = writeln!(out);
        for warning in &trace.warnings {
            let _ = writeln!(out, "- {warning}");
        }
        let _ = writeln!(out);
    }

    if trace.llm_summary.calls > 0 {
        let _ = writeln!(out, "## LLM usage");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} call(s), {} input / {} output tokens ({})",
            trace.llm_summary.calls,
            trace.llm_summary.input_tokens,
            trace.llm_summary.output_tokens,
            trace.llm_summary.models.join(", ")
        );
        let _ = writeln!(out);
    }

    out
}

fn render_failure(trace: &ExecutionTrace, out: &mut String) {
    let failing = trace.nodes.iter().find(|event| !event.success);

    let _ = writeln!(out, "## Failure");
    let _ = writeln!(out);

    let error = failing
        .and_then(|event| event.error.as_ref())
        .or(trace.error.as_ref());
    if let Some(error) = error {
        let _ = writeln!(out, "**{}**: {}", error.category, error.message);
        let _ = writeln!(out);
        if let Some(suggestion) = &error.suggestion {
            let _ = writeln!(out, "Suggestion: {suggestion}");
            let _ = writeln!(out);
        }
        if error.category == ErrorCategory::Template {
            if let Some(fields) = &error.available_fields {
                let _ = writeln!(out, "Available fields:");
                let _ = writeln!(out);
                for field in fields {
                    let _ = writeln!(out, "- `{field}`");
                }
                let _ = writeln!(out);
            }
        }
    }

    if let Some(event) = failing {
        let _ = writeln!(out, "### Failing node: `{}` ({})", event.node_id, event.node_type);
        let _ = writeln!(out);
        let _ = writeln!(out, "Input envelope (store before the node ran):");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "```json\n{}\n```",
            serde_json::to_string_pretty(&event.shared_before).unwrap_or_default()
        );
        let _ = writeln!(out);
        if let Some(resolutions) = &event.template_resolutions {
            let _ = writeln!(out, "Template substitutions:");
            let _ = writeln!(out);
            for resolution in resolutions {
                let _ = writeln!(out, "- `{}` → `{}`", resolution.token, resolution.rendered);
            }
            let _ = writeln!(out);
        }
        if let Some(stderr) = &event.stderr {
            if !stderr.is_empty() {
                let _ = writeln!(out, "stderr:");
                let _ = writeln!(out);
                let _ = writeln!(out, "```\n{stderr}\n```");
                let _ = writeln!(out);
            }
        }
    }

    // Context: what ran successfully before the failure.
    let completed: Vec<&NodeEvent> = trace.nodes.iter().take_while(|e| e.success).collect();
    if !completed.is_empty() {
        let _ = writeln!(out, "### Completed before failure");
        let _ = writeln!(out);
        for event in completed {
            let _ = writeln!(out, "- `{}` ({} ms)", event.node_id, event.duration_ms);
        }
        let _ = writeln!(out);
    }
}

fn render_timeline(trace: &ExecutionTrace, out: &mut String) {
    let _ = writeln!(out, "## Timeline");
    let _ = writeln!(out);
    for event in &trace.nodes {
        let mut annotations: Vec<&str> = Vec::new();
        if event.cached {
            annotations.push("cached");
        }
        if event.has_stderr == Some(true) {
            annotations.push("stderr");
        }
        let suffix = if annotations.is_empty() {
            String::new()
        } else {
            format!(" [{}]", annotations.join(", "))
        };
        let _ = writeln!(
            out,
            "- `{}` ({}) — {} ms{suffix}",
            event.node_id, event.node_type, event.duration_ms
        );
    }
    let _ = writeln!(out);
}

/// Write the debug Markdown next to the trace artifact.
///
/// File name mirrors the trace: `workflow-debug-<name>-<timestamp>.md`.
pub fn write_debug_markdown(trace: &ExecutionTrace, debug_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(debug_dir)?;
    let timestamp = chrono::DateTime::parse_from_rfc3339(&trace.start_time)
        .map(|t| t.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now());
    let path = debug_dir.join(format!(
        "workflow-debug-{}-{}.md",
        trace.workflow_name,
        timestamp.format("%Y%m%d-%H%M%S")
    ));
    std::fs::write(&path, render(trace))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MutationSet;
    use crate::trace::{ExecutionMetrics, LlmSummary};
    use crate::EngineError;
    use serde_json::json;

    fn base_trace(status: FinalStatus) -> ExecutionTrace {
        ExecutionTrace {
            execution_id: "exec-1".to_string(),
            workflow_name: "demo".to_string(),
            start_time: "2026-03-04T05:06:07Z".to_string(),
            end_time: "2026-03-04T05:06:08Z".to_string(),
            duration_ms: 1000,
            final_status: status,
            nodes: Vec::new(),
            llm_summary: LlmSummary::default(),
            warnings: Vec::new(),
            metrics: ExecutionMetrics::default(),
            execution_state: None,
            error: None,
        }
    }

    fn event(id: &str, success: bool) -> NodeEvent {
        NodeEvent {
            node_id: id.to_string(),
            node_type: "echo".to_string(),
            duration_ms: 5,
            success,
            shared_before: json!({}),
            shared_after: json!({}),
            mutations: MutationSet::default(),
            llm_call: None,
            template_resolutions: None,
            stderr: None,
            has_stderr: None,
            cancelled: false,
            cached: false,
            error: None,
        }
    }

    #[test]
    fn test_success_renders_timeline() {
        let mut trace = base_trace(FinalStatus::Success);
        trace.nodes.push(event("a", true));
        trace.nodes.push(event("b", true));
        let rendered = render(&trace);
        assert!(rendered.contains("## Timeline"));
        assert!(rendered.contains("`a`"));
        assert!(!rendered.contains("## Failure"));
    }

    #[test]
    fn test_failure_renders_failing_node_and_fields() {
        let mut trace = base_trace(FinalStatus::Failed);
        trace.nodes.push(event("a", true));
        let mut failing = event("b", false);
        failing.error = Some(
            EngineError::template("cannot resolve ${a.result.messages}")
                .with_node("b")
                .with_available_fields(vec!["result.issues".to_string()])
                .with_suggestion("did you mean: result.issues?"),
        );
        trace.nodes.push(failing);
        let rendered = render(&trace);
        assert!(rendered.contains("## Failure"));
        assert!(rendered.contains("Failing node: `b`"));
        assert!(rendered.contains("`result.issues`"));
        assert!(rendered.contains("did you mean"));
        assert!(rendered.contains("Completed before failure"));
    }

    #[test]
    fn test_warnings_always_listed() {
        let mut trace = base_trace(FinalStatus::Degraded);
        trace.warnings.push("stderr was not empty".to_string());
        let rendered = render(&trace);
        assert!(rendered.contains("## Warnings"));
        assert!(rendered.contains("stderr was not empty"));
    }

    #[test]
    fn test_write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let trace = base_trace(FinalStatus::Success);
        let path = write_debug_markdown(&trace, dir.path()).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("workflow-debug-demo-"));
        assert!(path.exists());
    }
}
