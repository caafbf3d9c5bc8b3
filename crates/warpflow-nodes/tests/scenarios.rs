//! End-to-end workflow scenarios through the real executor.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use warpflow::config::EngineConfig;
use warpflow::{
    validate, ExecutionOptions, Executor, FinalStatus, MockLlm, NodeContext, NodeRegistry,
    Workflow,
};
use warpflow_nodes::register_builtin_nodes;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn setup(workspace: &Path) -> (Arc<NodeRegistry>, NodeContext) {
    let config = EngineConfig {
        include_test_nodes: true,
        ..EngineConfig::default()
    }
    .with_workspace_dir(workspace);
    let registry = Arc::new(NodeRegistry::new());
    register_builtin_nodes(&registry, &config).unwrap();
    let node_ctx = NodeContext {
        config,
        llm: Some(Arc::new(MockLlm::new("mock reply"))),
    };
    (registry, node_ctx)
}

fn workflow(value: Value) -> Workflow {
    serde_json::from_value(value).unwrap()
}

async fn run(
    registry: &Arc<NodeRegistry>,
    node_ctx: &NodeContext,
    wf: &Workflow,
    opts: ExecutionOptions,
) -> warpflow::ExecutionReport {
    let ir = validate(wf, registry).unwrap();
    Executor::new(Arc::clone(registry), node_ctx.clone())
        .execute(&ir, opts)
        .await
}

/// S1 — an absent optional input interpolates to the empty string, never
/// the literal "null", so shell commands stay safe.
#[tokio::test]
async fn optional_input_shell_safety() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, node_ctx) = setup(dir.path());

    let wf = workflow(json!({
        "name": "s1",
        "nodes": [
            {"id": "list", "type": "shell", "params": {"command": "echo [${dir}]"}}
        ],
        "inputs": {"dir": {"type": "string"}},
        "outputs": ["list.stdout", "list.exit_code"]
    }));

    let report = run(&registry, &node_ctx, &wf, ExecutionOptions::default()).await;
    assert_eq!(report.final_status, FinalStatus::Success);
    assert_eq!(report.outputs["list.stdout"], json!("[]\n"));
    assert_eq!(report.outputs["list.exit_code"], json!(0));
}

/// S2 — a template naming a path the upstream node never writes fails at
/// validation time with the available paths and a did-you-mean.
#[test]
fn template_precision_error() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _) = setup(dir.path());

    let wf = workflow(json!({
        "nodes": [
            {"id": "fetch", "type": "http", "params": {"url": "https://example.com"}},
            {"id": "save", "type": "write-file",
             "params": {"path": "/tmp/x", "content": "${fetch.result}"}}
        ],
        "edges": [{"from": "fetch", "to": "save"}]
    }));

    let report = validate(&wf, &registry).unwrap_err();
    let err = report.primary().unwrap();
    assert_eq!(err.category, warpflow::ErrorCategory::Template);
    let fields = err.available_fields.as_ref().unwrap();
    assert!(fields.contains(&"response".to_string()));
    assert!(err.suggestion.as_ref().unwrap().contains("response"));
}

/// S3 — an HTTP binary download survives the write-file round trip
/// byte-identical (verified by digest).
#[tokio::test]
async fn http_binary_download_to_write_file() {
    let payload: Vec<u8> = (0u16..=255).flat_map(|b| [b as u8, 0x89, 0x50]).collect();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/image.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(payload.clone())
                .insert_header("content-type", "image/png"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (registry, node_ctx) = setup(dir.path());
    let out_path = dir.path().join("saved.png");

    let wf = workflow(json!({
        "name": "s3",
        "nodes": [
            {"id": "download", "type": "http",
             "params": {"url": format!("{}/image.png", server.uri())}},
            {"id": "save", "type": "write-file",
             "params": {
                 "path": out_path.to_string_lossy(),
                 "content": "${download.response}",
                 "content_is_binary": "${download.response_is_binary}"
             }}
        ],
        "edges": [{"from": "download", "to": "save"}],
        "outputs": ["save.bytes_written"]
    }));

    let report = run(&registry, &node_ctx, &wf, ExecutionOptions::default()).await;
    assert_ne!(report.final_status, FinalStatus::Failed);

    let written = std::fs::read(&out_path).unwrap();
    assert_eq!(
        Sha256::digest(&written),
        Sha256::digest(&payload),
        "round-tripped bytes must be identical"
    );
}

/// S4 — batch fan-out preserves input order, and the tracer records one
/// event per iteration under a suffixed id.
#[tokio::test]
async fn batch_fan_out_ordering() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, node_ctx) = setup(dir.path());

    let wf = workflow(json!({
        "name": "s4",
        "nodes": [{
            "id": "fan",
            "type": "echo",
            "params": {"item": "${item}"},
            "batch": {"over": "${inputs.items}"}
        }],
        "inputs": {"items": {"type": "list", "required": true}},
        "outputs": ["fan"]
    }));

    let opts = ExecutionOptions {
        inputs: json!({"items": ["a", "b", "c"]})
            .as_object()
            .unwrap()
            .clone(),
        ..ExecutionOptions::default()
    };
    let report = run(&registry, &node_ctx, &wf, opts).await;

    assert_eq!(report.final_status, FinalStatus::Success);
    assert_eq!(
        report.outputs["fan"],
        json!([{"item": "a"}, {"item": "b"}, {"item": "c"}])
    );

    let trace: Value =
        serde_json::from_str(&std::fs::read_to_string(report.trace_path.unwrap()).unwrap())
            .unwrap();
    let ids: Vec<&str> = trace["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["node_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["fan[0]", "fan[1]", "fan[2]", "fan"]);
}

/// S5 — a 404 does not raise: the fetch node emits the error action, the
/// error edge routes to notify, summarize never runs, and the run is
/// degraded rather than failed.
#[tokio::test]
async fn action_branching_on_http_404() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (registry, node_ctx) = setup(dir.path());

    let wf = workflow(json!({
        "name": "s5",
        "nodes": [
            {"id": "fetch", "type": "http", "params": {"url": server.uri()}},
            {"id": "summarize", "type": "echo", "params": {"note": "summarized"}},
            {"id": "notify", "type": "echo", "params": {"note": "status ${fetch.status}"}}
        ],
        "edges": [
            {"from": "fetch", "to": "summarize"},
            {"from": "fetch", "to": "notify", "action": "error"}
        ],
        "outputs": ["notify.note", "summarize.note"]
    }));

    let report = run(&registry, &node_ctx, &wf, ExecutionOptions::default()).await;
    assert_eq!(report.final_status, FinalStatus::Degraded);
    assert_eq!(report.outputs["notify.note"], json!("status 404"));
    assert!(!report.outputs.contains_key("summarize.note"));
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("'summarize.note' is absent")));
}

/// S6 — with the cache enabled, a second identical run replays every node
/// and performs no external work.
#[tokio::test]
async fn cache_replay_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, node_ctx) = setup(dir.path());
    let marker = dir.path().join("marker");

    let wf = workflow(json!({
        "name": "s6",
        "nodes": [
            {"id": "touch", "type": "shell",
             "params": {"command": format!("echo ran >> {}", marker.to_string_lossy())}},
            {"id": "tail", "type": "echo", "params": {"copy": "${touch.exit_code}"}}
        ],
        "edges": [{"from": "touch", "to": "tail"}],
        "outputs": ["touch.exit_code", "tail.copy"]
    }));

    let opts = || ExecutionOptions {
        cache_enabled: true,
        ..ExecutionOptions::default()
    };

    let first = run(&registry, &node_ctx, &wf, opts()).await;
    assert_eq!(first.final_status, FinalStatus::Success);
    assert_eq!(std::fs::read_to_string(&marker).unwrap().lines().count(), 1);

    let second = run(&registry, &node_ctx, &wf, opts()).await;
    assert_eq!(second.final_status, FinalStatus::Success);
    assert_eq!(second.outputs, first.outputs);
    // No external work happened: the marker was not appended again.
    assert_eq!(std::fs::read_to_string(&marker).unwrap().lines().count(), 1);

    let trace: Value =
        serde_json::from_str(&std::fs::read_to_string(second.trace_path.unwrap()).unwrap())
            .unwrap();
    assert_eq!(trace["metrics"]["nodes_cached"], json!(2));
    assert!(trace["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .all(|e| e["cached"] == json!(true)));
}

/// Boundary: a single node and no edges runs that node; the final status
/// tracks its action.
#[tokio::test]
async fn single_node_no_edges() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, node_ctx) = setup(dir.path());

    let wf = workflow(json!({
        "name": "single",
        "nodes": [{"id": "only", "type": "echo", "params": {"x": "1"}}],
        "outputs": ["only.x"]
    }));
    let report = run(&registry, &node_ctx, &wf, ExecutionOptions::default()).await;
    assert_eq!(report.final_status, FinalStatus::Success);
    assert_eq!(report.outputs["only.x"], json!("1"));
}

/// An unmatched error action terminates the workflow as failed, with a
/// fixable suggestion naming the missing edge.
#[tokio::test]
async fn unrouted_error_action_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, node_ctx) = setup(dir.path());

    let wf = workflow(json!({
        "name": "unrouted",
        "nodes": [{"id": "broken", "type": "shell", "params": {"command": "exit 7"}}]
    }));
    let report = run(&registry, &node_ctx, &wf, ExecutionOptions::default()).await;
    assert_eq!(report.final_status, FinalStatus::Failed);
    let err = report.error.unwrap();
    assert!(err.fixable);
    assert_eq!(err.shell_exit_code, Some(7));
    assert!(err.suggestion.unwrap().contains("action 'error'"));
}

/// The repair hook gets one recompile-and-retry when auto-repair is on.
#[tokio::test]
async fn repair_hook_recompiles_once() {
    use async_trait::async_trait;
    use warpflow::trace::ExecutionTrace;
    use warpflow::{EngineError, RepairHook};

    struct FixCommand;

    #[async_trait]
    impl RepairHook for FixCommand {
        async fn repair(
            &self,
            workflow: &Workflow,
            error: &EngineError,
            _trace: &ExecutionTrace,
        ) -> Option<Workflow> {
            assert!(error.fixable);
            let mut fixed = workflow.clone();
            fixed.nodes[0]
                .params
                .insert("command".to_string(), json!("true"));
            Some(fixed)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let (registry, node_ctx) = setup(dir.path());

    let wf = workflow(json!({
        "name": "repairable",
        "nodes": [{"id": "broken", "type": "shell", "params": {"command": "exit 1"}}]
    }));
    let ir = validate(&wf, &registry).unwrap();
    let executor = Executor::new(Arc::clone(&registry), node_ctx.clone())
        .with_repair_hook(Arc::new(FixCommand));

    let opts = ExecutionOptions {
        auto_repair: true,
        ..ExecutionOptions::default()
    };
    let report = executor.execute(&ir, opts).await;
    assert_eq!(report.final_status, FinalStatus::Success);
    assert!(report.error.is_none());
}

/// Retries recover a flaky node without failing the workflow.
#[tokio::test]
async fn retries_recover_flaky_node() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, node_ctx) = setup(dir.path());

    let wf = workflow(json!({
        "name": "flaky",
        "nodes": [{
            "id": "wobbly",
            "type": "fail-n-times",
            "params": {"fails": 2},
            "retries": 2
        }],
        "outputs": ["wobbly.attempts"]
    }));
    let report = run(&registry, &node_ctx, &wf, ExecutionOptions::default()).await;
    assert_eq!(report.final_status, FinalStatus::Success);
    assert_eq!(report.outputs["wobbly.attempts"], json!(3));
}

/// A workflow deadline turns a long-running node into a timeout failure.
#[tokio::test]
async fn workflow_deadline_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, node_ctx) = setup(dir.path());

    let wf = workflow(json!({
        "name": "slow",
        "nodes": [
            {"id": "a", "type": "shell", "params": {"command": "sleep 0.2"}},
            {"id": "b", "type": "shell", "params": {"command": "echo never"}}
        ],
        "edges": [{"from": "a", "to": "b"}]
    }));
    let opts = ExecutionOptions {
        deadline: Some(std::time::Duration::from_millis(50)),
        ..ExecutionOptions::default()
    };
    let report = run(&registry, &node_ctx, &wf, opts).await;
    assert_eq!(report.final_status, FinalStatus::Failed);
    assert_eq!(
        report.error.unwrap().category,
        warpflow::ErrorCategory::Timeout
    );
}

/// Required workflow inputs are enforced before any node runs.
#[tokio::test]
async fn missing_required_input_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, node_ctx) = setup(dir.path());

    let wf = workflow(json!({
        "name": "needs-input",
        "nodes": [{"id": "e", "type": "echo", "params": {"v": "${inputs.city}"}}],
        "inputs": {"city": {"type": "string", "required": true}}
    }));
    let report = run(&registry, &node_ctx, &wf, ExecutionOptions::default()).await;
    assert_eq!(report.final_status, FinalStatus::Failed);
    assert!(report.error.unwrap().message.contains("'city'"));
}

/// LLM calls flow through the seam and land in the trace's summary.
#[tokio::test]
async fn llm_node_records_usage_in_trace() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, node_ctx) = setup(dir.path());

    let wf = workflow(json!({
        "name": "ask",
        "nodes": [{"id": "q", "type": "llm", "params": {"prompt": "what is a workflow?"}}],
        "outputs": ["q.response"]
    }));
    let report = run(&registry, &node_ctx, &wf, ExecutionOptions::default()).await;
    assert_eq!(report.final_status, FinalStatus::Success);
    assert_eq!(report.outputs["q.response"], json!("mock reply"));

    let trace: Value =
        serde_json::from_str(&std::fs::read_to_string(report.trace_path.unwrap()).unwrap())
            .unwrap();
    assert_eq!(trace["llm_summary"]["calls"], json!(1));
    assert_eq!(trace["llm_summary"]["models"], json!(["mock"]));
}
