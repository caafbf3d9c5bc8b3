//! The workflow scheduler
//!
//! Single-workflow, single-host, cooperative and sequential: one current
//! node advances along the edge selected by its action. Batch fan-out is
//! the only intra-execution parallelism, and it happens inside the wrapper
//! chain. Every execution owns its store, trace collector, cache handle and
//! wrapper instances; nothing is shared between concurrent executions
//! except the read-mostly registry.

use crate::cache::IterationCache;
use crate::compiler::{compile, ExecutableGraph};
use crate::config::{EngineConfig, ResolutionMode};
use crate::debug_report;
use crate::ir::{CanonicalIr, Workflow, DEFAULT_ACTION};
use crate::node::NodeContext;
use crate::registry::NodeRegistry;
use crate::store::{SharedStore, EXECUTION_KEY};
use crate::template;
use crate::trace::{
    write_trace, ExecutionMetrics, ExecutionTrace, FinalStatus, LlmSummary,
};
use crate::validate::validate;
use crate::wrapper::ExecutionCtx;
use crate::{EngineError, ErrorCategory};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Opaque agent-driven repair callback.
///
/// Returning a replacement workflow causes one recompile-and-retry when
/// auto-repair is enabled; returning `None` declines.
#[async_trait]
pub trait RepairHook: Send + Sync {
    async fn repair(
        &self,
        workflow: &Workflow,
        error: &EngineError,
        trace: &ExecutionTrace,
    ) -> Option<Workflow>;
}

/// Per-invocation options.
#[derive(Clone)]
pub struct ExecutionOptions {
    /// Caller-supplied workflow input values
    pub inputs: Map<String, Value>,
    /// Enable the iteration cache for this run
    pub cache_enabled: bool,
    /// Node types opted out of caching
    pub cache_exclude: Vec<String>,
    /// Write the JSON trace artifact
    pub write_trace: bool,
    /// Also write the smart debug Markdown
    pub write_debug_markdown: bool,
    /// Workflow-level deadline
    pub deadline: Option<Duration>,
    /// Override the environment's template resolution mode
    pub template_mode: Option<ResolutionMode>,
    /// Allow one repair-hook recompile on fixable failures
    pub auto_repair: bool,
    pub cancel: CancellationToken,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            inputs: Map::new(),
            cache_enabled: false,
            cache_exclude: Vec::new(),
            write_trace: true,
            write_debug_markdown: false,
            deadline: None,
            template_mode: None,
            auto_repair: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// What one execution produced.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub final_status: FinalStatus,
    /// Declared workflow outputs projected from the final store
    pub outputs: Map<String, Value>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_path: Option<PathBuf>,
    pub duration_ms: u64,
}

/// Runs compiled workflows.
pub struct Executor {
    registry: Arc<NodeRegistry>,
    node_ctx: NodeContext,
    repair: Option<Arc<dyn RepairHook>>,
}

impl Executor {
    pub fn new(registry: Arc<NodeRegistry>, node_ctx: NodeContext) -> Self {
        Self {
            registry,
            node_ctx,
            repair: None,
        }
    }

    #[must_use]
    pub fn with_repair_hook(mut self, hook: Arc<dyn RepairHook>) -> Self {
        self.repair = Some(hook);
        self
    }

    fn config(&self) -> &EngineConfig {
        &self.node_ctx.config
    }

    /// Execute a validated workflow. Never panics, never returns `Err`:
    /// every failure mode is folded into the report and its trace.
    pub async fn execute(&self, ir: &CanonicalIr, opts: ExecutionOptions) -> ExecutionReport {
        let mut report = self.execute_once(ir, &opts).await;

        // One repair round: fixable error + hook + opt-in flag.
        if opts.auto_repair {
            if let (Some(error), Some(hook)) = (report.error.clone(), self.repair.clone()) {
                if error.fixable {
                    let trace = report.last_trace.clone().unwrap_or_else(|| {
                        empty_trace(&report.report.execution_id, ir.display_name())
                    });
                    if let Some(repaired) = hook.repair(ir.workflow(), &error, &trace).await {
                        tracing::info!(
                            workflow = ir.display_name(),
                            "repair hook produced a new workflow; recompiling"
                        );
                        match validate(&repaired, &self.registry) {
                            Ok(new_ir) => {
                                let retry_opts = ExecutionOptions {
                                    auto_repair: false,
                                    ..opts.clone()
                                };
                                report = self.execute_once(&new_ir, &retry_opts).await;
                            }
                            Err(validation) => {
                                tracing::warn!(
                                    error = %validation,
                                    "repaired workflow failed validation; keeping original failure"
                                );
                            }
                        }
                    }
                }
            }
        }

        report.report
    }

    async fn execute_once(&self, ir: &CanonicalIr, opts: &ExecutionOptions) -> RunOutcome {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let started_wall = chrono::Utc::now();
        let started = Instant::now();
        let config = self.config().clone();
        let workflow_name = ir.display_name().to_string();

        tracing::info!(
            workflow = %workflow_name,
            execution_id = %execution_id,
            "execution started"
        );

        // Seed inputs: declared defaults first, then caller values.
        let mut inputs = Map::new();
        let mut input_error: Option<EngineError> = None;
        for (name, spec) in &ir.inputs {
            if let Some(default) = &spec.default {
                inputs.insert(name.clone(), default.clone());
            }
        }
        for (name, value) in &opts.inputs {
            inputs.insert(name.clone(), value.clone());
        }
        for (name, spec) in &ir.inputs {
            if spec.required && !inputs.contains_key(name) {
                input_error = Some(
                    EngineError::validation(format!("required workflow input '{name}' was not supplied"))
                        .with_suggestion(format!("pass a value for '{name}'")),
                );
                break;
            }
        }

        let mut store = SharedStore::with_inputs(inputs);

        let mut ctx = ExecutionCtx::new(&execution_id, config.clone())
            .with_cancel(opts.cancel.clone())
            .with_mode(opts.template_mode.unwrap_or(config.template_mode));
        ctx.cache_exclude = Arc::new(opts.cache_exclude.clone());

        let cache = if opts.cache_enabled {
            match IterationCache::open(&config.cache_dir(), &workflow_name) {
                Ok(cache) => {
                    let cache = Arc::new(cache);
                    ctx = ctx.with_cache(Arc::clone(&cache));
                    Some(cache)
                }
                Err(err) => {
                    store.push_warning(format!("iteration cache unavailable: {err}"));
                    None
                }
            }
        } else {
            None
        };

        // Compile fresh for this execution; compiled graphs are ephemeral.
        let graph = match input_error {
            Some(err) => Err(err),
            None => compile(ir, &self.registry, &self.node_ctx),
        };

        let error = match graph {
            Ok(graph) => self.run_graph(&graph, &mut store, &ctx, opts, started).await.err(),
            Err(err) => Some(err),
        };

        if let Some(err) = &error {
            if !err.fixable {
                store.mark_non_repairable(err.message.clone());
            }
        }

        // Assemble the trace.
        let events = ctx.collector.take_events();
        let warnings = store.warnings();
        let degraded = !warnings.is_empty()
            || events.iter().any(|e| e.has_stderr == Some(true));
        let final_status = match &error {
            Some(_) => FinalStatus::Failed,
            None if degraded => FinalStatus::Degraded,
            None => FinalStatus::Success,
        };

        let metrics = ExecutionMetrics {
            nodes_run: events.iter().filter(|e| !e.node_id.contains('[')).count(),
            nodes_cached: ctx.cache_hits.load(Ordering::Relaxed),
            retries_total: ctx.retries_total.load(Ordering::Relaxed),
            warnings_total: warnings.len(),
        };

        let ended_wall = chrono::Utc::now();
        let mut trace = ExecutionTrace {
            execution_id: execution_id.clone(),
            workflow_name: workflow_name.clone(),
            start_time: started_wall.to_rfc3339(),
            end_time: ended_wall.to_rfc3339(),
            duration_ms: started.elapsed().as_millis() as u64,
            final_status,
            nodes: events,
            llm_summary: LlmSummary::default(),
            warnings: warnings.clone(),
            metrics,
            execution_state: store.get_root(EXECUTION_KEY).cloned(),
            error: error.clone(),
        };
        trace.summarize_llm();

        // Artifacts. Cancellation and timeout skip cache persistence.
        let mut trace_path = None;
        let mut debug_path = None;
        if opts.write_trace {
            match write_trace(&trace, &config.debug_dir()) {
                Ok(path) => trace_path = Some(path),
                Err(err) => tracing::warn!(error = %err, "failed to write trace artifact"),
            }
            if opts.write_debug_markdown {
                match debug_report::write_debug_markdown(&trace, &config.debug_dir()) {
                    Ok(path) => debug_path = Some(path),
                    Err(err) => tracing::warn!(error = %err, "failed to write debug markdown"),
                }
            }
        }
        let skip_cache_flush = matches!(
            error.as_ref().map(|e| e.category),
            Some(ErrorCategory::Cancelled) | Some(ErrorCategory::Timeout)
        );
        if let Some(cache) = cache {
            if !skip_cache_flush {
                if let Err(err) = cache.flush() {
                    tracing::warn!(error = %err, "failed to flush iteration cache");
                }
            }
        }

        // Project declared outputs from the final store.
        let mut outputs = Map::new();
        {
            let view = store.view();
            for path_text in &ir.outputs {
                let resolved = template::parse_path(path_text)
                    .ok()
                    .and_then(|path| view.resolve(&path).cloned());
                match resolved {
                    Some(value) => {
                        outputs.insert(path_text.clone(), value);
                    }
                    None => {
                        trace
                            .warnings
                            .push(format!("declared output '{path_text}' is absent from final state"));
                    }
                }
            }
        }

        tracing::info!(
            workflow = %workflow_name,
            execution_id = %execution_id,
            status = %final_status,
            duration_ms = trace.duration_ms,
            "execution finished"
        );

        RunOutcome {
            error: error.clone(),
            report: ExecutionReport {
                execution_id,
                final_status,
                outputs,
                warnings: trace.warnings.clone(),
                error,
                trace_path,
                debug_path,
                duration_ms: trace.duration_ms,
            },
            last_trace: Some(trace),
        }
    }

    /// Walk the graph from the start node along chosen actions.
    async fn run_graph(
        &self,
        graph: &ExecutableGraph,
        store: &mut SharedStore,
        ctx: &ExecutionCtx,
        opts: &ExecutionOptions,
        started: Instant,
    ) -> crate::Result<()> {
        let mut current = graph.start.clone();
        let mut completed: Vec<Value> = Vec::new();
        let mut actions = Map::new();
        // Validation guarantees an acyclic reachable graph, so the walk is
        // bounded by the node count; the guard catches engine bugs only.
        let max_steps = graph.node_count() + 1;

        for _ in 0..max_steps {
            if ctx.cancel.is_cancelled() {
                return Err(EngineError::cancelled(format!(
                    "execution cancelled before node '{current}'"
                )));
            }
            if let Some(deadline) = opts.deadline {
                if started.elapsed() >= deadline {
                    return Err(EngineError::timeout(format!(
                        "workflow deadline of {}ms exceeded before node '{current}'",
                        deadline.as_millis()
                    )));
                }
            }

            let runnable = graph.nodes.get(&current).ok_or_else(|| {
                EngineError::internal(format!("compiled graph has no node '{current}'"))
            })?;

            tracing::debug!(node_id = %current, "running node");
            let action = runnable.run(store, ctx).await?;

            // Checkpoint after every successful node.
            completed.push(Value::String(current.clone()));
            actions.insert(current.clone(), Value::String(action.as_str().to_string()));
            store.insert_root(
                EXECUTION_KEY,
                json!({
                    "completed": completed.clone(),
                    "actions": actions.clone(),
                    "cache_keys": Value::Object(ctx.cache_keys.lock().clone()),
                }),
            );

            let next = graph
                .next(&current, action.as_str())
                .or_else(|| match action.as_str() {
                    // A successful non-default action with no dedicated
                    // edge falls through to the default edge; an error
                    // action never does.
                    a if a != DEFAULT_ACTION && !action.is_error() => {
                        graph.next(&current, DEFAULT_ACTION)
                    }
                    _ => None,
                });

            match next {
                Some(next_id) => {
                    // A routed error action degrades the run: the workflow
                    // handled the failure, but it still happened.
                    if action.is_error() {
                        store.push_warning(format!(
                            "node '{current}' emitted the error action; routing to '{next_id}'"
                        ));
                    }
                    current = next_id.to_string();
                }
                None if action.is_error() => {
                    return Err(semantic_failure(&current, store));
                }
                None => return Ok(()),
            }
        }

        Err(EngineError::internal(
            "executor exceeded the maximum step count; this is an engine bug",
        ))
    }
}

/// A node emitted `"error"` with no edge to route it: the workflow fails,
/// carrying whatever the node recorded about the non-success.
fn semantic_failure(node_id: &str, store: &SharedStore) -> EngineError {
    let outputs = store.node_outputs(node_id);
    let detail = outputs
        .and_then(|o| {
            o.get("status")
                .map(|s| format!("status {s}"))
                .or_else(|| o.get("exit_code").map(|c| format!("exit code {c}")))
                .or_else(|| o.get("error").map(|e| template::stringify(e)))
        })
        .unwrap_or_else(|| "no detail recorded".to_string());
    let mut err = EngineError::internal(format!(
        "node '{node_id}' emitted 'error' with no matching edge ({detail})"
    ))
    .with_node(node_id)
    .with_fixable(true)
    .with_suggestion(format!(
        "add an edge from '{node_id}' with action 'error' to handle the failure"
    ));
    if let Some(code) = outputs.and_then(|o| o.get("exit_code")).and_then(Value::as_i64) {
        err.shell_exit_code = Some(code as i32);
        err.category = ErrorCategory::Shell;
    } else if outputs.and_then(|o| o.get("status")).is_some() {
        err.category = ErrorCategory::Http;
    }
    err
}

fn empty_trace(execution_id: &str, workflow_name: &str) -> ExecutionTrace {
    ExecutionTrace {
        execution_id: execution_id.to_string(),
        workflow_name: workflow_name.to_string(),
        start_time: chrono::Utc::now().to_rfc3339(),
        end_time: chrono::Utc::now().to_rfc3339(),
        duration_ms: 0,
        final_status: FinalStatus::Failed,
        nodes: Vec::new(),
        llm_summary: LlmSummary::default(),
        warnings: Vec::new(),
        metrics: ExecutionMetrics::default(),
        execution_state: None,
        error: None,
    }
}

/// Internal bundle passed from `execute_once` back to `execute` so the
/// repair loop can see both the report and its trace.
struct RunOutcome {
    report: ExecutionReport,
    error: Option<EngineError>,
    last_trace: Option<ExecutionTrace>,
}
