//! The node wrapper chain
//!
//! A raw node never runs bare. The compiler wraps it, outside-in:
//!
//! 1. [`Instrumented`] — timing, snapshots, mutation sets, LLM capture
//! 2. [`BatchRunner`] — fan-out over a collection (only when declared)
//! 3. [`NodeAdapter`] — namespacing, template resolution, declared-read
//!    validation, cache read-through, the retry/fallback loop, and the
//!    three-phase invocation itself
//!
//! Ordering is load-bearing: batch sits outside namespacing so the injected
//! `item` is visible to templates, template resolution is innermost so it
//! sees per-iteration state, and instrumentation is outermost so recorded
//! deltas include item expansion.

use crate::cache::{cache_key, CacheEntry, IterationCache};
use crate::config::{EngineConfig, ResolutionMode};
use crate::interface::Interface;
use crate::ir::BatchSpec;
use crate::node::{Action, ExecContext, Node};
use crate::store::{SharedStore, ITEM_KEY};
use crate::template::{self, Resolution};
use crate::trace::{self, NodeEvent, TraceCollector};
use crate::{EngineError, ErrorCategory, Result};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Execution-scoped context threaded through every wrapper layer.
#[derive(Clone)]
pub struct ExecutionCtx {
    pub execution_id: String,
    pub config: EngineConfig,
    pub mode: ResolutionMode,
    pub cancel: CancellationToken,
    pub collector: Arc<TraceCollector>,
    pub cache: Option<Arc<IterationCache>>,
    /// Node types opted out of caching for this invocation
    pub cache_exclude: Arc<Vec<String>>,
    /// Template substitutions since the last instrumentation drain
    resolutions: Arc<Mutex<Vec<Resolution>>>,
    /// LLM calls since the last instrumentation drain
    llm_calls: Arc<Mutex<Vec<crate::llm::LlmCallRecord>>>,
    /// Counters feeding the trace metrics
    pub retries_total: Arc<AtomicU64>,
    pub cache_hits: Arc<AtomicUsize>,
    /// Cache key per node id, recorded for the `__execution__` checkpoint
    pub cache_keys: Arc<Mutex<Map<String, Value>>>,
}

impl ExecutionCtx {
    pub fn new(execution_id: impl Into<String>, config: EngineConfig) -> Self {
        let mode = config.template_mode;
        Self {
            execution_id: execution_id.into(),
            config,
            mode,
            cancel: CancellationToken::new(),
            collector: Arc::new(TraceCollector::new()),
            cache: None,
            cache_exclude: Arc::new(Vec::new()),
            resolutions: Arc::new(Mutex::new(Vec::new())),
            llm_calls: Arc::new(Mutex::new(Vec::new())),
            retries_total: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicUsize::new(0)),
            cache_keys: Arc::new(Mutex::new(Map::new())),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<IterationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ResolutionMode) -> Self {
        self.mode = mode;
        self
    }

    fn push_resolutions(&self, resolutions: Vec<Resolution>) {
        if !resolutions.is_empty() {
            self.resolutions.lock().extend(resolutions);
        }
    }

    fn drain_resolutions(&self) -> Vec<Resolution> {
        std::mem::take(&mut *self.resolutions.lock())
    }

    fn push_llm_calls(&self, calls: Vec<crate::llm::LlmCallRecord>) {
        if !calls.is_empty() {
            self.llm_calls.lock().extend(calls);
        }
    }

    fn drain_llm_calls(&self) -> Vec<crate::llm::LlmCallRecord> {
        std::mem::take(&mut *self.llm_calls.lock())
    }
}

/// A fully wrapped node the executor can run against the shared store.
#[async_trait]
pub trait RunnableNode: Send + Sync {
    fn node_id(&self) -> &str;
    fn node_type(&self) -> &str;
    async fn run(&self, store: &mut SharedStore, ctx: &ExecutionCtx) -> Result<Action>;
}

/// Innermost layer: namespacing + template resolution + retries + cache.
pub struct NodeAdapter {
    pub id: String,
    pub node_type: String,
    pub version: String,
    pub params: Map<String, Value>,
    pub retries: u32,
    pub wait: Duration,
    pub timeout: Option<Duration>,
    pub interface: Interface,
    pub node: Arc<dyn Node>,
}

impl NodeAdapter {
    fn cache_enabled(&self, ctx: &ExecutionCtx) -> bool {
        ctx.cache.is_some() && !ctx.cache_exclude.contains(&self.node_type)
    }

    /// The declared-reads view rendered for cache keying.
    fn inputs_view(&self, store: &SharedStore) -> Value {
        let view = store.view();
        let mut inputs = Map::new();
        for read in &self.interface.reads {
            let value = template::parse_path(&read.path)
                .ok()
                .and_then(|path| view.resolve(&path).cloned())
                .unwrap_or(Value::Null);
            inputs.insert(read.path.clone(), value);
        }
        Value::Object(inputs)
    }

    /// Validate that declared read paths exist before the node runs.
    fn validate_reads(&self, store: &mut SharedStore, ctx: &ExecutionCtx) -> Result<()> {
        let mut missing: Vec<String> = Vec::new();
        {
            let view = store.view();
            for read in &self.interface.reads {
                let path = template::parse_path(&read.path).map_err(|e| e.with_node(&self.id))?;
                if view.resolve(&path).is_none() {
                    missing.push(read.path.clone());
                }
            }
        }
        for path in missing {
            match ctx.mode {
                ResolutionMode::Strict => {
                    let available = store.view().root_keys();
                    return Err(EngineError::template(format!(
                        "node '{}' declares a read of '{path}' which is absent from shared state",
                        self.id
                    ))
                    .with_node(&self.id)
                    .with_available_fields(available));
                }
                ResolutionMode::Permissive => {
                    store.push_warning(format!(
                        "node '{}' read of '{path}' is absent from shared state",
                        self.id
                    ));
                }
            }
        }
        Ok(())
    }

    async fn exec_with_retries(&self, prep: Value, ctx: &ExecutionCtx) -> Result<Value> {
        let mut attempt_ctx = ExecContext::new(&ctx.execution_id, &self.id)
            .with_retries(self.retries, self.wait)
            .with_timeout(self.timeout)
            .with_cancel(ctx.cancel.clone());

        let result = loop {
            if ctx.cancel.is_cancelled() {
                return Err(EngineError::cancelled(format!(
                    "execution cancelled before node '{}' attempt {}",
                    self.id,
                    attempt_ctx.attempt + 1
                ))
                .with_node(&self.id));
            }

            let exec_future = self.node.exec(prep.clone(), &attempt_ctx);
            let outcome = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, exec_future).await {
                    Ok(outcome) => outcome,
                    // Timeouts terminate immediately: the external call already
                    // had its chance, and retrying would double the stall.
                    Err(_) => {
                        ctx.push_llm_calls(attempt_ctx.take_llm_calls());
                        return Err(EngineError::timeout(format!(
                            "node '{}' exceeded its {}ms timeout",
                            self.id,
                            limit.as_millis()
                        ))
                        .with_node(&self.id));
                    }
                },
                None => exec_future.await,
            };

            match outcome {
                Ok(value) => break Ok(value),
                Err(err) if matches!(err.category, ErrorCategory::Cancelled) => {
                    break Err(err);
                }
                Err(err) if attempt_ctx.can_retry() => {
                    tracing::debug!(
                        node_id = %self.id,
                        attempt = attempt_ctx.attempt + 1,
                        error = %err,
                        "exec failed, retrying"
                    );
                    ctx.retries_total.fetch_add(1, Ordering::Relaxed);
                    if self.wait > Duration::ZERO {
                        tokio::time::sleep(self.wait).await;
                    }
                    attempt_ctx.attempt += 1;
                }
                Err(err) => {
                    break self
                        .node
                        .exec_fallback(prep.clone(), err, &attempt_ctx)
                        .await;
                }
            }
        };

        ctx.push_llm_calls(attempt_ctx.take_llm_calls());
        result.map_err(|e| match e.node_id {
            Some(_) => e,
            None => e.with_node(&self.id),
        })
    }
}

#[async_trait]
impl RunnableNode for NodeAdapter {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn node_type(&self) -> &str {
        &self.node_type
    }

    async fn run(&self, store: &mut SharedStore, ctx: &ExecutionCtx) -> Result<Action> {
        // Template resolution happens here, innermost, so batch-injected
        // items and upstream outputs are all visible. The original params
        // are never mutated.
        let resolved = {
            let view = store.view();
            template::resolve_params(&self.params, &view, &self.id, ctx.mode)?
        };
        for warning in &resolved.warnings {
            store.push_warning(warning.clone());
        }
        ctx.push_resolutions(resolved.resolutions);

        self.validate_reads(store, ctx)?;

        let params_value = Value::Object(resolved.params.clone());

        // Cache read-through, keyed on the resolved input envelope.
        let key = if self.cache_enabled(ctx) {
            let inputs_view = self.inputs_view(store);
            let key = cache_key(&self.node_type, &params_value, &inputs_view, &self.version);
            ctx.cache_keys
                .lock()
                .insert(self.id.clone(), Value::String(key.clone()));
            #[allow(clippy::expect_used)]
            let cache = ctx.cache.as_ref().expect("cache_enabled checked");
            if let Some(entry) = cache.get(&key) {
                tracing::debug!(node_id = %self.id, key = %key, "iteration cache hit");
                ctx.cache_hits.fetch_add(1, Ordering::Relaxed);
                let mut ns = store.namespace(&self.id);
                for (k, v) in &entry.deltas {
                    ns.set(k.clone(), v.clone());
                }
                return Ok(Action::new(entry.action));
            }
            Some(key)
        } else {
            None
        };

        let prep = {
            let view = store.view();
            self.node
                .prep(&view, &params_value)
                .await
                .map_err(|e| match e.node_id {
                    Some(_) => e,
                    None => e.with_node(&self.id),
                })?
        };

        let exec = self.exec_with_retries(prep.clone(), ctx).await?;

        if ctx.cancel.is_cancelled() {
            return Err(EngineError::cancelled(format!(
                "execution cancelled after node '{}' exec phase",
                self.id
            ))
            .with_node(&self.id));
        }

        let action = {
            let mut ns = store.namespace(&self.id);
            self.node
                .post(&mut ns, &prep, exec)
                .await
                .map_err(|e| match e.node_id {
                    Some(_) => e,
                    None => e.with_node(&self.id),
                })?
        };

        if let (Some(key), Some(cache)) = (key, ctx.cache.as_ref()) {
            let deltas = store
                .node_outputs(&self.id)
                .cloned()
                .unwrap_or_default();
            cache.put(
                key,
                CacheEntry {
                    deltas,
                    action: action.as_str().to_string(),
                },
            );
        }

        Ok(action)
    }
}

/// Batch fan-out: runs the inner chain once per item of a collection, each
/// on an isolated store copy, and merges outputs in input order.
pub struct BatchRunner {
    pub inner: Arc<NodeAdapter>,
    pub spec: BatchSpec,
}

#[async_trait]
impl RunnableNode for BatchRunner {
    fn node_id(&self) -> &str {
        &self.inner.id
    }

    fn node_type(&self) -> &str {
        &self.inner.node_type
    }

    async fn run(&self, store: &mut SharedStore, ctx: &ExecutionCtx) -> Result<Action> {
        let id = &self.inner.id;

        // Resolve the collection before any fan-out so templates in `over`
        // see the pre-batch store.
        let over = {
            let view = store.view();
            let mut scratch = template::ResolvedParams::default();
            template::resolve_value(&self.spec.over, &view, id, ctx.mode, &mut scratch)?
        };
        let items = match over {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(EngineError::validation(format!(
                    "batch.over of node '{id}' must resolve to a list, got {}",
                    type_name(&other)
                ))
                .with_node(id));
            }
        };

        let base_warnings = store.warnings().len();
        let concurrency = self.spec.concurrency.max(1);
        let mut results: Vec<Value> = Vec::with_capacity(items.len());
        let mut merged_warnings: Vec<String> = Vec::new();

        for (chunk_index, chunk) in items.chunks(concurrency).enumerate() {
            let futures = chunk.iter().enumerate().map(|(offset, item)| {
                let index = chunk_index * concurrency + offset;
                let mut copy = store.clone_for_iteration();
                copy.insert_root(ITEM_KEY, item.clone());
                let inner = Arc::clone(&self.inner);
                let ctx = ctx.clone();
                let item = item.clone();
                async move {
                    let started = Instant::now();
                    let outcome = inner.run(&mut copy, &ctx).await;
                    (index, item, copy, outcome, started.elapsed())
                }
            });

            for (index, item, copy, outcome, elapsed) in join_all(futures).await {
                let outputs = copy
                    .node_outputs(id)
                    .map(|map| Value::Object(map.clone()))
                    .unwrap_or_else(|| Value::Object(Map::new()));

                // Per-iteration trace event under a suffixed id.
                let event = NodeEvent {
                    node_id: format!("{id}[{index}]"),
                    node_type: self.inner.node_type.clone(),
                    duration_ms: elapsed.as_millis() as u64,
                    success: outcome.is_ok(),
                    shared_before: trace::filter_snapshot(
                        &Value::Object({
                            let mut m = Map::new();
                            m.insert(ITEM_KEY.to_string(), item);
                            m
                        }),
                        &ctx.config,
                    ),
                    shared_after: trace::filter_snapshot(&outputs, &ctx.config),
                    mutations: Default::default(),
                    llm_call: None,
                    template_resolutions: None,
                    stderr: None,
                    has_stderr: None,
                    cancelled: false,
                    cached: false,
                    error: outcome.as_ref().err().cloned(),
                };
                ctx.collector.record(event, &ctx.config);

                // A failing iteration fails the whole batch: retries and
                // fallback already ran inside the adapter.
                outcome?;

                merged_warnings.extend(copy.warnings().into_iter().skip(base_warnings));
                results.push(outputs);
            }
        }

        for warning in merged_warnings {
            store.push_warning(warning);
        }
        store.insert_root(id.clone(), Value::Array(results));
        Ok(Action::default_action())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Outermost layer: timing, snapshots, mutation sets, LLM capture.
pub struct Instrumented {
    pub inner: Arc<dyn RunnableNode>,
}

#[async_trait]
impl RunnableNode for Instrumented {
    fn node_id(&self) -> &str {
        self.inner.node_id()
    }

    fn node_type(&self) -> &str {
        self.inner.node_type()
    }

    async fn run(&self, store: &mut SharedStore, ctx: &ExecutionCtx) -> Result<Action> {
        let before = store.snapshot();
        let cache_hits_before = ctx.cache_hits.load(Ordering::Relaxed);
        let started = Instant::now();

        let outcome = self.inner.run(store, ctx).await;

        let after = store.snapshot();
        let duration_ms = started.elapsed().as_millis() as u64;
        let resolutions = ctx.drain_resolutions();
        let llm_call = trace::merge_llm_calls(ctx.drain_llm_calls(), &ctx.config);

        let stderr = store
            .node_outputs(self.node_id())
            .and_then(|outputs| outputs.get("stderr"))
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let has_stderr = stderr.as_ref().map(|s| !s.is_empty());

        let error = outcome.as_ref().err().cloned();
        let event = NodeEvent {
            node_id: self.node_id().to_string(),
            node_type: self.node_type().to_string(),
            duration_ms,
            success: outcome.is_ok(),
            shared_before: trace::filter_snapshot(&before, &ctx.config),
            shared_after: trace::filter_snapshot(&after, &ctx.config),
            mutations: SharedStore::diff(&before, &after),
            llm_call,
            template_resolutions: (!resolutions.is_empty()).then_some(resolutions),
            stderr,
            has_stderr,
            cancelled: error
                .as_ref()
                .is_some_and(|e| matches!(e.category, ErrorCategory::Cancelled)),
            cached: ctx.cache_hits.load(Ordering::Relaxed) > cache_hits_before,
            error,
        };
        ctx.collector.record(event, &ctx.config);

        outcome
    }
}

/// Build the full wrapper chain for one compiled node.
pub fn wrap(adapter: NodeAdapter, batch: Option<BatchSpec>) -> Arc<dyn RunnableNode> {
    let adapter = Arc::new(adapter);
    let inner: Arc<dyn RunnableNode> = match batch {
        Some(spec) => Arc::new(BatchRunner {
            inner: adapter,
            spec,
        }),
        None => adapter,
    };
    Arc::new(Instrumented { inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::store::{Namespace, StoreView};
    use serde_json::json;

    /// Writes every resolved param verbatim into its own namespace.
    struct EchoNode;

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
                for (k, v) in map {
                    ns.set(k, v);
                }
            }
            Ok(Action::default_action())
        }
    }

    /// Fails `fail_count` times, then succeeds.
    struct FlakyNode {
        fail_count: u32,
        attempts: AtomicU64,
    }

    #[async_trait]
    impl Node for FlakyNode {
        async fn prep(&self, _view: &StoreView<'_>, params: &Value) -> Result<Value> {
            Ok(params.clone())
        }
        async fn exec(&self, _prep: Value, _ctx: &ExecContext) -> Result<Value> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < u64::from(self.fail_count) {
                Err(EngineError::http("transient failure"))
            } else {
                Ok(json!({"ok": true}))
            }
        }
        async fn post(&self, ns: &mut Namespace<'_>, _prep: &Value, exec: Value) -> Result<Action> {
            ns.set("result", exec);
            Ok(Action::default_action())
        }
    }

    fn adapter(id: &str, node: Arc<dyn Node>, params: Value) -> NodeAdapter {
        NodeAdapter {
            id: id.to_string(),
            node_type: "echo".to_string(),
            version: "1".to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
            retries: 0,
            wait: Duration::ZERO,
            timeout: None,
            interface: Interface::default(),
            node,
        }
    }

    fn ctx() -> ExecutionCtx {
        ExecutionCtx::new("exec-test", EngineConfig::default())
    }

    #[tokio::test]
    async fn test_adapter_resolves_templates_and_namespaces_writes() {
        let mut store = SharedStore::new();
        store.namespace("up").set("value", json!("hello"));
        let adapter = adapter("down", Arc::new(EchoNode), json!({"msg": "got ${up.value}"}));
        let ctx = ctx();
        let action = adapter.run(&mut store, &ctx).await.unwrap();
        assert_eq!(action, Action::default_action());
        assert_eq!(store.node_outputs("down").unwrap()["msg"], json!("got hello"));
    }

    #[tokio::test]
    async fn test_retries_then_success() {
        let mut store = SharedStore::new();
        let mut a = adapter(
            "flaky",
            Arc::new(FlakyNode {
                fail_count: 2,
                attempts: AtomicU64::new(0),
            }),
            json!({}),
        );
        a.retries = 2;
        let ctx = ctx();
        a.run(&mut store, &ctx).await.unwrap();
        assert_eq!(ctx.retries_total.load(Ordering::Relaxed), 2);
        assert_eq!(store.node_outputs("flaky").unwrap()["result"], json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_retries_exhausted_raises_from_fallback() {
        let mut store = SharedStore::new();
        let mut a = adapter(
            "flaky",
            Arc::new(FlakyNode {
                fail_count: 5,
                attempts: AtomicU64::new(0),
            }),
            json!({}),
        );
        a.retries = 1;
        let err = a.run(&mut store, &ctx()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Http);
        assert_eq!(err.node_id.as_deref(), Some("flaky"));
    }

    #[tokio::test]
    async fn test_cache_replay_restores_deltas_and_action() {
        let cache = Arc::new(IterationCache::ephemeral());
        let ctx = ctx().with_cache(Arc::clone(&cache));

        let mut store = SharedStore::new();
        let a = adapter("echo", Arc::new(EchoNode), json!({"out": "value"}));
        a.run(&mut store, &ctx).await.unwrap();
        assert_eq!(cache.len(), 1);

        // Second run replays without executing: a different node impl with
        // the same envelope proves exec never ran.
        let mut store2 = SharedStore::new();
        let b = NodeAdapter {
            node: Arc::new(FlakyNode {
                fail_count: 99,
                attempts: AtomicU64::new(0),
            }),
            ..adapter("echo", Arc::new(EchoNode), json!({"out": "value"}))
        };
        let action = b.run(&mut store2, &ctx).await.unwrap();
        assert_eq!(action, Action::default_action());
        assert_eq!(
            store.node_outputs("echo").unwrap(),
            store2.node_outputs("echo").unwrap()
        );
        assert_eq!(ctx.cache_hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let mut store = SharedStore::new();
        store.insert_root(
            "inputs",
            json!({"items": ["a", "b", "c"]}),
        );
        let inner = adapter("fan", Arc::new(EchoNode), json!({"item": "${item}"}));
        let runner = BatchRunner {
            inner: Arc::new(inner),
            spec: BatchSpec {
                over: json!("${inputs.items}"),
                concurrency: 2,
            },
        };
        let ctx = ctx();
        runner.run(&mut store, &ctx).await.unwrap();
        assert_eq!(
            store.get_root("fan").unwrap(),
            &json!([{"item": "a"}, {"item": "b"}, {"item": "c"}])
        );
        // Three per-iteration events with suffixed ids.
        let events = ctx.collector.take_events();
        let ids: Vec<&str> = events.iter().map(|e| e.node_id.as_str()).collect();
        assert_eq!(ids, vec!["fan[0]", "fan[1]", "fan[2]"]);
    }

    #[tokio::test]
    async fn test_batch_item_injection_is_isolated() {
        let mut store = SharedStore::new();
        let inner = adapter("fan", Arc::new(EchoNode), json!({"item": "${item}"}));
        let runner = BatchRunner {
            inner: Arc::new(inner),
            spec: BatchSpec {
                over: json!([1, 2]),
                concurrency: 4,
            },
        };
        runner.run(&mut store, &ctx()).await.unwrap();
        // The outer store never sees the injected item key.
        assert!(store.get_root(ITEM_KEY).is_none());
    }

    #[tokio::test]
    async fn test_batch_rejects_non_list() {
        let mut store = SharedStore::new();
        let inner = adapter("fan", Arc::new(EchoNode), json!({}));
        let runner = BatchRunner {
            inner: Arc::new(inner),
            spec: BatchSpec {
                over: json!("not a template or list"),
                concurrency: 1,
            },
        };
        let err = runner.run(&mut store, &ctx()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Validation);
        assert!(err.message.contains("must resolve to a list"));
    }

    #[tokio::test]
    async fn test_instrumented_records_event_and_mutations() {
        let mut store = SharedStore::new();
        let wrapped = wrap(adapter("echo", Arc::new(EchoNode), json!({"out": 1})), None);
        let ctx = ctx();
        wrapped.run(&mut store, &ctx).await.unwrap();
        let events = ctx.collector.take_events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert!(event.success);
        assert_eq!(event.node_id, "echo");
        assert_eq!(event.mutations.added, vec!["echo.out".to_string()]);
        assert!(event.template_resolutions.is_none());
    }

    #[tokio::test]
    async fn test_instrumented_records_failure_event() {
        let mut store = SharedStore::new();
        let wrapped = wrap(
            adapter("boom", Arc::new(FlakyNode { fail_count: 9, attempts: AtomicU64::new(0) }), json!({})),
            None,
        );
        let ctx = ctx();
        let err = wrapped.run(&mut store, &ctx).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Http);
        let events = ctx.collector.take_events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
        assert!(events[0].error.is_some());
    }

    #[tokio::test]
    async fn test_timeout_fires() {
        struct SlowNode;
        #[async_trait]
        impl Node for SlowNode {
            async fn prep(&self, _v: &StoreView<'_>, p: &Value) -> Result<Value> {
                Ok(p.clone())
            }
            async fn exec(&self, _p: Value, _c: &ExecContext) -> Result<Value> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            }
            async fn post(&self, _n: &mut Namespace<'_>, _p: &Value, _e: Value) -> Result<Action> {
                Ok(Action::default_action())
            }
        }

        let mut store = SharedStore::new();
        let mut a = adapter("slow", Arc::new(SlowNode), json!({}));
        a.timeout = Some(Duration::from_millis(20));
        a.retries = 3; // timeouts must not be retried
        let err = a.run(&mut store, &ctx()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Timeout);
    }

    #[tokio::test]
    async fn test_declared_read_validated_before_run() {
        let mut a = adapter("consumer", Arc::new(EchoNode), json!({}));
        a.interface = Interface::parse(
            "Consumes upstream state.\n\nInterface:\n- Reads: shared[\"up.value\"]: string\n- Actions: default\n",
        )
        .unwrap();

        // Missing read path aborts before the node runs.
        let mut store = SharedStore::new();
        let err = a.run(&mut store, &ctx()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Template);
        assert!(err.message.contains("up.value"));

        // Present read path passes.
        let mut store = SharedStore::new();
        store.namespace("up").set("value", json!("here"));
        a.run(&mut store, &ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_between_retries() {
        let mut store = SharedStore::new();
        let mut a = adapter(
            "flaky",
            Arc::new(FlakyNode {
                fail_count: 99,
                attempts: AtomicU64::new(0),
            }),
            json!({}),
        );
        a.retries = 100;
        a.wait = Duration::from_millis(1);
        let ctx = ctx();
        ctx.cancel.cancel();
        let err = a.run(&mut store, &ctx).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Cancelled);
    }
}
