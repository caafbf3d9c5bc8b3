//! The three-phase node contract
//!
//! Every node runs as `prep → exec → post`. `prep` reads from the store
//! view and validates inputs; `exec` performs the work and is the only
//! phase allowed to fail transiently (it is retried); `post` writes results
//! through the namespace lens and picks the next action. Payloads between
//! phases are JSON values because node wiring is declared in the IR, not in
//! the type system.

use crate::config::EngineConfig;
use crate::ir::{DEFAULT_ACTION, ERROR_ACTION};
use crate::llm::{LlmCallRecord, LlmClient};
use crate::store::{Namespace, StoreView};
use crate::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The routing decision a node's `post` phase returns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Action(String);

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The `"default"` action.
    pub fn default_action() -> Self {
        Self(DEFAULT_ACTION.to_string())
    }

    /// The conventional `"error"` action for semantic non-success.
    pub fn error_action() -> Self {
        Self(ERROR_ACTION.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_error(&self) -> bool {
        self.0 == ERROR_ACTION
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Action {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Per-attempt execution context handed to `exec`.
///
/// Carries retry counters, the cancellation token, the per-node timeout and
/// a capture slot for LLM call records the tracer drains afterwards.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub execution_id: String,
    pub node_id: String,
    /// 0-based attempt number
    pub attempt: u32,
    pub max_retries: u32,
    pub wait: Duration,
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
    llm_calls: Arc<Mutex<Vec<LlmCallRecord>>>,
}

impl ExecContext {
    pub fn new(execution_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            node_id: node_id.into(),
            attempt: 0,
            max_retries: 0,
            wait: Duration::ZERO,
            timeout: None,
            cancel: CancellationToken::new(),
            llm_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, wait: Duration) -> Self {
        self.max_retries = max_retries;
        self.wait = wait;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether another retry attempt is available.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    /// Record an LLM call for the tracer.
    pub fn record_llm_call(&self, record: LlmCallRecord) {
        self.llm_calls.lock().push(record);
    }

    /// Drain recorded LLM calls (taken by the instrumentation layer).
    pub fn take_llm_calls(&self) -> Vec<LlmCallRecord> {
        std::mem::take(&mut *self.llm_calls.lock())
    }
}

/// A unit of work with the three-phase contract.
#[async_trait]
pub trait Node: Send + Sync {
    /// Read and validate inputs. Must not block on I/O and must not write
    /// to the store.
    async fn prep(&self, view: &StoreView<'_>, params: &Value) -> Result<Value>;

    /// Perform the work. The only phase that may fail transiently; it is
    /// retried under the node's retry policy.
    async fn exec(&self, prep: Value, ctx: &ExecContext) -> Result<Value>;

    /// Write results through the namespace lens and pick the next action.
    /// Must not block on I/O.
    async fn post(&self, ns: &mut Namespace<'_>, prep: &Value, exec: Value) -> Result<Action>;

    /// Runs after all retries of `exec` are exhausted. The binding
    /// convention is raise-with-suggestion: return a typed error carrying a
    /// category and a suggestion rather than a sentinel value.
    async fn exec_fallback(&self, _prep: Value, error: EngineError, _ctx: &ExecContext) -> Result<Value> {
        Err(error)
    }
}

/// Collaborators injected into node factories at compile time.
#[derive(Clone, Default)]
pub struct NodeContext {
    pub config: EngineConfig,
    /// LLM seam; absent unless the embedding application configures one
    pub llm: Option<Arc<dyn LlmClient>>,
}

/// Constructs node instances from their IR spec.
pub trait NodeFactory: Send + Sync {
    fn create(&self, spec: &crate::ir::NodeSpec, ctx: &NodeContext) -> Result<Arc<dyn Node>>;
}

/// Factory over a plain function, for nodes with no construction state.
pub struct FnNodeFactory<F>(pub F);

impl<F> NodeFactory for FnNodeFactory<F>
where
    F: Fn(&crate::ir::NodeSpec, &NodeContext) -> Result<Arc<dyn Node>> + Send + Sync,
{
    fn create(&self, spec: &crate::ir::NodeSpec, ctx: &NodeContext) -> Result<Arc<dyn Node>> {
        (self.0)(spec, ctx)
    }
}
