//! Warpflow: a workflow compiler and execution engine
//!
//! A declarative, JSON-shaped intermediate representation describes a
//! directed graph of typed nodes; warpflow validates it, compiles it into a
//! chain-wrapped executable graph, and runs it with deterministic template
//! interpolation, per-node namespaced state, retries and fallbacks, batch
//! fan-out, per-execution tracing, and an iteration cache.
//!
//! The pieces, bottom-up:
//!
//! - [`ir`] + [`validate`] — the workflow document and its validator
//! - [`registry`] + [`interface`] — node discovery and static contracts
//! - [`template`] — `${path}` resolution over the shared store
//! - [`store`] — the per-execution shared state with namespacing
//! - [`node`] + [`wrapper`] — the three-phase contract and middleware chain
//! - [`compiler`] + [`executor`] — IR → graph → run
//! - [`trace`] + [`debug_report`] — per-execution artifacts
//! - [`cache`] — input-envelope keyed replay
//! - [`discovery`] — intent → ranked node/workflow candidates
//!
//! ```no_run
//! use std::sync::Arc;
//! use warpflow::{validate, Executor, ExecutionOptions, NodeContext, NodeRegistry, Workflow};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(NodeRegistry::new());
//! // ... register nodes ...
//! let workflow = Workflow::from_json(r#"{"nodes": [{"id": "a", "type": "echo"}]}"#)?;
//! let ir = validate(&workflow, &registry)?;
//! let executor = Executor::new(registry, NodeContext::default());
//! let report = executor.execute(&ir, ExecutionOptions::default()).await;
//! println!("{}", report.final_status);
//! # Ok(())
//! # }
//! ```

pub mod binary;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod debug_report;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod interface;
pub mod ir;
pub mod llm;
pub mod markdown;
pub mod node;
pub mod registry;
pub mod store;
pub mod template;
pub mod trace;
pub mod validate;
pub mod wrapper;

pub use config::{EngineConfig, ResolutionMode};
pub use error::{EngineError, ErrorCategory, Result, ValidationReport};
pub use executor::{ExecutionOptions, ExecutionReport, Executor, RepairHook};
pub use interface::Interface;
pub use ir::{CanonicalIr, Workflow};
pub use llm::{LlmClient, LlmResponse, LlmUsage, MockLlm};
pub use node::{Action, ExecContext, Node, NodeContext, NodeFactory};
pub use registry::NodeRegistry;
pub use store::{Namespace, SharedStore, StoreView};
pub use trace::{ExecutionTrace, FinalStatus};
pub use validate::validate;
