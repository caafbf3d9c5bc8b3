//! Engine configuration from the environment
//!
//! All environment reads happen once, at construction time; the resulting
//! snapshot is immutable and threaded through the executor and tracer.

use std::path::PathBuf;

/// How unresolved template references are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionMode {
    /// Unresolved reference aborts the workflow
    #[default]
    Strict,
    /// Unresolved reference becomes `""` (interpolated) or null (pure) with a warning
    Permissive,
}

impl ResolutionMode {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(ResolutionMode::Strict),
            "permissive" => Some(ResolutionMode::Permissive),
            _ => None,
        }
    }
}

/// Immutable engine configuration snapshot.
///
/// Trace truncation limits mirror the environment contract:
/// `PROMPT_MAX`, `RESPONSE_MAX`, `STORE_MAX`, `DICT_MAX`, `LLM_CALLS_MAX`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max characters of an LLM prompt kept in a trace
    pub prompt_max: usize,
    /// Max characters of an LLM response kept in a trace
    pub response_max: usize,
    /// Max characters of any single store value kept in a trace snapshot
    pub store_max: usize,
    /// Max entries of any dict kept in a trace snapshot
    pub dict_max: usize,
    /// Max LLM call records kept per trace
    pub llm_calls_max: usize,
    /// Reject unsafe shell commands before spawning
    pub shell_strict: bool,
    /// Template resolution policy
    pub template_mode: ResolutionMode,
    /// Register test-only nodes in the registry
    pub include_test_nodes: bool,
    /// Workspace-local directory for traces, caches and debug artifacts
    pub workspace_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prompt_max: 2_000,
            response_max: 2_000,
            store_max: 4_000,
            dict_max: 50,
            llm_calls_max: 20,
            shell_strict: false,
            template_mode: ResolutionMode::Strict,
            include_test_nodes: false,
            workspace_dir: PathBuf::from(".warpflow"),
        }
    }
}

impl EngineConfig {
    /// Read the configuration from the process environment.
    ///
    /// Unparseable values fall back to defaults; absent values are defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            prompt_max: env_usize("PROMPT_MAX", defaults.prompt_max),
            response_max: env_usize("RESPONSE_MAX", defaults.response_max),
            store_max: env_usize("STORE_MAX", defaults.store_max),
            dict_max: env_usize("DICT_MAX", defaults.dict_max),
            llm_calls_max: env_usize("LLM_CALLS_MAX", defaults.llm_calls_max),
            shell_strict: env_bool("SHELL_STRICT", defaults.shell_strict),
            template_mode: std::env::var("TEMPLATE_RESOLUTION_MODE")
                .ok()
                .and_then(|v| ResolutionMode::from_env_value(&v))
                .unwrap_or(defaults.template_mode),
            include_test_nodes: env_bool("INCLUDE_TEST_NODES", defaults.include_test_nodes),
            workspace_dir: defaults.workspace_dir,
        }
    }

    /// Override the workspace directory (used by tests and the CLI).
    #[must_use]
    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    /// Directory where trace JSON and debug Markdown files are written.
    pub fn debug_dir(&self) -> PathBuf {
        self.workspace_dir.join("debug")
    }

    /// Directory holding per-workflow iteration caches.
    pub fn cache_dir(&self) -> PathBuf {
        self.workspace_dir.join("cache")
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
