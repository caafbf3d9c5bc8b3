//! Error taxonomy for the workflow engine
//!
//! Every failure the engine surfaces carries a stable category key, a
//! fixability flag, and an optional machine-actionable suggestion. Agents
//! consume these fields to self-repair workflows, so the shape of
//! [`EngineError`] is a contract, not an implementation detail.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical error categories with stable string keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Structural or semantic IR validation failure
    Validation,
    /// Template reference could not be resolved
    Template,
    /// HTTP transport failure (not a 4xx/5xx response, which is routed)
    Http,
    /// Shell command could not be spawned or was rejected by safety checks
    Shell,
    /// LLM client failure
    Llm,
    /// Tool-protocol transport or capacity failure
    ToolProtocol,
    /// Filesystem failure
    File,
    /// Per-node or workflow deadline exceeded
    Timeout,
    /// Execution cancelled by the caller
    Cancelled,
    /// Engine bug or unclassified failure
    Internal,
}

impl ErrorCategory {
    /// The stable wire key for this category.
    pub fn key(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Template => "template",
            ErrorCategory::Http => "http",
            ErrorCategory::Shell => "shell",
            ErrorCategory::Llm => "llm",
            ErrorCategory::ToolProtocol => "tool-protocol",
            ErrorCategory::File => "file",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Internal => "internal",
        }
    }

    /// Whether errors of this category are worth offering to a repair hook.
    pub fn default_fixable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Validation
                | ErrorCategory::Template
                | ErrorCategory::Shell
                | ErrorCategory::File
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// A single engine error with category, fixability metadata and an optional
/// suggestion string for agent-driven repair.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{category}: {message}")]
pub struct EngineError {
    /// Canonical category key
    pub category: ErrorCategory,
    /// Human-readable message
    pub message: String,
    /// Node that produced the error, when attributable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Whether an agent-driven repair loop should attempt a fix
    pub fixable: bool,
    /// What to change, in terms an agent can act on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// The shell command that failed, for `shell` errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_command: Option<String>,
    /// Exit code of the failed shell command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_exit_code: Option<i32>,
    /// Fields that were available at the failing reference point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_fields: Option<Vec<String>>,
}

impl EngineError {
    /// Create an error with the category's default fixability.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            node_id: None,
            fixable: category.default_fixable(),
            suggestion: None,
            shell_command: None,
            shell_exit_code: None,
            available_fields: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Template, message)
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Http, message)
    }

    pub fn shell(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Shell, message)
    }

    pub fn llm(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Llm, message)
    }

    pub fn tool_protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::ToolProtocol, message)
    }

    pub fn file(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::File, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, message)
    }

    /// Attach the node id that produced this error.
    #[must_use]
    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Attach a repair suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Override the fixability flag.
    #[must_use]
    pub fn with_fixable(mut self, fixable: bool) -> Self {
        self.fixable = fixable;
        self
    }

    /// Attach shell command context.
    #[must_use]
    pub fn with_shell(mut self, command: impl Into<String>, exit_code: Option<i32>) -> Self {
        self.shell_command = Some(command.into());
        self.shell_exit_code = exit_code;
        self
    }

    /// Attach the fields that were available at the failure point.
    #[must_use]
    pub fn with_available_fields(mut self, fields: Vec<String>) -> Self {
        self.available_fields = Some(fields);
        self
    }

    /// Whether a retry may help (transport-level failures only).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::Http | ErrorCategory::ToolProtocol | ErrorCategory::Llm
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::file(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::validation(format!("invalid JSON: {err}")).with_fixable(true)
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// All validation diagnostics for one document, in stable order.
///
/// The validator never stops at the first failure; agents fix a workflow in
/// one pass by walking `errors` front to back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<EngineError>,
}

impl std::error::Error for ValidationReport {}

impl ValidationReport {
    pub fn new(errors: Vec<EngineError>) -> Self {
        Self { errors }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// The primary error: the first diagnostic in stable order.
    pub fn primary(&self) -> Option<&EngineError> {
        self.errors.first()
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} validation error(s):", self.errors.len())?;
        for err in &self.errors {
            writeln!(f, "  - {err}")?;
        }
        Ok(())
    }
}
