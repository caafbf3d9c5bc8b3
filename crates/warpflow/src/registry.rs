//! Node registry
//!
//! Maps kebab-case node type names to their implementation factory and
//! static [`Interface`]. Three registration paths exist: built-in nodes
//! register with an interface docstring, the tool-protocol client registers
//! synthetic nodes at startup, and `scan` walks a directory for
//! interface-only declarations so validation and discovery can reason about
//! nodes implemented elsewhere.
//!
//! The registry is read-mostly shared state: one reader-writer lock, no
//! other synchronization.

use crate::interface::Interface;
use crate::node::NodeFactory;
use crate::{EngineError, Result};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::OnceLock;

/// Names the save service refuses for workflows; mirrored here so tooling
/// can warn early.
pub const RESERVED_NAMES: &[&str] = &[
    "skill", "run", "validate", "nodes", "discover", "trace", "save", "list", "help",
];

fn kebab_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        let re = Regex::new(r"^[a-z][a-z0-9]*(-[a-z0-9]+)*$").expect("static regex");
        re
    })
}

/// A registered node: interface plus, for runnable nodes, a factory.
#[derive(Clone)]
pub struct RegisteredNode {
    pub name: String,
    /// Version participates in iteration-cache keys; bumping it invalidates
    /// cached outputs of this node type.
    pub version: String,
    pub interface: Interface,
    /// Absent for interface-only entries discovered by `scan`
    pub factory: Option<Arc<dyn NodeFactory>>,
    /// Registered by the tool-protocol client
    pub synthetic: bool,
    /// Source file for scanned entries
    pub origin: Option<PathBuf>,
}

impl RegisteredNode {
    pub fn is_runnable(&self) -> bool {
        self.factory.is_some()
    }
}

/// The process-wide node registry.
#[derive(Default)]
pub struct NodeRegistry {
    inner: RwLock<HashMap<String, RegisteredNode>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implemented node. `doc` must contain an `Interface:`
    /// block; re-registering a name replaces the previous entry.
    pub fn register(
        &self,
        name: &str,
        version: &str,
        doc: &str,
        factory: Arc<dyn NodeFactory>,
    ) -> Result<()> {
        let interface = Interface::parse(doc)
            .map_err(|e| EngineError::validation(format!("node '{name}': {}", e.message)))?;
        self.insert(RegisteredNode {
            name: name.to_string(),
            version: version.to_string(),
            interface,
            factory: Some(factory),
            synthetic: false,
            origin: None,
        })
    }

    /// Register a synthetic node with a pre-built interface (tool-protocol).
    pub fn register_synthetic(
        &self,
        name: &str,
        version: &str,
        interface: Interface,
        factory: Arc<dyn NodeFactory>,
    ) -> Result<()> {
        self.insert(RegisteredNode {
            name: name.to_string(),
            version: version.to_string(),
            interface,
            factory: Some(factory),
            synthetic: true,
            origin: None,
        })
    }

    fn insert(&self, node: RegisteredNode) -> Result<()> {
        if !kebab_regex().is_match(&node.name) {
            return Err(EngineError::validation(format!(
                "node name '{}' is not kebab-case",
                node.name
            )));
        }
        tracing::debug!(node = %node.name, version = %node.version, synthetic = node.synthetic, "registered node");
        self.inner.write().insert(node.name.clone(), node);
        Ok(())
    }

    /// Look up a registered node by name.
    pub fn lookup(&self, name: &str) -> Option<RegisteredNode> {
        self.inner.read().get(name).cloned()
    }

    /// List `(name, interface summary)` pairs, sorted by name. A filter
    /// substring-matches against name and description.
    pub fn list(&self, filter: Option<&str>) -> Vec<(String, String)> {
        let guard = self.inner.read();
        let mut entries: Vec<(String, String)> = guard
            .values()
            .filter(|node| match filter {
                Some(f) => {
                    let f = f.to_lowercase();
                    node.name.to_lowercase().contains(&f)
                        || node.interface.description.to_lowercase().contains(&f)
                }
                None => true,
            })
            .map(|node| (node.name.clone(), node.interface.summary()))
            .collect();
        entries.sort();
        entries
    }

    /// All registered entries, sorted by name (for discovery index builds).
    pub fn entries(&self) -> Vec<RegisteredNode> {
        let guard = self.inner.read();
        let mut entries: Vec<RegisteredNode> = guard.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Workflow names the save service rejects.
    pub fn reserved_names(&self) -> &'static [&'static str] {
        RESERVED_NAMES
    }

    /// Incrementally scan a directory tree for interface declarations.
    ///
    /// A declaration is a text file (`.rs` or `.md`) containing a line
    /// `Node: <kebab-name>` followed by an `Interface:` block. Scanning is
    /// idempotent: scanning N times then looking up yields identical
    /// interfaces. Files without a declaration are skipped silently.
    pub fn scan(&self, path: &Path) -> Result<usize> {
        let mut registered = 0usize;
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("rs") | Some("md")
                )
            })
            .collect();
        files.sort();

        for file in files {
            let text = match std::fs::read_to_string(&file) {
                Ok(text) => text,
                Err(_) => continue, // non-UTF-8 or unreadable; not a declaration
            };
            for (name, doc) in extract_declarations(&text) {
                let interface = Interface::parse(&doc).map_err(|e| {
                    EngineError::validation(format!(
                        "scan {}: node '{name}': {}",
                        file.display(),
                        e.message
                    ))
                })?;
                // Never shadow an implemented node with a scanned interface.
                if self.lookup(&name).map(|n| n.is_runnable()) == Some(true) {
                    continue;
                }
                self.insert(RegisteredNode {
                    name,
                    version: "scanned".to_string(),
                    interface,
                    factory: None,
                    synthetic: false,
                    origin: Some(file.clone()),
                })?;
                registered += 1;
            }
        }
        tracing::debug!(path = %path.display(), registered, "registry scan complete");
        Ok(registered)
    }
}

/// Pull `(name, doc-with-interface-block)` declarations from file text.
///
/// Doc comment markers (`//!`, `///`, `//`) are stripped so declarations
/// can live inside Rust doc comments or plain Markdown.
fn extract_declarations(text: &str) -> Vec<(String, String)> {
    let cleaned: Vec<String> = text
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            for marker in ["//!", "///", "//"] {
                if let Some(rest) = trimmed.strip_prefix(marker) {
                    return rest.strip_prefix(' ').unwrap_or(rest).to_string();
                }
            }
            line.to_string()
        })
        .collect();

    let mut declarations = Vec::new();
    let mut i = 0;
    while i < cleaned.len() {
        if let Some(name) = cleaned[i].trim().strip_prefix("Node: ") {
            let name = name.trim().to_string();
            // The declaration body runs to the first blank line after the
            // Interface: block ends (Interface::parse stops there anyway).
            let mut body = Vec::new();
            let mut j = i + 1;
            let mut seen_interface = false;
            while j < cleaned.len() {
                let line = &cleaned[j];
                if line.trim() == "Interface:" {
                    seen_interface = true;
                }
                if seen_interface && line.trim().is_empty() {
                    break;
                }
                body.push(line.clone());
                j += 1;
            }
            if seen_interface {
                declarations.push((name, body.join("\n")));
            }
            i = j;
        }
        i += 1;
    }
    declarations
}
