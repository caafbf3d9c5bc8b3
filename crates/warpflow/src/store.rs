//! Shared execution state
//!
//! One [`SharedStore`] exists per execution: a hierarchical map keyed first
//! by node id, then by the keys each node writes. Nodes never touch the map
//! directly; they write through a [`Namespace`] lens that confines writes to
//! their own subtree, and templates read through a read-only [`StoreView`]
//! spanning the whole store. Three root-level side-channel keys bypass
//! namespacing and are the only cross-node signals.

use serde_json::{Map, Value};

/// Checkpoint side-channel: completed node ids, chosen actions, cache keys.
pub const EXECUTION_KEY: &str = "__execution__";

/// Warnings side-channel: accumulated strings that degrade the final status.
pub const WARNINGS_KEY: &str = "__warnings__";

/// Set when a non-fixable error occurred; read by the repair loop.
pub const NON_REPAIRABLE_KEY: &str = "__non_repairable_error__";

/// Root key injected into each batch iteration's store copy.
pub const ITEM_KEY: &str = "item";

/// Root key under which workflow-level inputs are seeded.
pub const INPUTS_KEY: &str = "inputs";

/// Reserved root-level keys that bypass namespacing.
pub const SIDE_CHANNEL_KEYS: &[&str] = &[EXECUTION_KEY, WARNINGS_KEY, NON_REPAIRABLE_KEY];

/// One path segment: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

impl std::fmt::Display for PathSeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSeg::Key(k) => f.write_str(k),
            PathSeg::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// The mutable state of one execution.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    root: Map<String, Value>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed workflow-level inputs under the `inputs` root key.
    pub fn with_inputs(inputs: Map<String, Value>) -> Self {
        let mut store = Self::new();
        if !inputs.is_empty() {
            store.root.insert(INPUTS_KEY.to_string(), Value::Object(inputs));
        }
        store
    }

    /// Read-only view over the whole store, for template resolution.
    pub fn view(&self) -> StoreView<'_> {
        StoreView { root: &self.root }
    }

    /// Write lens confined to one node's namespace.
    pub fn namespace<'a>(&'a mut self, node_id: &str) -> Namespace<'a> {
        Namespace {
            store: self,
            node_id: node_id.to_string(),
        }
    }

    /// Framework-level root insert (inputs, side-channels, batch results).
    pub fn insert_root(&mut self, key: impl Into<String>, value: Value) {
        self.root.insert(key.into(), value);
    }

    /// The value stored under a root key.
    pub fn get_root(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Append to the `__warnings__` side-channel.
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        tracing::warn!(warning = %warning, "workflow warning");
        let entry = self
            .root
            .entry(WARNINGS_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = entry {
            list.push(Value::String(warning));
        }
    }

    /// Accumulated warnings, in emission order.
    pub fn warnings(&self) -> Vec<String> {
        match self.root.get(WARNINGS_KEY) {
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Record the `__non_repairable_error__` side-channel marker.
    pub fn mark_non_repairable(&mut self, message: impl Into<String>) {
        self.root
            .insert(NON_REPAIRABLE_KEY.to_string(), Value::String(message.into()));
    }

    /// Snapshot the whole store as a JSON value.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.root.clone())
    }

    /// Single-level copy for batch isolation. Interior values are JSON
    /// trees that nodes never mutate in place, so a clone of the root map
    /// is sufficient isolation.
    pub fn clone_for_iteration(&self) -> SharedStore {
        SharedStore {
            root: self.root.clone(),
        }
    }

    /// The outputs a node has written so far, as an object.
    pub fn node_outputs(&self, node_id: &str) -> Option<&Map<String, Value>> {
        self.root.get(node_id).and_then(Value::as_object)
    }

    /// Compute key-level mutations between two snapshots.
    ///
    /// Keys are reported in dotted `root.key` form, one level below the
    /// root (the level at which nodes write).
    pub fn diff(before: &Value, after: &Value) -> MutationSet {
        let empty = Map::new();
        let before_map = before.as_object().unwrap_or(&empty);
        let after_map = after.as_object().unwrap_or(&empty);
        let mut mutations = MutationSet::default();

        for (root_key, after_value) in after_map {
            match before_map.get(root_key) {
                None => collect_keys(root_key, after_value, &mut mutations.added),
                Some(before_value) if before_value != after_value => {
                    diff_level(root_key, before_value, after_value, &mut mutations);
                }
                Some(_) => {}
            }
        }
        for (root_key, before_value) in before_map {
            if !after_map.contains_key(root_key) {
                collect_keys(root_key, before_value, &mut mutations.removed);
            }
        }
        mutations
    }
}

fn collect_keys(prefix: &str, value: &Value, out: &mut Vec<String>) {
    match value.as_object() {
        Some(map) if !map.is_empty() => {
            for key in map.keys() {
                out.push(format!("{prefix}.{key}"));
            }
        }
        _ => out.push(prefix.to_string()),
    }
}

fn diff_level(prefix: &str, before: &Value, after: &Value, mutations: &mut MutationSet) {
    match (before.as_object(), after.as_object()) {
        (Some(before_map), Some(after_map)) => {
            for (key, after_value) in after_map {
                let path = format!("{prefix}.{key}");
                match before_map.get(key) {
                    None => mutations.added.push(path),
                    Some(before_value) if before_value != after_value => {
                        mutations.modified.push(path);
                    }
                    Some(_) => {}
                }
            }
            for key in before_map.keys() {
                if !after_map.contains_key(key) {
                    mutations.removed.push(format!("{prefix}.{key}"));
                }
            }
        }
        _ => mutations.modified.push(prefix.to_string()),
    }
}

/// Added/removed/modified key sets between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MutationSet {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl MutationSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Read-only union view over the whole store.
#[derive(Debug, Clone, Copy)]
pub struct StoreView<'a> {
    root: &'a Map<String, Value>,
}

impl<'a> StoreView<'a> {
    /// Resolve a parsed path against the store.
    pub fn resolve(&self, path: &[PathSeg]) -> Option<&'a Value> {
        let mut current: Option<&Value> = None;
        for (i, seg) in path.iter().enumerate() {
            current = match (i, seg, current) {
                (0, PathSeg::Key(key), _) => self.root.get(key),
                (_, PathSeg::Key(key), Some(value)) => value.get(key.as_str()),
                (_, PathSeg::Index(idx), Some(value)) => value.get(idx),
                _ => None,
            };
            current?;
        }
        current
    }

    /// How many leading segments of `path` resolve, and the keys available
    /// at the first failure point. Used to build precise template errors.
    pub fn resolvable_prefix(&self, path: &[PathSeg]) -> (usize, Vec<String>) {
        let mut current: Option<&Value> = None;
        for (i, seg) in path.iter().enumerate() {
            let next = match (i, seg, current) {
                (0, PathSeg::Key(key), _) => self.root.get(key),
                (_, PathSeg::Key(key), Some(value)) => value.get(key.as_str()),
                (_, PathSeg::Index(idx), Some(value)) => value.get(idx),
                _ => None,
            };
            match next {
                Some(value) => current = Some(value),
                None => {
                    let available = match i {
                        0 => self
                            .root
                            .keys()
                            .filter(|k| !SIDE_CHANNEL_KEYS.contains(&k.as_str()))
                            .cloned()
                            .collect(),
                        _ => keys_of(current),
                    };
                    return (i, available);
                }
            }
        }
        (path.len(), keys_of(current))
    }

    /// Root-level keys, excluding side-channels.
    pub fn root_keys(&self) -> Vec<String> {
        self.root
            .keys()
            .filter(|k| !SIDE_CHANNEL_KEYS.contains(&k.as_str()))
            .cloned()
            .collect()
    }

    pub fn get_root(&self, key: &str) -> Option<&'a Value> {
        self.root.get(key)
    }
}

fn keys_of(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        Some(Value::Array(list)) => (0..list.len()).map(|i| format!("[{i}]")).collect(),
        _ => Vec::new(),
    }
}

/// Write lens confining a node to its own namespace.
#[derive(Debug)]
pub struct Namespace<'a> {
    store: &'a mut SharedStore,
    node_id: String,
}

impl Namespace<'_> {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Write a key inside this node's namespace.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let entry = self
            .store
            .root
            .entry(self.node_id.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = entry {
            map.insert(key.into(), value);
        }
    }

    /// Read back a key from this node's own namespace.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.store.root.get(&self.node_id)?.get(key)
    }

    /// Read-only view over the whole store (other namespaces included).
    pub fn view(&self) -> StoreView<'_> {
        self.store.view()
    }

    /// Side-channel: append a warning visible to the whole execution.
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.store.push_warning(warning);
    }

    /// Side-channel: record a non-repairable error marker.
    pub fn mark_non_repairable(&mut self, message: impl Into<String>) {
        self.store.mark_non_repairable(message);
    }
}
