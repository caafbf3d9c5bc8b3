//! Node interface extraction
//!
//! Every node carries a static Interface describing what it reads from the
//! shared store, what it writes (as a typed tree, bounded depth), which
//! params it accepts, and which actions it can emit. The Interface is parsed
//! from a line-oriented block in the node's documentation text:
//!
//! ```text
//! Reads a file from disk into shared state.
//!
//! Interface:
//! - Reads: shared["config.path"]: string
//! - Writes: shared["content"]: string | bytes
//!     - size: int
//! - Params: path: string   # default ".", stdin if piped
//! - Actions: default (file read), error (file missing)
//! ```
//!
//! The writes tree feeds template path validation and discovery; params feed
//! required-param checks in the validator.

use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Maximum nesting depth of the writes tree.
pub const MAX_WRITE_DEPTH: usize = 5;

/// The closed set of declared value types, plus unions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Int,
    Float,
    Bool,
    Dict,
    List,
    Bytes,
    /// Union of two or more base types, e.g. `string | bytes`
    Union(Vec<ValueType>),
}

impl ValueType {
    /// Parse a type expression: a base type or a `|`-separated union.
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split('|').map(str::trim).collect();
        if parts.len() > 1 {
            let members = parts
                .iter()
                .map(|p| Self::parse_base(p))
                .collect::<Result<Vec<_>>>()?;
            return Ok(ValueType::Union(members));
        }
        Self::parse_base(parts[0])
    }

    fn parse_base(text: &str) -> Result<Self> {
        match text {
            "string" => Ok(ValueType::String),
            "int" => Ok(ValueType::Int),
            "float" => Ok(ValueType::Float),
            "bool" => Ok(ValueType::Bool),
            "dict" => Ok(ValueType::Dict),
            "list" => Ok(ValueType::List),
            "bytes" => Ok(ValueType::Bytes),
            other => Err(EngineError::validation(format!(
                "unknown interface type '{other}' (expected string, int, float, bool, dict, list or bytes)"
            ))),
        }
    }

    /// Whether a JSON value is an acceptable instance of this type.
    ///
    /// `bytes` travel as base64 strings, so strings satisfy `bytes`.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueType::String | ValueType::Bytes => value.is_string(),
            ValueType::Int => value.is_i64() || value.is_u64(),
            ValueType::Float => value.is_number(),
            ValueType::Bool => value.is_boolean(),
            ValueType::Dict => value.is_object(),
            ValueType::List => value.is_array(),
            ValueType::Union(members) => members.iter().any(|m| m.accepts(value)),
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::String => f.write_str("string"),
            ValueType::Int => f.write_str("int"),
            ValueType::Float => f.write_str("float"),
            ValueType::Bool => f.write_str("bool"),
            ValueType::Dict => f.write_str("dict"),
            ValueType::List => f.write_str("list"),
            ValueType::Bytes => f.write_str("bytes"),
            ValueType::Union(members) => {
                let rendered: Vec<String> = members.iter().map(ToString::to_string).collect();
                f.write_str(&rendered.join(" | "))
            }
        }
    }
}

/// A declared read: a dotted path into the shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadSpec {
    pub path: String,
    pub value_type: ValueType,
}

/// One node of the typed writes tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteNode {
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, WriteNode>,
}

impl WriteNode {
    pub fn leaf(value_type: ValueType) -> Self {
        Self {
            value_type,
            children: BTreeMap::new(),
        }
    }
}

/// A declared param with type, optional default and stdin marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub value_type: ValueType,
    /// Value assumed when the param is absent; absence of a default makes
    /// the param required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Param accepts piped stdin at the CLI boundary
    #[serde(default)]
    pub stdin: bool,
}

impl ParamSpec {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// A declared action with an optional "when" description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

/// The static contract of a node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Interface {
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reads: Vec<ReadSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub writes: BTreeMap<String, WriteNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionSpec>,
}

impl Interface {
    /// Parse an interface from documentation text containing an
    /// `Interface:` block. Text before the block becomes the description.
    pub fn parse(doc: &str) -> Result<Self> {
        let mut description_lines: Vec<&str> = Vec::new();
        let mut lines = doc.lines().peekable();
        let mut found = false;
        for line in lines.by_ref() {
            if line.trim() == "Interface:" {
                found = true;
                break;
            }
            description_lines.push(line.trim());
        }
        if !found {
            return Err(EngineError::validation(
                "documentation has no 'Interface:' block",
            ));
        }

        let mut interface = Interface {
            description: description_lines.join(" ").trim().to_string(),
            ..Interface::default()
        };

        // The writes entry currently accepting nested children.
        let mut open_write: Option<String> = None;
        // Path of write keys from the open root down to the last parsed depth.
        let mut write_stack: Vec<String> = Vec::new();

        for raw in lines {
            let line = raw.trim_end();
            if line.trim().is_empty() {
                break; // blank line ends the block
            }
            let indent = line.len() - line.trim_start().len();
            let body = strip_comment(line.trim_start());
            if body.is_empty() {
                continue;
            }

            if indent == 0 {
                open_write = None;
                write_stack.clear();
                let entry = body.strip_prefix("- ").ok_or_else(|| {
                    EngineError::validation(format!("interface line is not a list entry: '{line}'"))
                })?;
                if let Some(rest) = entry.strip_prefix("Reads:") {
                    let (path, ty) = parse_shared_entry(rest)?;
                    interface.reads.push(ReadSpec {
                        path,
                        value_type: ty,
                    });
                } else if let Some(rest) = entry.strip_prefix("Writes:") {
                    let (key, ty) = parse_shared_entry(rest)?;
                    interface.writes.insert(key.clone(), WriteNode::leaf(ty));
                    open_write = Some(key);
                } else if entry.starts_with("Params:") {
                    // Param defaults and the stdin marker live in the
                    // comment, so parse from the uncommented line.
                    let raw = line
                        .trim_start()
                        .strip_prefix("- Params:")
                        .unwrap_or_default();
                    interface.params.push(parse_param(raw)?);
                } else if let Some(rest) = entry.strip_prefix("Actions:") {
                    interface.actions = parse_actions(rest)?;
                } else {
                    return Err(EngineError::validation(format!(
                        "unknown interface entry: '{entry}'"
                    )));
                }
            } else {
                // Nested write child: 2-space indent per level below the
                // 4-space base of the first child line.
                let root = open_write.clone().ok_or_else(|| {
                    EngineError::validation(format!(
                        "nested interface entry outside a Writes block: '{line}'"
                    ))
                })?;
                let depth = 1 + indent.saturating_sub(4) / 2;
                if depth + 1 > MAX_WRITE_DEPTH {
                    return Err(EngineError::validation(format!(
                        "writes tree deeper than {MAX_WRITE_DEPTH} levels at '{line}'"
                    )));
                }
                let entry = body.strip_prefix("- ").ok_or_else(|| {
                    EngineError::validation(format!("interface line is not a list entry: '{line}'"))
                })?;
                let (name, ty_text) = split_colon(entry)?;
                let ty = ValueType::parse(ty_text)?;
                write_stack.truncate(depth - 1);
                let parent = interface
                    .writes
                    .get_mut(&root)
                    .and_then(|node| descend(node, &write_stack))
                    .ok_or_else(|| {
                        EngineError::validation(format!(
                            "nested write '{name}' skips an intermediate level"
                        ))
                    })?;
                parent
                    .children
                    .insert(name.to_string(), WriteNode::leaf(ty));
                write_stack.push(name.to_string());
            }
        }

        Ok(interface)
    }

    /// Flatten the writes tree to dotted paths (`result.issues`, ...).
    pub fn write_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for (key, node) in &self.writes {
            collect_paths(key, node, &mut paths);
        }
        paths
    }

    /// Whether a dotted path is covered by the declared writes tree.
    ///
    /// A path descending *through* a declared `dict`/`list` leaf is accepted:
    /// structure below the declared depth is unknowable statically.
    pub fn covers_write_path(&self, segments: &[&str]) -> bool {
        let Some(first) = segments.first() else {
            return false;
        };
        let Some(mut node) = self.writes.get(*first) else {
            return false;
        };
        for segment in &segments[1..] {
            if node.children.is_empty() {
                return matches!(
                    node.value_type,
                    ValueType::Dict | ValueType::List | ValueType::Union(_)
                );
            }
            match node.children.get(*segment) {
                Some(child) => node = child,
                None => return false,
            }
        }
        true
    }

    /// Look up a declared param by name.
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// One-line summary for listings.
    pub fn summary(&self) -> String {
        let first_sentence = self
            .description
            .split('.')
            .next()
            .unwrap_or(&self.description)
            .trim();
        first_sentence.to_string()
    }
}

fn descend<'a>(node: &'a mut WriteNode, stack: &[String]) -> Option<&'a mut WriteNode> {
    let mut current = node;
    for key in stack {
        current = current.children.get_mut(key)?;
    }
    Some(current)
}

fn collect_paths(prefix: &str, node: &WriteNode, out: &mut Vec<String>) {
    out.push(prefix.to_string());
    for (key, child) in &node.children {
        collect_paths(&format!("{prefix}.{key}"), child, out);
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => line[..pos].trim_end(),
        None => line,
    }
}

/// Parse `shared["<key>"]: <type>`.
fn parse_shared_entry(text: &str) -> Result<(String, ValueType)> {
    let text = text.trim();
    let inner = text
        .strip_prefix("shared[\"")
        .and_then(|rest| rest.split_once("\"]:"))
        .ok_or_else(|| {
            EngineError::validation(format!(
                "expected shared[\"<key>\"]: <type>, found '{text}'"
            ))
        })?;
    let (key, ty_text) = inner;
    if key.is_empty() {
        return Err(EngineError::validation("empty shared key in interface"));
    }
    Ok((key.to_string(), ValueType::parse(ty_text.trim())?))
}

/// Parse `name: type   # default <value>, stdin if piped`. The comment is
/// semantic here: it carries the default value and the stdin marker.
fn parse_param(text: &str) -> Result<ParamSpec> {
    let (decl, comment) = match text.find('#') {
        Some(pos) => (&text[..pos], Some(text[pos + 1..].trim())),
        None => (text, None),
    };
    let (name, ty_text) = split_colon(decl.trim())?;
    let mut spec = ParamSpec {
        name: name.to_string(),
        value_type: ValueType::parse(ty_text)?,
        default: None,
        stdin: false,
    };
    if let Some(comment) = comment {
        for clause in comment.split(',') {
            let clause = clause.trim();
            if let Some(default_text) = clause.strip_prefix("default ") {
                spec.default = Some(parse_default_value(default_text, &spec.value_type));
            } else if clause.starts_with("stdin") {
                spec.stdin = true;
            }
        }
    }
    Ok(spec)
}

fn parse_default_value(text: &str, value_type: &ValueType) -> Value {
    let trimmed = text.trim().trim_matches('"');
    match value_type {
        ValueType::Int => trimmed
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(trimmed.to_string())),
        ValueType::Float => trimmed
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(trimmed.to_string())),
        ValueType::Bool => Value::Bool(trimmed == "true"),
        _ => serde_json::from_str(trimmed)
            .unwrap_or_else(|_| Value::String(trimmed.to_string())),
    }
}

/// Parse `name (when), name2 (when2), ...`.
fn parse_actions(text: &str) -> Result<Vec<ActionSpec>> {
    let mut actions = Vec::new();
    for part in split_top_level_commas(text.trim()) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.find('(') {
            Some(open) => {
                let name = part[..open].trim();
                let when = part[open + 1..].trim_end_matches(')').trim();
                actions.push(ActionSpec {
                    name: name.to_string(),
                    when: (!when.is_empty()).then(|| when.to_string()),
                });
            }
            None => actions.push(ActionSpec {
                name: part.to_string(),
                when: None,
            }),
        }
    }
    if actions.is_empty() {
        return Err(EngineError::validation("empty Actions entry in interface"));
    }
    Ok(actions)
}

/// Split on commas not inside parentheses.
fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn split_colon(text: &str) -> Result<(&str, &str)> {
    text.split_once(':')
        .map(|(a, b)| (a.trim(), b.trim()))
        .ok_or_else(|| EngineError::validation(format!("expected '<name>: <type>', found '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\
Fetch a URL and store the response.

Interface:
- Reads: shared[\"session.token\"]: string   # bearer token if present
- Writes: shared[\"response\"]: string | bytes
- Writes: shared[\"result\"]: dict
    - status: int
    - headers: dict
- Params: url: string
- Params: method: string   # default GET
- Params: body: string   # default \"\", stdin if piped
- Actions: default (2xx/3xx), error (4xx/5xx)
";

    #[test]
    fn test_parse_full_interface() {
        let iface = Interface::parse(DOC).unwrap();
        assert_eq!(iface.description, "Fetch a URL and store the response.");
        assert_eq!(iface.reads.len(), 1);
        assert_eq!(iface.reads[0].path, "session.token");
        assert_eq!(iface.writes.len(), 2);
        assert_eq!(iface.params.len(), 3);
        assert_eq!(iface.actions.len(), 2);
    }

    #[test]
    fn test_union_type() {
        let iface = Interface::parse(DOC).unwrap();
        assert_eq!(
            iface.writes["response"].value_type,
            ValueType::Union(vec![ValueType::String, ValueType::Bytes])
        );
    }

    #[test]
    fn test_nested_writes() {
        let iface = Interface::parse(DOC).unwrap();
        let result = &iface.writes["result"];
        assert_eq!(result.children.len(), 2);
        assert_eq!(result.children["status"].value_type, ValueType::Int);
    }

    #[test]
    fn test_write_paths_flatten() {
        let iface = Interface::parse(DOC).unwrap();
        let paths = iface.write_paths();
        assert!(paths.contains(&"result".to_string()));
        assert!(paths.contains(&"result.status".to_string()));
        assert!(paths.contains(&"response".to_string()));
    }

    #[test]
    fn test_covers_write_path() {
        let iface = Interface::parse(DOC).unwrap();
        assert!(iface.covers_write_path(&["result", "status"]));
        assert!(!iface.covers_write_path(&["result", "messages"]));
        // descending through a declared dict leaf is allowed
        assert!(iface.covers_write_path(&["result", "headers", "content-type"]));
        assert!(!iface.covers_write_path(&["nonexistent"]));
    }

    #[test]
    fn test_param_defaults_and_stdin() {
        let iface = Interface::parse(DOC).unwrap();
        let url = iface.param("url").unwrap();
        assert!(url.is_required());
        let method = iface.param("method").unwrap();
        assert_eq!(method.default, Some(Value::String("GET".to_string())));
        let body = iface.param("body").unwrap();
        assert!(body.stdin);
        assert!(!body.is_required());
    }

    #[test]
    fn test_actions_with_when() {
        let iface = Interface::parse(DOC).unwrap();
        assert_eq!(iface.actions[0].name, "default");
        assert_eq!(iface.actions[0].when.as_deref(), Some("2xx/3xx"));
        assert_eq!(iface.actions[1].name, "error");
    }

    #[test]
    fn test_missing_block_is_error() {
        let err = Interface::parse("just some prose").unwrap_err();
        assert!(err.message.contains("Interface:"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let doc = "x\n\nInterface:\n- Writes: shared[\"a\"]: tuple\n";
        assert!(Interface::parse(doc).is_err());
    }

    #[test]
    fn test_depth_limit_enforced() {
        let doc = "x\n\nInterface:\n- Writes: shared[\"a\"]: dict\n    - b: dict\n      - c: dict\n        - d: dict\n          - e: dict\n            - f: dict\n";
        let err = Interface::parse(doc).unwrap_err();
        assert!(err.message.contains("deeper than"));
    }

    #[test]
    fn test_parse_is_deterministic() {
        let a = Interface::parse(DOC).unwrap();
        let b = Interface::parse(DOC).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_value_type_accepts() {
        assert!(ValueType::Int.accepts(&serde_json::json!(3)));
        assert!(!ValueType::Int.accepts(&serde_json::json!("3")));
        assert!(ValueType::parse("string | bytes")
            .unwrap()
            .accepts(&serde_json::json!("x")));
        assert!(ValueType::Float.accepts(&serde_json::json!(1.5)));
    }
}
