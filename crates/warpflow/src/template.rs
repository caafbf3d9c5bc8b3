//! Template resolution over the shared store
//!
//! Params may reference state as `${path.to.value}` or `${list[0].key}`.
//! Two shapes exist:
//!
//! - **Pure reference**: the whole string is exactly one `${...}` token.
//!   The referenced value keeps its original type; it is never coerced.
//! - **Interpolated**: literal text surrounds one or more tokens. Every
//!   reference is rendered with the stable stringifier and concatenated.
//!
//! Nullish handling is asymmetric on purpose: a pure reference to a missing
//! optional value resolves to `null`, while inside an interpolation it
//! becomes the empty string so `"ls ${dir}"` never turns into `"ls null"`.
//!
//! Resolution is single-pass: resolved values are not re-scanned for
//! nested tokens. Unresolvable multi-segment paths produce a
//! [`TemplateError`]-shaped [`EngineError`] carrying the offending token,
//! the keys available at the last resolvable prefix, and did-you-mean
//! suggestions; agents parse these fields, so their presence is contractual.

use crate::config::ResolutionMode;
use crate::store::{PathSeg, StoreView};
use crate::{EngineError, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// How many sibling keys a template error lists.
const AVAILABLE_FIELDS_LIMIT: usize = 20;

/// How many did-you-mean suggestions a template error lists.
const SUGGESTION_LIMIT: usize = 3;

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Template tokens never nest, so a greedy-free scan is sufficient.
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        let re = Regex::new(r"\$\{([^}]*)\}").expect("static regex");
        re
    })
}

/// Whether a string contains at least one `${...}` token.
pub fn contains_template(text: &str) -> bool {
    token_regex().is_match(text)
}

/// Whether the string is exactly one `${...}` token (a pure reference).
pub fn is_pure_reference(text: &str) -> bool {
    match token_regex().find(text) {
        Some(m) => m.start() == 0 && m.end() == text.len(),
        None => false,
    }
}

/// The path texts of all tokens in a string, in order.
pub fn token_paths(text: &str) -> Vec<String> {
    token_regex()
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// All token path texts found anywhere in a params object, in stable
/// (key, then positional) order. Used by the validator.
pub fn tokens_in_params(params: &Map<String, Value>) -> Vec<String> {
    let mut out = Vec::new();
    for value in params.values() {
        collect_tokens(value, &mut out);
    }
    out
}

fn collect_tokens(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(token_paths(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_tokens(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_tokens(v, out)),
        _ => {}
    }
}

/// Parse a template path: dotted identifiers with optional `[n]` indexes.
pub fn parse_path(text: &str) -> Result<Vec<PathSeg>> {
    let text = text.trim();
    if text.is_empty() {
        return Err(EngineError::template("empty template reference '${}'"));
    }
    let mut segments = Vec::new();
    for part in text.split('.') {
        let mut rest = part;
        // Leading identifier before any index brackets.
        let ident_end = rest.find('[').unwrap_or(rest.len());
        let ident = &rest[..ident_end];
        if !ident.is_empty() {
            if !is_identifier(ident) {
                return Err(EngineError::template(format!(
                    "invalid path segment '{ident}' in '${{{text}}}'"
                )));
            }
            segments.push(PathSeg::Key(ident.to_string()));
        } else if segments.is_empty() {
            return Err(EngineError::template(format!(
                "path '${{{text}}}' must start with an identifier"
            )));
        }
        rest = &rest[ident_end..];
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped.find(']').ok_or_else(|| {
                EngineError::template(format!("unclosed index bracket in '${{{text}}}'"))
            })?;
            let index: usize = stripped[..close].parse().map_err(|_| {
                EngineError::template(format!(
                    "index '{}' is not a number in '${{{text}}}'",
                    &stripped[..close]
                ))
            })?;
            segments.push(PathSeg::Index(index));
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            return Err(EngineError::template(format!(
                "trailing characters '{rest}' in '${{{text}}}'"
            )));
        }
    }
    Ok(segments)
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Render any value as a string, stably.
///
/// Containers render as compact JSON, integers without a decimal point,
/// booleans as `true`/`false`, null as the empty string.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

/// One recorded substitution, kept for the trace.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Resolution {
    /// The token as written, e.g. `${fetch.response}`
    pub token: String,
    /// Short rendering of the substituted value
    pub rendered: String,
}

/// The outcome of resolving one params object.
#[derive(Debug, Clone, Default)]
pub struct ResolvedParams {
    pub params: Map<String, Value>,
    pub resolutions: Vec<Resolution>,
    pub warnings: Vec<String>,
}

/// Resolve every template in a params object against the store view.
///
/// The original params are never mutated; a resolved copy is returned.
pub fn resolve_params(
    params: &Map<String, Value>,
    view: &StoreView<'_>,
    node_id: &str,
    mode: ResolutionMode,
) -> Result<ResolvedParams> {
    let mut out = ResolvedParams::default();
    for (key, value) in params {
        let resolved = resolve_value(value, view, node_id, mode, &mut out)?;
        out.params.insert(key.clone(), resolved);
    }
    Ok(out)
}

/// Resolve templates in a single value tree (string leaves only).
pub fn resolve_value(
    value: &Value,
    view: &StoreView<'_>,
    node_id: &str,
    mode: ResolutionMode,
    out: &mut ResolvedParams,
) -> Result<Value> {
    match value {
        Value::String(s) if contains_template(s) => resolve_str(s, view, node_id, mode, out),
        Value::Array(items) => {
            let resolved = items
                .iter()
                .map(|v| resolve_value(v, view, node_id, mode, out))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Array(resolved))
        }
        Value::Object(map) => {
            let mut resolved = Map::new();
            for (k, v) in map {
                resolved.insert(k.clone(), resolve_value(v, view, node_id, mode, out)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_str(
    text: &str,
    view: &StoreView<'_>,
    node_id: &str,
    mode: ResolutionMode,
    out: &mut ResolvedParams,
) -> Result<Value> {
    if is_pure_reference(text) {
        let paths = token_paths(text);
        let value = lookup(&paths[0], text, view, node_id, mode, out)?;
        out.resolutions.push(Resolution {
            token: text.to_string(),
            rendered: summarize(&value),
        });
        return Ok(value);
    }

    let mut rendered = String::new();
    let mut last_end = 0;
    for caps in token_regex().captures_iter(text) {
        #[allow(clippy::expect_used)]
        let whole = caps.get(0).expect("capture 0 always present");
        rendered.push_str(&text[last_end..whole.start()]);
        let path_text = caps[1].trim().to_string();
        let value = lookup(&path_text, whole.as_str(), view, node_id, mode, out)?;
        let piece = stringify(&value);
        out.resolutions.push(Resolution {
            token: whole.as_str().to_string(),
            rendered: piece.clone(),
        });
        rendered.push_str(&piece);
        last_end = whole.end();
    }
    rendered.push_str(&text[last_end..]);
    Ok(Value::String(rendered))
}

/// Resolve one path. Missing single-segment references are optional params
/// and resolve to null; unresolvable multi-segment paths are errors in
/// strict mode and warnings in permissive mode.
fn lookup(
    path_text: &str,
    token: &str,
    view: &StoreView<'_>,
    node_id: &str,
    mode: ResolutionMode,
    out: &mut ResolvedParams,
) -> Result<Value> {
    let path = parse_path(path_text).map_err(|e| e.with_node(node_id))?;
    if let Some(value) = view.resolve(&path) {
        return Ok(value.clone());
    }
    if path.len() == 1 {
        return Ok(Value::Null);
    }
    match mode {
        ResolutionMode::Strict => Err(unresolved_error(token, &path, view, node_id)),
        ResolutionMode::Permissive => {
            out.warnings
                .push(format!("unresolved template reference {token} in node '{node_id}'"));
            Ok(Value::Null)
        }
    }
}

/// Build the contractual template error: offending token, node id, keys
/// available at the last resolvable prefix, and fuzzy suggestions.
fn unresolved_error(
    token: &str,
    path: &[PathSeg],
    view: &StoreView<'_>,
    node_id: &str,
) -> EngineError {
    let (prefix_len, mut available) = view.resolvable_prefix(path);
    available.sort();
    available.truncate(AVAILABLE_FIELDS_LIMIT);

    let unresolved: Vec<String> = path[prefix_len..].iter().map(ToString::to_string).collect();
    let needle = unresolved.join(".");
    let suggestions = fuzzy_top(&needle, &available, SUGGESTION_LIMIT);

    let prefix: Vec<String> = path[..prefix_len].iter().map(ToString::to_string).collect();
    let location = if prefix.is_empty() {
        "the store root".to_string()
    } else {
        format!("'{}'", prefix.join("."))
    };

    let mut err = EngineError::template(format!(
        "cannot resolve {token} in node '{node_id}': no key '{needle}' under {location}"
    ))
    .with_node(node_id)
    .with_available_fields(available);
    if !suggestions.is_empty() {
        err = err.with_suggestion(format!("did you mean: {}?", suggestions.join(", ")));
    }
    err
}

fn summarize(value: &Value) -> String {
    let rendered = stringify(value);
    if rendered.chars().count() > 120 {
        let head: String = rendered.chars().take(120).collect();
        format!("{head}…")
    } else {
        rendered
    }
}

/// Substring similarity in `[0, 1]`: twice the longest common substring
/// length over the combined length. Case-insensitive.
pub fn substring_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let mut longest = 0usize;
    let mut prev = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        let mut row = vec![0usize; b.len() + 1];
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                row[j] = prev[j - 1] + 1;
                longest = longest.max(row[j]);
            }
        }
        prev = row;
    }
    (2.0 * longest as f64) / (a.len() + b.len()) as f64
}

/// The `k` closest candidates to `needle` by substring similarity, ties
/// broken alphabetically for stable output.
pub fn fuzzy_top(needle: &str, candidates: &[String], k: usize) -> Vec<String> {
    let mut scored: Vec<(f64, &String)> = candidates
        .iter()
        .map(|c| (substring_similarity(needle, c), c))
        .filter(|(score, _)| *score > 0.0)
        .collect();
    scored.sort_by(|(sa, ca), (sb, cb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| ca.cmp(cb))
    });
    scored.into_iter().take(k).map(|(_, c)| c.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SharedStore;
    use serde_json::json;

    fn store_with(node: &str, key: &str, value: Value) -> SharedStore {
        let mut store = SharedStore::new();
        store.namespace(node).set(key, value);
        store
    }

    fn resolve_one(store: &SharedStore, text: &str) -> Result<Value> {
        let mut out = ResolvedParams::default();
        resolve_value(
            &Value::String(text.to_string()),
            &store.view(),
            "test",
            ResolutionMode::Strict,
            &mut out,
        )
    }

    #[test]
    fn test_pure_reference_preserves_type() {
        let store = store_with("a", "count", json!(42));
        assert_eq!(resolve_one(&store, "${a.count}").unwrap(), json!(42));

        let store = store_with("a", "items", json!([1, 2, 3]));
        assert_eq!(resolve_one(&store, "${a.items}").unwrap(), json!([1, 2, 3]));

        let store = store_with("a", "flag", json!(true));
        assert_eq!(resolve_one(&store, "${a.flag}").unwrap(), json!(true));
    }

    #[test]
    fn test_single_element_array_stays_array() {
        let store = store_with("a", "one", json!(["only"]));
        assert_eq!(resolve_one(&store, "${a.one}").unwrap(), json!(["only"]));
        assert_eq!(
            resolve_one(&store, "x=${a.one}").unwrap(),
            json!("x=[\"only\"]")
        );
    }

    #[test]
    fn test_interpolation_stringifies() {
        let store = store_with("a", "n", json!(3));
        assert_eq!(resolve_one(&store, "count=${a.n}!").unwrap(), json!("count=3!"));
    }

    #[test]
    fn test_missing_optional_pure_is_null() {
        let store = SharedStore::new();
        assert_eq!(resolve_one(&store, "${dir}").unwrap(), Value::Null);
    }

    #[test]
    fn test_missing_optional_interpolated_is_empty() {
        let store = SharedStore::new();
        assert_eq!(resolve_one(&store, "ls ${dir}").unwrap(), json!("ls "));
    }

    #[test]
    fn test_null_leaf_interpolated_is_empty() {
        let store = store_with("a", "x", Value::Null);
        assert_eq!(resolve_one(&store, "v=${a.x}.").unwrap(), json!("v=."));
    }

    #[test]
    fn test_unresolved_path_error_contract() {
        let store = store_with("a", "result", json!({"issues": [1]}));
        let err = resolve_one(&store, "${a.result.messages}").unwrap_err();
        assert_eq!(err.category, crate::ErrorCategory::Template);
        assert_eq!(err.node_id.as_deref(), Some("test"));
        assert!(err.message.contains("${a.result.messages}"));
        let available = err.available_fields.unwrap();
        assert_eq!(available, vec!["issues".to_string()]);
        assert!(err.suggestion.unwrap().contains("issues"));
    }

    #[test]
    fn test_permissive_mode_warns_instead() {
        let store = store_with("a", "result", json!({"issues": [1]}));
        let mut out = ResolvedParams::default();
        let value = resolve_value(
            &Value::String("${a.result.messages}".to_string()),
            &store.view(),
            "test",
            ResolutionMode::Permissive,
            &mut out,
        )
        .unwrap();
        assert_eq!(value, Value::Null);
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_single_pass_no_rescan() {
        let store = store_with("a", "x", json!("${a.y}"));
        assert_eq!(resolve_one(&store, "${a.x}").unwrap(), json!("${a.y}"));
    }

    #[test]
    fn test_array_indexing() {
        let store = store_with("a", "items", json!([{"name": "first"}, {"name": "second"}]));
        assert_eq!(
            resolve_one(&store, "${a.items[1].name}").unwrap(),
            json!("second")
        );
    }

    #[test]
    fn test_parse_path_shapes() {
        assert_eq!(
            parse_path("p.q[0].r").unwrap(),
            vec![
                PathSeg::Key("p".to_string()),
                PathSeg::Key("q".to_string()),
                PathSeg::Index(0),
                PathSeg::Key("r".to_string()),
            ]
        );
        assert!(parse_path("").is_err());
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a[x]").is_err());
        assert!(parse_path("a[0").is_err());
        assert!(parse_path("9bad").is_err());
        assert!(parse_path("tool-server.result").is_ok());
    }

    #[test]
    fn test_stringify_stable() {
        assert_eq!(stringify(&json!(null)), "");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!(3)), "3");
        assert_eq!(stringify(&json!(2.5)), "2.5");
        assert_eq!(stringify(&json!("s")), "s");
        assert_eq!(stringify(&json!([1, "a"])), "[1,\"a\"]");
        assert_eq!(stringify(&json!({"k": 1})), "{\"k\":1}");
    }

    #[test]
    fn test_resolve_params_object() {
        let mut store = SharedStore::new();
        store.namespace("fetch").set("response", json!("body"));
        let params = json!({
            "literal": 7,
            "url": "${fetch.response}",
            "nested": {"msg": "got ${fetch.response}"}
        })
        .as_object()
        .unwrap()
        .clone();
        let resolved =
            resolve_params(&params, &store.view(), "save", ResolutionMode::Strict).unwrap();
        assert_eq!(resolved.params["literal"], json!(7));
        assert_eq!(resolved.params["url"], json!("body"));
        assert_eq!(resolved.params["nested"]["msg"], json!("got body"));
        assert_eq!(resolved.resolutions.len(), 2);
    }

    #[test]
    fn test_tokens_in_params() {
        let params = json!({
            "a": "${x.y}",
            "b": ["${z.w} tail"],
            "c": {"d": "${q.r}"}
        })
        .as_object()
        .unwrap()
        .clone();
        let mut tokens = tokens_in_params(&params);
        tokens.sort();
        assert_eq!(tokens, vec!["q.r", "x.y", "z.w"]);
    }

    #[test]
    fn test_substring_similarity_orders_sanely() {
        let close = substring_similarity("result.messages", "result.issues");
        let far = substring_similarity("result.messages", "status");
        assert!(close > far);
    }

    #[test]
    fn test_fuzzy_top_is_stable() {
        let candidates = vec![
            "result.issues".to_string(),
            "result.items".to_string(),
            "status".to_string(),
        ];
        let top = fuzzy_top("result.messages", &candidates, 3);
        // Both result.* paths outrank the unrelated key.
        assert!(top[0].starts_with("result."));
        assert!(top[1].starts_with("result."));
        assert_eq!(top.last().map(String::as_str), Some("status"));
    }
}
