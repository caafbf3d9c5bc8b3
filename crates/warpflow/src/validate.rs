//! Structural and semantic workflow validation
//!
//! The validator never executes nodes and never touches the filesystem or
//! network. It collects *every* diagnostic in one pass, in stable order, so
//! an agent can repair a broken document without iterating: duplicate ids
//! first, then unknown types, missing params, edge problems, reachability,
//! cycles, and finally template reference checks against the interface
//! writes trees from the registry.

use crate::interface::Interface;
use crate::ir::{CanonicalIr, Workflow};
use crate::registry::NodeRegistry;
use crate::store::PathSeg;
use crate::template;
use crate::{EngineError, ValidationReport};
use std::collections::{HashMap, HashSet, VecDeque};

/// Validate a workflow document against the registry.
///
/// On success the returned [`CanonicalIr`] proves the document passed; on
/// failure every diagnostic is reported at once.
pub fn validate(
    workflow: &Workflow,
    registry: &NodeRegistry,
) -> std::result::Result<CanonicalIr, ValidationReport> {
    let mut errors: Vec<EngineError> = Vec::new();

    // 1. An empty workflow has nothing to run.
    if workflow.nodes.is_empty() {
        errors.push(EngineError::validation(
            "workflow has no nodes; at least one is required",
        ));
        return Err(ValidationReport::new(errors));
    }

    // 2. Duplicate node ids, in declaration order.
    let mut seen: HashSet<&str> = HashSet::new();
    for spec in &workflow.nodes {
        if !seen.insert(spec.id.as_str()) {
            errors.push(
                EngineError::validation(format!("duplicate node id '{}'", spec.id))
                    .with_node(&spec.id),
            );
        }
    }

    // 3 + 4. Unknown node types and missing required params.
    let mut interfaces: HashMap<&str, Interface> = HashMap::new();
    for spec in &workflow.nodes {
        match registry.lookup(&spec.node_type) {
            Some(registered) => {
                for param in &registered.interface.params {
                    if param.is_required() && !spec.params.contains_key(&param.name) {
                        errors.push(
                            EngineError::validation(format!(
                                "node '{}' is missing required param '{}' ({})",
                                spec.id, param.name, param.value_type
                            ))
                            .with_node(&spec.id)
                            .with_suggestion(format!(
                                "add \"{}\" to the params of node '{}'",
                                param.name, spec.id
                            )),
                        );
                    }
                }
                interfaces.insert(spec.id.as_str(), registered.interface);
            }
            None => {
                let known: Vec<String> =
                    registry.list(None).into_iter().map(|(name, _)| name).collect();
                let suggestions = template::fuzzy_top(&spec.node_type, &known, 3);
                let mut err = EngineError::validation(format!(
                    "node '{}' has unknown type '{}'",
                    spec.id, spec.node_type
                ))
                .with_node(&spec.id)
                .with_available_fields(known);
                if !suggestions.is_empty() {
                    err = err.with_suggestion(format!("did you mean: {}?", suggestions.join(", ")));
                }
                errors.push(err);
            }
        }
    }

    // 5 + 6. Edge endpoint and conflict checks.
    let node_ids: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut edge_keys: HashSet<(&str, &str)> = HashSet::new();
    for edge in &workflow.edges {
        for endpoint in [&edge.from, &edge.to] {
            if !node_ids.contains(endpoint.as_str()) {
                errors.push(EngineError::validation(format!(
                    "edge {} -> {} references unknown node '{}'",
                    edge.from, edge.to, endpoint
                )));
            }
        }
        if !edge_keys.insert((edge.from.as_str(), edge.action.as_str())) {
            errors.push(EngineError::validation(format!(
                "conflicting edges from '{}' on action '{}'",
                edge.from, edge.action
            )));
        }
    }

    // 7. The start node must exist.
    let start = workflow.start_node_id().unwrap_or_default();
    if !node_ids.contains(start) {
        errors.push(EngineError::validation(format!(
            "start node '{start}' is not defined in nodes"
        )));
        return Err(ValidationReport::new(errors));
    }

    // 8. Reachability from the start node.
    let adjacency = build_adjacency(workflow);
    let reachable = reachable_from(start, &adjacency);
    for spec in &workflow.nodes {
        if !reachable.contains(spec.id.as_str()) {
            errors.push(
                EngineError::validation(format!(
                    "node '{}' is unreachable from start node '{start}'",
                    spec.id
                ))
                .with_node(&spec.id),
            );
        }
    }

    // 9. Cycles across reachable edges give the workflow no exit.
    if let Some(cycle_node) = find_cycle(start, &adjacency) {
        errors.push(EngineError::validation(format!(
            "edges reachable from '{start}' form a cycle through '{cycle_node}'; workflows must be acyclic"
        )));
    } else {
        // 10. Template reference checks need an acyclic graph for the
        // executes-before analysis, so they only run on clean graphs.
        check_templates(workflow, &interfaces, &adjacency, &reachable, &mut errors);
    }

    if errors.is_empty() {
        Ok(CanonicalIr::new_validated(workflow.clone()))
    } else {
        Err(ValidationReport::new(errors))
    }
}

fn build_adjacency(workflow: &Workflow) -> HashMap<&str, Vec<&str>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &workflow.edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }
    adjacency
}

fn reachable_from<'a>(start: &'a str, adjacency: &HashMap<&'a str, Vec<&'a str>>) -> HashSet<&'a str> {
    let mut reachable = HashSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        if !reachable.insert(node) {
            continue;
        }
        if let Some(next) = adjacency.get(node) {
            queue.extend(next.iter());
        }
    }
    reachable
}

/// Depth-first cycle detection over the subgraph reachable from `start`.
fn find_cycle<'a>(start: &'a str, adjacency: &HashMap<&'a str, Vec<&'a str>>) -> Option<&'a str> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
    marks.insert(start, Mark::Visiting);

    while let Some((node, edge_index)) = stack.pop() {
        let next = adjacency
            .get(node)
            .and_then(|targets| targets.get(edge_index))
            .copied();
        match next {
            Some(target) => {
                stack.push((node, edge_index + 1));
                match marks.get(target) {
                    Some(Mark::Visiting) => return Some(target),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(target, Mark::Visiting);
                        stack.push((target, 0));
                    }
                }
            }
            None => {
                marks.insert(node, Mark::Done);
            }
        }
    }
    None
}

/// Whether `from` can reach `to` along edges (i.e. `from` executes first on
/// any path that runs both).
fn reaches(from: &str, to: &str, adjacency: &HashMap<&str, Vec<&str>>) -> bool {
    if from == to {
        return false;
    }
    reachable_from(from, adjacency).contains(to)
}

fn check_templates(
    workflow: &Workflow,
    interfaces: &HashMap<&str, Interface>,
    adjacency: &HashMap<&str, Vec<&str>>,
    reachable: &HashSet<&str>,
    errors: &mut Vec<EngineError>,
) {
    for spec in &workflow.nodes {
        if !reachable.contains(spec.id.as_str()) {
            continue;
        }
        let mut tokens = template::tokens_in_params(&spec.params);
        if let Some(batch) = &spec.batch {
            if let Some(text) = batch.over.as_str() {
                tokens.extend(template::token_paths(text));
            }
        }

        for token in tokens {
            let path = match template::parse_path(&token) {
                Ok(path) => path,
                Err(err) => {
                    errors.push(err.with_node(&spec.id));
                    continue;
                }
            };
            let Some(PathSeg::Key(root)) = path.first() else {
                continue;
            };

            // Workflow inputs and the batch-injected item are root-level.
            if root == crate::store::INPUTS_KEY {
                if let Some(PathSeg::Key(input_name)) = path.get(1) {
                    if !workflow.inputs.contains_key(input_name) {
                        let known: Vec<String> = workflow.inputs.keys().cloned().collect();
                        let mut err = EngineError::validation(format!(
                            "node '{}' references undeclared workflow input '{input_name}'",
                            spec.id
                        ))
                        .with_node(&spec.id)
                        .with_available_fields(known.clone());
                        let suggestions = template::fuzzy_top(input_name, &known, 3);
                        if !suggestions.is_empty() {
                            err = err.with_suggestion(format!(
                                "did you mean: {}?",
                                suggestions.join(", ")
                            ));
                        }
                        errors.push(err);
                    }
                }
                continue;
            }
            if root == crate::store::ITEM_KEY {
                if spec.batch.is_none() {
                    errors.push(
                        EngineError::validation(format!(
                            "node '{}' references ${{item}} but declares no batch",
                            spec.id
                        ))
                        .with_node(&spec.id),
                    );
                }
                continue;
            }

            // Otherwise the root must be a node that executes earlier.
            if !workflow.nodes.iter().any(|n| &n.id == root) {
                let mut candidates: Vec<String> =
                    workflow.nodes.iter().map(|n| n.id.clone()).collect();
                candidates.push(crate::store::INPUTS_KEY.to_string());
                let suggestions = template::fuzzy_top(root, &candidates, 3);
                let mut err = EngineError::validation(format!(
                    "node '{}' references unknown node '{root}' in ${{{token}}}",
                    spec.id
                ))
                .with_node(&spec.id)
                .with_available_fields(candidates);
                if !suggestions.is_empty() {
                    err = err.with_suggestion(format!("did you mean: {}?", suggestions.join(", ")));
                }
                errors.push(err);
                continue;
            }

            if !reaches(root, &spec.id, adjacency) {
                errors.push(
                    EngineError::validation(format!(
                        "node '{}' references '{root}' which has not executed yet on any path to it",
                        spec.id
                    ))
                    .with_node(&spec.id)
                    .with_suggestion(format!(
                        "add an edge so '{root}' runs before '{}'",
                        spec.id
                    )),
                );
                continue;
            }

            // Path-under-node validation against the source interface's
            // writes tree. Nodes with no declared writes are skipped: the
            // tree is unknowable, not empty.
            let Some(interface) = interfaces.get(root.as_str()) else {
                continue;
            };
            if interface.writes.is_empty() || path.len() < 2 {
                continue;
            }
            // Segments past the first array index are opaque to the writes
            // tree; validate only the leading key path.
            let mut segments: Vec<&str> = Vec::new();
            for seg in &path[1..] {
                match seg {
                    PathSeg::Key(k) => segments.push(k.as_str()),
                    PathSeg::Index(_) => break,
                }
            }
            if !interface.covers_write_path(&segments) {
                let available = interface.write_paths();
                let needle = segments.join(".");
                let suggestions = template::fuzzy_top(&needle, &available, 3);
                let mut err = EngineError::template(format!(
                    "node '{}' references ${{{token}}} but '{root}' does not write '{needle}'",
                    spec.id
                ))
                .with_node(&spec.id)
                .with_available_fields(available.into_iter().take(20).collect());
                if !suggestions.is_empty() {
                    err = err.with_suggestion(format!("did you mean: {}?", suggestions.join(", ")));
                }
                errors.push(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Action, ExecContext, FnNodeFactory, Node, NodeContext};
    use crate::store::{Namespace, StoreView};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;

    struct NoopNode;

    #[async_trait]
    impl Node for NoopNode {
        async fn prep(&self, _view: &StoreView<'_>, params: &Value) -> crate::Result<Value> {
            Ok(params.clone())
        }
        async fn exec(&self, prep: Value, _ctx: &ExecContext) -> crate::Result<Value> {
            Ok(prep)
        }
        async fn post(
            &self,
            _ns: &mut Namespace<'_>,
            _prep: &Value,
            _exec: Value,
        ) -> crate::Result<Action> {
            Ok(Action::default_action())
        }
    }

    fn factory() -> Arc<dyn crate::node::NodeFactory> {
        Arc::new(FnNodeFactory(|_spec: &crate::ir::NodeSpec, _ctx: &NodeContext| {
            Ok(Arc::new(NoopNode) as Arc<dyn Node>)
        }))
    }

    fn registry() -> NodeRegistry {
        let registry = NodeRegistry::new();
        registry
            .register(
                "scan",
                "1",
                "Scans things.\n\nInterface:\n- Writes: shared[\"result\"]: dict\n    - issues: list\n    - count: int\n- Actions: default\n",
                factory(),
            )
            .unwrap();
        registry
            .register(
                "report",
                "1",
                "Reports things.\n\nInterface:\n- Writes: shared[\"text\"]: string\n- Params: source: string\n- Actions: default\n",
                factory(),
            )
            .unwrap();
        registry
    }

    fn wf(value: Value) -> Workflow {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_valid_workflow_passes() {
        let registry = registry();
        let workflow = wf(json!({
            "nodes": [
                {"id": "a", "type": "scan"},
                {"id": "b", "type": "report", "params": {"source": "${a.result.issues}"}}
            ],
            "edges": [{"from": "a", "to": "b"}]
        }));
        let canonical = validate(&workflow, &registry).unwrap();
        assert_eq!(canonical.start(), "a");
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let report = validate(&wf(json!({"nodes": []})), &registry()).unwrap_err();
        assert!(report.primary().unwrap().message.contains("no nodes"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let workflow = wf(json!({
            "nodes": [
                {"id": "a", "type": "scan"},
                {"id": "a", "type": "scan"}
            ]
        }));
        let report = validate(&workflow, &registry()).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("duplicate node id 'a'")));
    }

    #[test]
    fn test_unknown_type_suggests_closest() {
        let workflow = wf(json!({"nodes": [{"id": "a", "type": "repord"}]}));
        let report = validate(&workflow, &registry()).unwrap_err();
        let err = report.primary().unwrap();
        assert!(err.message.contains("unknown type 'repord'"));
        assert!(err.suggestion.as_ref().unwrap().contains("report"));
    }

    #[test]
    fn test_missing_required_param() {
        let workflow = wf(json!({"nodes": [{"id": "r", "type": "report"}]}));
        let report = validate(&workflow, &registry()).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("missing required param 'source'")));
    }

    #[test]
    fn test_edge_to_unknown_node() {
        let workflow = wf(json!({
            "nodes": [{"id": "a", "type": "scan"}],
            "edges": [{"from": "a", "to": "ghost"}]
        }));
        let report = validate(&workflow, &registry()).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("unknown node 'ghost'")));
    }

    #[test]
    fn test_conflicting_edges_rejected() {
        let workflow = wf(json!({
            "nodes": [
                {"id": "a", "type": "scan"},
                {"id": "b", "type": "scan"},
                {"id": "c", "type": "scan"}
            ],
            "edges": [
                {"from": "a", "to": "b"},
                {"from": "a", "to": "c"}
            ]
        }));
        let report = validate(&workflow, &registry()).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("conflicting edges from 'a'")));
    }

    #[test]
    fn test_unreachable_node_rejected() {
        let workflow = wf(json!({
            "nodes": [
                {"id": "a", "type": "scan"},
                {"id": "island", "type": "scan"}
            ]
        }));
        let report = validate(&workflow, &registry()).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("'island' is unreachable")));
    }

    #[test]
    fn test_self_loop_rejected() {
        let workflow = wf(json!({
            "nodes": [{"id": "a", "type": "scan"}],
            "edges": [{"from": "a", "to": "a"}]
        }));
        let report = validate(&workflow, &registry()).unwrap_err();
        assert!(report.errors.iter().any(|e| e.message.contains("cycle")));
    }

    #[test]
    fn test_cycle_rejected() {
        let workflow = wf(json!({
            "nodes": [
                {"id": "a", "type": "scan"},
                {"id": "b", "type": "scan"}
            ],
            "edges": [
                {"from": "a", "to": "b"},
                {"from": "b", "to": "a"}
            ]
        }));
        let report = validate(&workflow, &registry()).unwrap_err();
        assert!(report.errors.iter().any(|e| e.message.contains("cycle")));
    }

    #[test]
    fn test_template_precision_error_with_suggestion() {
        // Scenario: B reads ${a.result.messages} but the scan interface
        // writes result.issues. Validation fails before execution, listing
        // the real paths and suggesting the nearest one.
        let registry = registry();
        let workflow = wf(json!({
            "nodes": [
                {"id": "a", "type": "scan"},
                {"id": "b", "type": "report", "params": {"source": "${a.result.messages}"}}
            ],
            "edges": [{"from": "a", "to": "b"}]
        }));
        let report = validate(&workflow, &registry).unwrap_err();
        let err = report.primary().unwrap();
        assert_eq!(err.category, crate::ErrorCategory::Template);
        assert!(err
            .available_fields
            .as_ref()
            .unwrap()
            .contains(&"result.issues".to_string()));
        assert!(err.suggestion.as_ref().unwrap().contains("result.issues"));
    }

    #[test]
    fn test_reference_to_later_node_rejected() {
        let registry = registry();
        let workflow = wf(json!({
            "nodes": [
                {"id": "b", "type": "report", "params": {"source": "${a.result}"}},
                {"id": "a", "type": "scan"}
            ],
            "edges": [{"from": "b", "to": "a"}]
        }));
        let report = validate(&workflow, &registry).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("has not executed yet")));
    }

    #[test]
    fn test_undeclared_input_reference() {
        let registry = registry();
        let workflow = wf(json!({
            "nodes": [
                {"id": "r", "type": "report", "params": {"source": "${inputs.quary}"}}
            ],
            "inputs": {"query": {"type": "string"}}
        }));
        let report = validate(&workflow, &registry).unwrap_err();
        let err = report.primary().unwrap();
        assert!(err.message.contains("undeclared workflow input 'quary'"));
        assert!(err.suggestion.as_ref().unwrap().contains("query"));
    }

    #[test]
    fn test_item_outside_batch_rejected() {
        let registry = registry();
        let workflow = wf(json!({
            "nodes": [{"id": "r", "type": "report", "params": {"source": "${item}"}}]
        }));
        let report = validate(&workflow, &registry).unwrap_err();
        assert!(report
            .primary()
            .unwrap()
            .message
            .contains("declares no batch"));
    }

    #[test]
    fn test_item_inside_batch_accepted() {
        let registry = registry();
        let workflow = wf(json!({
            "nodes": [{
                "id": "r",
                "type": "report",
                "params": {"source": "${item}"},
                "batch": {"over": "${inputs.items}"}
            }],
            "inputs": {"items": {"type": "list"}}
        }));
        assert!(validate(&workflow, &registry).is_ok());
    }

    #[test]
    fn test_all_errors_reported_in_stable_order() {
        let registry = registry();
        let workflow = wf(json!({
            "nodes": [
                {"id": "a", "type": "mystery"},
                {"id": "a", "type": "scan"},
                {"id": "c", "type": "report"}
            ],
            "edges": [{"from": "a", "to": "ghost"}]
        }));
        let first = validate(&workflow, &registry).unwrap_err();
        let second = validate(&workflow, &registry).unwrap_err();
        let render = |report: &ValidationReport| {
            report
                .errors
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(render(&first), render(&second));
        assert!(first.errors.len() >= 4);
        // Duplicate id precedes type errors which precede edge errors.
        let messages = render(&first);
        let dup = messages.iter().position(|m| m.contains("duplicate")).unwrap();
        let edge = messages.iter().position(|m| m.contains("ghost")).unwrap();
        assert!(dup < edge);
    }
}
