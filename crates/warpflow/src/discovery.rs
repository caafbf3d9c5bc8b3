//! Discovery index
//!
//! An offline index mapping free-form intent to ranked node and workflow
//! candidates. Built from registry interfaces (names, descriptions, writes
//! trees flattened to dotted paths) and from saved-workflow metadata.
//! Scoring is lexical (term overlap plus substring similarity); an optional
//! LLM-assisted reranker can reorder the top of the list.

use crate::interface::Interface;
use crate::registry::NodeRegistry;
use crate::template::substring_similarity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How many lexical hits are offered to the reranker.
const RERANK_WINDOW: usize = 10;

/// What kind of thing a candidate is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    Node,
    Workflow,
}

/// Metadata of a saved workflow, as the save service records it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Declared input names
    #[serde(default)]
    pub inputs: Vec<String>,
}

/// One indexed entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryEntry {
    pub name: String,
    pub kind: CandidateKind,
    pub description: String,
    /// Flattened write paths (nodes) or input names (workflows)
    pub paths: Vec<String>,
    /// Full interface, present for node candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<Interface>,
}

/// A scored candidate returned from a query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub entry: DiscoveryEntry,
    pub score: f64,
}

/// Optional LLM-assisted reranker over the lexical top N.
///
/// Returns candidate names in preferred order; names it omits keep their
/// lexical order after the ones it returns.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, intent: &str, candidates: &[DiscoveryEntry]) -> Vec<String>;
}

/// The offline-built index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryIndex {
    pub entries: Vec<DiscoveryEntry>,
}

impl DiscoveryIndex {
    /// Build from registry interfaces and saved-workflow metadata.
    pub fn build(registry: &NodeRegistry, workflows: &[WorkflowMeta]) -> Self {
        let mut entries = Vec::new();
        for node in registry.entries() {
            entries.push(DiscoveryEntry {
                name: node.name.clone(),
                kind: CandidateKind::Node,
                description: node.interface.description.clone(),
                paths: node.interface.write_paths(),
                interface: Some(node.interface),
            });
        }
        for workflow in workflows {
            entries.push(DiscoveryEntry {
                name: workflow.name.clone(),
                kind: CandidateKind::Workflow,
                description: workflow.description.clone(),
                paths: workflow.inputs.clone(),
                interface: None,
            });
        }
        Self { entries }
    }

    /// Query by free-form intent, returning the top `k` candidates with
    /// full interfaces attached.
    pub fn query(&self, intent: &str, k: usize) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> = self
            .entries
            .iter()
            .map(|entry| ScoredCandidate {
                score: score(intent, entry),
                entry: entry.clone(),
            })
            .filter(|c| c.score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.name.cmp(&b.entry.name))
        });
        scored.truncate(k);
        scored
    }

    /// Query with an LLM-assisted rerank over the lexical top window.
    pub async fn query_reranked(
        &self,
        intent: &str,
        k: usize,
        reranker: &dyn Reranker,
    ) -> Vec<ScoredCandidate> {
        let lexical = self.query(intent, RERANK_WINDOW.max(k));
        if lexical.len() <= 1 {
            return lexical.into_iter().take(k).collect();
        }
        let entries: Vec<DiscoveryEntry> = lexical.iter().map(|c| c.entry.clone()).collect();
        let preferred = reranker.rerank(intent, &entries).await;

        let mut reordered: Vec<ScoredCandidate> = Vec::with_capacity(lexical.len());
        for name in &preferred {
            if let Some(candidate) = lexical.iter().find(|c| &c.entry.name == name) {
                if !reordered.iter().any(|c| c.entry.name == candidate.entry.name) {
                    reordered.push(candidate.clone());
                }
            }
        }
        for candidate in lexical {
            if !reordered.iter().any(|c| c.entry.name == candidate.entry.name) {
                reordered.push(candidate);
            }
        }
        reordered.truncate(k);
        reordered
    }
}

/// Lexical score: term overlap over name, description and paths, plus a
/// substring-similarity bonus against the name.
fn score(intent: &str, entry: &DiscoveryEntry) -> f64 {
    let intent_terms: HashSet<String> = terms(intent);
    if intent_terms.is_empty() {
        return 0.0;
    }
    let mut haystack = terms(&entry.name);
    haystack.extend(terms(&entry.description));
    for path in &entry.paths {
        haystack.extend(terms(path));
    }

    let overlap = intent_terms.intersection(&haystack).count() as f64 / intent_terms.len() as f64;
    let name_similarity = substring_similarity(intent, &entry.name);
    overlap + 0.5 * name_similarity
}

fn terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(ToString::to_string)
        .collect()
}
