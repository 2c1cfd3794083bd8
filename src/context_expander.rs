//! Bounded undirected BFS from a set of primary search results to a small,
//! annotated neighborhood of structurally related chunks.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use crate::graph::{DependencyGraph, EdgeType, Node};
use crate::hybrid_search::SearchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    TestFor,
    InterfaceOf,
    Imports,
    ImportedBy,
    Sibling,
    Related,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedChunk {
    pub result: SearchResult,
    pub distance: usize,
    pub relationship: Relationship,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphExcerpt {
    pub nodes: Vec<Node>,
    pub edges: Vec<(String, String, EdgeType)>,
}

#[derive(Serialize)]
pub struct ExpansionOutcome {
    pub primary: Vec<SearchResult>,
    pub related: Vec<RelatedChunk>,
    pub excerpt: GraphExcerpt,
}

fn is_test_path(path: &str) -> bool {
    path.contains(".test.") || path.contains(".spec.") || path.contains("/tests/")
}

fn first_path_segment(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}

/// Classifies the relationship of `related_id` to `primary_id`, applying
/// the rules in order — the first match wins.
fn classify(graph: &DependencyGraph, primary_id: &str, related_id: &str) -> Relationship {
    let primary_path = graph.node(primary_id).map(|n| n.file_path.as_str()).unwrap_or("");
    let related_path = graph.node(related_id).map(|n| n.file_path.as_str()).unwrap_or("");

    let primary_neighbors = graph.neighbors(primary_id);
    let related_to_primary_edge = primary_neighbors.outgoing.iter().find(|e| e.target == related_id);

    if is_test_path(related_path) && !is_test_path(primary_path) {
        return Relationship::TestFor;
    }
    if let Some(edge) = related_to_primary_edge {
        if matches!(edge.edge_type, EdgeType::Implements | EdgeType::Extends) {
            return Relationship::InterfaceOf;
        }
    }
    if primary_neighbors.outgoing.iter().any(|e| e.target == related_id) {
        return Relationship::Imports;
    }
    if primary_neighbors.incoming.iter().any(|e| e.source == related_id) {
        return Relationship::ImportedBy;
    }
    if !primary_path.is_empty() && !related_path.is_empty() && first_path_segment(primary_path) == first_path_segment(related_path) {
        return Relationship::Sibling;
    }
    Relationship::Related
}

/// Runs bounded undirected BFS from `primary`'s chunk ids. `lookup` resolves
/// a newly discovered id to a `SearchResult`; ids the lookup can't resolve
/// are skipped without counting against `max_related`.
pub fn expand<F>(primary: Vec<SearchResult>, graph: &DependencyGraph, max_related: usize, mut lookup: F) -> ExpansionOutcome
where
    F: FnMut(&str) -> Option<SearchResult>,
{
    if primary.is_empty() {
        return ExpansionOutcome { primary, related: Vec::new(), excerpt: GraphExcerpt { nodes: Vec::new(), edges: Vec::new() } };
    }

    let primary_ids: HashSet<String> = primary.iter().map(|r| r.chunk_id.clone()).collect();
    let mut visited: HashSet<String> = primary_ids.clone();
    let mut queue: VecDeque<(String, usize)> = primary_ids.iter().map(|id| (id.clone(), 0)).collect();

    // (id, distance, discovery_order, relationship-determining primary anchor)
    let mut discovered: Vec<(String, usize, usize, String)> = Vec::new();
    let mut discovery_order = 0usize;

    while let Some((current, distance)) = queue.pop_front() {
        let neighbors = graph.neighbors(&current);
        let mut next_ids: Vec<String> = neighbors.outgoing.iter().map(|e| e.target.clone()).collect();
        next_ids.extend(neighbors.incoming.iter().map(|e| e.source.clone()));

        for next_id in next_ids {
            if visited.contains(&next_id) {
                continue;
            }
            visited.insert(next_id.clone());

            discovered.push((next_id.clone(), distance + 1, discovery_order, current.clone()));
            discovery_order += 1;
            queue.push_back((next_id, distance + 1));
        }
    }

    let mut related = Vec::new();
    for (id, distance, order, anchor) in discovered {
        if related.len() >= max_related {
            break;
        }
        let Some(result) = lookup(&id) else { continue };
        let relationship = classify(graph, &anchor, &id);
        related.push((result, distance, order, relationship));
    }

    related.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.2.cmp(&b.2)));
    let related: Vec<RelatedChunk> = related.into_iter().map(|(result, distance, _, relationship)| RelatedChunk { result, distance, relationship }).collect();

    let mut excerpt_node_ids: HashSet<String> = primary_ids.clone();
    excerpt_node_ids.extend(related.iter().map(|r| r.result.chunk_id.clone()));

    let mut excerpt_nodes: Vec<Node> = excerpt_node_ids.iter().filter_map(|id| graph.node(id).cloned()).collect();
    excerpt_nodes.sort_by(|a, b| a.id.cmp(&b.id));

    let mut excerpt_edges: Vec<(String, String, EdgeType)> = graph
        .all_edges()
        .filter(|e| excerpt_node_ids.contains(&e.source) && excerpt_node_ids.contains(&e.target))
        .map(|e| (e.source.clone(), e.target.clone(), e.edge_type))
        .collect();
    excerpt_edges.sort_by(|a, b| (&a.0, &a.1, format!("{:?}", a.2)).cmp(&(&b.0, &b.1, format!("{:?}", b.2))));
    excerpt_edges.dedup();

    ExpansionOutcome { primary, related, excerpt: GraphExcerpt { nodes: excerpt_nodes, edges: excerpt_edges } }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hybrid_search::Method;

    fn node(id: &str, file_path: &str) -> Node {
        Node { id: id.to_string(), file_path: file_path.to_string(), symbols: vec![], node_type: "function".to_string() }
    }

    fn result(id: &str, file_path: &str) -> SearchResult {
        SearchResult {
            chunk_id: id.to_string(),
            content: String::new(),
            nl_summary: String::new(),
            score: 1.0,
            method: Method::Vector,
            chunk_type: crate::chunk::ChunkType::Function,
            language: "rust".to_string(),
            file_path: file_path.to_string(),
        }
    }

    fn lookup_fn(results: Vec<SearchResult>) -> impl FnMut(&str) -> Option<SearchResult> {
        move |id| results.iter().find(|r| r.chunk_id == id).cloned()
    }

    #[test]
    fn empty_primary_returns_empty_everything() {
        let graph = DependencyGraph::new();
        let outcome = expand(Vec::new(), &graph, 10, |_| None);
        assert!(outcome.primary.is_empty());
        assert!(outcome.related.is_empty());
        assert!(outcome.excerpt.nodes.is_empty());
    }

    #[test]
    fn expands_imports_and_imported_by_with_correct_distance() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node("a", "src/a.rs"));
        graph.add_node(node("b", "src/b.rs"));
        graph.add_node(node("c", "src/c.rs"));
        graph.add_node(node("d", "src/d.rs"));
        graph.add_edge("a", "b", EdgeType::Imports).unwrap();
        graph.add_edge("b", "c", EdgeType::Imports).unwrap();
        graph.add_edge("d", "a", EdgeType::Imports).unwrap();

        let results = vec![result("b", "src/b.rs"), result("c", "src/c.rs"), result("d", "src/d.rs")];
        let outcome = expand(vec![result("a", "src/a.rs")], &graph, 10, lookup_fn(results));

        assert_eq!(outcome.related.len(), 3);
        let by_id: std::collections::HashMap<String, &RelatedChunk> = outcome.related.iter().map(|r| (r.result.chunk_id.clone(), r)).collect();
        assert_eq!(by_id["b"].distance, 1);
        assert_eq!(by_id["b"].relationship, Relationship::Imports);
        assert_eq!(by_id["d"].distance, 1);
        assert_eq!(by_id["d"].relationship, Relationship::ImportedBy);
        assert_eq!(by_id["c"].distance, 2);
        assert_eq!(by_id["c"].relationship, Relationship::Imports);
    }

    #[test]
    fn test_file_classification_overrides_imported_by() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node("a", "src/parser.rs"));
        graph.add_node(node("b", "src/parser.test.rs"));
        graph.add_edge("b", "a", EdgeType::Imports).unwrap();

        let results = vec![result("b", "src/parser.test.rs")];
        let outcome = expand(vec![result("a", "src/parser.rs")], &graph, 10, lookup_fn(results));

        assert_eq!(outcome.related.len(), 1);
        assert_eq!(outcome.related[0].relationship, Relationship::TestFor);
    }

    #[test]
    fn respects_max_related_cap() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node("a", "src/a.rs"));
        let mut results = Vec::new();
        for i in 0..5 {
            let id = format!("n{i}");
            graph.add_node(node(&id, &format!("src/{id}.rs")));
            graph.add_edge("a", &id, EdgeType::Imports).unwrap();
            results.push(result(&id, &format!("src/{id}.rs")));
        }
        let outcome = expand(vec![result("a", "src/a.rs")], &graph, 2, lookup_fn(results));
        assert_eq!(outcome.related.len(), 2);
    }

    #[test]
    fn unresolvable_fanout_does_not_truncate_the_search_before_the_cap_is_met() {
        // 30 unresolvable neighbors (lookup always None) interleaved with 3
        // resolvable ones, max_related = 2. Raw discoveries (30) exceed the
        // old `max_related * 8` = 16 heuristic ceiling well before the 2
        // resolvable results are found, so this pins that BFS no longer
        // stops early on raw discovery count.
        let mut graph = DependencyGraph::new();
        graph.add_node(node("a", "src/a.rs"));
        for i in 0..30 {
            let id = format!("dead{i}");
            graph.add_node(node(&id, &format!("src/{id}.rs")));
            graph.add_edge("a", &id, EdgeType::Imports).unwrap();
        }
        let mut resolvable = Vec::new();
        for i in 0..3 {
            let id = format!("live{i}");
            graph.add_node(node(&id, &format!("src/{id}.rs")));
            graph.add_edge("a", &id, EdgeType::Imports).unwrap();
            resolvable.push(result(&id, &format!("src/{id}.rs")));
        }

        let outcome = expand(vec![result("a", "src/a.rs")], &graph, 2, lookup_fn(resolvable));
        assert_eq!(outcome.related.len(), 2);
    }

    #[test]
    fn unresolvable_lookup_is_skipped_without_counting_against_cap() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node("a", "src/a.rs"));
        graph.add_node(node("b", "src/b.rs"));
        graph.add_node(node("c", "src/c.rs"));
        graph.add_edge("a", "b", EdgeType::Imports).unwrap();
        graph.add_edge("a", "c", EdgeType::Imports).unwrap();

        let results = vec![result("c", "src/c.rs")];
        let outcome = expand(vec![result("a", "src/a.rs")], &graph, 10, lookup_fn(results));
        assert_eq!(outcome.related.len(), 1);
        assert_eq!(outcome.related[0].result.chunk_id, "c");
    }
}
