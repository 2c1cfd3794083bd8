//! Directed labeled multigraph over chunk ids describing static code
//! relationships (imports, calls, implements, extends, references).
//!
//! Generalizes the teacher's `mapper.rs` `ModuleGraph` (file/module
//! granularity, untyped weighted edges) down to chunk-id granularity with
//! typed edges. Representation is a plain adjacency map — no graph crate —
//! matching both the teacher's own style and the scale this needs (tens of
//! thousands of nodes, low fan-out).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Imports,
    Calls,
    Implements,
    Extends,
    References,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub file_path: String,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(rename = "type")]
    pub node_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphDocument {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

/// A directed labeled multigraph keyed by chunk id, backed by an adjacency
/// map (`id -> (out_edges, in_edges)`) rather than a graph crate like
/// `petgraph` — the queries this needs (`neighbors`, `has_node`, a
/// serialize/deserialize round trip) don't need general-purpose traversal
/// algorithms.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, Node>,
    out_edges: HashMap<String, Vec<Edge>>,
    in_edges: HashMap<String, Vec<Edge>>,
}

/// Both directions of an edge touching a node, as returned by `neighbors`.
pub struct Neighbors<'a> {
    pub outgoing: &'a [Edge],
    pub incoming: &'a [Edge],
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn add_node(&mut self, node: Node) {
        self.out_edges.entry(node.id.clone()).or_default();
        self.in_edges.entry(node.id.clone()).or_default();
        self.nodes.insert(node.id.clone(), node);
    }

    /// Adds an edge. Both endpoints must already exist as nodes and must
    /// differ — self-loops are forbidden, matching the graph's invariant.
    pub fn add_edge(&mut self, source: impl Into<String>, target: impl Into<String>, edge_type: EdgeType) -> Result<(), StoreError> {
        let source = source.into();
        let target = target.into();
        if source == target {
            return Err(StoreError(format!("self-loop rejected for node {source}")));
        }
        if !self.nodes.contains_key(&source) {
            return Err(StoreError(format!("edge source {source} is not a known node")));
        }
        if !self.nodes.contains_key(&target) {
            return Err(StoreError(format!("edge target {target} is not a known node")));
        }

        let edge = Edge { source: source.clone(), target: target.clone(), edge_type };
        let out = self.out_edges.entry(source).or_default();
        if !out.iter().any(|e| e.target == edge.target && e.edge_type == edge.edge_type) {
            out.push(edge.clone());
        }
        let in_list = self.in_edges.entry(target).or_default();
        if !in_list.iter().any(|e| e.source == edge.source && e.edge_type == edge.edge_type) {
            in_list.push(edge);
        }
        Ok(())
    }

    /// Outgoing and incoming edges touching `id`. Empty slices for an
    /// unknown or edge-less node.
    pub fn neighbors(&self, id: &str) -> Neighbors<'_> {
        static EMPTY: Vec<Edge> = Vec::new();
        Neighbors {
            outgoing: self.out_edges.get(id).map(Vec::as_slice).unwrap_or(&EMPTY),
            incoming: self.in_edges.get(id).map(Vec::as_slice).unwrap_or(&EMPTY),
        }
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    /// Every edge in the graph, each appearing once (duplicate type/target
    /// pairs are already collapsed at insertion).
    pub fn all_edges(&self) -> impl Iterator<Item = &Edge> {
        self.out_edges.values().flatten()
    }

    /// Removes a node and every edge touching it. Used by incremental
    /// reindex, which rebuilds nodes/edges only for the changed file set.
    pub fn remove_node(&mut self, id: &str) {
        self.nodes.remove(id);
        self.out_edges.remove(id);
        self.in_edges.remove(id);
        for edges in self.out_edges.values_mut() {
            edges.retain(|e| e.target != id);
        }
        for edges in self.in_edges.values_mut() {
            edges.retain(|e| e.source != id);
        }
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut edges: Vec<Edge> = self.all_edges().cloned().collect();
        edges.sort_by(|a, b| (&a.source, &a.target, format!("{:?}", a.edge_type)).cmp(&(&b.source, &b.target, format!("{:?}", b.edge_type))));
        let doc = GraphDocument { nodes, edges };
        serde_json::to_string_pretty(&doc).map_err(|e| StoreError(format!("graph serialize failed: {e}")))
    }

    pub fn from_json(text: &str) -> Result<Self, StoreError> {
        let doc: GraphDocument = serde_json::from_str(text).map_err(|e| StoreError(format!("graph deserialize failed: {e}")))?;
        let mut graph = Self::new();
        for node in doc.nodes {
            graph.add_node(node);
        }
        for edge in doc.edges {
            graph.add_edge(edge.source, edge.target, edge.edge_type)?;
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, file_path: &str) -> Node {
        Node { id: id.to_string(), file_path: file_path.to_string(), symbols: vec![], node_type: "function".to_string() }
    }

    #[test]
    fn rejects_self_loop() {
        let mut g = DependencyGraph::new();
        g.add_node(node("a", "a.rs"));
        let err = g.add_edge("a", "a", EdgeType::Calls).unwrap_err();
        assert!(err.0.contains("self-loop"));
    }

    #[test]
    fn rejects_edge_to_unknown_node() {
        let mut g = DependencyGraph::new();
        g.add_node(node("a", "a.rs"));
        assert!(g.add_edge("a", "b", EdgeType::Imports).is_err());
    }

    #[test]
    fn neighbors_reports_both_directions() {
        let mut g = DependencyGraph::new();
        g.add_node(node("a", "a.rs"));
        g.add_node(node("b", "b.rs"));
        g.add_edge("a", "b", EdgeType::Imports).unwrap();

        let na = g.neighbors("a");
        assert_eq!(na.outgoing.len(), 1);
        assert_eq!(na.incoming.len(), 0);

        let nb = g.neighbors("b");
        assert_eq!(nb.outgoing.len(), 0);
        assert_eq!(nb.incoming.len(), 1);
    }

    #[test]
    fn json_round_trips() {
        let mut g = DependencyGraph::new();
        g.add_node(node("a", "a.rs"));
        g.add_node(node("b", "b.rs"));
        g.add_edge("a", "b", EdgeType::Calls).unwrap();

        let json = g.to_json().unwrap();
        let g2 = DependencyGraph::from_json(&json).unwrap();
        assert_eq!(g2.node_count(), 2);
        assert_eq!(g2.neighbors("a").outgoing.len(), 1);
        assert_eq!(g2.to_json().unwrap(), json);
    }

    #[test]
    fn duplicate_edge_same_type_is_not_duplicated() {
        let mut g = DependencyGraph::new();
        g.add_node(node("a", "a.rs"));
        g.add_node(node("b", "b.rs"));
        g.add_edge("a", "b", EdgeType::Imports).unwrap();
        g.add_edge("a", "b", EdgeType::Imports).unwrap();
        assert_eq!(g.neighbors("a").outgoing.len(), 1);
    }
}
