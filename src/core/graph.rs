use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub relation: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
}

/// Labelled, weighted digraph with JSON node payloads.
///
/// Edges are an append-only list; endpoints are not required to exist as nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    nodes: HashMap<String, serde_json::Value>,
    edges: Vec<Edge>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str, data: serde_json::Value) {
        self.nodes.insert(id.to_string(), data);
    }

    pub fn add_edge(&mut self, from: &str, to: &str, relation: &str, weight: f64) {
        self.edges.push(Edge {
            from: from.to_string(),
            to: to.to_string(),
            relation: relation.to_string(),
            weight,
        });
    }

    /// Targets of `start --relation-->` edges, in insertion order.
    pub fn query(&self, start: &str, relation: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == start && e.relation == relation)
            .map(|e| e.to.as_str())
            .collect()
    }

    pub fn node(&self, id: &str) -> Option<&serde_json::Value> {
        self.nodes.get(id)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
        }
    }
}
