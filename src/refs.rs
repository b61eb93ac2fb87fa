//! Schema Reference Graph
//!
//! Directed graph keyed by schema IRI with an edge for every field that
//! references another schema. Cycle detection is a single depth-first search
//! with three node states (unvisited, on the stack, finished): an edge back
//! to a node that is still on the stack closes a cycle.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{depth_first_search, Control, DfsEvent, Dfs};
use serde_json::Value;
use std::collections::HashMap;

use crate::document::ref_targets;

/// Reference graph between schemas
#[derive(Debug, Default)]
pub struct RefGraph {
    graph: DiGraph<String, ()>,
    node_indices: HashMap<String, NodeIndex>,
}

impl RefGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from `(iri, document)` pairs
    pub fn from_documents<'a>(documents: impl IntoIterator<Item = (&'a str, &'a Value)>) -> Self {
        let mut graph = Self::new();
        for (iri, document) in documents {
            graph.add_schema(iri, ref_targets(document));
        }
        graph
    }

    fn node(&mut self, iri: &str) -> NodeIndex {
        if let Some(&idx) = self.node_indices.get(iri) {
            return idx;
        }
        let idx = self.graph.add_node(iri.to_string());
        self.node_indices.insert(iri.to_string(), idx);
        idx
    }

    /// Add a schema and its outgoing references.
    ///
    /// A schema added twice keeps the edges of both calls.
    pub fn add_schema(&mut self, iri: &str, refs: impl IntoIterator<Item = String>) {
        let from = self.node(iri);
        for target in refs {
            let to = self.node(&target);
            if self.graph.find_edge(from, to).is_none() {
                self.graph.add_edge(from, to, ());
            }
        }
    }

    /// Find a cycle that passes through `iri`.
    ///
    /// Returns the cycle as a path starting and ending at `iri`. Cycles that
    /// are reachable from `iri` without passing through it are ignored.
    pub fn cycle_through(&self, iri: &str) -> Option<Vec<String>> {
        let &start = self.node_indices.get(iri)?;
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut closing = None;

        depth_first_search(&self.graph, Some(start), |event| {
            match event {
                DfsEvent::TreeEdge(u, v) => {
                    parent.insert(v, u);
                }
                DfsEvent::BackEdge(u, v) if v == start => {
                    closing = Some(u);
                    return Control::Break(());
                }
                _ => {}
            }
            Control::Continue
        });

        let mut node = closing?;
        let mut path = vec![self.graph[start].clone()];
        let mut reversed = Vec::new();
        while node != start {
            reversed.push(self.graph[node].clone());
            node = *parent.get(&node)?;
        }
        reversed.reverse();
        path.extend(reversed);
        path.push(self.graph[start].clone());
        Some(path)
    }

    /// Every IRI reachable from `iri`, excluding `iri` itself
    pub fn closure(&self, iri: &str) -> Vec<String> {
        let Some(&start) = self.node_indices.get(iri) else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut out = Vec::new();
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != start {
                out.push(self.graph[idx].clone());
            }
        }
        out
    }
}
