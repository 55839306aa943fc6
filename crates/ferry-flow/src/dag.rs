//! Directed Acyclic Graph (DAG) used to order generators.
//!
//! Edges point from a dependency to its dependent, so a topological sort
//! yields dependencies first. Ties are broken by insertion order so that the
//! same registrations always produce the same order.
//!
//! **Note:** This module is internal to `ferry-flow`; the public surface is
//! [`crate::network::DependencyNetwork`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::error::{Error, Result};

/// A directed acyclic graph with deterministic traversal order.
#[derive(Debug, Clone)]
pub(crate) struct Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    graph: DiGraph<T, ()>,
    index_map: HashMap<T, NodeIndex>,
    /// Position of each node in insertion order, for tie-breaking.
    rank: HashMap<NodeIndex, usize>,
    insertion_order: Vec<NodeIndex>,
}

impl<T> Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    /// Creates a new empty DAG.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_map: HashMap::new(),
            rank: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Adds a node; adding an existing value returns its existing index.
    pub(crate) fn add_node(&mut self, value: T) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(&value) {
            return idx;
        }
        let idx = self.graph.add_node(value.clone());
        self.index_map.insert(value, idx);
        self.rank.insert(idx, self.insertion_order.len());
        self.insertion_order.push(idx);
        idx
    }

    /// Adds a directed edge from `from` to `to`. Duplicate edges are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if either node index is invalid.
    pub(crate) fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) -> Result<()> {
        self.weight(from)?;
        self.weight(to)?;
        self.graph.update_edge(from, to, ());
        Ok(())
    }

    /// Returns the node index for a value, if it exists.
    #[must_use]
    pub(crate) fn get_index(&self, value: &T) -> Option<NodeIndex> {
        self.index_map.get(value).copied()
    }

    /// Returns a topologically sorted list of nodes.
    ///
    /// Uses Kahn's algorithm; when several nodes are ready at once they are
    /// emitted in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] naming every node that could not be
    /// ordered, in insertion order.
    pub(crate) fn toposort(&self) -> Result<Vec<T>> {
        let node_count = self.graph.node_count();
        if node_count == 0 {
            return Ok(Vec::new());
        }

        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, 0))
            .collect();
        for edge in self.graph.edge_references() {
            *in_degree.entry(edge.target()).or_insert(0) += 1;
        }

        let mut queue: VecDeque<NodeIndex> = self
            .insertion_order
            .iter()
            .filter(|idx| in_degree.get(idx).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        let mut result = Vec::with_capacity(node_count);
        while let Some(idx) = queue.pop_front() {
            result.push(self.weight(idx)?.clone());

            for neighbor in self.sorted_neighbors(idx, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&neighbor) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        if result.len() != node_count {
            let cycle = self
                .insertion_order
                .iter()
                .filter(|idx| in_degree.get(idx).copied().unwrap_or(0) > 0)
                .filter_map(|&idx| self.graph.node_weight(idx))
                .map(ToString::to_string)
                .collect();
            return Err(Error::CycleDetected { cycle });
        }

        Ok(result)
    }

    /// Returns every transitive upstream node of `node`, nearest first.
    ///
    /// Nodes at the same distance are ordered by insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the node index is invalid.
    pub(crate) fn ancestors(&self, node: NodeIndex) -> Result<Vec<T>> {
        self.weight(node)?;

        let mut seen = HashSet::from([node]);
        let mut frontier = VecDeque::from([node]);
        let mut result = Vec::new();
        while let Some(idx) = frontier.pop_front() {
            for upstream in self.sorted_neighbors(idx, Direction::Incoming) {
                if seen.insert(upstream) {
                    result.push(self.weight(upstream)?.clone());
                    frontier.push_back(upstream);
                }
            }
        }
        Ok(result)
    }

    fn weight(&self, idx: NodeIndex) -> Result<&T> {
        self.graph
            .node_weight(idx)
            .ok_or_else(|| Error::DagNodeNotFound {
                node: format!("index {}", idx.index()),
            })
    }

    fn sorted_neighbors(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        neighbors.sort_by_key(|n| self.rank.get(n).copied().unwrap_or(usize::MAX));
        neighbors
    }
}

impl<T> Default for Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    fn default() -> Self {
        Self::new()
    }
}
