//! The dependency network consulted by the queue's scheduler.
//!
//! Nodes are [`GeneratorId`]s. Each node carries the ordered list of ids it
//! must run after ([`DependencyEdges`]). The network never schedules anything
//! itself; it is read by a [`Queue`](crate::queue::Queue) to decide when a
//! job may start.
//!
//! ## Registration policy
//!
//! - Adding an id that already exists **merges**: the node keeps its original
//!   registration position and gains any edges it did not already have.
//! - Edges may reference ids that are not registered yet. Dangling references
//!   are reported when the graph is read ([`DependencyNetwork::validate`],
//!   [`DependencyNetwork::toposort`], [`DependencyNetwork::ancestors`]).
//! - Cycles, including self edges, are reported by the same operations.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use ferry_core::GeneratorId;

use crate::dag::Dag;
use crate::error::{Error, Result};

/// Ordered list of generator ids that a generator must run after.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyEdges(Vec<GeneratorId>);

impl DependencyEdges {
    /// Creates edges from an ordered list of dependencies.
    #[must_use]
    pub fn new(edges: Vec<GeneratorId>) -> Self {
        Self(edges)
    }

    /// No dependencies.
    #[must_use]
    pub const fn none() -> Self {
        Self(Vec::new())
    }

    /// Returns the dependencies in declaration order.
    #[must_use]
    pub fn edges(&self) -> &[GeneratorId] {
        &self.0
    }

    /// Returns true if there are no dependencies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of dependencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the dependencies in declaration order.
    pub fn iter(&self) -> std::slice::Iter<'_, GeneratorId> {
        self.0.iter()
    }
}

impl From<Vec<GeneratorId>> for DependencyEdges {
    fn from(edges: Vec<GeneratorId>) -> Self {
        Self(edges)
    }
}

impl<'a> FromIterator<&'a str> for DependencyEdges {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(GeneratorId::new).collect())
    }
}

impl FromIterator<GeneratorId> for DependencyEdges {
    fn from_iter<I: IntoIterator<Item = GeneratorId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a DependencyEdges {
    type Item = &'a GeneratorId;
    type IntoIter = std::slice::Iter<'a, GeneratorId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A directed graph of "must run after" relationships between generators.
///
/// Implementations must be safe to share between the orchestrator and every
/// queue worker. The provided read operations are built on the four required
/// accessors, so an implementation only has to store nodes and edges.
pub trait DependencyNetwork: Send + Sync {
    /// Registers `id` with the generators it must run after.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot record the node.
    fn add(&self, id: GeneratorId, edges: DependencyEdges) -> Result<()>;

    /// Returns the edges registered for `id`, if it is registered.
    fn edges(&self, id: &GeneratorId) -> Option<DependencyEdges>;

    /// Returns every registered node in registration order.
    fn nodes(&self) -> Vec<GeneratorId>;

    /// Returns true if `id` has been registered.
    fn contains(&self, id: &GeneratorId) -> bool {
        self.edges(id).is_some()
    }

    /// Checks the whole graph for dangling edges and cycles.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DependencyNotFound`] or [`Error::CycleDetected`].
    fn validate(&self) -> Result<()> {
        self.toposort().map(|_| ())
    }

    /// Returns every node with its dependencies before it.
    ///
    /// Independent nodes keep their registration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DependencyNotFound`] or [`Error::CycleDetected`].
    fn toposort(&self) -> Result<Vec<GeneratorId>> {
        let nodes = self.nodes();
        let dag = build_dag(self, &nodes)?;
        dag.toposort()
    }

    /// Returns every node `id` transitively depends on, nearest first.
    ///
    /// Only the part of the graph reachable from `id` is checked, so a cycle
    /// elsewhere does not affect the answer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DependencyNotFound`] if `id` or anything it reaches is
    /// unregistered, or [`Error::CycleDetected`] if a cycle is reachable.
    fn ancestors(&self, id: &GeneratorId) -> Result<Vec<GeneratorId>> {
        if !self.contains(id) {
            return Err(Error::DependencyNotFound {
                dependency: id.to_string(),
                required_by: id.to_string(),
            });
        }

        let mut reachable = HashSet::from([id.clone()]);
        let mut frontier = VecDeque::from([id.clone()]);
        while let Some(node) = frontier.pop_front() {
            for dependency in self.edges(&node).unwrap_or_default().iter() {
                if reachable.insert(dependency.clone()) {
                    frontier.push_back(dependency.clone());
                }
            }
        }

        let nodes: Vec<GeneratorId> = self
            .nodes()
            .into_iter()
            .filter(|node| reachable.contains(node))
            .collect();
        let dag = build_dag(self, &nodes)?;
        dag.toposort()?;

        let idx = dag.get_index(id).ok_or_else(|| Error::DagNodeNotFound {
            node: id.to_string(),
        })?;
        dag.ancestors(idx)
    }
}

/// Builds a DAG over `nodes`, with an edge from each dependency to its
/// dependent.
fn build_dag<N>(network: &N, nodes: &[GeneratorId]) -> Result<Dag<GeneratorId>>
where
    N: DependencyNetwork + ?Sized,
{
    let mut dag = Dag::new();
    for node in nodes {
        dag.add_node(node.clone());
    }

    for node in nodes {
        let to = dag.add_node(node.clone());
        for dependency in network.edges(node).unwrap_or_default().iter() {
            let from = dag
                .get_index(dependency)
                .ok_or_else(|| Error::DependencyNotFound {
                    dependency: dependency.to_string(),
                    required_by: node.to_string(),
                })?;
            dag.add_edge(from, to)?;
        }
    }

    Ok(dag)
}

#[derive(Debug, Default)]
struct GraphState {
    order: Vec<GeneratorId>,
    edges: HashMap<GeneratorId, Vec<GeneratorId>>,
}

/// In-memory [`DependencyNetwork`].
///
/// ## Example
///
/// ```rust
/// use ferry_core::GeneratorId;
/// use ferry_flow::network::{DependencyEdges, DependencyGraph, DependencyNetwork};
///
/// let graph = DependencyGraph::new();
/// graph.add(GeneratorId::new("users"), DependencyEdges::none()).unwrap();
/// graph.add(GeneratorId::new("orders"), ["users"].into_iter().collect()).unwrap();
///
/// let order = graph.toposort().unwrap();
/// assert_eq!(order, vec![GeneratorId::new("users"), GeneratorId::new("orders")]);
/// ```
#[derive(Debug, Default)]
pub struct DependencyGraph {
    state: RwLock<GraphState>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("dependency graph lock poisoned")
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    /// Returns true if nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DependencyNetwork for DependencyGraph {
    fn add(&self, id: GeneratorId, edges: DependencyEdges) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;

        if !state.edges.contains_key(&id) {
            state.order.push(id.clone());
        }
        let existing = state.edges.entry(id.clone()).or_default();
        let before = existing.len();
        for edge in edges.0 {
            if !existing.contains(&edge) {
                existing.push(edge);
            }
        }
        let added = existing.len() - before;
        drop(state);

        tracing::debug!(generator = %id, added_edges = added, "registered generator");
        Ok(())
    }

    fn edges(&self, id: &GeneratorId) -> Option<DependencyEdges> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.edges.get(id).cloned().map(DependencyEdges)
    }

    fn nodes(&self) -> Vec<GeneratorId> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.order.clone()
    }

    fn contains(&self, id: &GeneratorId) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.edges.contains_key(id)
    }
}
