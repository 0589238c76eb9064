//! Task dependency graph.
//!
//! A [`TaskGraph`] owns its nodes and the directed depends-on edges between
//! them. Updates after planning follow a copy-on-write discipline:
//! [`TaskGraph::with_status`] returns a new graph rather than mutating a
//! shared one, so planners and executors never alias each other's state.
//!
//! Graph algorithms (cycle enumeration, topological order, critical path)
//! run over a [`GraphIndex`], a petgraph adjacency built from the flat
//! node/edge store.

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::task::{TaskNode, TaskStatus};
use crate::error::{Error, Result};

/// A directed depends-on relation: `from` must complete before `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEdge {
    /// The prerequisite task.
    pub from: String,
    /// The dependent task.
    pub to: String,
}

impl TaskEdge {
    /// Create an edge stating `to` depends on `from`.
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// The dependency graph produced by the planning layer.
///
/// Invariants: node ids are unique, and after successful planning the
/// graph is acyclic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskGraph {
    /// Flat node store.
    pub nodes: Vec<TaskNode>,
    /// Directed depends-on edges.
    pub edges: Vec<TaskEdge>,
    /// Groups of tasks safe to run concurrently (isolated nodes).
    pub parallel_groups: Vec<Vec<String>>,
    /// Sum of node token estimates.
    pub estimated_total_tokens: u32,
    /// Longest token-weighted path, as an ordered list of node ids.
    pub critical_path: Vec<String>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Whether a node with this id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Add a node, rejecting duplicate ids.
    pub fn add_node(&mut self, node: TaskNode) -> Result<()> {
        if self.contains(&node.id) {
            return Err(Error::DuplicateTask(node.id));
        }
        self.estimated_total_tokens += node.estimated_tokens;
        self.nodes.push(node);
        Ok(())
    }

    /// Add a depends-on edge and mirror it into the dependent node's
    /// dependency list.
    ///
    /// Both endpoints must already exist.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.contains(from) {
            return Err(Error::TaskNotFound(from.to_string()));
        }
        if !self.contains(to) {
            return Err(Error::TaskNotFound(to.to_string()));
        }
        self.edges.push(TaskEdge::new(from, to));
        if let Some(node) = self.nodes.iter_mut().find(|n| n.id == to) {
            if !node.dependencies.iter().any(|d| d == from) {
                node.dependencies.push(from.to_string());
            }
        }
        Ok(())
    }

    /// Return a copy of the graph with one task's status changed.
    ///
    /// This is the only sanctioned way to record execution progress on a
    /// planned graph; the original is left untouched.
    pub fn with_status(&self, id: &str, status: TaskStatus) -> Result<TaskGraph> {
        let mut updated = self.clone();
        let node = updated
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        node.status = status;
        Ok(updated)
    }

    /// Recompute the cached token total from the node store.
    pub fn recompute_totals(&mut self) {
        self.estimated_total_tokens = self.nodes.iter().map(|n| n.estimated_tokens).sum();
    }

    /// Build a petgraph adjacency index over the current nodes and edges.
    ///
    /// Edges referencing unknown ids are skipped; the planner validates
    /// them separately.
    pub fn index(&self) -> GraphIndex {
        GraphIndex::new(self)
    }
}

/// Petgraph adjacency over a [`TaskGraph`].
///
/// Node weights are positions into the source graph's node store, so
/// algorithm results map back to task ids cheaply.
pub struct GraphIndex {
    graph: DiGraph<usize, ()>,
    by_id: HashMap<String, NodeIndex>,
}

impl GraphIndex {
    fn new(source: &TaskGraph) -> Self {
        let mut graph = DiGraph::new();
        let mut by_id = HashMap::new();
        for (pos, node) in source.nodes.iter().enumerate() {
            let idx = graph.add_node(pos);
            by_id.insert(node.id.clone(), idx);
        }
        for edge in &source.edges {
            if let (Some(&from), Some(&to)) = (by_id.get(&edge.from), by_id.get(&edge.to)) {
                graph.add_edge(from, to, ());
            }
        }
        Self { graph, by_id }
    }

    /// The petgraph index for a task id.
    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.by_id.get(id).copied()
    }

    /// Position in the source node store for a petgraph index.
    pub fn position(&self, idx: NodeIndex) -> usize {
        self.graph[idx]
    }

    /// All petgraph node indices.
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Direct dependents (outgoing neighbors) of a node.
    pub fn dependents(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.graph.neighbors_directed(idx, Direction::Outgoing).collect()
    }

    /// Direct prerequisites (incoming neighbors) of a node.
    pub fn dependencies(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.graph.neighbors_directed(idx, Direction::Incoming).collect()
    }

    /// Number of incoming edges.
    pub fn in_degree(&self, idx: NodeIndex) -> usize {
        self.graph.neighbors_directed(idx, Direction::Incoming).count()
    }

    /// Number of outgoing edges.
    pub fn out_degree(&self, idx: NodeIndex) -> usize {
        self.graph.neighbors_directed(idx, Direction::Outgoing).count()
    }

    /// Whether the indexed graph contains a cycle.
    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }
}
