//! Dependency graph library for build scheduling.
//!
//! Unlike a strict DAG, a [`DepGraph`] tolerates cycles: build target graphs
//! may legally contain them, and the scheduler contracts every
//! strongly-connected component into a single *chunk* that is built as one
//! unit. The library provides:
//!
//! - Generic nodes with arena-style `NodeId` handles
//! - Dependency and dependent tracking
//! - Topological sorting (Kahn's algorithm) for acyclic graphs
//! - Tarjan SCC condensation producing chunks in dependency order
//!
//! # Example
//!
//! ```
//! use chunk_graph::DepGraph;
//!
//! let mut graph = DepGraph::new();
//! let a = graph.add_node("a");
//! let b = graph.add_node("b");
//! let c = graph.add_node("c");
//!
//! // b depends on a; c and b depend on each other (a cycle)
//! graph.add_dependency(b, a);
//! graph.add_dependency(c, b);
//! graph.add_dependency(b, c);
//!
//! let chunks = graph.condense();
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].node_ids(), &[a]);          // dependencies first
//! assert_eq!(chunks[1].node_ids().len(), 2);       // {b, c} contracted
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::collections::{HashSet, VecDeque};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Node identifier, stable for the lifetime of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeId(usize);

impl NodeId {
    /// Raw arena index of this node.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node({})", self.0)
    }
}

/// Error types for graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Topological sort was requested but the graph contains a cycle.
    #[error("cycle detected involving {0}")]
    CycleDetected(NodeId),

    /// Node id does not belong to this graph.
    #[error("{0} not found in graph")]
    NodeNotFound(NodeId),
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

#[derive(Debug, Clone)]
struct Node<N> {
    data: N,
    // outgoing edges: nodes this one depends on
    deps: Vec<NodeId>,
    // incoming edges: nodes depending on this one
    dependents: Vec<NodeId>,
}

/// A strongly-connected component of a [`DepGraph`], listed in the order the
/// member nodes were added to the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    nodes: Vec<NodeId>,
}

impl Component {
    /// Member node ids.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Whether this component is a single node (the common case).
    pub fn is_singleton(&self) -> bool {
        self.nodes.len() == 1
    }
}

/// Directed dependency graph over arbitrary node data.
///
/// Edges run from a node to the nodes it depends on. Cycles are permitted;
/// use [`DepGraph::condense`] to obtain an acyclic chunk ordering.
#[derive(Debug, Clone, Default)]
pub struct DepGraph<N> {
    nodes: Vec<Node<N>>,
}

impl<N> DepGraph<N> {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Add a node, returning its id.
    pub fn add_node(&mut self, data: N) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            deps: Vec::new(),
            dependents: Vec::new(),
        });
        id
    }

    /// Record that `node` depends on `dep`. Self-edges and duplicates are
    /// ignored.
    pub fn add_dependency(&mut self, node: NodeId, dep: NodeId) {
        if node == dep || self.nodes[node.0].deps.contains(&dep) {
            return;
        }
        self.nodes[node.0].deps.push(dep);
        self.nodes[dep.0].dependents.push(node);
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.deps.len()).sum()
    }

    /// Borrow the data of a node.
    pub fn node(&self, id: NodeId) -> GraphResult<&N> {
        self.nodes
            .get(id.0)
            .map(|n| &n.data)
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Ids of the nodes `id` depends on.
    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].deps
    }

    /// Ids of the nodes depending on `id`.
    pub fn dependents(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].dependents
    }

    /// All node ids in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Topological sort using Kahn's algorithm: dependencies first.
    ///
    /// Fails with [`GraphError::CycleDetected`] if the graph is cyclic; use
    /// [`DepGraph::condense`] when cycles are expected.
    pub fn topological_sort(&self) -> GraphResult<Vec<NodeId>> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.deps.len()).collect();
        let mut queue: VecDeque<NodeId> = self
            .node_ids()
            .filter(|id| in_degree[id.0] == 0)
            .collect();
        let mut sorted = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_front() {
            sorted.push(id);
            for &dependent in &self.nodes[id.0].dependents {
                in_degree[dependent.0] -= 1;
                if in_degree[dependent.0] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let stuck = self
                .node_ids()
                .find(|id| in_degree[id.0] > 0)
                .expect("unsorted node must remain");
            return Err(GraphError::CycleDetected(stuck));
        }
        Ok(sorted)
    }

    /// Whether the graph contains at least one cycle.
    pub fn has_cycle(&self) -> bool {
        self.topological_sort().is_err()
    }

    /// Contract every strongly-connected component into a [`Component`] and
    /// return the components topologically sorted, dependencies first.
    ///
    /// Tarjan's algorithm emits a component only after every component it
    /// depends on has been emitted, which is exactly the order a scheduler
    /// wants.
    pub fn condense(&self) -> Vec<Component> {
        Tarjan::new(self).run()
    }
}

struct Tarjan<'g, N> {
    graph: &'g DepGraph<N>,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next_index: usize,
    components: Vec<Component>,
}

impl<'g, N> Tarjan<'g, N> {
    fn new(graph: &'g DepGraph<N>) -> Self {
        let n = graph.node_count();
        Self {
            graph,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next_index: 0,
            components: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Component> {
        for v in 0..self.graph.node_count() {
            if self.index[v].is_none() {
                self.strong_connect(v);
            }
        }
        self.components
    }

    fn strong_connect(&mut self, v: usize) {
        self.index[v] = Some(self.next_index);
        self.lowlink[v] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        for &dep in &self.graph.nodes[v].deps {
            let w = dep.0;
            match self.index[w] {
                None => {
                    self.strong_connect(w);
                    self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                }
                Some(w_index) if self.on_stack[w] => {
                    self.lowlink[v] = self.lowlink[v].min(w_index);
                }
                Some(_) => {}
            }
        }

        if self.lowlink[v] == self.index[v].expect("indexed above") {
            let mut nodes = Vec::new();
            loop {
                let w = self.stack.pop().expect("stack holds the component");
                self.on_stack[w] = false;
                nodes.push(NodeId(w));
                if w == v {
                    break;
                }
            }
            nodes.sort();
            self.components.push(Component { nodes });
        }
    }
}

/// Compute, for each component, the set of components it depends on.
///
/// Indices refer to positions in `components`; self-edges arising from
/// intra-component dependencies are dropped.
pub fn component_dependencies<N>(
    graph: &DepGraph<N>,
    components: &[Component],
) -> Vec<HashSet<usize>> {
    let mut owner = vec![0usize; graph.node_count()];
    for (idx, component) in components.iter().enumerate() {
        for id in component.node_ids() {
            owner[id.index()] = idx;
        }
    }

    let mut deps: Vec<HashSet<usize>> = vec![HashSet::new(); components.len()];
    for id in graph.node_ids() {
        let from = owner[id.index()];
        for dep in graph.dependencies(id) {
            let to = owner[dep.index()];
            if from != to {
                let _ = deps[from].insert(to);
            }
        }
    }
    deps
}
