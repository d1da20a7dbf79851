//! Dependency graph validation for the task catalog.
//!
//! Declared dependencies are checked as a directed graph so a refresh can
//! warn about cycles and references to unknown tasks before a run starts.
//! Execution itself stays strictly sequential; the graph is a validation
//! tool, not a scheduler.

use std::collections::HashMap;

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::core::task::TaskId;

/// Directed graph of declared task dependencies.
///
/// Edges point from a dependency to its dependent, so a topological order
/// lists prerequisites first.
pub struct DependencyGraph {
    graph: DiGraph<TaskId, ()>,
    node_index: HashMap<TaskId, NodeIndex>,
    /// Dependency references that name no known task, in discovery order.
    unknown_refs: Vec<(TaskId, TaskId)>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_index: HashMap::new(),
            unknown_refs: Vec::new(),
        }
    }

    /// Build a graph from `(task, dependencies)` pairs.
    ///
    /// Dependencies naming tasks outside the set are recorded as unknown
    /// references rather than added as edges.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a TaskId, &'a [TaskId])> + Clone,
    {
        let mut graph = Self::new();
        for (id, _) in entries.clone() {
            graph.add_node(id.clone());
        }
        for (id, deps) in entries {
            for dep in deps {
                graph.add_edge(dep, id);
            }
        }
        graph
    }

    fn add_node(&mut self, id: TaskId) -> NodeIndex {
        if let Some(&index) = self.node_index.get(&id) {
            return index;
        }
        let index = self.graph.add_node(id.clone());
        self.node_index.insert(id, index);
        index
    }

    /// Add an edge from `dep` to `dependent`. If `dep` is not a known node
    /// the reference is recorded as unknown instead.
    fn add_edge(&mut self, dep: &TaskId, dependent: &TaskId) {
        let Some(&to) = self.node_index.get(dependent) else {
            return;
        };
        match self.node_index.get(dep) {
            Some(&from) => {
                self.graph.add_edge(from, to, ());
            }
            None => {
                self.unknown_refs.push((dependent.clone(), dep.clone()));
            }
        }
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Dependency references that named no known task: `(dependent, missing)`.
    pub fn unknown_refs(&self) -> &[(TaskId, TaskId)] {
        &self.unknown_refs
    }

    /// Check whether the declared dependencies contain a cycle.
    pub fn has_cycle(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Tasks in topological order (prerequisites first), or the task id at
    /// which a cycle was detected.
    pub fn topological_order(&self) -> std::result::Result<Vec<TaskId>, TaskId> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            self.graph
                .node_weight(cycle.node_id())
                .cloned()
                .unwrap_or_else(|| TaskId::new("unknown"))
        })?;
        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index).cloned())
            .collect())
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("tasks", &self.task_count())
            .field("edges", &self.edge_count())
            .field("unknown_refs", &self.unknown_refs.len())
            .finish()
    }
}
