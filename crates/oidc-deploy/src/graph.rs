//! Dependency graph
//!
//! Edges run from a dependency to its dependent. They come from attribute
//! references (including references nested in lists, maps, concatenations
//! and policy documents), from `Exists(..)` conditions and from explicit
//! `depends_on`. The execution order is a topological sort with ties broken
//! by `(kind, name)`, so the same model always yields the same order.

use crate::error::DeployError;
use crate::model::{ResourceRef, StackModel};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

/// Color states for cycle detection using DFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Not yet visited
    White,
    /// On the current DFS path
    Gray,
    /// Fully explored
    Black,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<ResourceRef, ()>,
    nodes: HashMap<ResourceRef, NodeIndex>,
    order: Vec<ResourceRef>,
}

impl DependencyGraph {
    /// Build the graph and its execution order
    ///
    /// Fails with a validation error on duplicate identities or references
    /// to undeclared resources, and with [`DeployError::GraphCycle`] when no
    /// order exists.
    pub fn build(model: &StackModel) -> Result<Self, DeployError> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        let mut problems = Vec::new();

        for resource in &model.resources {
            let id = resource.id();
            if nodes.contains_key(&id) {
                problems.push(format!("duplicate resource {id}"));
                continue;
            }
            let idx = graph.add_node(id.clone());
            nodes.insert(id, idx);
        }

        for resource in &model.resources {
            let id = resource.id();
            let to = nodes[&id];
            for dependency in resource.references() {
                match nodes.get(&dependency) {
                    Some(&from) if from == to => {
                        return Err(DeployError::GraphCycle { cycle: vec![id] });
                    }
                    Some(&from) => {
                        graph.update_edge(from, to, ());
                    }
                    None => problems.push(format!("{id} references undeclared {dependency}")),
                }
            }
        }

        for output in &model.outputs {
            if !nodes.contains_key(&output.source) {
                problems.push(format!(
                    "output '{}' reads undeclared {}",
                    output.name, output.source
                ));
            }
        }

        if !problems.is_empty() {
            return Err(DeployError::Validation { problems });
        }

        let mut built = Self {
            graph,
            nodes,
            order: Vec::new(),
        };
        built.detect_cycles()?;
        built.order = built.topological_order();
        Ok(built)
    }

    /// Resources in execution order: every dependency precedes its dependents
    pub fn order(&self) -> &[ResourceRef] {
        &self.order
    }

    /// Direct dependencies of `r`
    pub fn dependencies(&self, r: &ResourceRef) -> BTreeSet<ResourceRef> {
        self.neighbors(r, Direction::Incoming)
    }

    /// Direct dependents of `r`
    pub fn dependents(&self, r: &ResourceRef) -> BTreeSet<ResourceRef> {
        self.neighbors(r, Direction::Outgoing)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn neighbors(&self, r: &ResourceRef, direction: Direction) -> BTreeSet<ResourceRef> {
        match self.nodes.get(r) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, direction)
                .map(|n| self.graph[n].clone())
                .collect(),
            None => BTreeSet::new(),
        }
    }

    /// Detect cycles in the dependency graph using DFS with colors.
    fn detect_cycles(&self) -> Result<(), DeployError> {
        let mut colors: HashMap<NodeIndex, Color> = self
            .graph
            .node_indices()
            .map(|n| (n, Color::White))
            .collect();
        let mut path = Vec::new();

        let mut starts: Vec<NodeIndex> = self.graph.node_indices().collect();
        starts.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

        for node in starts {
            if colors[&node] != Color::White {
                continue;
            }
            if let Some(cycle) = self.dfs_visit(node, &mut colors, &mut path) {
                return Err(DeployError::GraphCycle { cycle });
            }
        }
        Ok(())
    }

    /// Returns the nodes of the first cycle reachable from `node`, if any
    fn dfs_visit(
        &self,
        node: NodeIndex,
        colors: &mut HashMap<NodeIndex, Color>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<ResourceRef>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        let mut next: Vec<NodeIndex> = self.graph.neighbors(node).collect();
        next.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

        for neighbor in next {
            match colors[&neighbor] {
                Color::Gray => {
                    let start = path.iter().position(|n| *n == neighbor).unwrap_or(0);
                    return Some(path[start..].iter().map(|n| self.graph[*n].clone()).collect());
                }
                Color::White => {
                    if let Some(cycle) = self.dfs_visit(neighbor, colors, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        None
    }

    /// Kahn's algorithm, always taking the smallest ready `(kind, name)`
    fn topological_order(&self) -> Vec<ResourceRef> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| {
                (
                    n,
                    self.graph.neighbors_directed(n, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<(ResourceRef, NodeIndex)>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(n, _)| Reverse((self.graph[*n].clone(), *n)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((id, idx))) = ready.pop() {
            order.push(id);
            for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.graph[dependent].clone(), dependent)));
                    }
                }
            }
        }
        order
    }
}
