//! Dependency graph with stable topological ordering
//!
//! Shared by the action scheduler of the rule dialect and the item scheduler
//! of the NRML dialect. Nodes are identified by string keys; an edge
//! `a -> b` means "a needs b first". Edges to unknown nodes are ignored, so
//! callers can register every reference they find without filtering.
//!
//! Among nodes without an ordering constraint the declaration order is kept,
//! which makes evaluation order deterministic across runs.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Nodes in declaration order
    order: Vec<String>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with its dependencies. Re-adding a node merges dependencies.
    pub fn add_node(
        &mut self,
        node: impl Into<String>,
        dependencies: impl IntoIterator<Item = String>,
    ) {
        let node = node.into();
        if !self.dependencies.contains_key(&node) {
            self.order.push(node.clone());
        }
        self.dependencies
            .entry(node)
            .or_default()
            .extend(dependencies);
    }

    pub fn contains(&self, node: &str) -> bool {
        self.dependencies.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Known dependencies of `node` (unknown targets filtered out).
    pub fn dependencies_of(&self, node: &str) -> BTreeSet<&str> {
        self.dependencies
            .get(node)
            .into_iter()
            .flatten()
            .filter(|d| self.contains(d))
            .map(String::as_str)
            .collect()
    }

    /// All nodes transitively reachable from `roots`, roots included.
    pub fn closure<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = roots.into_iter().filter(|r| self.contains(r)).collect();
        while let Some(node) = stack.pop() {
            if seen.insert(node.to_string()) {
                stack.extend(self.dependencies_of(node));
            }
        }
        seen
    }

    /// Restrict the graph to `nodes`, keeping declaration order.
    pub fn subgraph(&self, nodes: &BTreeSet<String>) -> Self {
        let mut graph = Self::new();
        for node in self.order.iter().filter(|n| nodes.contains(*n)) {
            let deps = self
                .dependencies_of(node)
                .into_iter()
                .filter(|d| nodes.contains(*d))
                .map(str::to_string);
            graph.add_node(node.clone(), deps.collect::<Vec<_>>());
        }
        graph
    }

    /// Kahn's algorithm, always taking the earliest declared ready node.
    ///
    /// # Errors
    /// `CircularDependency` with every node that could not be ordered.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = self
            .order
            .iter()
            .map(|n| (n.as_str(), self.dependencies_of(n)))
            .collect();
        let mut sorted = Vec::with_capacity(self.order.len());

        loop {
            let ready = self
                .order
                .iter()
                .map(String::as_str)
                .find(|n| remaining.get(n).is_some_and(BTreeSet::is_empty));
            let Some(node) = ready else { break };

            remaining.remove(node);
            for deps in remaining.values_mut() {
                deps.remove(node);
            }
            sorted.push(node.to_string());
        }

        if !remaining.is_empty() {
            let members: Vec<String> = self
                .order
                .iter()
                .filter(|n| remaining.contains_key(n.as_str()))
                .cloned()
                .collect();
            tracing::warn!(members = ?members, "Circular dependency detected");
            return Err(EngineError::CircularDependency(members));
        }
        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_declaration_order_kept_for_independent_nodes() {
        let mut graph = DependencyGraph::new();
        graph.add_node("c", deps(&[]));
        graph.add_node("a", deps(&[]));
        graph.add_node("b", deps(&[]));
        assert_eq!(graph.topological_order().unwrap(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_dependencies_come_first() {
        let mut graph = DependencyGraph::new();
        graph.add_node("total", deps(&["base", "extra"]));
        graph.add_node("extra", deps(&["base"]));
        graph.add_node("base", deps(&[]));
        assert_eq!(
            graph.topological_order().unwrap(),
            vec!["base", "extra", "total"]
        );
    }

    #[test]
    fn test_unknown_dependencies_ignored() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a", deps(&["BSN", "income"]));
        assert_eq!(graph.topological_order().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_cycle_lists_members() {
        let mut graph = DependencyGraph::new();
        graph.add_node("free", deps(&[]));
        graph.add_node("x", deps(&["y"]));
        graph.add_node("y", deps(&["x"]));
        graph.add_node("after", deps(&["x"]));

        match graph.topological_order() {
            Err(EngineError::CircularDependency(members)) => {
                assert_eq!(members, vec!["x", "y", "after"]);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a", deps(&["a"]));
        assert!(graph.topological_order().is_err());
    }

    #[test]
    fn test_closure_and_subgraph() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a", deps(&[]));
        graph.add_node("b", deps(&["a"]));
        graph.add_node("c", deps(&["b"]));
        graph.add_node("d", deps(&[]));

        let needed = graph.closure(["c"]);
        assert_eq!(needed.len(), 3);
        assert!(!needed.contains("d"));

        let sub = graph.subgraph(&needed);
        assert_eq!(sub.topological_order().unwrap(), vec!["a", "b", "c"]);
    }
}
