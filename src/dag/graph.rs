// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use crate::errors::{Result, WatchbuildError};

/// Immediate neighbours of one node.
#[derive(Debug, Clone, Default)]
struct NodeEdges {
    /// Nodes this one depends on.
    outgoing: Vec<String>,
    /// Nodes that depend on this one.
    incoming: Vec<String>,
}

/// Mutable dependency graph over project names.
///
/// An edge `from -> to` means "`from` depends on `to`". Nodes keep their
/// insertion order, which is also the tie-breaker for ordering queries.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<String>,
    edges: HashMap<String, NodeEdges>,
    allow_cycles: bool,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph whose ordering queries tolerate cycles instead of failing.
    pub fn with_cycles_allowed() -> Self {
        Self {
            allow_cycles: true,
            ..Self::default()
        }
    }

    pub fn allows_cycles(&self) -> bool {
        self.allow_cycles
    }

    /// Add a node. Adding an existing node is a no-op.
    pub fn add_node(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.edges.contains_key(&id) {
            return;
        }
        self.edges.insert(id.clone(), NodeEdges::default());
        self.order.push(id);
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    /// Remove a node and every edge touching it. Returns whether it existed.
    pub fn remove_node(&mut self, id: &str) -> bool {
        let Some(removed) = self.edges.remove(id) else {
            return false;
        };
        self.order.retain(|n| n != id);

        for dep in removed.outgoing.iter() {
            if let Some(e) = self.edges.get_mut(dep) {
                e.incoming.retain(|n| n != id);
            }
        }
        for dependant in removed.incoming.iter() {
            if let Some(e) = self.edges.get_mut(dependant) {
                e.outgoing.retain(|n| n != id);
            }
        }
        true
    }

    /// Record that `from` depends on `to`. Both nodes must exist.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<()> {
        for id in [from, to] {
            if !self.has_node(id) {
                return Err(WatchbuildError::NodeNotFound(id.to_string()));
            }
        }

        if let Some(e) = self.edges.get_mut(from) {
            if !e.outgoing.iter().any(|n| n == to) {
                e.outgoing.push(to.to_string());
            }
        }
        if let Some(e) = self.edges.get_mut(to) {
            if !e.incoming.iter().any(|n| n == from) {
                e.incoming.push(from.to_string());
            }
        }
        Ok(())
    }

    /// Remove the edge `from -> to` if present.
    pub fn remove_dependency(&mut self, from: &str, to: &str) {
        if let Some(e) = self.edges.get_mut(from) {
            e.outgoing.retain(|n| n != to);
        }
        if let Some(e) = self.edges.get_mut(to) {
            e.incoming.retain(|n| n != from);
        }
    }

    /// Direct dependencies of `id` (empty for unknown nodes).
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.edges
            .get(id)
            .map(|e| e.outgoing.as_slice())
            .unwrap_or(&[])
    }

    /// Direct dependants of `id` (empty for unknown nodes).
    pub fn dependants_of(&self, id: &str) -> &[String] {
        self.edges
            .get(id)
            .map(|e| e.incoming.as_slice())
            .unwrap_or(&[])
    }

    /// Every node that depends on `id`, directly or transitively.
    pub fn transitive_dependants(&self, id: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();
        let mut stack: Vec<&str> = vec![id];

        while let Some(node) = stack.pop() {
            for dependant in self.dependants_of(node) {
                if dependant != id && seen.insert(dependant.as_str()) {
                    out.push(dependant.clone());
                    stack.push(dependant.as_str());
                }
            }
        }
        out
    }

    /// Node names in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Nodes ordered so that every node comes after all of its dependencies.
    ///
    /// With `leaves_only`, only nodes without dependencies are returned.
    /// Unless cycles are allowed, any cycle yields
    /// [`WatchbuildError::DependencyCycle`] carrying the cycle path, e.g.
    /// `[a, b, a]`.
    pub fn overall_order(&self, leaves_only: bool) -> Result<Vec<String>> {
        if self.order.is_empty() {
            return Ok(Vec::new());
        }

        if !self.allow_cycles {
            let mut visited = HashSet::new();
            let mut path = Vec::new();
            for node in self.order.iter() {
                if !visited.contains(node.as_str()) {
                    self.find_cycle(node, &mut visited, &mut path)?;
                }
            }
        }

        let mut visited = HashSet::new();
        let mut out = Vec::new();

        let roots = self
            .order
            .iter()
            .filter(|n| self.dependants_of(n).is_empty());
        for root in roots {
            self.post_order(root, leaves_only, &mut visited, &mut out);
        }

        // Nodes that only sit on cycles have no root to be reached from.
        if self.allow_cycles {
            for node in self.order.iter() {
                self.post_order(node, leaves_only, &mut visited, &mut out);
            }
        }

        Ok(out)
    }

    fn find_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Result<()> {
        visited.insert(node);
        path.push(node);

        for dep in self.dependencies_of(node) {
            if let Some(pos) = path.iter().position(|p| *p == dep) {
                let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.clone());
                return Err(WatchbuildError::DependencyCycle { path: cycle });
            }
            if !visited.contains(dep.as_str()) {
                self.find_cycle(dep, visited, path)?;
            }
        }

        path.pop();
        Ok(())
    }

    fn post_order<'a>(
        &'a self,
        node: &'a str,
        leaves_only: bool,
        visited: &mut HashSet<&'a str>,
        out: &mut Vec<String>,
    ) {
        if !visited.insert(node) {
            return;
        }
        let deps = self.dependencies_of(node);
        for dep in deps {
            self.post_order(dep, leaves_only, visited, out);
        }
        if !leaves_only || deps.is_empty() {
            out.push(node.to_string());
        }
    }
}
