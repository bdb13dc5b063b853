//! Adapter dependency graph
//!
//! Adjacency maps keyed by adapter name, rebuilt from scratch on every
//! topology patch. Adapters refer to each other only by [`AdapterId`].

use std::collections::{BTreeSet, HashMap, HashSet};

use contracts::AdapterId;
use tracing::debug;

use crate::RoutingError;

/// Forward (dependent -> dependencies) and backward (dependency -> dependents) maps.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    forward: HashMap<AdapterId, Vec<AdapterId>>,
    backward: HashMap<AdapterId, Vec<AdapterId>>,
}

impl DependencyGraph {
    /// Build from declared dependency lists.
    ///
    /// References to unknown adapters and self-references are dropped and
    /// returned as problems for the host to report.
    pub fn build<I>(known: &BTreeSet<AdapterId>, declared: I) -> (Self, Vec<RoutingError>)
    where
        I: IntoIterator<Item = (AdapterId, Vec<AdapterId>)>,
    {
        let mut graph = Self::default();
        let mut problems = Vec::new();

        for (dependent, dependencies) in declared {
            let mut resolved = Vec::with_capacity(dependencies.len());
            for dependency in dependencies {
                if dependency == dependent {
                    problems.push(RoutingError::topology(format!(
                        "adapter '{dependent}' lists itself as a dependency, ignored"
                    )));
                } else if !known.contains(&dependency) {
                    problems.push(RoutingError::unresolved(dependent.as_str(), dependency.as_str()));
                } else if !resolved.contains(&dependency) {
                    resolved.push(dependency);
                }
            }
            if resolved.is_empty() {
                continue;
            }
            for dependency in &resolved {
                graph
                    .backward
                    .entry(dependency.clone())
                    .or_default()
                    .push(dependent.clone());
            }
            graph.forward.insert(dependent, resolved);
        }

        if let Some(cycle) = graph.find_cycle() {
            let names: Vec<&str> = cycle.iter().map(AdapterId::as_str).collect();
            problems.push(RoutingError::topology(format!(
                "dependency cycle {}, affected measurements wait for their timeout",
                names.join(" -> ")
            )));
        }

        debug!(
            dependents = graph.forward.len(),
            problems = problems.len(),
            "Dependency graph built"
        );
        (graph, problems)
    }

    /// Adapters that must process a measurement before `adapter` receives it.
    pub fn dependencies_of(&self, adapter: &AdapterId) -> &[AdapterId] {
        self.forward.get(adapter).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Adapters waiting on `adapter`.
    pub fn dependents_of(&self, adapter: &AdapterId) -> &[AdapterId] {
        self.backward.get(adapter).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.forward.values().map(Vec::len).sum()
    }

    /// Any cycle in the forward graph, as a closed path.
    pub fn find_cycle(&self) -> Option<Vec<AdapterId>> {
        let mut done = HashSet::new();
        let mut starts: Vec<&AdapterId> = self.forward.keys().collect();
        starts.sort();

        for start in starts {
            if done.contains(start) {
                continue;
            }
            let mut path = Vec::new();
            if let Some(cycle) = self.visit(start, &mut path, &mut done) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        node: &'a AdapterId,
        path: &mut Vec<&'a AdapterId>,
        done: &mut HashSet<&'a AdapterId>,
    ) -> Option<Vec<AdapterId>> {
        if let Some(pos) = path.iter().position(|n| *n == node) {
            let mut cycle: Vec<AdapterId> = path[pos..].iter().map(|n| (*n).clone()).collect();
            cycle.push(node.clone());
            return Some(cycle);
        }
        if done.contains(node) {
            return None;
        }

        path.push(node);
        for next in self.dependencies_of(node) {
            if let Some(cycle) = self.visit(next, path, done) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(node);
        None
    }
}
