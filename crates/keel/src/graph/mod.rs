//! Dependency graph engine.
//!
//! Two layers live here:
//!
//! - [`DependencyGraph`] is the mutable edge index owned by a storage backend.
//!   It guards every insertion: duplicate `(from, to)` pairs are rejected, and
//!   an edge of a blocking type is rejected if it would close a cycle in the
//!   blocking subgraph.
//! - [`IssueGraph`] is a read-only snapshot of issues plus edges, used for the
//!   whole-graph queries: cycles, ready and blocked work, epic closure and
//!   data-quality checks.
//!
//! # Edge Direction Convention
//!
//! Edges point from **dependent to dependency**:
//!
//! - **Blocks**: if issue A is blocked by issue B, the edge is `A -> B`
//! - **ParentChild**: if task C is a child of epic E, the edge is `C -> E`
//!
//! Edges may point at IDs with no issue record (orphans), for example after
//! a purge or a partial import. The graph keeps a node for every referenced
//! ID so that such edges stay representable.

mod cycles;
mod epics;
mod quality;
mod ready;

pub use cycles::Cycle;
pub use epics::EpicStatus;
pub use quality::{HierarchyAntiPattern, OrphanedDependency};
pub use ready::{BlockedIssue, sort_by_policy};

use crate::domain::{Dependency, DependencyType, Issue, IssueId};
use crate::error::{Error, Result};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet, VecDeque};

/// Default bound on cycle path length.
pub const DEFAULT_MAX_CYCLE_DEPTH: usize = 100;

/// Issue types left out of ready work unless a type filter is given.
pub const DEFAULT_EXCLUDED_TYPES: &[&str] =
    &["molecule", "gate", "message", "merge-request", "agent", "role"];

/// Directed edge index over issue IDs.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<IssueId, DependencyType>,
    node_map: HashMap<IssueId, NodeIndex>,
}

impl DependencyGraph {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from the dependency lists of `issues`.
    ///
    /// Records are trusted: duplicate pairs keep the first edge and no cycle
    /// check is applied, so that [`IssueGraph::cycles`] can report what was
    /// loaded.
    pub fn from_issues<'a>(issues: impl IntoIterator<Item = &'a Issue>) -> Self {
        let mut graph = Self::new();
        let issues: Vec<&Issue> = issues.into_iter().collect();
        for issue in &issues {
            graph.ensure_node(&issue.id);
        }
        for issue in &issues {
            for dep in &issue.dependencies {
                if !graph.contains_edge(&issue.id, &dep.depends_on_id) {
                    graph.insert_edge(&issue.id, &dep.depends_on_id, dep.dep_type);
                }
            }
        }
        graph
    }

    /// Node index for `id`, adding a node if needed.
    pub fn ensure_node(&mut self, id: &IssueId) -> NodeIndex {
        if let Some(&node) = self.node_map.get(id) {
            return node;
        }
        let node = self.graph.add_node(id.clone());
        self.node_map.insert(id.clone(), node);
        node
    }

    fn node(&self, id: &IssueId) -> Option<NodeIndex> {
        self.node_map.get(id).copied()
    }

    /// Returns `true` if any edge `from -> to` exists, whatever its type.
    #[must_use]
    pub fn contains_edge(&self, from: &IssueId, to: &IssueId) -> bool {
        self.edge_type(from, to).is_some()
    }

    /// Type of the edge `from -> to`, if present.
    #[must_use]
    pub fn edge_type(&self, from: &IssueId, to: &IssueId) -> Option<DependencyType> {
        let (from, to) = (self.node(from)?, self.node(to)?);
        self.graph
            .find_edge(from, to)
            .and_then(|edge| self.graph.edge_weight(edge).copied())
    }

    /// Returns `true` if adding a blocking edge `from -> to` would close a
    /// cycle in the blocking subgraph.
    ///
    /// Walks blocking edges from `to` looking for `from`. The walk visits
    /// each node once, so it terminates on any graph.
    #[must_use]
    pub fn would_create_cycle(&self, from: &IssueId, to: &IssueId) -> bool {
        if from == to {
            return true;
        }
        let (Some(start), Some(target)) = (self.node(to), self.node(from)) else {
            return false;
        };

        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for edge in self.graph.edges(node) {
                if !edge.weight().is_blocking() {
                    continue;
                }
                let next = edge.target();
                if next == target {
                    return true;
                }
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }

    /// Check that `from -> to` may be inserted.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` for a self-edge of a non-blocking type
    /// - `Error::Conflict` if an edge between the pair already exists
    /// - `Error::CircularDependency` if a blocking edge would close a cycle
    pub fn check_edge(&self, from: &IssueId, to: &IssueId, dep_type: DependencyType) -> Result<()> {
        if from == to && !dep_type.is_blocking() {
            return Err(Error::Validation(format!("{from} cannot depend on itself")));
        }
        if let Some(existing) = self.edge_type(from, to) {
            return Err(Error::Conflict(format!(
                "Dependency already exists: {from} -> {to} ({existing})"
            )));
        }
        if dep_type.is_blocking() && self.would_create_cycle(from, to) {
            return Err(Error::CircularDependency {
                from: from.clone(),
                to: to.clone(),
            });
        }
        Ok(())
    }

    /// Checked insertion.
    ///
    /// # Errors
    ///
    /// See [`check_edge`](Self::check_edge).
    pub fn add_edge(&mut self, from: &IssueId, to: &IssueId, dep_type: DependencyType) -> Result<()> {
        self.check_edge(from, to, dep_type)?;
        self.insert_edge(from, to, dep_type);
        Ok(())
    }

    /// Unchecked insertion.
    pub fn insert_edge(&mut self, from: &IssueId, to: &IssueId, dep_type: DependencyType) {
        let from = self.ensure_node(from);
        let to = self.ensure_node(to);
        self.graph.add_edge(from, to, dep_type);
    }

    /// Remove the edge `from -> to`, returning its type.
    pub fn remove_edge(&mut self, from: &IssueId, to: &IssueId) -> Option<DependencyType> {
        let (from, to) = (self.node(from)?, self.node(to)?);
        let edge = self.graph.find_edge(from, to)?;
        self.graph.remove_edge(edge)
    }

    /// Remove every outgoing edge of `id`.
    ///
    /// The node itself is kept: incoming edges from other issues survive as
    /// orphans, and node indices stay stable.
    pub fn remove_outgoing(&mut self, id: &IssueId) {
        let Some(node) = self.node(id) else {
            return;
        };
        loop {
            let Some(edge) = self.graph.edges(node).next().map(|e| e.id()) else {
                break;
            };
            self.graph.remove_edge(edge);
        }
    }

    /// Outgoing edges of `id`, sorted.
    #[must_use]
    pub fn dependencies(&self, id: &IssueId) -> Vec<Dependency> {
        self.collect(id, Direction::Outgoing)
    }

    /// Incoming edges of `id`, sorted. `depends_on_id` holds the dependent.
    #[must_use]
    pub fn dependents(&self, id: &IssueId) -> Vec<Dependency> {
        self.collect(id, Direction::Incoming)
    }

    fn collect(&self, id: &IssueId, direction: Direction) -> Vec<Dependency> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        let mut deps: Vec<Dependency> = self
            .graph
            .edges_directed(node, direction)
            .map(|edge| {
                let other = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                Dependency {
                    depends_on_id: self.graph[other].clone(),
                    dep_type: *edge.weight(),
                }
            })
            .collect();
        deps.sort();
        deps
    }

    /// Every edge as `(from, to, type)`.
    pub fn edges(&self) -> impl Iterator<Item = (&IssueId, &IssueId, DependencyType)> {
        self.graph.edge_references().map(|edge| {
            (
                &self.graph[edge.source()],
                &self.graph[edge.target()],
                *edge.weight(),
            )
        })
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub(crate) fn petgraph(&self) -> &DiGraph<IssueId, DependencyType> {
        &self.graph
    }

    pub(crate) fn index_of(&self, id: &IssueId) -> Option<NodeIndex> {
        self.node(id)
    }
}

/// Tuning for whole-graph queries.
#[derive(Debug, Clone)]
pub struct GraphSettings {
    /// Longest cycle path searched for, in edges. Longer cycles are missed.
    pub max_cycle_depth: usize,

    /// Issue types hidden from ready work unless a type filter is given
    pub excluded_types: Vec<String>,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            max_cycle_depth: DEFAULT_MAX_CYCLE_DEPTH,
            excluded_types: DEFAULT_EXCLUDED_TYPES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Read-only snapshot of issues and their edges.
#[derive(Debug, Clone)]
pub struct IssueGraph {
    issues: HashMap<IssueId, Issue>,
    deps: DependencyGraph,
    settings: GraphSettings,
}

impl IssueGraph {
    /// Build a snapshot from a full issue list.
    pub fn new(issues: Vec<Issue>, settings: GraphSettings) -> Self {
        let deps = DependencyGraph::from_issues(&issues);
        let issues = issues
            .into_iter()
            .map(|issue| (issue.id.clone(), issue))
            .collect();
        Self {
            issues,
            deps,
            settings,
        }
    }

    /// Look up an issue.
    #[must_use]
    pub fn issue(&self, id: &IssueId) -> Option<&Issue> {
        self.issues.get(id)
    }

    /// All issues, unordered.
    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues.values()
    }

    /// The edge index.
    #[must_use]
    pub fn dependency_graph(&self) -> &DependencyGraph {
        &self.deps
    }

    /// The active settings.
    #[must_use]
    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// Returns `true` if `id` names an issue that is still open (any status
    /// other than closed or tombstone).
    fn is_open(&self, id: &IssueId) -> bool {
        self.issues
            .get(id)
            .is_some_and(|issue| !issue.status.is_terminal())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::test_support::issue;
    use crate::domain::{Dependency, DependencyType, Issue, IssueId};

    /// Issue with the given outgoing edges.
    pub(crate) fn with_deps(id: &str, deps: &[(&str, DependencyType)]) -> Issue {
        let mut i = issue(id);
        i.dependencies = deps
            .iter()
            .map(|(to, dep_type)| Dependency {
                depends_on_id: IssueId::new(*to),
                dep_type: *dep_type,
            })
            .collect();
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DependencyType::{Blocks, ParentChild, Related};

    fn id(s: &str) -> IssueId {
        IssueId::new(s)
    }

    #[test]
    fn duplicate_pair_is_rejected_regardless_of_type() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&id("a"), &id("b"), Related).unwrap();
        let err = graph.add_edge(&id("a"), &id("b"), Blocks).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn blocking_cycle_is_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&id("a"), &id("b"), Blocks).unwrap();
        graph.add_edge(&id("b"), &id("c"), Blocks).unwrap();
        let err = graph.add_edge(&id("c"), &id("a"), Blocks).unwrap_err();
        assert!(matches!(err, Error::CircularDependency { .. }));
    }

    #[test]
    fn parent_child_cycle_is_allowed() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&id("a"), &id("b"), ParentChild).unwrap();
        graph.add_edge(&id("b"), &id("c"), ParentChild).unwrap();
        graph.add_edge(&id("c"), &id("a"), ParentChild).unwrap();
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn non_blocking_edges_do_not_close_blocking_cycles() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&id("a"), &id("b"), Blocks).unwrap();
        graph.add_edge(&id("b"), &id("a"), Related).unwrap();
        assert!(!graph.would_create_cycle(&id("c"), &id("a")));
    }

    #[test]
    fn blocking_self_edge_is_a_cycle() {
        let graph = DependencyGraph::new();
        let err = graph.check_edge(&id("a"), &id("a"), Blocks).unwrap_err();
        assert!(matches!(err, Error::CircularDependency { .. }));
    }

    #[test]
    fn remove_outgoing_keeps_incoming() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&id("a"), &id("b"), Blocks).unwrap();
        graph.add_edge(&id("b"), &id("c"), Blocks).unwrap();
        graph.remove_outgoing(&id("b"));

        assert!(graph.dependencies(&id("b")).is_empty());
        assert_eq!(graph.dependents(&id("b"))[0].depends_on_id, id("a"));
    }
}
