//! Data-quality checks over the dependency graph.

use super::IssueGraph;
use crate::domain::{DependencyType, IssueId};
use serde::Serialize;
use std::collections::HashSet;

/// An edge whose target has no issue record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedDependency {
    /// Issue holding the edge
    pub issue_id: IssueId,

    /// Missing target
    pub depends_on_id: IssueId,

    /// Edge type
    pub dep_type: DependencyType,
}

/// A blocking edge from an issue to one of its own hierarchy ancestors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HierarchyAntiPattern {
    /// The descendant holding the blocking edge
    pub child: IssueId,

    /// The ancestor it waits on
    pub ancestor: IssueId,

    /// Edge type
    pub dep_type: DependencyType,
}

impl IssueGraph {
    /// Edges pointing at IDs with no issue record, sorted.
    #[must_use]
    pub fn orphaned_dependencies(&self) -> Vec<OrphanedDependency> {
        let mut orphans: Vec<OrphanedDependency> = self
            .deps
            .edges()
            .filter(|(from, to, _)| self.issues.contains_key(from) && !self.issues.contains_key(to))
            .map(|(from, to, dep_type)| OrphanedDependency {
                issue_id: from.clone(),
                depends_on_id: to.clone(),
                dep_type,
            })
            .collect();
        orphans.sort_by(|a, b| {
            a.issue_id
                .cmp(&b.issue_id)
                .then(a.depends_on_id.cmp(&b.depends_on_id))
        });
        orphans
    }

    /// Hierarchy ancestors of `id`, nearest first.
    ///
    /// A parent is either the target of a `parent-child` edge or the dotted
    /// parent of a hierarchical ID (`p-1` for `p-1.2`). The walk stops at
    /// `max_cycle_depth` levels.
    fn ancestors(&self, id: &IssueId) -> Vec<IssueId> {
        let mut seen = HashSet::from([id.clone()]);
        let mut ancestors = Vec::new();
        let mut frontier = vec![id.clone()];

        for _ in 0..self.settings.max_cycle_depth {
            let mut next = Vec::new();
            for current in &frontier {
                let parents = self
                    .deps
                    .dependencies(current)
                    .into_iter()
                    .filter(|dep| dep.dep_type == DependencyType::ParentChild)
                    .map(|dep| dep.depends_on_id)
                    .chain(current.parent());
                for parent in parents {
                    if seen.insert(parent.clone()) {
                        ancestors.push(parent.clone());
                        next.push(parent);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        ancestors
    }

    /// Blocking edges from a descendant to one of its ancestors.
    ///
    /// Some workflows use this shape on purpose, so it is only reported.
    #[must_use]
    pub fn hierarchy_anti_patterns(&self) -> Vec<HierarchyAntiPattern> {
        let mut found: Vec<HierarchyAntiPattern> = self
            .deps
            .edges()
            .filter(|(_, _, dep_type)| dep_type.is_blocking())
            .filter(|(from, to, _)| self.ancestors(from).contains(to))
            .map(|(from, to, dep_type)| HierarchyAntiPattern {
                child: from.clone(),
                ancestor: to.clone(),
                dep_type,
            })
            .collect();
        found.sort_by(|a, b| a.child.cmp(&b.child).then(a.ancestor.cmp(&b.ancestor)));
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DependencyType::{Blocks, ParentChild, WaitsFor};
    use crate::domain::test_support::issue;
    use crate::graph::GraphSettings;
    use crate::graph::test_support::with_deps;

    #[test]
    fn orphans_are_reported_once_per_edge() {
        let g = IssueGraph::new(
            vec![
                issue("p-1"),
                with_deps("p-2", &[("p-1", Blocks), ("p-gone", Blocks)]),
            ],
            GraphSettings::default(),
        );
        let orphans = g.orphaned_dependencies();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].depends_on_id.as_str(), "p-gone");
    }

    #[test]
    fn child_blocking_its_parent_is_flagged() {
        let g = IssueGraph::new(
            vec![
                issue("e-1"),
                with_deps("e-1.1", &[("e-1", Blocks)]),
                with_deps("e-2", &[("e-1", Blocks)]),
                with_deps("e-1.2", &[("e-1", ParentChild)]),
            ],
            GraphSettings::default(),
        );
        let found = g.hierarchy_anti_patterns();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].child.as_str(), "e-1.1");
        assert_eq!(found[0].ancestor.as_str(), "e-1");
        assert_eq!(found[0].dep_type, Blocks);
    }

    #[test]
    fn parent_blocking_on_its_child_is_not_flagged() {
        let g = IssueGraph::new(
            vec![
                with_deps("e-1", &[("e-1.1", Blocks)]),
                with_deps("e-1.1", &[("e-1", ParentChild)]),
            ],
            GraphSettings::default(),
        );
        assert!(g.hierarchy_anti_patterns().is_empty());
    }

    #[test]
    fn child_blocking_grandparent_is_flagged() {
        let g = IssueGraph::new(
            vec![
                issue("e-1"),
                with_deps("e-1.1", &[("e-1", ParentChild)]),
                with_deps("e-1.1.1", &[("e-1.1", ParentChild), ("e-1", WaitsFor)]),
                with_deps("x-1", &[("e-1", Blocks)]),
            ],
            GraphSettings::default(),
        );
        let found = g.hierarchy_anti_patterns();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].child.as_str(), "e-1.1.1");
        assert_eq!(found[0].ancestor.as_str(), "e-1");
    }
}
