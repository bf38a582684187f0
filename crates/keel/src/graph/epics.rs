//! Closure eligibility for composite issues.

use super::IssueGraph;
use crate::domain::{DependencyType, IssueId, IssueStatus};
use petgraph::Direction;
use petgraph::visit::EdgeRef;
use serde::Serialize;

/// Child progress of an open epic or molecule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpicStatus {
    /// The composite issue
    pub epic_id: IssueId,

    /// Its title
    pub title: String,

    /// Live children linked by `parent-child` edges
    pub total_children: usize,

    /// Children already closed
    pub closed_children: usize,

    /// At least one child, and every child closed
    pub eligible_for_close: bool,
}

impl IssueGraph {
    /// Child progress for every open epic and molecule, sorted by ID.
    ///
    /// Tombstoned children and edges from IDs with no issue record are not
    /// counted.
    #[must_use]
    pub fn epic_closure_status(&self) -> Vec<EpicStatus> {
        let graph = self.deps.petgraph();
        let mut statuses: Vec<EpicStatus> = self
            .issues
            .values()
            .filter(|issue| issue.issue_type.is_composite() && !issue.status.is_terminal())
            .map(|epic| {
                let children: Vec<_> = self
                    .deps
                    .index_of(&epic.id)
                    .into_iter()
                    .flat_map(|node| graph.edges_directed(node, Direction::Incoming))
                    .filter(|edge| *edge.weight() == DependencyType::ParentChild)
                    .filter_map(|edge| self.issues.get(&graph[edge.source()]))
                    .filter(|child| !child.is_tombstone())
                    .collect();

                let total_children = children.len();
                let closed_children = children
                    .iter()
                    .filter(|child| child.status == IssueStatus::Closed)
                    .count();

                EpicStatus {
                    epic_id: epic.id.clone(),
                    title: epic.title.clone(),
                    total_children,
                    closed_children,
                    eligible_for_close: total_children > 0 && closed_children == total_children,
                }
            })
            .collect();

        statuses.sort_by(|a, b| a.epic_id.cmp(&b.epic_id));
        statuses
    }

    /// Only the composites whose children are all closed.
    #[must_use]
    pub fn closure_eligible(&self) -> Vec<EpicStatus> {
        self.epic_closure_status()
            .into_iter()
            .filter(|status| status.eligible_for_close)
            .collect()
    }
}
