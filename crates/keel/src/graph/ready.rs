//! Ready and blocked work.
//!
//! An issue is **ready** when its status is `open` or `in_progress`, it is not
//! ephemeral, it is not hidden by the pinned or workflow-type exclusions, and
//! none of its blocking dependencies points at an open issue. A blocking
//! edge to a closed, tombstoned or missing issue does not block.
//!
//! **Blocked** work is every non-terminal, non-ephemeral issue with at least
//! one open blocker, plus issues marked `blocked` by hand.

use super::IssueGraph;
use crate::domain::{Issue, IssueFilter, IssueId, IssueStatus, SortPolicy};
use serde::Serialize;

/// An issue together with the open issues blocking it.
#[derive(Debug, Clone, Serialize)]
pub struct BlockedIssue {
    /// The blocked issue
    pub issue: Issue,

    /// Open blockers, sorted by ID
    pub open_blockers: Vec<IssueId>,
}

impl BlockedIssue {
    /// Number of open blockers.
    #[must_use]
    pub fn blocker_count(&self) -> usize {
        self.open_blockers.len()
    }
}

impl IssueGraph {
    /// Open issues that `id` is waiting on through blocking edges.
    #[must_use]
    pub fn open_blockers(&self, id: &IssueId) -> Vec<IssueId> {
        self.deps
            .dependencies(id)
            .into_iter()
            .filter(|dep| dep.dep_type.is_blocking() && self.is_open(&dep.depends_on_id))
            .map(|dep| dep.depends_on_id)
            .collect()
    }

    /// Pinned and type exclusions shared by ready and blocked work.
    fn passes_exclusions(&self, issue: &Issue, filter: &IssueFilter) -> bool {
        if issue.ephemeral || (issue.pinned && !filter.include_pinned) {
            return false;
        }
        if filter.issue_type.is_none()
            && self
                .settings
                .excluded_types
                .iter()
                .any(|t| t == issue.issue_type.as_str())
        {
            return false;
        }
        filter.matches(issue)
    }

    /// Issues ready to be worked on, sorted by `policy` and truncated to
    /// `filter.limit`.
    #[must_use]
    pub fn ready_work(&self, filter: &IssueFilter, policy: SortPolicy) -> Vec<Issue> {
        let mut ready: Vec<Issue> = self
            .issues
            .values()
            .filter(|issue| issue.status.is_workable())
            .filter(|issue| self.passes_exclusions(issue, filter))
            .filter(|issue| self.open_blockers(&issue.id).is_empty())
            .cloned()
            .collect();

        sort_by_policy(&mut ready, policy);
        if let Some(limit) = filter.limit {
            ready.truncate(limit);
        }
        ready
    }

    /// Blocked issues with their open blockers, most urgent first.
    #[must_use]
    pub fn blocked_work(&self, filter: &IssueFilter) -> Vec<BlockedIssue> {
        let mut blocked: Vec<BlockedIssue> = self
            .issues
            .values()
            .filter(|issue| issue.status.is_workable() || issue.status == IssueStatus::Blocked)
            .filter(|issue| self.passes_exclusions(issue, filter))
            .filter_map(|issue| {
                let open_blockers = self.open_blockers(&issue.id);
                let manual = issue.status == IssueStatus::Blocked;
                (manual || !open_blockers.is_empty()).then(|| BlockedIssue {
                    issue: issue.clone(),
                    open_blockers,
                })
            })
            .collect();

        blocked.sort_by(|a, b| {
            a.issue
                .priority
                .cmp(&b.issue.priority)
                .then(a.issue.id.cmp(&b.issue.id))
        });
        if let Some(limit) = filter.limit {
            blocked.truncate(limit);
        }
        blocked
    }
}

/// Sort issues according to the specified sort policy.
///
/// - `Hybrid`: newest first, so freshly filed work surfaces
/// - `Priority`: P0 first, oldest first within a priority
/// - `Oldest`: creation date ascending
///
/// `id` is the final tiebreaker in every policy so output is deterministic.
pub fn sort_by_policy(issues: &mut [Issue], policy: SortPolicy) {
    match policy {
        SortPolicy::Hybrid => {
            issues.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        }
        SortPolicy::Priority => {
            issues.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            });
        }
        SortPolicy::Oldest => {
            issues.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DependencyType::{Blocks, ConditionalBlocks, ParentChild, WaitsFor};
    use crate::domain::test_support::issue;
    use crate::domain::{AssigneeFilter, IssueType};
    use crate::graph::GraphSettings;
    use crate::graph::test_support::with_deps;
    use chrono::{Duration, Utc};
    use std::collections::HashSet;

    fn graph(issues: Vec<Issue>) -> IssueGraph {
        IssueGraph::new(issues, GraphSettings::default())
    }

    fn ids(issues: &[Issue]) -> Vec<&str> {
        issues.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn closed_and_missing_blockers_do_not_block() {
        let mut done = issue("p-done");
        done.status = IssueStatus::Closed;
        let g = graph(vec![
            done,
            with_deps("p-a", &[("p-done", Blocks)]),
            with_deps("p-b", &[("p-gone", Blocks)]),
        ]);

        let ready = g.ready_work(&IssueFilter::default(), SortPolicy::Oldest);
        let ready: HashSet<_> = ids(&ready).into_iter().collect();
        assert!(ready.contains("p-a"));
        assert!(ready.contains("p-b"));
    }

    #[test]
    fn every_blocking_type_blocks() {
        let g = graph(vec![
            issue("p-x"),
            with_deps("p-a", &[("p-x", Blocks)]),
            with_deps("p-b", &[("p-x", ConditionalBlocks)]),
            with_deps("p-c", &[("p-x", WaitsFor)]),
            with_deps("p-d", &[("p-x", ParentChild)]),
        ]);

        let blocked = g.blocked_work(&IssueFilter::default());
        let blocked: Vec<&str> = blocked.iter().map(|b| b.issue.id.as_str()).collect();
        assert_eq!(blocked, vec!["p-a", "p-b", "p-c"]);
    }

    #[test]
    fn blocked_reports_open_blocker_count() {
        let mut closed = issue("p-2");
        closed.status = IssueStatus::Closed;
        let g = graph(vec![
            issue("p-1"),
            closed,
            issue("p-3"),
            with_deps("p-a", &[("p-1", Blocks), ("p-2", Blocks), ("p-3", WaitsFor)]),
        ]);

        let blocked = g.blocked_work(&IssueFilter::default());
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].blocker_count(), 2);
    }

    #[test]
    fn pinned_and_workflow_types_are_hidden_by_default() {
        let mut pinned = issue("p-pin");
        pinned.pinned = true;
        let mut molecule = issue("p-mol");
        molecule.issue_type = IssueType::Molecule;
        let g = graph(vec![pinned, molecule, issue("p-task")]);

        let ready = g.ready_work(&IssueFilter::default(), SortPolicy::Oldest);
        assert_eq!(ids(&ready), vec!["p-task"]);

        let with_pinned = IssueFilter {
            include_pinned: true,
            ..IssueFilter::default()
        };
        assert_eq!(g.ready_work(&with_pinned, SortPolicy::Oldest).len(), 2);

        let molecules = IssueFilter {
            issue_type: Some(IssueType::Molecule),
            ..IssueFilter::default()
        };
        assert_eq!(ids(&g.ready_work(&molecules, SortPolicy::Oldest)), vec!["p-mol"]);
    }

    #[test]
    fn ready_and_blocked_partition_the_issue_set() {
        let mut closed = issue("p-closed");
        closed.status = IssueStatus::Closed;
        let mut tomb = issue("p-tomb");
        tomb.status = IssueStatus::Tombstone;
        tomb.deleted_at = Some(Utc::now());
        let mut eph = issue("p-eph");
        eph.ephemeral = true;
        let mut pinned = issue("p-pin");
        pinned.pinned = true;
        let mut manual = issue("p-manual");
        manual.status = IssueStatus::Blocked;
        let mut wip = with_deps("p-wip", &[("p-closed", Blocks)]);
        wip.status = IssueStatus::InProgress;

        let all = vec![
            closed,
            tomb,
            eph,
            pinned,
            manual,
            wip,
            issue("p-root"),
            with_deps("p-child", &[("p-root", Blocks)]),
            with_deps("p-grand", &[("p-child", WaitsFor), ("p-tomb", Blocks)]),
        ];
        let g = graph(all.clone());
        let filter = IssueFilter::default();

        let ready: HashSet<String> = g
            .ready_work(&filter, SortPolicy::Hybrid)
            .into_iter()
            .map(|i| i.id.0)
            .collect();
        let blocked: HashSet<String> = g
            .blocked_work(&filter)
            .into_iter()
            .map(|b| b.issue.id.0)
            .collect();
        let excluded: HashSet<String> = all
            .iter()
            .filter(|i| i.status.is_terminal() || i.ephemeral || i.pinned)
            .map(|i| i.id.0.clone())
            .collect();

        assert!(ready.is_disjoint(&blocked));
        assert!(ready.is_disjoint(&excluded));
        assert!(blocked.is_disjoint(&excluded));

        let union: HashSet<String> = ready.union(&blocked).chain(excluded.iter()).cloned().collect();
        let everything: HashSet<String> = all.iter().map(|i| i.id.0.clone()).collect();
        assert_eq!(union, everything);
    }

    #[test]
    fn filters_compose_and_limit_applies_after_sort() {
        let now = Utc::now();
        let mut a = issue("p-a");
        a.assignee = Some("alice".into());
        a.priority = 1;
        a.created_at = now - Duration::hours(3);
        let mut b = issue("p-b");
        b.assignee = Some("alice".into());
        b.priority = 1;
        b.created_at = now - Duration::hours(1);
        let mut c = issue("p-c");
        c.assignee = Some("bob".into());
        c.priority = 1;
        let g = graph(vec![a, b, c]);

        let filter = IssueFilter {
            assignee: Some(AssigneeFilter::Is("alice".into())),
            priority: Some(1),
            limit: Some(1),
            ..IssueFilter::default()
        };
        assert_eq!(ids(&g.ready_work(&filter, SortPolicy::Hybrid)), vec!["p-b"]);
        assert_eq!(ids(&g.ready_work(&filter, SortPolicy::Oldest)), vec!["p-a"]);
    }

    #[test]
    fn priority_sort_uses_age_then_id() {
        let now = Utc::now();
        let mut issues = vec![issue("p-3"), issue("p-1"), issue("p-2")];
        issues[0].priority = 0;
        issues[1].created_at = now - Duration::days(1);
        issues[2].created_at = now - Duration::days(1);
        issues[1].priority = 2;
        issues[2].priority = 2;

        sort_by_policy(&mut issues, SortPolicy::Priority);
        assert_eq!(ids(&issues), vec!["p-3", "p-1", "p-2"]);
    }
}
