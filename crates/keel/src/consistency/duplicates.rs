//! Duplicate issue detection.

use crate::domain::{Issue, IssueId, IssueStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// Issues with identical content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    /// Shared title
    pub title: String,

    /// Shared status
    pub status: IssueStatus,

    /// Oldest member, the one to keep
    pub canonical: IssueId,

    /// Every member, sorted
    pub ids: Vec<IssueId>,
}

impl DuplicateGroup {
    /// Members beyond the canonical one.
    #[must_use]
    pub fn extras(&self) -> usize {
        self.ids.len().saturating_sub(1)
    }
}

type DuplicateKey<'a> = (&'a str, &'a str, &'a str, &'a str, &'a str);

fn key(issue: &Issue) -> DuplicateKey<'_> {
    (
        issue.title.as_str(),
        issue.description.as_str(),
        issue.design.as_deref().unwrap_or(""),
        issue.acceptance_criteria.as_deref().unwrap_or(""),
        issue.status.as_str(),
    )
}

/// Group non-ephemeral, non-terminal issues sharing title, description,
/// design, acceptance criteria and status.
///
/// Closed issues and tombstones never form duplicates. Groups are sorted by
/// their canonical ID.
pub fn find_duplicates<'a>(issues: impl IntoIterator<Item = &'a Issue>) -> Vec<DuplicateGroup> {
    let mut buckets: BTreeMap<DuplicateKey<'a>, Vec<&'a Issue>> = BTreeMap::new();
    for issue in issues {
        if issue.ephemeral || issue.status.is_terminal() {
            continue;
        }
        buckets.entry(key(issue)).or_default().push(issue);
    }

    let mut groups: Vec<DuplicateGroup> = buckets
        .into_values()
        .filter(|members| members.len() > 1)
        .filter_map(|members| {
            let canonical = members
                .iter()
                .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))?;
            let mut ids: Vec<IssueId> = members.iter().map(|i| i.id.clone()).collect();
            ids.sort();
            Some(DuplicateGroup {
                title: canonical.title.clone(),
                status: canonical.status.clone(),
                canonical: canonical.id.clone(),
                ids,
            })
        })
        .collect();
    groups.sort_by(|a, b| a.canonical.cmp(&b.canonical));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::issue;
    use chrono::Duration;

    fn twin(id: &str) -> Issue {
        let mut i = issue(id);
        i.title = "Fix login".to_string();
        i.description = "Button does nothing".to_string();
        i.design = Some("retry".to_string());
        i.acceptance_criteria = Some("works".to_string());
        i
    }

    #[test]
    fn identical_open_issues_are_grouped() {
        let mut older = twin("p-2");
        older.created_at -= Duration::hours(1);
        let issues = [twin("p-1"), older, issue("p-3")];

        let groups = find_duplicates(&issues);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].ids.len(), 2);
        assert_eq!(groups[0].extras(), 1);
        assert_eq!(groups[0].canonical.as_str(), "p-2");
    }

    #[test]
    fn closed_pairs_are_ignored() {
        let mut a = twin("p-1");
        let mut b = twin("p-2");
        a.status = IssueStatus::Closed;
        b.status = IssueStatus::Closed;
        assert!(find_duplicates(&[a, b]).is_empty());
    }

    #[test]
    fn status_is_part_of_the_key() {
        let mut b = twin("p-2");
        b.status = IssueStatus::InProgress;
        assert!(find_duplicates(&[twin("p-1"), b]).is_empty());
    }

    #[test]
    fn ephemeral_issues_are_ignored() {
        let mut b = twin("p-2");
        b.ephemeral = true;
        assert!(find_duplicates(&[twin("p-1"), b]).is_empty());
    }
}
