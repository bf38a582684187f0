//! String-backed enums for issue status and issue type.
//!
//! Both enums have a fixed set of built-in values plus a `Custom` variant for
//! workflow-defined values, so they serialize as plain strings rather than
//! through serde's derived enum representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of an issue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IssueStatus {
    /// Issue is open and ready to work on
    #[default]
    Open,

    /// Issue is currently being worked on
    InProgress,

    /// Issue is marked blocked by hand
    Blocked,

    /// Issue has been completed
    Closed,

    /// Issue was soft-deleted and is retained until its TTL expires
    Tombstone,

    /// Workflow-defined status; must be listed in the `status.custom` config entry
    Custom(String),
}

impl IssueStatus {
    /// The canonical string form used in the export file.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Closed => "closed",
            Self::Tombstone => "tombstone",
            Self::Custom(s) => s,
        }
    }

    /// Returns `true` for `open` and `in_progress`, the statuses that can be ready work.
    #[must_use]
    pub fn is_workable(&self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }

    /// Returns `true` for `closed` and `tombstone`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Tombstone)
    }
}

impl From<String> for IssueStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "open" => Self::Open,
            "in_progress" => Self::InProgress,
            "blocked" => Self::Blocked,
            "closed" => Self::Closed,
            "tombstone" => Self::Tombstone,
            _ => Self::Custom(s),
        }
    }
}

impl From<IssueStatus> for String {
    fn from(status: IssueStatus) -> Self {
        match status {
            IssueStatus::Custom(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl FromStr for IssueStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of issue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IssueType {
    /// Bug fix
    Bug,

    /// New feature
    Feature,

    /// General task
    #[default]
    Task,

    /// Epic (composite parent issue)
    Epic,

    /// Maintenance/chore
    Chore,

    /// Workflow molecule (composite parent issue)
    Molecule,

    /// Workflow-defined type (gate, message, merge-request, ...)
    Custom(String),
}

impl IssueType {
    /// The canonical string form used in the export file.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Task => "task",
            Self::Epic => "epic",
            Self::Chore => "chore",
            Self::Molecule => "molecule",
            Self::Custom(s) => s,
        }
    }

    /// Epics and molecules collect children through `parent-child` edges.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Epic | Self::Molecule)
    }
}

impl From<String> for IssueType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "bug" => Self::Bug,
            "feature" => Self::Feature,
            "task" => Self::Task,
            "epic" => Self::Epic,
            "chore" => Self::Chore,
            "molecule" => Self::Molecule,
            _ => Self::Custom(s),
        }
    }
}

impl From<IssueType> for String {
    fn from(issue_type: IssueType) -> Self {
        match issue_type {
            IssueType::Custom(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl FromStr for IssueType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(IssueStatus::Open, "\"open\"")]
    #[case(IssueStatus::InProgress, "\"in_progress\"")]
    #[case(IssueStatus::Tombstone, "\"tombstone\"")]
    #[case(IssueStatus::Custom("review".to_string()), "\"review\"")]
    fn status_serializes_as_plain_string(#[case] status: IssueStatus, #[case] json: &str) {
        assert_eq!(serde_json::to_string(&status).unwrap(), json);
        let back: IssueStatus = serde_json::from_str(json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn unknown_type_becomes_custom() {
        let t: IssueType = serde_json::from_str("\"merge-request\"").unwrap();
        assert_eq!(t, IssueType::Custom("merge-request".to_string()));
        assert!(!t.is_composite());
        assert!(IssueType::Molecule.is_composite());
    }
}
