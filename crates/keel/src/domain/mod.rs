//! Domain types for issue tracking.
//!
//! This module contains the core domain types for the keel datastore: the
//! [`Issue`] record itself, its dependency edges, and the input types used to
//! create, patch and query issues.

mod status;

pub use status::{IssueStatus, IssueType};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Minimum valid priority (highest urgency)
pub const MIN_PRIORITY: u8 = 0;

/// Maximum valid priority (lowest urgency)
pub const MAX_PRIORITY: u8 = 4;

/// Maximum title length in characters
pub const MAX_TITLE_LENGTH: usize = 500;

/// Maximum number of numeric dotted segments in a hierarchical ID.
pub const MAX_HIERARCHY_DEPTH: usize = 4;

/// Unique identifier for an issue
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(pub String);

impl IssueId {
    /// Create a new issue ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The non-hierarchical part of the ID (`proj-a3f8` for `proj-a3f8.1.2`).
    #[must_use]
    pub fn base(&self) -> &str {
        let mut end = self.0.len();
        while let Some((head, tail)) = self.0[..end].rsplit_once('.') {
            if tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_digit()) {
                break;
            }
            end = head.len();
        }
        &self.0[..end]
    }

    /// The project prefix, everything before the last `-` of the base ID.
    ///
    /// Returns `None` for IDs without a hyphen.
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        self.base().rsplit_once('-').map(|(prefix, _)| prefix)
    }

    /// Number of numeric dotted child segments (`0` for a top-level ID).
    #[must_use]
    pub fn hierarchy_depth(&self) -> usize {
        let base_len = self.base().len();
        self.0[base_len..].matches('.').count()
    }

    /// The parent of a hierarchical ID, if any.
    #[must_use]
    pub fn parent(&self) -> Option<IssueId> {
        if self.hierarchy_depth() == 0 {
            return None;
        }
        self.0
            .rsplit_once('.')
            .map(|(parent, _)| IssueId::new(parent))
    }

    /// The trailing child index of a hierarchical ID (`2` for `proj-a3f8.1.2`).
    #[must_use]
    pub fn child_index(&self) -> Option<u32> {
        if self.hierarchy_depth() == 0 {
            return None;
        }
        self.0
            .rsplit_once('.')
            .and_then(|(_, tail)| tail.parse().ok())
    }

    /// Returns a copy of this ID with `old` replaced by `new` as the prefix.
    ///
    /// Returns `None` if the ID does not start with `{old}-`.
    #[must_use]
    pub fn with_prefix(&self, old: &str, new: &str) -> Option<IssueId> {
        self.0
            .strip_prefix(old)
            .and_then(|rest| rest.strip_prefix('-'))
            .map(|rest| IssueId(format!("{new}-{rest}")))
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for IssueId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for IssueId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for IssueId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Represents an issue in the tracking system.
///
/// This is also the export record: every field round-trips through the JSONL
/// export file. Optional fields are omitted when unset so that records stay
/// compact and diff-friendly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Unique identifier for the issue
    pub id: IssueId,

    /// Issue title
    pub title: String,

    /// Issue description
    #[serde(default)]
    pub description: String,

    /// Design notes (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<String>,

    /// Acceptance criteria (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<String>,

    /// Additional notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Current status
    pub status: IssueStatus,

    /// Priority level (0 = highest, 4 = lowest)
    pub priority: u8,

    /// Issue type
    pub issue_type: IssueType,

    /// Assignee (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    /// Labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    /// Dependencies on other issues
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,

    /// Append-only comment thread
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,

    /// External reference (e.g., a tracker ticket); unique among live issues
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    /// Exempt from automated cleanup and hidden from ready work by default
    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,

    /// Transient issue, never exported
    #[serde(default, skip_serializing_if = "is_false")]
    pub ephemeral: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Closed timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    /// Reason given when closing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,

    /// Soft-delete timestamp; set iff the issue is a tombstone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Reason given when deleting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_reason: Option<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

impl Issue {
    /// Validates title and priority.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated rule.
    pub fn validate(&self) -> Result<(), String> {
        validate_title(&self.title)?;
        validate_priority(self.priority)
    }

    /// Returns `true` if the issue is a soft-deleted tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.status == IssueStatus::Tombstone
    }

    /// Returns `true` if this issue has the given label.
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Deterministic SHA-256 over the content fields, hex encoded.
    ///
    /// Timestamps, dependencies and comments are excluded so that two copies
    /// of the same issue written at different times hash identically.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut labels: Vec<&str> = self.labels.iter().map(String::as_str).collect();
        labels.sort_unstable();
        let labels = labels.join(",");
        let priority = self.priority.to_string();

        let fields: [&str; 14] = [
            &self.title,
            &self.description,
            self.design.as_deref().unwrap_or(""),
            self.acceptance_criteria.as_deref().unwrap_or(""),
            self.notes.as_deref().unwrap_or(""),
            self.status.as_str(),
            &priority,
            self.issue_type.as_str(),
            self.assignee.as_deref().unwrap_or(""),
            self.external_ref.as_deref().unwrap_or(""),
            &labels,
            if self.pinned { "pinned" } else { "" },
            if self.ephemeral { "ephemeral" } else { "" },
            self.close_reason.as_deref().unwrap_or(""),
        ];

        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

fn validate_title(title: &str) -> Result<(), String> {
    if title.trim().is_empty() {
        return Err("Title cannot be empty".to_string());
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(format!(
            "Title cannot exceed {MAX_TITLE_LENGTH} characters"
        ));
    }
    Ok(())
}

fn validate_priority(priority: u8) -> Result<(), String> {
    if priority > MAX_PRIORITY {
        return Err(format!(
            "Priority must be in range {MIN_PRIORITY}-{MAX_PRIORITY}, got {priority}"
        ));
    }
    Ok(())
}

/// Dependency between issues
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dependency {
    /// ID of the issue this depends on
    pub depends_on_id: IssueId,

    /// Type of dependency
    pub dep_type: DependencyType,
}

/// Type of dependency relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    /// Hard blocker - prevents work
    Blocks,

    /// Hierarchical - child depends on parent
    ParentChild,

    /// Blocks unless the blocker fails
    ConditionalBlocks,

    /// Waits for another issue to finish
    WaitsFor,

    /// Soft link - informational
    Related,

    /// Found during work
    DiscoveredFrom,
}

impl DependencyType {
    /// Returns `true` for the edge types that order execution.
    ///
    /// Only these edges participate in cycle detection and readiness.
    #[must_use]
    pub fn is_blocking(self) -> bool {
        matches!(
            self,
            Self::Blocks | Self::ConditionalBlocks | Self::WaitsFor
        )
    }

    /// The kebab-case name used in the export file.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::ParentChild => "parent-child",
            Self::ConditionalBlocks => "conditional-blocks",
            Self::WaitsFor => "waits-for",
            Self::Related => "related",
            Self::DiscoveredFrom => "discovered-from",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocks" => Ok(Self::Blocks),
            "parent-child" => Ok(Self::ParentChild),
            "conditional-blocks" => Ok(Self::ConditionalBlocks),
            "waits-for" => Ok(Self::WaitsFor),
            "related" => Ok(Self::Related),
            "discovered-from" => Ok(Self::DiscoveredFrom),
            other => Err(format!("unknown dependency type '{other}'")),
        }
    }
}

/// A comment on an issue. Comments are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Sequence number, unique within the owning issue
    pub id: u64,

    /// Owning issue
    pub issue_id: IssueId,

    /// Comment author
    pub author: String,

    /// Comment body
    pub text: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Data for creating a new issue
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    /// Issue title
    pub title: String,

    /// Issue description
    pub description: String,

    /// Priority level (0-4)
    pub priority: u8,

    /// Issue type
    pub issue_type: IssueType,

    /// Assignee (optional)
    pub assignee: Option<String>,

    /// Labels
    pub labels: Vec<String>,

    /// Design notes (optional)
    pub design: Option<String>,

    /// Acceptance criteria (optional)
    pub acceptance_criteria: Option<String>,

    /// Additional notes
    pub notes: Option<String>,

    /// External reference
    pub external_ref: Option<String>,

    /// Dependencies
    pub dependencies: Vec<(IssueId, DependencyType)>,

    /// Allocate a hierarchical child ID under this parent and link it with a
    /// `parent-child` edge
    pub parent: Option<IssueId>,

    /// Pin the issue
    pub pinned: bool,

    /// Mark the issue as ephemeral
    pub ephemeral: bool,
}

impl NewIssue {
    /// A new task with the given title and default priority 2.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            priority: 2,
            ..Self::default()
        }
    }

    /// Validates title and priority.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated rule.
    pub fn validate(&self) -> Result<(), String> {
        validate_title(&self.title)?;
        validate_priority(self.priority)
    }
}

/// Explicit patch for an existing issue.
///
/// `None` leaves a field unchanged. For nullable fields, `Some(None)` clears
/// the value and `Some(Some(v))` sets it.
#[derive(Debug, Clone, Default)]
pub struct IssueUpdate {
    /// New title
    pub title: Option<String>,

    /// New description
    pub description: Option<String>,

    /// New design notes
    pub design: Option<Option<String>>,

    /// New acceptance criteria
    pub acceptance_criteria: Option<Option<String>>,

    /// New notes
    pub notes: Option<Option<String>>,

    /// New status
    pub status: Option<IssueStatus>,

    /// New priority
    pub priority: Option<u8>,

    /// New issue type
    pub issue_type: Option<IssueType>,

    /// New assignee
    pub assignee: Option<Option<String>>,

    /// New external reference
    pub external_ref: Option<Option<String>>,

    /// Replace the label set
    pub labels: Option<Vec<String>>,

    /// New pinned flag
    pub pinned: Option<bool>,

    /// New ephemeral flag
    pub ephemeral: Option<bool>,

    /// New close reason
    pub close_reason: Option<Option<String>>,
}

impl IssueUpdate {
    /// Patch that only changes the status.
    #[must_use]
    pub fn status(status: IssueStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Assignee filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssigneeFilter {
    /// Assigned to exactly this person
    Is(String),

    /// No assignee
    Unassigned,
}

/// Filter for querying issues.
///
/// All set criteria must match. An empty filter matches every issue except
/// pinned ones when used for ready work.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    /// Filter by status
    pub status: Option<IssueStatus>,

    /// Filter by exact priority
    pub priority: Option<u8>,

    /// Filter by issue type
    pub issue_type: Option<IssueType>,

    /// Filter by assignee
    pub assignee: Option<AssigneeFilter>,

    /// Issue must carry every one of these labels
    pub labels_all: Vec<String>,

    /// Issue must carry at least one of these labels
    pub labels_any: Vec<String>,

    /// Include pinned issues in ready work
    pub include_pinned: bool,

    /// Limit number of results (applied after sorting)
    pub limit: Option<usize>,
}

impl IssueFilter {
    /// Returns `true` if the issue satisfies every field criterion.
    ///
    /// `include_pinned` and `limit` are applied by the caller.
    #[must_use]
    pub fn matches(&self, issue: &Issue) -> bool {
        if self.status.as_ref().is_some_and(|s| *s != issue.status) {
            return false;
        }
        if self.priority.is_some_and(|p| p != issue.priority) {
            return false;
        }
        if self
            .issue_type
            .as_ref()
            .is_some_and(|t| *t != issue.issue_type)
        {
            return false;
        }
        match &self.assignee {
            Some(AssigneeFilter::Is(name)) if issue.assignee.as_deref() != Some(name) => {
                return false;
            }
            Some(AssigneeFilter::Unassigned) if issue.assignee.is_some() => return false,
            _ => {}
        }
        if !self.labels_all.iter().all(|l| issue.has_label(l)) {
            return false;
        }
        if !self.labels_any.is_empty() && !self.labels_any.iter().any(|l| issue.has_label(l)) {
            return false;
        }
        true
    }
}

/// Sort policy for ready work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortPolicy {
    /// Most recently created first
    #[default]
    Hybrid,

    /// Priority ascending (most urgent first)
    Priority,

    /// Creation time ascending
    Oldest,
}

impl FromStr for SortPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "priority" => Ok(Self::Priority),
            "oldest" => Ok(Self::Oldest),
            other => Err(format!(
                "unknown sort policy '{other}' (expected hybrid, priority or oldest)"
            )),
        }
    }
}

impl fmt::Display for SortPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hybrid => "hybrid",
            Self::Priority => "priority",
            Self::Oldest => "oldest",
        })
    }
}
