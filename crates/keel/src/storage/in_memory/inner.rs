//! Core in-memory storage data structures.
//!
//! [`InMemoryStorageInner`] holds the whole store and implements every
//! mutation synchronously. The async trait implementation wraps it in a
//! lock, and transactions run against a clone of it.
//!
//! Every mutation validates first and mutates last, so an error leaves the
//! state untouched.

use crate::domain::{
    Comment, Dependency, DependencyType, Issue, IssueId, IssueStatus, IssueUpdate, NewIssue,
};
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::id_generation::{IdGenerator, IdGeneratorConfig};
use crate::storage::{CUSTOM_STATUS_KEY, ISSUE_PREFIX_KEY, Statistics, StoreSnapshot, Transaction};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Inner storage structure (not thread-safe).
///
/// `Issue::dependencies` and `graph` always describe the same edge set: the
/// former is what gets serialized, the latter answers graph queries.
#[derive(Debug, Clone)]
pub(crate) struct InMemoryStorageInner {
    /// Issues indexed by ID, ordered for deterministic iteration
    pub(super) issues: BTreeMap<IssueId, Issue>,

    /// Edge index, source (dependent) -> target (dependency)
    pub(super) graph: DependencyGraph,

    /// ID generator for creating new issue IDs
    pub(super) id_generator: IdGenerator,

    /// Flat key/value config
    pub(super) config: BTreeMap<String, String>,

    /// Engine bookkeeping (sync timestamps, hashes, fingerprint)
    pub(super) metadata: BTreeMap<String, String>,
}

impl InMemoryStorageInner {
    /// Create a new empty storage instance
    pub(crate) fn new(id_config: IdGeneratorConfig) -> Self {
        let mut config = BTreeMap::new();
        config.insert(ISSUE_PREFIX_KEY.to_string(), id_config.prefix.clone());
        Self {
            issues: BTreeMap::new(),
            graph: DependencyGraph::new(),
            id_generator: IdGenerator::new(id_config),
            config,
            metadata: BTreeMap::new(),
        }
    }

    /// Rebuild state from a persisted snapshot.
    ///
    /// Counters are derived from every record ID and edge target, then
    /// raised to the persisted allocator state.
    pub(crate) fn from_snapshot(snapshot: StoreSnapshot, id_config: IdGeneratorConfig) -> Self {
        let graph = DependencyGraph::from_issues(&snapshot.issues);
        let mut id_generator = IdGenerator::with_existing(
            id_config,
            snapshot.issues.iter().flat_map(|issue| {
                std::iter::once(&issue.id)
                    .chain(issue.dependencies.iter().map(|dep| &dep.depends_on_id))
            }),
        );
        id_generator.restore(&snapshot.allocator);
        let issues = snapshot
            .issues
            .into_iter()
            .map(|issue| (issue.id.clone(), issue))
            .collect();
        Self {
            issues,
            graph,
            id_generator,
            config: snapshot.config,
            metadata: snapshot.metadata,
        }
    }

    pub(crate) fn to_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: StoreSnapshot::CURRENT_VERSION,
            issues: self.issues.values().cloned().collect(),
            config: self.config.clone(),
            metadata: self.metadata.clone(),
            allocator: self.id_generator.state(),
        }
    }

    fn require(&self, id: &IssueId) -> Result<&Issue> {
        self.issues
            .get(id)
            .ok_or_else(|| Error::IssueNotFound(id.clone()))
    }

    fn require_mut(&mut self, id: &IssueId) -> Result<&mut Issue> {
        self.issues
            .get_mut(id)
            .ok_or_else(|| Error::IssueNotFound(id.clone()))
    }

    /// Rejects an external reference already used by another live issue.
    fn check_external_ref(&self, external_ref: Option<&str>, owner: Option<&IssueId>) -> Result<()> {
        let Some(external_ref) = external_ref else {
            return Ok(());
        };
        let clash = self.issues.values().find(|other| {
            !other.is_tombstone()
                && Some(&other.id) != owner
                && other.external_ref.as_deref() == Some(external_ref)
        });
        match clash {
            Some(other) => Err(Error::Conflict(format!(
                "external_ref '{external_ref}' is already used by {}",
                other.id
            ))),
            None => Ok(()),
        }
    }

    fn custom_statuses(&self) -> Vec<&str> {
        self.config
            .get(CUSTOM_STATUS_KEY)
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn create_issue(&mut self, new_issue: NewIssue) -> Result<Issue> {
        // === Phase 1: All validations (no mutations) ===
        new_issue.validate().map_err(Error::Validation)?;

        if let Some(parent) = &new_issue.parent {
            match self.issues.get(parent) {
                None => {
                    return Err(Error::NotFound {
                        entity: "parent issue",
                        key: parent.to_string(),
                    });
                }
                Some(p) if p.is_tombstone() => {
                    return Err(Error::Validation(format!("parent {parent} is deleted")));
                }
                Some(_) => {}
            }
        }

        let mut targets = HashSet::new();
        for (depends_on_id, _) in &new_issue.dependencies {
            self.require(depends_on_id)?;
            if !targets.insert(depends_on_id) || new_issue.parent.as_ref() == Some(depends_on_id) {
                return Err(Error::Conflict(format!(
                    "Dependency on {depends_on_id} listed more than once"
                )));
            }
        }
        self.check_external_ref(new_issue.external_ref.as_deref(), None)?;

        // === Phase 2: ID allocation ===
        let id = IssueId::new(match &new_issue.parent {
            Some(parent) => self.id_generator.allocate_child(parent.as_str())?,
            None => self.id_generator.allocate(
                &new_issue.title,
                &new_issue.description,
                new_issue.assignee.as_deref(),
            )?,
        });

        // === Phase 3: Build the record ===
        let mut dependencies: Vec<Dependency> = new_issue
            .dependencies
            .into_iter()
            .map(|(depends_on_id, dep_type)| Dependency {
                depends_on_id,
                dep_type,
            })
            .collect();
        if let Some(parent) = new_issue.parent {
            dependencies.push(Dependency {
                depends_on_id: parent,
                dep_type: DependencyType::ParentChild,
            });
        }
        dependencies.sort();

        let now = Utc::now();
        let issue = Issue {
            id: id.clone(),
            title: new_issue.title,
            description: new_issue.description,
            design: new_issue.design,
            acceptance_criteria: new_issue.acceptance_criteria,
            notes: new_issue.notes,
            status: IssueStatus::Open,
            priority: new_issue.priority,
            issue_type: new_issue.issue_type,
            assignee: new_issue.assignee,
            labels: new_issue.labels,
            dependencies,
            comments: Vec::new(),
            external_ref: new_issue.external_ref,
            pinned: new_issue.pinned,
            ephemeral: new_issue.ephemeral,
            created_at: now,
            updated_at: now,
            closed_at: None,
            close_reason: None,
            deleted_at: None,
            delete_reason: None,
        };

        // === Phase 4: Store ===
        // Every edge target is reserved in the allocator, so a freshly
        // allocated ID has no incoming edges and cannot close a cycle.
        self.graph.ensure_node(&id);
        for dep in &issue.dependencies {
            self.graph.insert_edge(&id, &dep.depends_on_id, dep.dep_type);
        }
        self.issues.insert(id.clone(), issue.clone());
        debug!(%id, "Created issue");

        Ok(issue)
    }

    /// Insert a record as-is, replacing any existing record with the same ID.
    pub(crate) fn upsert_issue(&mut self, mut issue: Issue) -> Result<()> {
        issue.validate().map_err(Error::Validation)?;
        if !issue.is_tombstone() {
            self.check_external_ref(issue.external_ref.as_deref(), Some(&issue.id))?;
        }
        self.store_record(&mut issue);
        self.issues.insert(issue.id.clone(), issue);
        Ok(())
    }

    /// Rebuild the record's edges in the graph, dropping repeated pairs.
    fn store_record(&mut self, issue: &mut Issue) {
        let mut seen = HashSet::new();
        issue
            .dependencies
            .retain(|dep| seen.insert(dep.depends_on_id.clone()));
        issue.dependencies.sort();

        self.graph.remove_outgoing(&issue.id);
        self.graph.ensure_node(&issue.id);
        for dep in &issue.dependencies {
            self.graph
                .insert_edge(&issue.id, &dep.depends_on_id, dep.dep_type);
        }
        self.id_generator.reserve(issue.id.as_str());
        for dep in &issue.dependencies {
            self.id_generator.reserve(dep.depends_on_id.as_str());
        }
    }

    pub(crate) fn insert_batch(&mut self, issues: Vec<Issue>) -> Result<()> {
        let mut batch_ids = HashSet::new();
        let mut batch_refs = HashSet::new();
        for issue in &issues {
            if self.issues.contains_key(&issue.id) || !batch_ids.insert(&issue.id) {
                return Err(Error::Conflict(format!(
                    "Issue {} already exists; batch rejected",
                    issue.id
                )));
            }
            issue
                .validate()
                .map_err(|e| Error::Validation(format!("{}: {e}", issue.id)))?;
            if !issue.is_tombstone() {
                if let Some(external_ref) = issue.external_ref.as_deref() {
                    self.check_external_ref(Some(external_ref), None)?;
                    if !batch_refs.insert(external_ref) {
                        return Err(Error::Conflict(format!(
                            "external_ref '{external_ref}' repeated in batch"
                        )));
                    }
                }
            }
        }

        for mut issue in issues {
            self.store_record(&mut issue);
            self.issues.insert(issue.id.clone(), issue);
        }
        Ok(())
    }

    pub(crate) fn update_issue(&mut self, id: &IssueId, updates: IssueUpdate) -> Result<Issue> {
        let current = self.require(id)?;
        if current.is_tombstone() {
            return Err(Error::Validation(format!("{id} is deleted")));
        }
        let mut issue = current.clone();

        if let Some(title) = updates.title {
            issue.title = title;
        }
        if let Some(description) = updates.description {
            issue.description = description;
        }
        if let Some(design) = updates.design {
            issue.design = design;
        }
        if let Some(acceptance_criteria) = updates.acceptance_criteria {
            issue.acceptance_criteria = acceptance_criteria;
        }
        if let Some(notes) = updates.notes {
            issue.notes = notes;
        }
        if let Some(priority) = updates.priority {
            if priority > crate::domain::MAX_PRIORITY {
                return Err(Error::InvalidPriority(priority));
            }
            issue.priority = priority;
        }
        if let Some(issue_type) = updates.issue_type {
            issue.issue_type = issue_type;
        }
        if let Some(assignee) = updates.assignee {
            issue.assignee = assignee;
        }
        if let Some(external_ref) = updates.external_ref {
            self.check_external_ref(external_ref.as_deref(), Some(id))?;
            issue.external_ref = external_ref;
        }
        if let Some(labels) = updates.labels {
            issue.labels = labels;
        }
        if let Some(pinned) = updates.pinned {
            issue.pinned = pinned;
        }
        if let Some(ephemeral) = updates.ephemeral {
            issue.ephemeral = ephemeral;
        }
        if let Some(close_reason) = updates.close_reason {
            issue.close_reason = close_reason;
        }

        let now = Utc::now();
        if let Some(status) = updates.status {
            match &status {
                IssueStatus::Tombstone => {
                    return Err(Error::Validation(
                        "tombstone status is set by deletion, not by update".to_string(),
                    ));
                }
                IssueStatus::Custom(name) if !self.custom_statuses().contains(&name.as_str()) => {
                    return Err(Error::Validation(format!(
                        "unknown status '{name}' (add it to the '{CUSTOM_STATUS_KEY}' config entry)"
                    )));
                }
                IssueStatus::Closed => {
                    if issue.closed_at.is_none() {
                        issue.closed_at = Some(now);
                    }
                }
                _ => {
                    issue.closed_at = None;
                    issue.close_reason = None;
                }
            }
            issue.status = status;
        }

        issue.validate().map_err(Error::Validation)?;
        issue.updated_at = now;

        self.issues.insert(id.clone(), issue.clone());
        Ok(issue)
    }

    pub(crate) fn tombstone_issue(
        &mut self,
        id: &IssueId,
        deleted_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<Issue> {
        let issue = self.require_mut(id)?;
        if issue.is_tombstone() {
            return Ok(issue.clone());
        }
        issue.status = IssueStatus::Tombstone;
        issue.deleted_at = Some(deleted_at);
        issue.delete_reason = reason;
        issue.updated_at = Utc::now();
        Ok(issue.clone())
    }

    pub(crate) fn purge_issue(&mut self, id: &IssueId) -> Result<()> {
        self.require(id)?;
        self.graph.remove_outgoing(id);
        self.issues.remove(id);
        debug!(%id, "Purged issue");
        Ok(())
    }

    pub(crate) fn add_edge(
        &mut self,
        from: &IssueId,
        to: &IssueId,
        dep_type: DependencyType,
    ) -> Result<()> {
        self.require(from)?;
        self.require(to)?;
        self.graph.add_edge(from, to, dep_type)?;

        let issue = self.require_mut(from)?;
        issue.dependencies.push(Dependency {
            depends_on_id: to.clone(),
            dep_type,
        });
        issue.dependencies.sort();
        issue.updated_at = Utc::now();
        Ok(())
    }

    pub(crate) fn remove_edge(&mut self, from: &IssueId, to: &IssueId) -> Result<()> {
        self.require(from)?;
        if self.graph.remove_edge(from, to).is_none() {
            return Err(Error::NotFound {
                entity: "dependency",
                key: format!("{from} -> {to}"),
            });
        }
        let issue = self.require_mut(from)?;
        issue.dependencies.retain(|dep| dep.depends_on_id != *to);
        issue.updated_at = Utc::now();
        Ok(())
    }

    pub(crate) fn add_label_to(&mut self, id: &IssueId, label: &str) -> Result<Issue> {
        let issue = self.require_mut(id)?;
        if !issue.has_label(label) {
            issue.labels.push(label.to_string());
            issue.updated_at = Utc::now();
        }
        Ok(issue.clone())
    }

    pub(crate) fn remove_label_from(&mut self, id: &IssueId, label: &str) -> Result<Issue> {
        let issue = self.require_mut(id)?;
        if issue.has_label(label) {
            issue.labels.retain(|l| l != label);
            issue.updated_at = Utc::now();
        }
        Ok(issue.clone())
    }

    pub(crate) fn append_comment(&mut self, id: &IssueId, author: &str, text: &str) -> Result<Comment> {
        let issue = self.require_mut(id)?;
        let comment = Comment {
            id: issue.comments.last().map_or(1, |c| c.id + 1),
            issue_id: id.clone(),
            author: author.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        };
        issue.comments.push(comment.clone());
        issue.updated_at = comment.created_at;
        Ok(comment)
    }

    pub(crate) fn rename_prefix(&mut self, old: &str, new: &str) -> Result<usize> {
        let mut id_generator = self.id_generator.clone();
        id_generator.rename_prefix(old, new)?;

        let rename = |id: &IssueId| id.with_prefix(old, new).unwrap_or_else(|| id.clone());

        let mut renamed = 0;
        let mut issues = BTreeMap::new();
        for issue in self.issues.values() {
            let mut issue = issue.clone();
            let new_id = rename(&issue.id);
            if new_id != issue.id {
                renamed += 1;
            }
            issue.id = new_id;
            for dep in &mut issue.dependencies {
                dep.depends_on_id = rename(&dep.depends_on_id);
            }
            issue.dependencies.sort();
            for comment in &mut issue.comments {
                comment.issue_id = issue.id.clone();
            }
            if let Some(clash) = issues.insert(issue.id.clone(), issue) {
                return Err(Error::Conflict(format!(
                    "renaming {old} to {new} collides with existing issue {}",
                    clash.id
                )));
            }
        }

        self.graph = DependencyGraph::from_issues(issues.values());
        self.issues = issues;
        self.id_generator = id_generator;
        if self.config.get(ISSUE_PREFIX_KEY).map(String::as_str) == Some(old) {
            self.config
                .insert(ISSUE_PREFIX_KEY.to_string(), new.to_string());
        }
        Ok(renamed)
    }

    pub(crate) fn statistics(&self) -> Statistics {
        let mut stats = Statistics {
            total_issues: self.issues.len(),
            ..Statistics::default()
        };
        let mut labels = HashSet::new();
        for issue in self.issues.values() {
            match issue.status {
                IssueStatus::Open => stats.open += 1,
                IssueStatus::InProgress => stats.in_progress += 1,
                IssueStatus::Blocked => stats.blocked += 1,
                IssueStatus::Closed => stats.closed += 1,
                IssueStatus::Tombstone => stats.tombstones += 1,
                IssueStatus::Custom(_) => stats.custom_status += 1,
            }
            stats.ephemeral += usize::from(issue.ephemeral);
            stats.pinned += usize::from(issue.pinned);
            stats.dependencies += issue.dependencies.len();
            stats.comments += issue.comments.len();
            labels.extend(issue.labels.iter().map(String::as_str));
        }
        stats.labels = labels.len();
        stats
    }
}

impl Transaction for InMemoryStorageInner {
    fn create(&mut self, issue: NewIssue) -> Result<Issue> {
        self.create_issue(issue)
    }

    fn get(&self, id: &IssueId) -> Option<Issue> {
        self.issues.get(id).cloned()
    }

    fn update(&mut self, id: &IssueId, updates: IssueUpdate) -> Result<Issue> {
        self.update_issue(id, updates)
    }

    fn add_dependency(
        &mut self,
        from: &IssueId,
        to: &IssueId,
        dep_type: DependencyType,
    ) -> Result<()> {
        self.add_edge(from, to, dep_type)
    }

    fn remove_dependency(&mut self, from: &IssueId, to: &IssueId) -> Result<()> {
        self.remove_edge(from, to)
    }

    fn add_label(&mut self, id: &IssueId, label: &str) -> Result<Issue> {
        self.add_label_to(id, label)
    }

    fn set_config(&mut self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    fn set_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }
}
