//! Test double for [`IssueStorage`].

use super::{BackendCapabilities, IssueStorage, MemoryStorage, Statistics, TransactionFn};
use crate::domain::{
    Comment, Dependency, DependencyType, Issue, IssueFilter, IssueId, IssueUpdate, NewIssue,
};
use crate::error::{Error, Result};
use crate::federation::FederationPort;
use crate::id_generation::IdGeneratorConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A working memory store that can be told to fail and can pretend to
/// replicate.
///
/// # Availability
///
/// This type is available when:
/// - Running tests (`#[cfg(test)]`)
/// - The `test-util` feature is enabled
///
/// # Behavior
///
/// - While an outage is set, every call returns `Error::Unavailable`
/// - While a save failure is set, only `save` fails
/// - `federation()` returns the attached port, if any
/// - Everything else is delegated to a [`MemoryStorage`]
#[derive(Clone)]
pub struct MockStorage {
    inner: MemoryStorage,
    outage: Option<String>,
    save_failure: Option<String>,
    federation: Option<Arc<dyn FederationPort>>,
}

impl std::fmt::Debug for MockStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStorage")
            .field("outage", &self.outage)
            .field("save_failure", &self.save_failure)
            .field("federated", &self.federation.is_some())
            .finish_non_exhaustive()
    }
}

impl MockStorage {
    /// Empty store allocating IDs under `prefix`.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            inner: MemoryStorage::new(IdGeneratorConfig::new(prefix)),
            outage: None,
            save_failure: None,
            federation: None,
        }
    }

    /// Attach a federation port.
    #[must_use]
    pub fn with_federation(mut self, port: Arc<dyn FederationPort>) -> Self {
        self.federation = Some(port);
        self
    }

    /// Make every later call fail with `Error::Unavailable(reason)`.
    pub fn set_outage(&mut self, reason: impl Into<String>) {
        self.outage = Some(reason.into());
    }

    /// End the outage and any save failure.
    pub fn clear_outage(&mut self) {
        self.outage = None;
        self.save_failure = None;
    }

    /// Make `save` fail with `Error::Unavailable(reason)` while every other
    /// call keeps working.
    pub fn set_save_failure(&mut self, reason: impl Into<String>) {
        self.save_failure = Some(reason.into());
    }

    fn check(&self) -> Result<()> {
        match &self.outage {
            Some(reason) => Err(Error::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IssueStorage for MockStorage {
    async fn create(&mut self, issue: NewIssue) -> Result<Issue> {
        self.check()?;
        self.inner.create(issue).await
    }

    async fn create_batch(&mut self, issues: Vec<Issue>) -> Result<()> {
        self.check()?;
        self.inner.create_batch(issues).await
    }

    async fn upsert(&mut self, issue: Issue) -> Result<()> {
        self.check()?;
        self.inner.upsert(issue).await
    }

    async fn get(&self, id: &IssueId) -> Result<Option<Issue>> {
        self.check()?;
        self.inner.get(id).await
    }

    async fn update(&mut self, id: &IssueId, updates: IssueUpdate) -> Result<Issue> {
        self.check()?;
        self.inner.update(id, updates).await
    }

    async fn tombstone(
        &mut self,
        id: &IssueId,
        deleted_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<Issue> {
        self.check()?;
        self.inner.tombstone(id, deleted_at, reason).await
    }

    async fn purge(&mut self, id: &IssueId) -> Result<()> {
        self.check()?;
        self.inner.purge(id).await
    }

    async fn list(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        self.check()?;
        self.inner.list(filter).await
    }

    async fn export_all(&self) -> Result<Vec<Issue>> {
        self.check()?;
        self.inner.export_all().await
    }

    async fn add_dependency(
        &mut self,
        from: &IssueId,
        to: &IssueId,
        dep_type: DependencyType,
    ) -> Result<()> {
        self.check()?;
        self.inner.add_dependency(from, to, dep_type).await
    }

    async fn remove_dependency(&mut self, from: &IssueId, to: &IssueId) -> Result<()> {
        self.check()?;
        self.inner.remove_dependency(from, to).await
    }

    async fn get_dependencies(&self, id: &IssueId) -> Result<Vec<Dependency>> {
        self.check()?;
        self.inner.get_dependencies(id).await
    }

    async fn get_dependents(&self, id: &IssueId) -> Result<Vec<Dependency>> {
        self.check()?;
        self.inner.get_dependents(id).await
    }

    async fn all_dependencies(&self) -> Result<Vec<(IssueId, Dependency)>> {
        self.check()?;
        self.inner.all_dependencies().await
    }

    async fn add_label(&mut self, id: &IssueId, label: &str) -> Result<Issue> {
        self.check()?;
        self.inner.add_label(id, label).await
    }

    async fn remove_label(&mut self, id: &IssueId, label: &str) -> Result<Issue> {
        self.check()?;
        self.inner.remove_label(id, label).await
    }

    async fn add_comment(&mut self, id: &IssueId, author: &str, text: &str) -> Result<Comment> {
        self.check()?;
        self.inner.add_comment(id, author, text).await
    }

    async fn get_comments(&self, id: &IssueId) -> Result<Vec<Comment>> {
        self.check()?;
        self.inner.get_comments(id).await
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get_config(key).await
    }

    async fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner.set_config(key, value).await
    }

    async fn delete_config(&mut self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_config(key).await
    }

    async fn all_config(&self) -> Result<BTreeMap<String, String>> {
        self.check()?;
        self.inner.all_config().await
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get_metadata(key).await
    }

    async fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner.set_metadata(key, value).await
    }

    async fn statistics(&self) -> Result<Statistics> {
        self.check()?;
        self.inner.statistics().await
    }

    async fn run_in_transaction(&mut self, op: TransactionFn) -> Result<()> {
        self.check()?;
        self.inner.run_in_transaction(op).await
    }

    async fn rename_prefix(&mut self, old: &str, new: &str) -> Result<usize> {
        self.check()?;
        self.inner.rename_prefix(old, new).await
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_federation: self.federation.is_some(),
            ..self.inner.capabilities()
        }
    }

    fn federation(&self) -> Option<&dyn FederationPort> {
        self.federation.as_deref()
    }

    async fn save(&self) -> Result<()> {
        self.check()?;
        match &self.save_failure {
            Some(reason) => Err(Error::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    async fn reload(&mut self) -> Result<()> {
        self.check()
    }
}
