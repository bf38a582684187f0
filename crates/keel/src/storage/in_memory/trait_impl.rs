//! IssueStorage trait implementation for in-memory storage.

use super::MemoryStorage;
use crate::domain::{
    Comment, Dependency, DependencyType, Issue, IssueFilter, IssueId, IssueStatus, IssueUpdate,
    NewIssue,
};
use crate::error::{Error, Result};
use crate::storage::{BackendCapabilities, IssueStorage, Statistics, TransactionFn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[async_trait]
impl IssueStorage for MemoryStorage {
    async fn create(&mut self, new_issue: NewIssue) -> Result<Issue> {
        self.inner.write().await.create_issue(new_issue)
    }

    async fn create_batch(&mut self, issues: Vec<Issue>) -> Result<()> {
        let count = issues.len();
        self.inner.write().await.insert_batch(issues)?;
        debug!(count, "Inserted issue batch");
        Ok(())
    }

    async fn upsert(&mut self, issue: Issue) -> Result<()> {
        self.inner.write().await.upsert_issue(issue)
    }

    async fn get(&self, id: &IssueId) -> Result<Option<Issue>> {
        Ok(self.inner.read().await.issues.get(id).cloned())
    }

    async fn update(&mut self, id: &IssueId, updates: IssueUpdate) -> Result<Issue> {
        self.inner.write().await.update_issue(id, updates)
    }

    async fn tombstone(
        &mut self,
        id: &IssueId,
        deleted_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<Issue> {
        self.inner
            .write()
            .await
            .tombstone_issue(id, deleted_at, reason)
    }

    async fn purge(&mut self, id: &IssueId) -> Result<()> {
        self.inner.write().await.purge_issue(id)
    }

    async fn list(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let inner = self.inner.read().await;
        let wants_tombstones = filter.status == Some(IssueStatus::Tombstone);

        let matching = inner
            .issues
            .values()
            .filter(|issue| wants_tombstones || !issue.is_tombstone())
            .filter(|issue| filter.matches(issue))
            .cloned();

        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn export_all(&self) -> Result<Vec<Issue>> {
        Ok(self.inner.read().await.issues.values().cloned().collect())
    }

    async fn add_dependency(
        &mut self,
        from: &IssueId,
        to: &IssueId,
        dep_type: DependencyType,
    ) -> Result<()> {
        self.inner.write().await.add_edge(from, to, dep_type)
    }

    async fn remove_dependency(&mut self, from: &IssueId, to: &IssueId) -> Result<()> {
        self.inner.write().await.remove_edge(from, to)
    }

    async fn get_dependencies(&self, id: &IssueId) -> Result<Vec<Dependency>> {
        Ok(self.inner.read().await.graph.dependencies(id))
    }

    async fn get_dependents(&self, id: &IssueId) -> Result<Vec<Dependency>> {
        Ok(self.inner.read().await.graph.dependents(id))
    }

    async fn all_dependencies(&self) -> Result<Vec<(IssueId, Dependency)>> {
        let inner = self.inner.read().await;
        let mut edges: Vec<(IssueId, Dependency)> = inner
            .graph
            .edges()
            .map(|(from, to, dep_type)| {
                (
                    from.clone(),
                    Dependency {
                        depends_on_id: to.clone(),
                        dep_type,
                    },
                )
            })
            .collect();
        edges.sort();
        Ok(edges)
    }

    async fn add_label(&mut self, id: &IssueId, label: &str) -> Result<Issue> {
        self.inner.write().await.add_label_to(id, label)
    }

    async fn remove_label(&mut self, id: &IssueId, label: &str) -> Result<Issue> {
        self.inner.write().await.remove_label_from(id, label)
    }

    async fn add_comment(&mut self, id: &IssueId, author: &str, text: &str) -> Result<Comment> {
        self.inner.write().await.append_comment(id, author, text)
    }

    async fn get_comments(&self, id: &IssueId) -> Result<Vec<Comment>> {
        let inner = self.inner.read().await;
        inner
            .issues
            .get(id)
            .map(|issue| issue.comments.clone())
            .ok_or_else(|| Error::IssueNotFound(id.clone()))
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().await.config.get(key).cloned())
    }

    async fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .config
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_config(&mut self, key: &str) -> Result<()> {
        self.inner.write().await.config.remove(key);
        Ok(())
    }

    async fn all_config(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.inner.read().await.config.clone())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().await.metadata.get(key).cloned())
    }

    async fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .metadata
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn statistics(&self) -> Result<Statistics> {
        Ok(self.inner.read().await.statistics())
    }

    async fn run_in_transaction(&mut self, op: TransactionFn) -> Result<()> {
        let mut inner = self.inner.write().await;
        let mut staged = inner.clone();
        op(&mut staged)?;
        *inner = staged;
        Ok(())
    }

    async fn rename_prefix(&mut self, old: &str, new: &str) -> Result<usize> {
        let renamed = self.inner.write().await.rename_prefix(old, new)?;
        self.id_config.prefix = new.to_string();
        info!(old, new, renamed, "Renamed issue prefix");
        Ok(renamed)
    }

    fn capabilities(&self) -> BackendCapabilities {
        let persistent = self.data_file.is_some();
        BackendCapabilities {
            single_process_only: persistent,
            supports_federation: false,
            persistent,
        }
    }

    async fn save(&self) -> Result<()> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        let snapshot = self.inner.read().await.to_snapshot();
        snapshot.write(path).await?;
        debug!(path = %path.display(), issues = snapshot.issues.len(), "Saved snapshot");
        Ok(())
    }

    async fn reload(&mut self) -> Result<()> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        let fresh = Self::load(&self.id_config, path).await?;
        *self.inner.write().await = fresh;
        Ok(())
    }
}
