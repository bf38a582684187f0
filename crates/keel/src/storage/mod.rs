//! Storage abstraction layer for keel.
//!
//! This module provides the storage port that every engine is written
//! against, and the backends that implement it:
//!
//! - **memory**: ephemeral storage backed by a `BTreeMap` and petgraph
//! - **embedded**: the memory backend persisted to a JSON snapshot file that
//!   is atomically replaced on every [`save`](IssueStorage::save)
//!
//! Backends are constructed through an explicit [`BackendRegistry`] built
//! once at startup and passed by reference.
//!
//! # Concurrency
//!
//! The memory backend keeps its state behind a `tokio::sync::RwLock`: handles
//! are cheap clones of one shared state, any number of readers may run
//! together, and every mutation holds the write lock for its whole duration.
//! The embedded backend is single-process-only; serializing access across OS
//! processes is the caller's job.
//!
//! # Test Utilities
//!
//! Enable the `test-util` feature for [`MockStorage`], a wrapper that can be
//! switched into a failing state and can expose a federation port.
//!
//! # Example
//!
//! ```no_run
//! use keel::domain::NewIssue;
//! use keel::id_generation::IdGeneratorConfig;
//! use keel::storage::{BackendOptions, BackendRegistry};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = BackendRegistry::with_defaults();
//!     let mut storage = registry
//!         .open("memory", BackendOptions::new(IdGeneratorConfig::new("proj")))
//!         .await?;
//!
//!     let issue = storage.create(NewIssue::titled("Implement feature X")).await?;
//!     println!("Created issue: {}", issue.id);
//!     Ok(())
//! }
//! ```

use crate::domain::{
    Comment, Dependency, DependencyType, Issue, IssueFilter, IssueId, IssueUpdate, NewIssue,
};
use crate::error::Result;
use crate::federation::FederationPort;
use crate::graph::{GraphSettings, IssueGraph};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

mod in_memory;
mod registry;
mod snapshot;

#[cfg(any(test, feature = "test-util"))]
mod mock;

pub use in_memory::MemoryStorage;
pub use registry::{BackendFactory, BackendOptions, BackendRegistry};
pub use snapshot::StoreSnapshot;

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockStorage;

/// Store config key holding the project prefix.
pub const ISSUE_PREFIX_KEY: &str = "issue_prefix";

/// Store config key holding the comma-separated list of accepted custom statuses.
pub const CUSTOM_STATUS_KEY: &str = "status.custom";

/// Store metadata keys maintained by export, import and the fingerprint check.
pub mod metadata_keys {
    /// RFC 3339 time of the last import (or of the export file written by the last export)
    pub const LAST_IMPORT_TIME: &str = "last_import_time";
    /// RFC 3339 time of the last export
    pub const LAST_EXPORT_TIME: &str = "last_export_time";
    /// SHA-256 of the last exported file
    pub const JSONL_CONTENT_HASH: &str = "jsonl_content_hash";
    /// Repository fingerprint
    pub const REPO_ID: &str = "repo_id";
}

/// What a backend can and cannot do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendCapabilities {
    /// Concurrent access from several OS processes is unsafe
    pub single_process_only: bool,

    /// The backend replicates to federation peers
    pub supports_federation: bool,

    /// State survives the process
    pub persistent: bool,
}

/// Snapshot of store-wide counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// Every record, tombstones included
    pub total_issues: usize,
    /// `open`
    pub open: usize,
    /// `in_progress`
    pub in_progress: usize,
    /// `blocked`
    pub blocked: usize,
    /// `closed`
    pub closed: usize,
    /// `tombstone`
    pub tombstones: usize,
    /// Workflow-defined statuses
    pub custom_status: usize,
    /// Ephemeral issues
    pub ephemeral: usize,
    /// Pinned issues
    pub pinned: usize,
    /// Dependency edges
    pub dependencies: usize,
    /// Distinct labels
    pub labels: usize,
    /// Comments
    pub comments: usize,
}

/// Mutations available inside [`IssueStorage::run_in_transaction`].
///
/// The closure runs against a staged copy of the store; its changes become
/// visible only if it returns `Ok`.
pub trait Transaction: Send {
    /// Create a new issue.
    ///
    /// # Errors
    ///
    /// Same as [`IssueStorage::create`].
    fn create(&mut self, issue: NewIssue) -> Result<Issue>;

    /// Read an issue as staged so far.
    fn get(&self, id: &IssueId) -> Option<Issue>;

    /// Patch an issue.
    ///
    /// # Errors
    ///
    /// Same as [`IssueStorage::update`].
    fn update(&mut self, id: &IssueId, updates: IssueUpdate) -> Result<Issue>;

    /// Add an edge.
    ///
    /// # Errors
    ///
    /// Same as [`IssueStorage::add_dependency`].
    fn add_dependency(&mut self, from: &IssueId, to: &IssueId, dep_type: DependencyType)
    -> Result<()>;

    /// Remove an edge.
    ///
    /// # Errors
    ///
    /// Same as [`IssueStorage::remove_dependency`].
    fn remove_dependency(&mut self, from: &IssueId, to: &IssueId) -> Result<()>;

    /// Add a label.
    ///
    /// # Errors
    ///
    /// Same as [`IssueStorage::add_label`].
    fn add_label(&mut self, id: &IssueId, label: &str) -> Result<Issue>;

    /// Write a config entry.
    fn set_config(&mut self, key: &str, value: &str);

    /// Write a metadata entry.
    fn set_metadata(&mut self, key: &str, value: &str);
}

/// Work executed by [`IssueStorage::run_in_transaction`].
pub type TransactionFn = Box<dyn FnOnce(&mut dyn Transaction) -> Result<()> + Send>;

/// Core storage trait for issue management.
///
/// This trait defines the interface for all storage backends. Implementations
/// must be `Send + Sync` to support concurrent access in async contexts.
///
/// # Error Handling
///
/// - `IssueNotFound`: requested issue doesn't exist
/// - `Conflict`: duplicate ID, edge or external reference
/// - `CircularDependency`: a blocking edge would close a cycle
/// - `DepthExceeded`: a child ID would be too deep
/// - `Validation` / `InvalidPriority`: rejected input
/// - `Unavailable` / `Corrupt`: backend-level failures
#[async_trait]
pub trait IssueStorage: Send + Sync {
    // ========== CRUD Operations ==========

    /// Create a new issue.
    ///
    /// Allocates an ID, or a hierarchical child ID when `issue.parent` is set
    /// (the child also gets a `parent-child` edge to its parent).
    ///
    /// # Errors
    ///
    /// - `Error::Validation` / `Error::InvalidPriority` for bad input
    /// - `Error::NotFound` if the parent is unknown
    /// - `Error::IssueNotFound` if a dependency target is unknown
    /// - `Error::DepthExceeded` if the parent is already at maximum depth
    /// - `Error::Conflict` for a duplicate external reference or edge
    async fn create(&mut self, issue: NewIssue) -> Result<Issue>;

    /// Insert fully formed issues, keeping their IDs.
    ///
    /// All-or-nothing: if any ID already exists (or repeats within the batch),
    /// nothing is inserted.
    ///
    /// # Errors
    ///
    /// `Error::Conflict` naming the first duplicate.
    async fn create_batch(&mut self, issues: Vec<Issue>) -> Result<()>;

    /// Insert or replace an issue record as-is, edges included.
    ///
    /// Used by import. No cycle check is applied.
    ///
    /// # Errors
    ///
    /// `Error::Conflict` for a duplicate external reference.
    async fn upsert(&mut self, issue: Issue) -> Result<()>;

    /// Get an issue by ID. Returns `None` if it doesn't exist.
    async fn get(&self, id: &IssueId) -> Result<Option<Issue>>;

    /// Update an existing issue.
    ///
    /// Only fields present in `updates` are modified. Closing sets
    /// `closed_at`; reopening clears it.
    ///
    /// # Errors
    ///
    /// - `Error::IssueNotFound` if the issue doesn't exist
    /// - `Error::Validation` for an unknown custom status or a tombstoned issue
    async fn update(&mut self, id: &IssueId, updates: IssueUpdate) -> Result<Issue>;

    /// Turn an issue into a tombstone deleted at `deleted_at`.
    ///
    /// Idempotent: an existing tombstone is returned unchanged.
    ///
    /// # Errors
    ///
    /// `Error::IssueNotFound` if the issue doesn't exist.
    async fn tombstone(
        &mut self,
        id: &IssueId,
        deleted_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<Issue>;

    /// Permanently remove an issue with its own edges, labels and comments.
    ///
    /// Edges from other issues to it are kept and become orphans.
    ///
    /// # Errors
    ///
    /// `Error::IssueNotFound` if the issue doesn't exist.
    async fn purge(&mut self, id: &IssueId) -> Result<()>;

    /// List issues matching the filter, sorted by ID.
    ///
    /// Tombstones are listed only when the filter asks for that status.
    async fn list(&self, filter: &IssueFilter) -> Result<Vec<Issue>>;

    /// Every record, tombstones and ephemeral issues included, sorted by ID.
    async fn export_all(&self) -> Result<Vec<Issue>>;

    // ========== Dependency Management ==========

    /// Add a dependency `from -> to`.
    ///
    /// # Errors
    ///
    /// - `Error::IssueNotFound` if either issue doesn't exist
    /// - `Error::Conflict` if the pair is already linked
    /// - `Error::CircularDependency` if a blocking edge would close a cycle
    async fn add_dependency(
        &mut self,
        from: &IssueId,
        to: &IssueId,
        dep_type: DependencyType,
    ) -> Result<()>;

    /// Remove the dependency `from -> to`.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if no such edge exists.
    async fn remove_dependency(&mut self, from: &IssueId, to: &IssueId) -> Result<()>;

    /// Issues that `id` depends on.
    async fn get_dependencies(&self, id: &IssueId) -> Result<Vec<Dependency>>;

    /// Issues that depend on `id` (`depends_on_id` holds the dependent).
    async fn get_dependents(&self, id: &IssueId) -> Result<Vec<Dependency>>;

    /// Every edge as `(from, dependency)`, sorted.
    async fn all_dependencies(&self) -> Result<Vec<(IssueId, Dependency)>>;

    // ========== Labels and Comments ==========

    /// Add a label. Adding an existing label is a no-op.
    ///
    /// # Errors
    ///
    /// `Error::IssueNotFound` if the issue doesn't exist.
    async fn add_label(&mut self, id: &IssueId, label: &str) -> Result<Issue>;

    /// Remove a label. Removing a missing label is a no-op.
    ///
    /// # Errors
    ///
    /// `Error::IssueNotFound` if the issue doesn't exist.
    async fn remove_label(&mut self, id: &IssueId, label: &str) -> Result<Issue>;

    /// Append a comment.
    ///
    /// # Errors
    ///
    /// `Error::IssueNotFound` if the issue doesn't exist.
    async fn add_comment(&mut self, id: &IssueId, author: &str, text: &str) -> Result<Comment>;

    /// Comments on an issue, oldest first.
    async fn get_comments(&self, id: &IssueId) -> Result<Vec<Comment>>;

    // ========== Config and Metadata ==========

    /// Read a config entry.
    async fn get_config(&self, key: &str) -> Result<Option<String>>;

    /// Write a config entry.
    async fn set_config(&mut self, key: &str, value: &str) -> Result<()>;

    /// Delete a config entry. Deleting a missing key is a no-op.
    async fn delete_config(&mut self, key: &str) -> Result<()>;

    /// Every config entry.
    async fn all_config(&self) -> Result<BTreeMap<String, String>>;

    /// Read a metadata entry.
    async fn get_metadata(&self, key: &str) -> Result<Option<String>>;

    /// Write a metadata entry.
    async fn set_metadata(&mut self, key: &str, value: &str) -> Result<()>;

    // ========== Store-wide Operations ==========

    /// Count snapshot.
    async fn statistics(&self) -> Result<Statistics>;

    /// Run `op` against a staged copy of the store, committing only on `Ok`.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, leaving the store unchanged.
    async fn run_in_transaction(&mut self, op: TransactionFn) -> Result<()>;

    /// Rename every ID (and every edge and counter key) from `old` to `new`
    /// prefix, returning the number of renamed issues.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` for an invalid new prefix
    /// - `Error::Conflict` if a renamed ID collides with an existing one
    async fn rename_prefix(&mut self, old: &str, new: &str) -> Result<usize>;

    /// Backend capability query.
    fn capabilities(&self) -> BackendCapabilities;

    /// Peer operations, for backends that replicate.
    fn federation(&self) -> Option<&dyn FederationPort> {
        None
    }

    /// Read-only graph snapshot for whole-graph queries.
    async fn graph_snapshot(&self, settings: GraphSettings) -> Result<IssueGraph> {
        Ok(IssueGraph::new(self.export_all().await?, settings))
    }

    // ========== Persistence ==========

    /// Save changes to persistent storage. A no-op for ephemeral backends.
    ///
    /// Takes `&self` so that read-only callers can checkpoint.
    async fn save(&self) -> Result<()>;

    /// Reload state from persistent storage, discarding unsaved changes.
    ///
    /// # Errors
    ///
    /// `Error::Corrupt` if the backing file cannot be parsed.
    async fn reload(&mut self) -> Result<()>;
}
