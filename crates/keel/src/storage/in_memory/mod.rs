//! In-memory storage backend using a `BTreeMap` and petgraph.
//!
//! [`MemoryStorage`] serves both built-in backends:
//!
//! - **memory**: ephemeral; all data is lost when the process exits
//! - **embedded**: the same structure, loaded from and saved to a
//!   [`StoreSnapshot`](crate::storage::StoreSnapshot) file
//!
//! # Architecture
//!
//! - `BTreeMap<IssueId, Issue>` for ordered lookups and listing
//! - [`DependencyGraph`](crate::graph::DependencyGraph) for edges, with
//!   cycle checks on every blocking edge added through the API
//! - [`IdGenerator`](crate::id_generation::IdGenerator) for allocation
//!
//! ## Edge Direction
//!
//! Edges point from the dependent to the dependency: if A is blocked by B the
//! edge is `A -> B` with weight `Blocks`; a child C of epic E has `C -> E`
//! with weight `ParentChild`.
//!
//! # Thread Safety
//!
//! State lives in `Arc<RwLock<InMemoryStorageInner>>`. Cloning a
//! `MemoryStorage` gives another handle to the same store.

mod inner;
mod trait_impl;

use crate::error::Result;
use crate::id_generation::IdGeneratorConfig;
use crate::storage::{ISSUE_PREFIX_KEY, StoreSnapshot};
use inner::InMemoryStorageInner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Memory-resident store, optionally backed by a snapshot file.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    inner: Arc<RwLock<InMemoryStorageInner>>,
    data_file: Option<PathBuf>,
    id_config: IdGeneratorConfig,
}

impl MemoryStorage {
    /// Create an empty ephemeral store.
    ///
    /// # Example
    ///
    /// ```
    /// use keel::id_generation::IdGeneratorConfig;
    /// use keel::storage::MemoryStorage;
    ///
    /// let storage = MemoryStorage::new(IdGeneratorConfig::new("proj"));
    /// assert!(storage.data_file().is_none());
    /// ```
    #[must_use]
    pub fn new(id_config: IdGeneratorConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(InMemoryStorageInner::new(id_config.clone()))),
            data_file: None,
            id_config,
        }
    }

    /// Open a store persisted at `data_file`, starting empty if the file
    /// does not exist yet.
    ///
    /// A prefix recorded in the snapshot's config takes precedence over the
    /// one in `id_config`.
    ///
    /// # Errors
    ///
    /// - `Error::Unavailable` if the file cannot be read
    /// - `Error::Corrupt` if it cannot be parsed
    pub async fn open(id_config: IdGeneratorConfig, data_file: impl Into<PathBuf>) -> Result<Self> {
        let data_file = data_file.into();
        let inner = Self::load(&id_config, &data_file).await?;
        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            data_file: Some(data_file),
            id_config,
        })
    }

    async fn load(id_config: &IdGeneratorConfig, data_file: &Path) -> Result<InMemoryStorageInner> {
        match StoreSnapshot::read(data_file).await? {
            Some(snapshot) => {
                let mut id_config = id_config.clone();
                if let Some(prefix) = snapshot.config.get(ISSUE_PREFIX_KEY) {
                    id_config.prefix.clone_from(prefix);
                }
                info!(
                    path = %data_file.display(),
                    issues = snapshot.issues.len(),
                    "Opened embedded store"
                );
                Ok(InMemoryStorageInner::from_snapshot(snapshot, id_config))
            }
            None => Ok(InMemoryStorageInner::new(id_config.clone())),
        }
    }

    /// Path of the backing snapshot file, if any.
    #[must_use]
    pub fn data_file(&self) -> Option<&Path> {
        self.data_file.as_deref()
    }
}

