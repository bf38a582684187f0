//! Backend lookup by name.
//!
//! The registry is an ordinary value: build it once at startup (usually with
//! [`BackendRegistry::with_defaults`]), register any extra backends, and pass
//! it by reference to whatever needs to open a store.

use super::{IssueStorage, MemoryStorage};
use crate::config::{EMBEDDED_BACKEND, MEMORY_BACKEND};
use crate::error::{Error, Result};
use crate::id_generation::IdGeneratorConfig;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Settings handed to a backend factory.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// ID allocation settings
    pub ids: IdGeneratorConfig,

    /// Backing file for persistent backends
    pub data_file: Option<PathBuf>,
}

impl BackendOptions {
    /// Options with no backing file.
    #[must_use]
    pub fn new(ids: IdGeneratorConfig) -> Self {
        Self {
            ids,
            data_file: None,
        }
    }

    /// Same options with a backing file.
    #[must_use]
    pub fn with_data_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_file = Some(path.into());
        self
    }
}

/// Opens a backend.
pub type BackendFactory = fn(BackendOptions) -> BoxFuture<'static, Result<Box<dyn IssueStorage>>>;

/// Name -> factory table.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

fn open_memory(options: BackendOptions) -> BoxFuture<'static, Result<Box<dyn IssueStorage>>> {
    Box::pin(async move { Ok(Box::new(MemoryStorage::new(options.ids)) as Box<dyn IssueStorage>) })
}

fn open_embedded(options: BackendOptions) -> BoxFuture<'static, Result<Box<dyn IssueStorage>>> {
    Box::pin(async move {
        let path = options.data_file.ok_or_else(|| {
            Error::Config("the embedded backend needs a data file".to_string())
        })?;
        let storage = MemoryStorage::open(options.ids, path).await?;
        Ok(Box::new(storage) as Box<dyn IssueStorage>)
    })
}

impl BackendRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `memory` and `embedded` backends.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut factories: HashMap<String, BackendFactory> = HashMap::new();
        factories.insert(MEMORY_BACKEND.to_string(), open_memory);
        factories.insert(EMBEDDED_BACKEND.to_string(), open_embedded);
        Self { factories }
    }

    /// Add a backend.
    ///
    /// # Errors
    ///
    /// `Error::Conflict` if the name is taken.
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::Conflict(format!(
                "storage backend '{name}' is already registered"
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Open the named backend.
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` for an unknown name
    /// - whatever the factory returns
    pub async fn open(&self, name: &str, options: BackendOptions) -> Result<Box<dyn IssueStorage>> {
        let factory = self.factories.get(name).ok_or_else(|| Error::NotFound {
            entity: "storage backend",
            key: name.to_string(),
        })?;
        debug!(backend = name, "Opening storage backend");
        factory(options).await
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
