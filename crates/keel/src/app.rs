//! Application context for CLI command execution.
//!
//! [`App::open`] resolves the workspace once, loads its configuration and
//! opens the configured backend through a [`BackendRegistry`]. Commands then
//! work against the resolved paths and the open store.
//!
//! # Example
//!
//! ```no_run
//! use keel::app::App;
//! use keel::storage::BackendRegistry;
//! use std::path::Path;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = BackendRegistry::with_defaults();
//!     let app = App::open(Path::new("."), &registry).await?;
//!     println!("{}", app.config().issue_prefix);
//!     Ok(())
//! }
//! ```

use crate::config::KeelConfig;
use crate::consistency::GitCli;
use crate::error::Result;
use crate::paths::WorkspacePaths;
use crate::storage::{BackendRegistry, IssueStorage};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application context for CLI operations.
pub struct App {
    storage: Box<dyn IssueStorage>,
    paths: WorkspacePaths,
    config: KeelConfig,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("paths", &self.paths)
            .field("prefix", &self.config.issue_prefix)
            .field("backend", &self.config.storage.backend)
            .field("storage", &"<dyn IssueStorage>")
            .finish()
    }
}

impl App {
    /// Open the workspace containing `working_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No workspace is found in the directory tree
    /// - The redirect or configuration is invalid
    /// - The configured backend is unknown or fails to open
    pub async fn open(working_dir: &Path, registry: &BackendRegistry) -> Result<Self> {
        let paths = WorkspacePaths::resolve(working_dir)?;
        let config = KeelConfig::load(&paths.config_file()).await?;
        let storage = registry
            .open(
                &config.storage.backend,
                config.backend_options(paths.keel_dir()),
            )
            .await?;
        debug!(
            keel_dir = %paths.keel_dir().display(),
            backend = %config.storage.backend,
            "Opened workspace"
        );
        Ok(Self {
            storage,
            paths,
            config,
        })
    }

    /// Get a mutable reference to the storage.
    pub fn storage_mut(&mut self) -> &mut dyn IssueStorage {
        self.storage.as_mut()
    }

    /// Get an immutable reference to the storage.
    pub fn storage(&self) -> &dyn IssueStorage {
        self.storage.as_ref()
    }

    /// Loaded configuration.
    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    /// Resolved workspace paths.
    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    /// Configured export file.
    pub fn export_file(&self) -> PathBuf {
        self.config.export_file(self.paths.keel_dir())
    }

    /// Git oracle rooted at the workspace.
    pub fn git(&self) -> GitCli {
        GitCli::new(self.paths.root(), self.config.federation_settings().probe_timeout)
    }

    /// Save storage state to persistent storage.
    ///
    /// This should be called after any mutating operations.
    pub async fn save(&self) -> Result<()> {
        self.storage.save().await
    }
}
