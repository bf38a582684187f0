//! Read-only git queries used as comparison oracles.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Questions the checker asks git. Nothing here mutates the repository.
#[async_trait]
pub trait GitOracle: Send + Sync {
    /// `path` is tracked in the index.
    async fn is_tracked(&self, path: &Path) -> Result<bool>;

    /// The working copy of `path` differs from `HEAD`.
    async fn differs_from_head(&self, path: &Path) -> Result<bool>;

    /// `git status --porcelain` lines under `path`.
    async fn uncommitted_changes(&self, path: &Path) -> Result<Vec<String>>;

    /// URL of a named remote, if configured.
    async fn remote_url(&self, remote: &str) -> Result<Option<String>>;
}

/// [`GitOracle`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
    timeout: Duration,
}

impl GitCli {
    /// Queries run in `repo_root`, each bounded by `timeout`.
    #[must_use]
    pub fn new(repo_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            repo_root: repo_root.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(?args, root = %self.repo_root.display(), "Running git");
        let mut command = Command::new("git");
        command.arg("-C").arg(&self.repo_root).args(args);
        command.kill_on_drop(true);

        match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(Error::Unavailable(format!("cannot run git: {e}"))),
            Err(_) => Err(Error::Unavailable(format!(
                "git {} timed out after {}s",
                args.first().unwrap_or(&""),
                self.timeout.as_secs()
            ))),
        }
    }

    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.repo_root).unwrap_or(path)
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[async_trait]
impl GitOracle for GitCli {
    async fn is_tracked(&self, path: &Path) -> Result<bool> {
        let path = self.relative(path).to_string_lossy().into_owned();
        let output = self
            .run(&["ls-files", "--error-unmatch", "--", &path])
            .await?;
        Ok(output.status.success())
    }

    async fn differs_from_head(&self, path: &Path) -> Result<bool> {
        let path = self.relative(path).to_string_lossy().into_owned();
        let output = self
            .run(&["diff", "--quiet", "HEAD", "--", &path])
            .await?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(Error::Unavailable(format!(
                "git diff failed: {}",
                stderr_of(&output)
            ))),
        }
    }

    async fn uncommitted_changes(&self, path: &Path) -> Result<Vec<String>> {
        let path = self.relative(path).to_string_lossy().into_owned();
        let output = self.run(&["status", "--porcelain", "--", &path]).await?;
        if !output.status.success() {
            return Err(Error::Unavailable(format!(
                "git status failed: {}",
                stderr_of(&output)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn remote_url(&self, remote: &str) -> Result<Option<String>> {
        let output = self.run(&["remote", "get-url", remote]).await?;
        if !output.status.success() {
            return Ok(None);
        }
        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!url.is_empty()).then_some(url))
    }
}

/// Git's view of the export file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GitStatus {
    /// Tracked in the index
    pub tracked: bool,

    /// Working copy differs from `HEAD`
    pub dirty: bool,

    /// Porcelain status lines
    pub uncommitted: Vec<String>,
}

/// Ask the oracle about `path`.
///
/// # Errors
///
/// Propagates oracle failures.
pub async fn git_status(oracle: &dyn GitOracle, path: &Path) -> Result<GitStatus> {
    let tracked = oracle.is_tracked(path).await?;
    let dirty = tracked && oracle.differs_from_head(path).await?;
    let uncommitted = oracle.uncommitted_changes(path).await?;
    Ok(GitStatus {
        tracked,
        dirty,
        uncommitted,
    })
}

/// Fixed answers for tests.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, Default)]
pub struct FakeGit {
    /// Answer to `is_tracked`
    pub tracked: bool,
    /// Answer to `differs_from_head`
    pub dirty: bool,
    /// Answer to `uncommitted_changes`
    pub uncommitted: Vec<String>,
    /// Answer to `remote_url`
    pub remote: Option<String>,
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl GitOracle for FakeGit {
    async fn is_tracked(&self, _path: &Path) -> Result<bool> {
        Ok(self.tracked)
    }

    async fn differs_from_head(&self, _path: &Path) -> Result<bool> {
        Ok(self.dirty)
    }

    async fn uncommitted_changes(&self, _path: &Path) -> Result<Vec<String>> {
        Ok(self.uncommitted.clone())
    }

    async fn remote_url(&self, _remote: &str) -> Result<Option<String>> {
        Ok(self.remote.clone())
    }
}
