//! Workspace discovery.
//!
//! [`WorkspacePaths::resolve`] runs once per command: it walks up to the
//! nearest `.keel/`, follows at most one `.keel/redirect`, and returns the
//! final directories. Everything afterwards takes the resolved value instead
//! of looking at the filesystem again.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the keel directory
pub const KEEL_DIR_NAME: &str = ".keel";

/// Name of the configuration file
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Marker file pointing the workspace at another directory
pub const REDIRECT_FILE_NAME: &str = "redirect";

/// Maximum directory depth to traverse when searching for the workspace root
pub const MAX_TRAVERSAL_DEPTH: usize = 256;

/// Resolved workspace locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    root: PathBuf,
    keel_dir: PathBuf,
    redirected_from: Option<PathBuf>,
}

impl WorkspacePaths {
    /// Paths for a workspace rooted at `root`, without any lookup.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            keel_dir: root.join(KEEL_DIR_NAME),
            root,
            redirected_from: None,
        }
    }

    /// Find the workspace containing `start_dir` and apply its redirect.
    ///
    /// # Errors
    ///
    /// - `Error::NotInitialized` if no `.keel/` exists up the tree
    /// - `Error::Config` if the redirect is unreadable or names a directory
    ///   without a `.keel/`
    pub fn resolve(start_dir: &Path) -> Result<Self> {
        let root = find_workspace_root(start_dir)
            .ok_or_else(|| Error::NotInitialized(start_dir.to_path_buf()))?;
        let local = Self::at(&root);

        let Some(target) = read_redirect(&local.keel_dir)? else {
            return Ok(local);
        };
        let target = if target.is_absolute() {
            target
        } else {
            root.join(target)
        };
        let target_root = redirect_root(&target).ok_or_else(|| {
            Error::Config(format!(
                "{} points to {}, which has no {KEEL_DIR_NAME} directory",
                local.redirect_file().display(),
                target.display()
            ))
        })?;

        let resolved = Self {
            redirected_from: Some(local.keel_dir.clone()),
            ..Self::at(target_root)
        };
        if resolved.redirect_file().exists() {
            warn!(
                from = %local.keel_dir.display(),
                to = %resolved.keel_dir.display(),
                "Redirect target has its own redirect; not following it"
            );
        }
        debug!(keel_dir = %resolved.keel_dir.display(), "Workspace redirected");
        Ok(resolved)
    }

    /// Directory containing `.keel/`
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `.keel/` directory
    pub fn keel_dir(&self) -> &Path {
        &self.keel_dir
    }

    /// `.keel/config.yaml`
    pub fn config_file(&self) -> PathBuf {
        self.keel_dir.join(CONFIG_FILE_NAME)
    }

    /// `.keel/redirect`
    pub fn redirect_file(&self) -> PathBuf {
        self.keel_dir.join(REDIRECT_FILE_NAME)
    }

    /// The `.keel/` that redirected here, if any
    pub fn redirected_from(&self) -> Option<&Path> {
        self.redirected_from.as_deref()
    }
}

fn read_redirect(keel_dir: &Path) -> Result<Option<PathBuf>> {
    let path = keel_dir.join(REDIRECT_FILE_NAME);
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let target = content.trim();
            if target.is_empty() {
                return Err(Error::Config(format!("{} is empty", path.display())));
            }
            Ok(Some(PathBuf::from(target)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Config(format!(
            "cannot read {}: {e}",
            path.display()
        ))),
    }
}

/// A redirect may name the workspace root or its `.keel/` directly.
fn redirect_root(target: &Path) -> Option<PathBuf> {
    if target.join(KEEL_DIR_NAME).is_dir() {
        return Some(target.to_path_buf());
    }
    if target.file_name().is_some_and(|n| n == KEEL_DIR_NAME) && target.is_dir() {
        return target.parent().map(Path::to_path_buf);
    }
    None
}

/// Check if a directory has been initialized with keel.
pub fn is_initialized(base_dir: &Path) -> bool {
    base_dir.join(KEEL_DIR_NAME).exists()
}

/// Find the directory containing `.keel/` by searching up the tree.
///
/// Returns `None` if nothing is found within [`MAX_TRAVERSAL_DEPTH`] levels.
pub fn find_workspace_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();
    let mut depth = 0;

    loop {
        if current.join(KEEL_DIR_NAME).is_dir() {
            return Some(current);
        }

        depth += 1;
        if depth > MAX_TRAVERSAL_DEPTH || !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace(dir: &Path) {
        std::fs::create_dir_all(dir.join(KEEL_DIR_NAME)).unwrap();
    }

    #[test]
    fn test_find_root_in_parent_dir() {
        let temp_dir = TempDir::new().unwrap();
        workspace(temp_dir.path());

        let sub_dir = temp_dir.path().join("sub").join("nested");
        std::fs::create_dir_all(&sub_dir).unwrap();

        let found = find_workspace_root(&sub_dir);
        assert_eq!(found, Some(temp_dir.path().to_path_buf()));
    }

    #[test]
    fn test_resolve_uninitialized() {
        let temp_dir = TempDir::new().unwrap();
        let err = WorkspacePaths::resolve(temp_dir.path()).unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));
    }

    #[test]
    fn test_resolve_without_redirect() {
        let temp_dir = TempDir::new().unwrap();
        workspace(temp_dir.path());

        let paths = WorkspacePaths::resolve(temp_dir.path()).unwrap();
        assert_eq!(paths.root(), temp_dir.path());
        assert!(paths.redirected_from().is_none());
        assert!(paths.config_file().ends_with(".keel/config.yaml"));
    }

    #[test]
    fn test_relative_redirect_is_followed() {
        let temp_dir = TempDir::new().unwrap();
        let here = temp_dir.path().join("worktree");
        let there = temp_dir.path().join("main");
        workspace(&here);
        workspace(&there);
        std::fs::write(here.join(".keel/redirect"), "../main\n").unwrap();

        let paths = WorkspacePaths::resolve(&here).unwrap();
        assert_eq!(
            paths.keel_dir().canonicalize().unwrap(),
            there.join(KEEL_DIR_NAME).canonicalize().unwrap()
        );
        assert_eq!(paths.redirected_from(), Some(here.join(".keel").as_path()));
    }

    #[test]
    fn test_redirect_to_keel_dir_itself() {
        let temp_dir = TempDir::new().unwrap();
        let here = temp_dir.path().join("a");
        let there = temp_dir.path().join("b");
        workspace(&here);
        workspace(&there);
        std::fs::write(
            here.join(".keel/redirect"),
            there.join(KEEL_DIR_NAME).to_string_lossy().as_bytes(),
        )
        .unwrap();

        let paths = WorkspacePaths::resolve(&here).unwrap();
        assert_eq!(paths.root(), there.as_path());
    }

    #[test]
    fn test_only_one_hop_is_followed() {
        let temp_dir = TempDir::new().unwrap();
        let (a, b, c) = (
            temp_dir.path().join("a"),
            temp_dir.path().join("b"),
            temp_dir.path().join("c"),
        );
        for dir in [&a, &b, &c] {
            workspace(dir);
        }
        std::fs::write(a.join(".keel/redirect"), b.to_string_lossy().as_bytes()).unwrap();
        std::fs::write(b.join(".keel/redirect"), c.to_string_lossy().as_bytes()).unwrap();

        let paths = WorkspacePaths::resolve(&a).unwrap();
        assert_eq!(paths.root(), b.as_path());
    }

    #[test]
    fn test_redirect_to_plain_directory_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        workspace(temp_dir.path());
        let plain = temp_dir.path().join("plain");
        std::fs::create_dir_all(&plain).unwrap();
        std::fs::write(
            temp_dir.path().join(".keel/redirect"),
            plain.to_string_lossy().as_bytes(),
        )
        .unwrap();

        let err = WorkspacePaths::resolve(temp_dir.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
