//! On-disk form of the embedded backend.

use crate::domain::Issue;
use crate::error::{Error, Result};
use crate::id_generation::AllocatorState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Whole-store snapshot written by the embedded backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Format version
    pub version: u32,

    /// Every record, tombstones included, sorted by ID
    #[serde(default)]
    pub issues: Vec<Issue>,

    /// Store config
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Engine metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// ID counters, so purged IDs are not handed out again
    #[serde(default)]
    pub allocator: AllocatorState,
}

impl StoreSnapshot {
    /// Version written by this build.
    pub const CURRENT_VERSION: u32 = 1;

    /// Read a snapshot file. A missing file yields `None`.
    ///
    /// # Errors
    ///
    /// - `Error::Unavailable` if the file exists but cannot be read
    /// - `Error::Corrupt` if it does not parse or has a newer version
    pub async fn read(path: &Path) -> Result<Option<Self>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Unavailable(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };

        let snapshot: Self = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Corrupt(format!("{}: {e}", path.display())))?;
        if snapshot.version > Self::CURRENT_VERSION {
            return Err(Error::Corrupt(format!(
                "{} has snapshot version {}, newer than supported version {}",
                path.display(),
                snapshot.version,
                Self::CURRENT_VERSION
            )));
        }
        debug!(path = %path.display(), issues = snapshot.issues.len(), "Loaded snapshot");
        Ok(Some(snapshot))
    }

    /// Atomically replace the snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn write(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        keel_jsonl::write_bytes_atomic(path, &bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::issue;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let result = StoreSnapshot::read(&dir.path().join("store.json")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn written_snapshot_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let snapshot = StoreSnapshot {
            version: StoreSnapshot::CURRENT_VERSION,
            issues: vec![issue("p-1")],
            config: BTreeMap::from([("issue_prefix".to_string(), "p".to_string())]),
            metadata: BTreeMap::new(),
            allocator: AllocatorState {
                sequence: 4,
                child_counters: BTreeMap::from([("p-1".to_string(), 2)]),
            },
        };
        snapshot.write(&path).await.unwrap();
        assert_eq!(StoreSnapshot::read(&path).await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn garbage_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = StoreSnapshot::read(&path).await.unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[tokio::test]
    async fn future_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{"version": 99, "issues": []}"#).unwrap();
        assert!(matches!(
            StoreSnapshot::read(&path).await,
            Err(Error::Corrupt(_))
        ));
    }
}
