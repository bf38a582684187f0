//! Atomic write operations for JSONL files.
//!
//! This module provides functionality for atomically replacing files, ensuring
//! crash safety by using the temp-file-then-rename pattern:
//!
//! 1. Data is written to a temporary file next to the target (same directory,
//!    so the rename never crosses a filesystem boundary)
//! 2. The temporary file is flushed and synced to disk
//! 3. The temporary file is renamed over the target path
//!
//! The temporary file is owned by a guard that removes it on every exit path
//! that does not reach the rename, including early returns and panics.
//!
//! # Examples
//!
//! ```no_run
//! use keel_jsonl::write_jsonl_atomic;
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Record {
//!     id: u32,
//!     name: String,
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let records = vec![
//!     Record { id: 1, name: "Alice".to_string() },
//!     Record { id: 2, name: "Bob".to_string() },
//! ];
//!
//! write_jsonl_atomic("data.jsonl", &records).await?;
//! # Ok(())
//! # }
//! ```

use crate::{JsonlWriter, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Removes the temporary file on drop unless the write was committed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Renames the temp file over `target` and disarms the guard.
    async fn commit(mut self, file: File, target: &Path) -> Result<()> {
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&self.path, target).await?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Failed to remove temporary file"
                    );
                }
            }
        }
    }
}

/// Atomically writes a slice of values to a JSONL file.
///
/// # Errors
///
/// Returns an error if the temporary file cannot be created, any value fails
/// to serialize, an I/O error occurs, or the rename fails. On failure the
/// original file (if any) is left unchanged and the temporary file is removed.
pub async fn write_jsonl_atomic<T, P>(path: P, values: &[T]) -> Result<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    write_jsonl_atomic_iter(path, values.iter()).await
}

/// Atomically writes an iterator of values to a JSONL file.
///
/// # Errors
///
/// See [`write_jsonl_atomic`] for error conditions.
pub async fn write_jsonl_atomic_iter<T, I, P>(path: P, values: I) -> Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let guard = TempFileGuard::new(make_temp_path(path));

    let file = File::create(guard.path()).await?;
    let mut writer = JsonlWriter::new(file);
    writer.write_all(values).await?;
    let file = writer.finish().await?;

    guard.commit(file, path).await
}

/// Atomically writes pre-encoded lines to a file.
///
/// Each item is written verbatim followed by a newline.
///
/// # Errors
///
/// See [`write_jsonl_atomic`]. Also fails if any line contains a newline.
pub async fn write_lines_atomic<S, I, P>(path: P, lines: I) -> Result<()>
where
    S: AsRef<str>,
    I: IntoIterator<Item = S>,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let guard = TempFileGuard::new(make_temp_path(path));

    let file = File::create(guard.path()).await?;
    let mut writer = JsonlWriter::new(file);
    for line in lines {
        writer.write_line(line.as_ref()).await?;
    }
    let file = writer.finish().await?;

    guard.commit(file, path).await
}

/// Atomically replaces a file with the given bytes.
///
/// # Errors
///
/// See [`write_jsonl_atomic`].
pub async fn write_bytes_atomic<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let guard = TempFileGuard::new(make_temp_path(path));

    let mut file = File::create(guard.path()).await?;
    file.write_all(bytes).await?;
    file.flush().await?;

    guard.commit(file, path).await
}

/// Creates a temporary file path for atomic write operations.
///
/// The temp path sits in the same directory as the target: `.tmp` is appended
/// to the existing extension, or used as the extension if there is none.
fn make_temp_path(path: &Path) -> PathBuf {
    let mut temp_path = path.to_path_buf();
    let new_extension = match path.extension() {
        Some(ext) => {
            let mut new_ext = ext.to_os_string();
            new_ext.push(".tmp");
            new_ext
        }
        None => std::ffi::OsString::from("tmp"),
    };
    temp_path.set_extension(new_extension);
    temp_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Row {
        id: u32,
    }

    #[test]
    fn make_temp_path_with_extension() {
        let temp = make_temp_path(Path::new("/path/to/file.jsonl"));
        assert_eq!(temp, Path::new("/path/to/file.jsonl.tmp"));
    }

    #[test]
    fn make_temp_path_without_extension() {
        let temp = make_temp_path(Path::new("/path/to/file"));
        assert_eq!(temp, Path::new("/path/to/file.tmp"));
    }

    #[tokio::test]
    async fn atomic_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("issues.jsonl");
        tokio::fs::write(&target, "old content\n").await.unwrap();

        write_jsonl_atomic(&target, &[Row { id: 42 }]).await.unwrap();

        let contents = tokio::fs::read_to_string(&target).await.unwrap();
        assert_eq!(contents, "{\"id\":42}\n");
        assert!(!dir.path().join("issues.jsonl.tmp").exists());
    }

    #[tokio::test]
    async fn failed_write_leaves_original_and_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("issues.jsonl");
        tokio::fs::write(&target, "keep me\n").await.unwrap();

        let result = write_lines_atomic(&target, ["ok", "bad\nline"]).await;
        assert!(result.is_err());

        let contents = tokio::fs::read_to_string(&target).await.unwrap();
        assert_eq!(contents, "keep me\n");
        assert!(!dir.path().join("issues.jsonl.tmp").exists());
    }

    #[tokio::test]
    async fn write_bytes_atomic_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("store.json");

        write_bytes_atomic(&target, b"{}").await.unwrap();

        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"{}");
    }
}
