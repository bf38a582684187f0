//! Repository fingerprint.
//!
//! A store copied from another repository keeps that repository's
//! fingerprint in its metadata; comparing it with the current remote catches
//! the copy before its issues leak into the wrong export.

use super::git::GitOracle;
use crate::error::Result;
use crate::storage::{IssueStorage, metadata_keys};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Remote consulted for repository identity.
pub const FINGERPRINT_REMOTE: &str = "origin";

/// Reduce `https://user@Host/owner/repo.git` and `git@host:owner/repo` to
/// `host/owner/repo`.
#[must_use]
pub fn normalize_remote_url(url: &str) -> String {
    let url = url.trim();
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let without_user = without_scheme
        .split_once('@')
        .map_or(without_scheme, |(_, rest)| rest);

    // scp-like syntax uses ':' between host and path
    let unified = if url.contains("://") {
        without_user.to_string()
    } else {
        without_user.replacen(':', "/", 1)
    };

    let trimmed = unified.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    match trimmed.split_once('/') {
        Some((host, path)) => format!("{}/{path}", host.to_ascii_lowercase()),
        None => trimmed.to_ascii_lowercase(),
    }
}

/// Fingerprint of a remote URL: the first 16 hex digits of its normalized
/// SHA-256.
#[must_use]
pub fn compute_repo_id(remote_url: &str) -> String {
    let digest = Sha256::digest(normalize_remote_url(remote_url).as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(16);
    id
}

/// Outcome of [`check_fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FingerprintStatus {
    /// Stored and current fingerprints agree
    Match,
    /// The store has no fingerprint yet
    Missing {
        /// Fingerprint that would be recorded
        current: String,
    },
    /// The store belongs to another repository
    Mismatch {
        /// Recorded in the store
        stored: String,
        /// Computed from the current remote
        current: String,
    },
    /// No remote to derive identity from
    NoRemote,
}

/// Compare the stored fingerprint with the current remote.
///
/// # Errors
///
/// Propagates storage and oracle errors.
pub async fn check_fingerprint(
    storage: &dyn IssueStorage,
    git: &dyn GitOracle,
) -> Result<FingerprintStatus> {
    let Some(url) = git.remote_url(FINGERPRINT_REMOTE).await? else {
        return Ok(FingerprintStatus::NoRemote);
    };
    let current = compute_repo_id(&url);
    Ok(match storage.get_metadata(metadata_keys::REPO_ID).await? {
        None => FingerprintStatus::Missing { current },
        Some(stored) if stored == current => FingerprintStatus::Match,
        Some(stored) => FingerprintStatus::Mismatch { stored, current },
    })
}

/// Record the current fingerprint, returning it.
///
/// # Errors
///
/// Propagates storage and oracle errors.
pub async fn record_fingerprint(
    storage: &mut dyn IssueStorage,
    git: &dyn GitOracle,
) -> Result<Option<String>> {
    let Some(url) = git.remote_url(FINGERPRINT_REMOTE).await? else {
        return Ok(None);
    };
    let repo_id = compute_repo_id(&url);
    storage
        .set_metadata(metadata_keys::REPO_ID, &repo_id)
        .await?;
    Ok(Some(repo_id))
}
