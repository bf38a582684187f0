//! Export (store -> JSONL) and import (JSONL -> store).
//!
//! The export file holds one JSON issue per line, sorted by ID, and is only
//! ever replaced atomically. Both directions record the export file's
//! modification time as `last_import_time`, so a later mtime on the file
//! means someone changed it since, and the file's SHA-256 as
//! `jsonl_content_hash`.

use crate::domain::{Issue, IssueId};
use crate::error::{Error, Result};
use crate::storage::{ISSUE_PREFIX_KEY, IssueStorage, metadata_keys};
use crate::tombstone;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Default export file name inside `.keel/`.
pub const DEFAULT_EXPORT_FILE: &str = "issues.jsonl";

/// File names reserved for other logs; never valid export targets.
pub const RESERVED_EXPORT_NAMES: &[&str] = &[
    "deletions.jsonl",
    "interactions.jsonl",
    "molecules.jsonl",
    "sync_base.jsonl",
];

/// Rejects reserved file names as export targets.
///
/// # Errors
///
/// `Error::Validation` naming the reserved file.
pub fn validate_export_target(path: &Path) -> Result<()> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Validation(format!("{} is not a file path", path.display())))?;
    if RESERVED_EXPORT_NAMES.contains(&name) {
        return Err(Error::Validation(format!(
            "{name} is a reserved file and cannot be used as the export file"
        )));
    }
    Ok(())
}

/// SHA-256 of a file's bytes, hex encoded.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn file_hash(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Modification time of a file.
///
/// # Errors
///
/// Returns an error if the file metadata cannot be read.
pub async fn file_mtime(path: &Path) -> Result<DateTime<Utc>> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(modified.into())
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

async fn record_file_state(storage: &mut dyn IssueStorage, path: &Path) -> Result<()> {
    let mtime = file_mtime(path).await?;
    let hash = file_hash(path).await?;
    storage
        .set_metadata(metadata_keys::LAST_IMPORT_TIME, &rfc3339(mtime))
        .await?;
    storage
        .set_metadata(metadata_keys::JSONL_CONTENT_HASH, &hash)
        .await?;
    Ok(())
}

/// Whether an issue belongs in the export file.
#[must_use]
pub fn is_exportable(issue: &Issue, tombstone_ttl: Duration, now: DateTime<Utc>) -> bool {
    !issue.ephemeral && !tombstone::is_expired(issue, tombstone_ttl, now)
}

/// Outcome of [`export`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    /// Records written
    pub written: usize,

    /// Ephemeral issues left out
    pub skipped_ephemeral: usize,

    /// Expired tombstones left out
    pub skipped_expired: usize,

    /// SHA-256 of the written file
    pub content_hash: String,
}

/// Write every exportable issue to `path`, sorted by ID.
///
/// # Errors
///
/// - `Error::Validation` for a reserved target name
/// - storage and I/O errors
pub async fn export(
    storage: &mut dyn IssueStorage,
    path: &Path,
    tombstone_ttl: Duration,
) -> Result<ExportReport> {
    validate_export_target(path)?;
    let now = Utc::now();
    let mut report = ExportReport::default();

    let mut records = Vec::new();
    for issue in storage.export_all().await? {
        if issue.ephemeral {
            report.skipped_ephemeral += 1;
        } else if tombstone::is_expired(&issue, tombstone_ttl, now) {
            report.skipped_expired += 1;
        } else {
            records.push(issue);
        }
    }
    records.sort_by(|a, b| a.id.cmp(&b.id));
    for issue in &mut records {
        issue.dependencies.sort();
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    keel_jsonl::write_jsonl_atomic(path, &records).await?;
    report.written = records.len();

    record_file_state(storage, path).await?;
    storage
        .set_metadata(metadata_keys::LAST_EXPORT_TIME, &rfc3339(now))
        .await?;
    report.content_hash = file_hash(path).await?;

    info!(path = %path.display(), written = report.written, "Exported issues");
    Ok(report)
}

/// Import knobs.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Rewrite foreign-prefixed IDs onto the store prefix instead of failing
    pub rename_on_import: bool,

    /// Workflow suffixes accepted next to the store prefix (`mol` allows `proj-mol-…`)
    pub prefix_variants: Vec<String>,
}

/// Outcome of [`import`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// New records
    pub created: usize,

    /// Records replaced by a newer copy
    pub updated: usize,

    /// Records identical or older than the local copy
    pub unchanged: usize,

    /// Records not applied because the local copy is a tombstone
    pub kept_tombstoned: usize,

    /// Lines that could not be decoded
    pub malformed_lines: usize,

    /// Records the store refused, with the reason
    pub rejected: Vec<(IssueId, String)>,

    /// Foreign prefixes rewritten onto the store prefix
    pub renamed_prefixes: Vec<String>,
}

/// Prefixes accepted as "ours": the store prefix and its workflow variants.
#[must_use]
pub fn accepted_prefixes(prefix: &str, variants: &[String]) -> BTreeSet<String> {
    std::iter::once(prefix.to_string())
        .chain(variants.iter().map(|v| format!("{prefix}-{v}")))
        .collect()
}

/// Prefixes in `issues` that are neither `prefix` nor one of its variants.
#[must_use]
pub fn foreign_prefixes<'a>(
    issues: impl IntoIterator<Item = &'a Issue>,
    prefix: &str,
    variants: &[String],
) -> BTreeSet<String> {
    let accepted = accepted_prefixes(prefix, variants);
    issues
        .into_iter()
        .filter_map(|issue| issue.id.prefix())
        .filter(|p| !accepted.contains(*p))
        .map(str::to_string)
        .collect()
}

fn rename_ids(issue: &mut Issue, renames: &BTreeSet<String>, target: &str) {
    let rename = |id: &IssueId| {
        renames
            .iter()
            .find_map(|old| id.with_prefix(old, target))
            .unwrap_or_else(|| id.clone())
    };
    issue.id = rename(&issue.id);
    for dep in &mut issue.dependencies {
        dep.depends_on_id = rename(&dep.depends_on_id);
    }
    issue.dependencies.sort();
    for comment in &mut issue.comments {
        comment.issue_id = issue.id.clone();
    }
}

/// Merge the export file into the store.
///
/// A record replaces the local copy only when its `updated_at` is newer, and
/// never replaces a local tombstone with a live issue.
///
/// # Errors
///
/// - `Error::Conflict` for foreign prefixes without `rename_on_import`
/// - `Error::Config` if the store has no prefix configured
/// - storage and I/O errors
pub async fn import(
    storage: &mut dyn IssueStorage,
    path: &Path,
    options: &ImportOptions,
) -> Result<ImportReport> {
    let prefix = storage
        .get_config(ISSUE_PREFIX_KEY)
        .await?
        .ok_or_else(|| Error::Config(format!("store has no '{ISSUE_PREFIX_KEY}' entry")))?;

    let (mut records, warnings) = keel_jsonl::read_jsonl_resilient::<Issue, _>(path).await?;
    let mut report = ImportReport {
        malformed_lines: warnings.len(),
        ..ImportReport::default()
    };
    for warning in &warnings {
        warn!(path = %path.display(), %warning, "Skipping export line");
    }

    let foreign = foreign_prefixes(&records, &prefix, &options.prefix_variants);
    if !foreign.is_empty() {
        if !options.rename_on_import {
            return Err(Error::Conflict(format!(
                "export contains foreign prefixes {} (store prefix is '{prefix}'); import with rename to adopt them",
                foreign.iter().cloned().collect::<Vec<_>>().join(", ")
            )));
        }
        for issue in &mut records {
            rename_ids(issue, &foreign, &prefix);
        }
        report.renamed_prefixes = foreign.into_iter().collect();
    }

    for incoming in records {
        let id = incoming.id.clone();
        let is_new = match storage.get(&id).await? {
            Some(local) if local.is_tombstone() && !incoming.is_tombstone() => {
                debug!(%id, "Not resurrecting local tombstone");
                report.kept_tombstoned += 1;
                continue;
            }
            Some(local)
                if incoming.updated_at <= local.updated_at
                    || (incoming.content_hash() == local.content_hash()
                        && incoming.dependencies == local.dependencies) =>
            {
                report.unchanged += 1;
                continue;
            }
            Some(_) => false,
            None => true,
        };
        match storage.upsert(incoming).await {
            Ok(()) if is_new => report.created += 1,
            Ok(()) => report.updated += 1,
            Err(e) => {
                warn!(%id, error = %e, "Import rejected record");
                report.rejected.push((id, e.to_string()));
            }
        }
    }

    record_file_state(storage, path).await?;
    info!(
        path = %path.display(),
        created = report.created,
        updated = report.updated,
        skipped = report.malformed_lines,
        "Imported issues"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DependencyType;
    use crate::domain::test_support::issue;
    use tempfile::TempDir;

    #[test]
    fn reserved_names_are_rejected() {
        for name in RESERVED_EXPORT_NAMES {
            assert!(validate_export_target(&Path::new(".keel").join(name)).is_err());
        }
        assert!(validate_export_target(Path::new(".keel/issues.jsonl")).is_ok());
    }

    #[test]
    fn variants_are_not_foreign() {
        let issues = [issue("p-1"), issue("p-mol-2"), issue("q-3"), issue("q-wisp-4")];
        let variants = vec!["mol".to_string(), "wisp".to_string()];
        let foreign = foreign_prefixes(&issues, "p", &variants);
        assert_eq!(
            foreign.into_iter().collect::<Vec<_>>(),
            vec!["q".to_string(), "q-wisp".to_string()]
        );
    }

    #[test]
    fn renaming_rewrites_edges_and_comments() {
        let mut i = issue("q-1");
        i.dependencies.push(crate::domain::Dependency {
            depends_on_id: IssueId::new("q-2"),
            dep_type: DependencyType::Blocks,
        });
        rename_ids(&mut i, &BTreeSet::from(["q".to_string()]), "p");
        assert_eq!(i.id.as_str(), "p-1");
        assert_eq!(i.dependencies[0].depends_on_id.as_str(), "p-2");
    }

    #[tokio::test]
    async fn file_hash_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jsonl");
        std::fs::write(&path, "abc").unwrap();
        assert_eq!(
            file_hash(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
