//! Soft-delete lifecycle.
//!
//! Deleting an issue turns it into a tombstone that keeps its record (and so
//! every edge pointing at it) until it is older than the TTL. Expired
//! tombstones are only removed by an explicit [`prune`].
//!
//! Before inline tombstones existed, deletions were appended to a separate
//! `deletions.jsonl` manifest. [`migrate_legacy_manifest`] folds it into the
//! store once and renames it so it is never read as live state again.

use crate::domain::{Issue, IssueId, IssueStatus, IssueType};
use crate::error::{Error, Result};
use crate::storage::IssueStorage;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default tombstone lifetime in days.
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// Default head start of the "expiring soon" warning, in days.
pub const DEFAULT_WARN_DAYS: i64 = 7;

/// Legacy deletion manifest file name.
pub const LEGACY_MANIFEST: &str = "deletions.jsonl";

/// Name the manifest is renamed to once migrated.
pub const MIGRATED_MANIFEST: &str = "deletions.jsonl.migrated";

/// Expiry thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TombstonePolicy {
    /// Age after which a tombstone may be pruned
    pub ttl: Duration,

    /// How long before expiry the advisory warning starts
    pub warn_before: Duration,
}

impl Default for TombstonePolicy {
    fn default() -> Self {
        Self::from_days(DEFAULT_TTL_DAYS, DEFAULT_WARN_DAYS)
    }
}

impl TombstonePolicy {
    /// Policy from whole days.
    #[must_use]
    pub fn from_days(ttl_days: i64, warn_days: i64) -> Self {
        Self {
            ttl: Duration::days(ttl_days),
            warn_before: Duration::days(warn_days),
        }
    }
}

fn tombstone_age(issue: &Issue, now: DateTime<Utc>) -> Option<Duration> {
    if !issue.is_tombstone() {
        return None;
    }
    issue.deleted_at.map(|deleted_at| now - deleted_at)
}

/// `now - deleted_at > ttl`. Live issues and tombstones without a deletion
/// time never expire.
#[must_use]
pub fn is_expired(issue: &Issue, ttl: Duration, now: DateTime<Utc>) -> bool {
    tombstone_age(issue, now).is_some_and(|age| age > ttl)
}

/// Within `warn_before` of expiry but not expired yet.
#[must_use]
pub fn is_expiring_soon(issue: &Issue, policy: &TombstonePolicy, now: DateTime<Utc>) -> bool {
    tombstone_age(issue, now)
        .is_some_and(|age| age >= policy.ttl - policy.warn_before && age <= policy.ttl)
}

/// Tombstone an issue as deleted now.
///
/// # Errors
///
/// `Error::IssueNotFound` if the issue doesn't exist.
pub async fn soft_delete(
    storage: &mut dyn IssueStorage,
    id: &IssueId,
    reason: Option<String>,
) -> Result<Issue> {
    let issue = storage.tombstone(id, Utc::now(), reason).await?;
    debug!(%id, "Soft-deleted issue");
    Ok(issue)
}

/// Tombstones grouped by age.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TombstoneSummary {
    /// Every tombstone
    pub total: usize,

    /// Past the TTL
    pub expired: Vec<IssueId>,

    /// Inside the warning window
    pub expiring_soon: Vec<IssueId>,
}

/// Classify every tombstone in the store.
///
/// # Errors
///
/// Propagates storage errors.
pub async fn summarize(
    storage: &dyn IssueStorage,
    policy: &TombstonePolicy,
    now: DateTime<Utc>,
) -> Result<TombstoneSummary> {
    let mut summary = TombstoneSummary::default();
    for issue in storage.export_all().await? {
        if !issue.is_tombstone() {
            continue;
        }
        summary.total += 1;
        if is_expired(&issue, policy.ttl, now) {
            summary.expired.push(issue.id);
        } else if is_expiring_soon(&issue, policy, now) {
            summary.expiring_soon.push(issue.id);
        }
    }
    Ok(summary)
}

/// What [`prune`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Tombstones purged from the store
    pub pruned: Vec<IssueId>,

    /// Lines removed from the export file
    pub export_lines_removed: usize,

    /// Export lines that could not be decoded and were kept verbatim
    pub export_lines_unparsed: usize,
}

impl PruneReport {
    /// Number of purged tombstones.
    #[must_use]
    pub fn count(&self) -> usize {
        self.pruned.len()
    }
}

/// Permanently remove expired, unpinned tombstones from the store and, when
/// given, from the export file.
///
/// The export file is rewritten atomically. Lines that fail to decode are
/// kept as they are.
///
/// # Errors
///
/// Propagates storage errors and export file I/O failures.
pub async fn prune(
    storage: &mut dyn IssueStorage,
    export_file: Option<&Path>,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<PruneReport> {
    let mut report = PruneReport::default();

    let expired: Vec<IssueId> = storage
        .export_all()
        .await?
        .into_iter()
        .filter(|issue| !issue.pinned && is_expired(issue, ttl, now))
        .map(|issue| issue.id)
        .collect();
    for id in &expired {
        storage.purge(id).await?;
    }
    report.pruned = expired;

    if let Some(path) = export_file {
        if path.exists() {
            prune_export(path, ttl, now, &mut report).await?;
        }
    }

    info!(
        pruned = report.pruned.len(),
        export_lines_removed = report.export_lines_removed,
        "Pruned expired tombstones"
    );
    Ok(report)
}

async fn prune_export(
    path: &Path,
    ttl: Duration,
    now: DateTime<Utc>,
    report: &mut PruneReport,
) -> Result<()> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = keel_jsonl::JsonlReader::new(file);
    let mut kept = Vec::new();

    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Issue>(&line) {
            Ok(issue) if !issue.pinned && is_expired(&issue, ttl, now) => {
                report.export_lines_removed += 1;
            }
            Ok(_) => kept.push(line),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = reader.line_number(),
                    error = %e,
                    "Keeping undecodable export line"
                );
                report.export_lines_unparsed += 1;
                kept.push(line);
            }
        }
    }

    if report.export_lines_removed > 0 {
        keel_jsonl::write_lines_atomic(path, &kept).await?;
    }
    Ok(())
}

/// One line of the legacy deletion manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyDeletion {
    /// Deleted issue
    pub id: IssueId,

    /// When it was deleted
    #[serde(rename = "ts")]
    pub deleted_at: DateTime<Utc>,

    /// Who deleted it
    #[serde(default, rename = "by", skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,

    /// Why
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Outcome of [`migrate_legacy_manifest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Live issues turned into tombstones
    pub tombstoned: usize,

    /// Stub tombstones created for IDs with no record
    pub stubs_created: usize,

    /// Entries already present as tombstones
    pub already_tombstoned: usize,

    /// Manifest lines that could not be decoded
    pub malformed_lines: usize,

    /// Migration had already been done earlier
    pub already_migrated: bool,

    /// Where the manifest was moved
    pub migrated_to: Option<PathBuf>,
}

impl MigrationReport {
    /// Number of entries that produced a new tombstone.
    #[must_use]
    pub fn count(&self) -> usize {
        self.tombstoned + self.stubs_created
    }
}

fn stub_tombstone(entry: &LegacyDeletion) -> Issue {
    Issue {
        id: entry.id.clone(),
        title: format!("(deleted) {}", entry.id),
        description: String::new(),
        design: None,
        acceptance_criteria: None,
        notes: None,
        status: IssueStatus::Tombstone,
        priority: 2,
        issue_type: IssueType::Task,
        assignee: None,
        labels: Vec::new(),
        dependencies: Vec::new(),
        comments: Vec::new(),
        external_ref: None,
        pinned: false,
        ephemeral: false,
        created_at: entry.deleted_at,
        updated_at: entry.deleted_at,
        closed_at: None,
        close_reason: None,
        deleted_at: Some(entry.deleted_at),
        delete_reason: entry.reason.clone(),
    }
}

/// Fold `<keel_dir>/deletions.jsonl` into inline tombstones, save the store,
/// then rename the manifest to `deletions.jsonl.migrated`.
///
/// Once the renamed file exists the manifest is never read again, even if a
/// merge brings it back. The rename happens only after the tombstones are
/// persisted, so a failed save leaves the manifest in place for a retry.
///
/// # Errors
///
/// Propagates storage errors (including a failed save) and manifest I/O
/// failures. Malformed manifest lines are counted, not fatal.
pub async fn migrate_legacy_manifest(
    storage: &mut dyn IssueStorage,
    keel_dir: &Path,
) -> Result<MigrationReport> {
    let manifest = keel_dir.join(LEGACY_MANIFEST);
    let sentinel = keel_dir.join(MIGRATED_MANIFEST);
    let mut report = MigrationReport::default();

    if sentinel.exists() {
        if manifest.exists() {
            warn!(
                path = %manifest.display(),
                "Ignoring legacy deletion manifest: migration already completed"
            );
        }
        report.already_migrated = true;
        return Ok(report);
    }
    if !manifest.exists() {
        return Ok(report);
    }

    let (entries, warnings) =
        keel_jsonl::read_jsonl_resilient::<LegacyDeletion, _>(&manifest).await?;
    report.malformed_lines = warnings.len();

    for entry in entries {
        match storage.get(&entry.id).await? {
            Some(issue) if issue.is_tombstone() => report.already_tombstoned += 1,
            Some(_) => {
                storage
                    .tombstone(&entry.id, entry.deleted_at, entry.reason.clone())
                    .await?;
                report.tombstoned += 1;
            }
            None => {
                storage.upsert(stub_tombstone(&entry)).await?;
                report.stubs_created += 1;
            }
        }
    }

    storage.save().await?;
    tokio::fs::rename(&manifest, &sentinel)
        .await
        .map_err(|e| Error::Unavailable(format!("cannot mark {} migrated: {e}", manifest.display())))?;
    report.migrated_to = Some(sentinel);

    info!(
        tombstoned = report.tombstoned,
        stubs = report.stubs_created,
        skipped = report.malformed_lines,
        "Migrated legacy deletion manifest"
    );
    Ok(report)
}
