//! Store vs. export consistency checking.
//!
//! [`compare`] looks at three independent signals:
//!
//! 1. **Count**: exportable store records against decodable export lines.
//! 2. **Content**: when counts agree, a deterministic sample of IDs is
//!    compared field by field (status first, then the content hash).
//! 3. **Staleness**: the export file's mtime against the store's
//!    `last_import_time`, with a small clock-skew allowance.
//!
//! The checker diagnoses; it never repairs. Failing to read one side is
//! recorded as a degraded check with a recovery hint instead of an error.
//!
//! Sampling bounds the work on large stores. A mismatch in an unsampled
//! record goes unnoticed until it shifts the counts or lands in the sample.

pub mod duplicates;
pub mod fingerprint;
pub mod git;

pub use duplicates::{DuplicateGroup, find_duplicates};
pub use fingerprint::{FingerprintStatus, check_fingerprint, compute_repo_id, record_fingerprint};
pub use git::{GitCli, GitOracle, GitStatus, git_status};

#[cfg(any(test, feature = "test-util"))]
pub use git::FakeGit;

use crate::domain::{Issue, IssueId};
use crate::storage::{ISSUE_PREFIX_KEY, IssueStorage, metadata_keys};
use crate::sync;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

/// Default number of IDs compared field by field.
pub const DEFAULT_SAMPLE_CAP: usize = 500;

/// Default number of concrete mismatches listed.
pub const DEFAULT_MISMATCH_REPORT_CAP: usize = 10;

/// Default clock-skew allowance in seconds.
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 2;

/// Workflow prefix suffixes accepted by default.
pub const DEFAULT_PREFIX_VARIANTS: &[&str] = &["mol", "wisp", "eph"];

/// Checker knobs.
#[derive(Debug, Clone)]
pub struct CheckerSettings {
    /// IDs compared when counts agree
    pub sample_cap: usize,

    /// Concrete mismatches listed in the report
    pub mismatch_report_cap: usize,

    /// Timestamps closer than this are equal
    pub clock_skew: Duration,

    /// Suffixes `v` such that `{prefix}-{v}` is not a foreign prefix
    pub prefix_variants: Vec<String>,

    /// Tombstones older than this are not expected in the export
    pub tombstone_ttl: Duration,
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            sample_cap: DEFAULT_SAMPLE_CAP,
            mismatch_report_cap: DEFAULT_MISMATCH_REPORT_CAP,
            clock_skew: Duration::seconds(DEFAULT_CLOCK_SKEW_SECS),
            prefix_variants: DEFAULT_PREFIX_VARIANTS
                .iter()
                .map(ToString::to_string)
                .collect(),
            tombstone_ttl: Duration::days(crate::tombstone::DEFAULT_TTL_DAYS),
        }
    }
}

/// Recommended repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairDirection {
    /// Nothing to do
    None,
    /// Rewrite the export from the store
    Export,
    /// Load the export into the store
    Import,
    /// Import, rewriting foreign-prefixed IDs onto the store prefix
    RenameOnImport,
}

impl RepairDirection {
    /// Command that performs the repair.
    #[must_use]
    pub fn command(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Export => Some("keel export"),
            Self::Import => Some("keel import"),
            Self::RenameOnImport => Some("keel import --rename-prefix"),
        }
    }
}

/// One differing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMismatch {
    /// Issue ID
    pub id: IssueId,

    /// `status`, `content`, or `presence` when the export lacks the record
    pub field: &'static str,

    /// Store-side value
    pub store: String,

    /// Export-side value
    pub export: String,
}

/// Sampled content comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentComparison {
    /// IDs compared
    pub sampled: usize,

    /// Sampled IDs that differ
    pub mismatched: usize,

    /// The first few differences
    pub examples: Vec<FieldMismatch>,
}

/// Export file age relative to the last import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Staleness {
    /// Within the skew allowance
    InSync,
    /// The file changed after the last import
    ExportNewer {
        /// Seconds past the last import
        seconds: i64,
    },
    /// The store recorded a newer file than the one on disk
    StoreNewer {
        /// Seconds the file lags
        seconds: i64,
    },
    /// No import or export has been recorded
    NeverSynced,
    /// The export file does not exist
    NoExport,
}

/// A side of the comparison that could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedCheck {
    /// `store` or `export`
    pub side: &'static str,

    /// What failed
    pub message: String,

    /// What to try
    pub recovery: String,
}

/// Everything [`compare`] found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Divergence {
    /// Exportable store records
    pub store_count: usize,

    /// Decodable export lines, repeated IDs counted each time
    pub export_count: usize,

    /// IDs that appear on more than one export line, sorted
    pub duplicate_ids: Vec<IssueId>,

    /// Export lines that did not decode
    pub malformed_lines: usize,

    /// 1-based line numbers of git merge-conflict markers
    pub conflict_markers: Vec<usize>,

    /// Counts differ
    pub count_mismatch: bool,

    /// Field comparison, when counts agree
    pub content: Option<ContentComparison>,

    /// Export prefixes that are neither the store prefix nor a variant
    pub foreign_prefixes: Vec<String>,

    /// File age signal
    pub staleness: Staleness,

    /// Recommended repair
    pub repair: RepairDirection,

    /// Sides that could not be read
    pub degraded: Vec<DegradedCheck>,
}

impl Divergence {
    /// No signal fired and both sides were readable.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.count_mismatch
            && self.duplicate_ids.is_empty()
            && self.content.as_ref().is_none_or(|c| c.mismatched == 0)
            && self.malformed_lines == 0
            && self.conflict_markers.is_empty()
            && self.foreign_prefixes.is_empty()
            && matches!(self.staleness, Staleness::InSync)
            && self.degraded.is_empty()
    }
}

/// Lines beginning a git merge-conflict hunk marker.
fn is_conflict_marker(line: &str) -> bool {
    line.starts_with("<<<<<<< ")
        || line == "<<<<<<<"
        || line == "======="
        || line.starts_with(">>>>>>> ")
        || line == ">>>>>>>"
}

#[derive(Debug, Default)]
struct ExportScan {
    records: BTreeMap<IssueId, Issue>,
    lines: usize,
    duplicate_ids: BTreeSet<IssueId>,
    malformed: usize,
    conflict_markers: Vec<usize>,
}

async fn scan_export(path: &Path) -> crate::error::Result<ExportScan> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = keel_jsonl::JsonlReader::new(file);
    let mut scan = ExportScan::default();

    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if is_conflict_marker(&line) {
            scan.conflict_markers.push(reader.line_number());
            continue;
        }
        match serde_json::from_str::<Issue>(&line) {
            Ok(issue) => {
                scan.lines += 1;
                if let Some(previous) = scan.records.insert(issue.id.clone(), issue) {
                    debug!(line = reader.line_number(), id = %previous.id, "Repeated export record");
                    scan.duplicate_ids.insert(previous.id);
                }
            }
            Err(e) => {
                debug!(line = reader.line_number(), error = %e, "Malformed export line");
                scan.malformed += 1;
            }
        }
    }
    Ok(scan)
}

/// Evenly strided sample of at most `cap` IDs, in sorted order.
///
/// Deterministic: the same ID set always yields the same sample.
#[must_use]
pub fn sample_ids(ids: &[IssueId], cap: usize) -> Vec<&IssueId> {
    if ids.len() <= cap {
        return ids.iter().collect();
    }
    (0..cap).map(|i| &ids[i * ids.len() / cap]).collect()
}

fn compare_content(
    store: &BTreeMap<IssueId, Issue>,
    export: &BTreeMap<IssueId, Issue>,
    settings: &CheckerSettings,
) -> ContentComparison {
    let ids: Vec<IssueId> = store.keys().cloned().collect();
    let sample = sample_ids(&ids, settings.sample_cap);
    let mut comparison = ContentComparison {
        sampled: sample.len(),
        ..ContentComparison::default()
    };

    for id in sample {
        let Some(local) = store.get(id) else { continue };
        let mismatch = match export.get(id) {
            None => Some(FieldMismatch {
                id: id.clone(),
                field: "presence",
                store: "present".to_string(),
                export: "missing".to_string(),
            }),
            Some(remote) if remote.status != local.status => Some(FieldMismatch {
                id: id.clone(),
                field: "status",
                store: local.status.to_string(),
                export: remote.status.to_string(),
            }),
            Some(remote) if remote.content_hash() != local.content_hash() => Some(FieldMismatch {
                id: id.clone(),
                field: "content",
                store: local.content_hash(),
                export: remote.content_hash(),
            }),
            Some(_) => None,
        };
        if let Some(mismatch) = mismatch {
            comparison.mismatched += 1;
            if comparison.examples.len() < settings.mismatch_report_cap {
                comparison.examples.push(mismatch);
            }
        }
    }
    comparison
}

fn staleness(
    last_import: Option<&str>,
    export_mtime: Option<DateTime<Utc>>,
    skew: Duration,
) -> Staleness {
    let Some(mtime) = export_mtime else {
        return Staleness::NoExport;
    };
    let Some(last_import) = last_import.and_then(|s| DateTime::parse_from_rfc3339(s).ok()) else {
        return Staleness::NeverSynced;
    };
    let delta = mtime - last_import.with_timezone(&Utc);
    if delta > skew {
        Staleness::ExportNewer {
            seconds: delta.num_seconds(),
        }
    } else if -delta > skew {
        Staleness::StoreNewer {
            seconds: (-delta).num_seconds(),
        }
    } else {
        Staleness::InSync
    }
}

fn repair_direction(divergence: &Divergence, unique_export_ids: usize) -> RepairDirection {
    // Rewriting the export drops repeated lines; importing cannot.
    if !divergence.duplicate_ids.is_empty() && divergence.store_count >= unique_export_ids {
        return RepairDirection::Export;
    }
    if divergence.count_mismatch {
        if !divergence.foreign_prefixes.is_empty() && divergence.store_count == 0 {
            return RepairDirection::RenameOnImport;
        }
        return if divergence.store_count > divergence.export_count {
            RepairDirection::Export
        } else {
            RepairDirection::Import
        };
    }
    if divergence.content.as_ref().is_some_and(|c| c.mismatched > 0) {
        return if divergence.foreign_prefixes.is_empty() {
            RepairDirection::Export
        } else {
            RepairDirection::RenameOnImport
        };
    }
    match divergence.staleness {
        Staleness::ExportNewer { .. } => RepairDirection::Import,
        Staleness::StoreNewer { .. } => RepairDirection::Export,
        Staleness::NoExport if divergence.store_count > 0 => RepairDirection::Export,
        _ => RepairDirection::None,
    }
}

/// Compare the store with the export file at `export_path`.
///
/// Never fails: an unreadable side becomes a [`DegradedCheck`].
pub async fn compare(
    storage: &dyn IssueStorage,
    export_path: &Path,
    settings: &CheckerSettings,
) -> Divergence {
    let now = Utc::now();
    let mut degraded = Vec::new();

    let store: BTreeMap<IssueId, Issue> = match storage.export_all().await {
        Ok(issues) => issues
            .into_iter()
            .filter(|issue| sync::is_exportable(issue, settings.tombstone_ttl, now))
            .map(|issue| (issue.id.clone(), issue))
            .collect(),
        Err(e) => {
            warn!(error = %e, "Consistency check could not read the store");
            degraded.push(DegradedCheck {
                side: "store",
                message: e.to_string(),
                recovery: "check that no other process holds the store, then run `keel import` to rebuild it from the export".to_string(),
            });
            BTreeMap::new()
        }
    };
    let prefix = storage
        .get_config(ISSUE_PREFIX_KEY)
        .await
        .ok()
        .flatten();
    let last_import = storage
        .get_metadata(metadata_keys::LAST_IMPORT_TIME)
        .await
        .ok()
        .flatten();

    let export_exists = export_path.exists();
    let scan = if export_exists {
        match scan_export(export_path).await {
            Ok(scan) => scan,
            Err(e) => {
                warn!(path = %export_path.display(), error = %e, "Consistency check could not read the export");
                degraded.push(DegradedCheck {
                    side: "export",
                    message: e.to_string(),
                    recovery: "restore the file with `git checkout -- <export file>` or regenerate it with `keel export`".to_string(),
                });
                ExportScan::default()
            }
        }
    } else {
        ExportScan::default()
    };
    let export_mtime = if export_exists {
        sync::file_mtime(export_path).await.ok()
    } else {
        None
    };

    let foreign_prefixes: Vec<String> = match &prefix {
        Some(prefix) => sync::foreign_prefixes(scan.records.values(), prefix, &settings.prefix_variants)
            .into_iter()
            .collect(),
        None => Vec::new(),
    };

    let store_count = store.len();
    let export_count = scan.lines;
    let unique_export_ids = scan.records.len();
    let count_mismatch = store_count != export_count;
    let content = (!count_mismatch && degraded.is_empty())
        .then(|| compare_content(&store, &scan.records, settings));

    let mut divergence = Divergence {
        store_count,
        export_count,
        duplicate_ids: scan.duplicate_ids.into_iter().collect(),
        malformed_lines: scan.malformed,
        conflict_markers: scan.conflict_markers,
        count_mismatch,
        content,
        foreign_prefixes,
        staleness: staleness(last_import.as_deref(), export_mtime, settings.clock_skew),
        repair: RepairDirection::None,
        degraded,
    };
    if divergence.degraded.is_empty() {
        divergence.repair = repair_direction(&divergence, unique_export_ids);
    }
    debug!(
        store = divergence.store_count,
        export = divergence.export_count,
        repair = ?divergence.repair,
        "Consistency comparison done"
    );
    divergence
}

/// Advisory message when existing IDs look like a different scheme than the
/// configured one. Never a correctness gate.
#[must_use]
pub fn id_scheme_advisory(ids: &[&str], expect_hash: bool) -> Option<String> {
    if ids.is_empty() {
        return None;
    }
    match (expect_hash, crate::id_generation::looks_hash_based(ids)) {
        (true, false) => Some(
            "existing IDs look sequential but the hash scheme is configured; set ids.scheme: sequential to keep them consistent".to_string(),
        ),
        (false, true) => Some(
            "existing IDs look hash-based but the sequential scheme is configured; hash IDs avoid collisions across clones".to_string(),
        ),
        _ => None,
    }
}
