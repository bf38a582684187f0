//! Workspace health report.
//!
//! Runs every diagnostic the engines offer and turns each into a
//! pass/warn/fail line. Nothing here repairs anything: each non-passing
//! check names the command that would.

use crate::config::KeelConfig;
use crate::consistency::{
    self, FingerprintStatus, GitOracle, RepairDirection, Staleness, check_fingerprint,
    find_duplicates, git_status, id_scheme_advisory,
};
use crate::federation::{Coordinator, PeerState};
use crate::graph::IssueGraph;
use crate::id_generation::IdScheme;
use crate::storage::IssueStorage;
use crate::sync::validate_export_target;
use crate::tombstone::{self, LEGACY_MANIFEST, MIGRATED_MANIFEST};
use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Severity of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Nothing to do
    Pass,
    /// Worth fixing, nothing is lost yet
    Warn,
    /// Data is wrong or at risk
    Fail,
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    /// Short check name
    pub name: &'static str,
    /// Severity
    pub status: CheckStatus,
    /// What was found
    pub message: String,
    /// Command or action that fixes it; always set unless passing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl CheckResult {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Pass,
            message: message.into(),
            fix: None,
        }
    }

    fn warn(name: &'static str, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Warn,
            message: message.into(),
            fix: Some(fix.into()),
        }
    }

    fn fail(name: &'static str, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Fail,
            message: message.into(),
            fix: Some(fix.into()),
        }
    }
}

/// All check results, in the order they ran.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DoctorReport {
    /// Individual checks
    pub checks: Vec<CheckResult>,
}

impl DoctorReport {
    /// Worst status across all checks.
    #[must_use]
    pub fn overall(&self) -> CheckStatus {
        self.checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(CheckStatus::Pass)
    }

    /// Look up a check by name.
    #[must_use]
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// What the doctor inspects.
pub struct DoctorContext<'a> {
    /// The open store
    pub storage: &'a dyn IssueStorage,
    /// Loaded configuration
    pub config: &'a KeelConfig,
    /// Resolved `.keel/` directory
    pub keel_dir: &'a Path,
    /// Git oracle; git checks are skipped without one
    pub git: Option<&'a dyn GitOracle>,
}

fn join_ids<T: std::fmt::Display>(ids: impl IntoIterator<Item = T>) -> String {
    ids.into_iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run every check.
pub async fn run(ctx: &DoctorContext<'_>) -> DoctorReport {
    let mut report = DoctorReport::default();
    let export_file = ctx.config.export_file(ctx.keel_dir);

    report.checks.push(check_export_target(&export_file));
    report.checks.extend(check_consistency(ctx, &export_file).await);

    match ctx.storage.export_all().await {
        Ok(issues) => {
            let ids: Vec<&str> = issues.iter().map(|i| i.id.as_str()).collect();
            report.checks.push(
                match id_scheme_advisory(&ids, ctx.config.ids.scheme == IdScheme::Hash) {
                    Some(advice) => {
                        CheckResult::warn("id-scheme", advice, "edit ids.scheme in .keel/config.yaml")
                    }
                    None => CheckResult::pass("id-scheme", "IDs match the configured scheme"),
                },
            );
            report.checks.push(check_duplicates(&issues));
            let graph = IssueGraph::new(issues, ctx.config.graph_settings());
            report.checks.extend(check_graph(&graph));
        }
        Err(e) => report.checks.push(CheckResult::fail(
            "store",
            format!("cannot read the store: {e}"),
            "rebuild the store from the export with `keel import`",
        )),
    }

    report.checks.push(check_tombstones(ctx).await);
    report.checks.push(check_legacy_manifest(ctx.keel_dir));

    if let Some(git) = ctx.git {
        report.checks.push(check_fingerprint_status(ctx.storage, git).await);
        report.checks.push(check_git(git, &export_file).await);
    }

    report.checks.extend(check_federation(ctx).await);
    debug!(overall = ?report.overall(), checks = report.checks.len(), "Doctor finished");
    report
}

fn check_export_target(export_file: &Path) -> CheckResult {
    match validate_export_target(export_file) {
        Ok(()) => CheckResult::pass("export-target", format!("exporting to {}", export_file.display())),
        Err(e) => CheckResult::fail(
            "export-target",
            e.to_string(),
            "set storage.export_file to issues.jsonl in .keel/config.yaml",
        ),
    }
}

async fn check_consistency(ctx: &DoctorContext<'_>, export_file: &Path) -> Vec<CheckResult> {
    let divergence =
        consistency::compare(ctx.storage, export_file, &ctx.config.checker_settings()).await;
    let mut checks = Vec::new();

    for degraded in &divergence.degraded {
        checks.push(CheckResult::warn(
            "consistency",
            format!("{} unreadable: {}", degraded.side, degraded.message),
            degraded.recovery.clone(),
        ));
    }
    if !divergence.conflict_markers.is_empty() {
        checks.push(CheckResult::fail(
            "merge-conflict",
            format!(
                "export file has git conflict markers at lines {}",
                join_ids(&divergence.conflict_markers)
            ),
            "resolve the conflict in the export file, then run `keel import`",
        ));
    }
    if !divergence.duplicate_ids.is_empty() {
        checks.push(CheckResult::warn(
            "export-duplicates",
            format!(
                "export repeats records for {}",
                join_ids(&divergence.duplicate_ids)
            ),
            "keel export",
        ));
    }
    if divergence.malformed_lines > 0 {
        checks.push(CheckResult::warn(
            "export-lines",
            format!("{} export lines could not be decoded", divergence.malformed_lines),
            "keel export",
        ));
    }
    if !divergence.foreign_prefixes.is_empty() {
        checks.push(CheckResult::warn(
            "prefixes",
            format!(
                "export holds foreign prefixes: {}",
                divergence.foreign_prefixes.join(", ")
            ),
            "keel import --rename-prefix",
        ));
    }

    let fix = divergence.repair.command().unwrap_or("keel export");
    if divergence.count_mismatch {
        checks.push(CheckResult::warn(
            "consistency",
            format!(
                "store has {} issues, export has {}",
                divergence.store_count, divergence.export_count
            ),
            fix,
        ));
    } else if let Some(content) = divergence.content.as_ref().filter(|c| c.mismatched > 0) {
        let fields = content
            .examples
            .iter()
            .map(|m| format!("{} ({})", m.id, m.field))
            .collect::<Vec<_>>()
            .join(", ");
        checks.push(CheckResult::warn(
            "consistency",
            format!(
                "{} of {} sampled issues differ from the export: {fields}",
                content.mismatched, content.sampled
            ),
            fix,
        ));
    } else if divergence.repair != RepairDirection::None {
        let message = match divergence.staleness {
            Staleness::ExportNewer { seconds } => {
                format!("export file changed {seconds}s after the last import")
            }
            Staleness::StoreNewer { seconds } => {
                format!("export file is {seconds}s older than the store expects")
            }
            Staleness::NoExport => "export file is missing".to_string(),
            _ => "store and export are out of step".to_string(),
        };
        checks.push(CheckResult::warn("sync", message, fix));
    } else if divergence.degraded.is_empty() {
        checks.push(CheckResult::pass(
            "consistency",
            format!("{} issues in store and export", divergence.store_count),
        ));
    }
    checks
}

fn check_duplicates(issues: &[crate::domain::Issue]) -> CheckResult {
    let groups = find_duplicates(issues);
    if groups.is_empty() {
        return CheckResult::pass("duplicates", "no duplicate issues");
    }
    let extras: usize = groups.iter().map(|g| g.extras()).sum();
    let detail = groups
        .iter()
        .map(|g| format!("{} <- {}", g.canonical, join_ids(g.ids.iter().filter(|id| **id != g.canonical))))
        .collect::<Vec<_>>()
        .join("; ");
    CheckResult::warn(
        "duplicates",
        format!("{extras} duplicate issues in {} groups", groups.len()),
        format!("close the copies in favour of the oldest issue: {detail}"),
    )
}

fn check_graph(graph: &IssueGraph) -> Vec<CheckResult> {
    let mut checks = Vec::new();

    let cycles = graph.cycles();
    checks.push(if cycles.is_empty() {
        CheckResult::pass("cycles", "blocking dependencies form no cycles")
    } else {
        let shown = cycles
            .iter()
            .map(|c| join_ids(&c.path).replace(", ", " -> "))
            .collect::<Vec<_>>()
            .join("; ");
        CheckResult::fail(
            "cycles",
            format!("{} dependency cycles: {shown}", cycles.len()),
            "remove one blocking dependency from each cycle (see `keel cycles`)",
        )
    });

    let orphans = graph.orphaned_dependencies();
    checks.push(if orphans.is_empty() {
        CheckResult::pass("orphans", "every dependency target exists")
    } else {
        CheckResult::warn(
            "orphans",
            format!(
                "{} dependencies point at missing issues: {}",
                orphans.len(),
                join_ids(orphans.iter().map(|o| format!("{} -> {}", o.issue_id, o.depends_on_id)))
            ),
            "remove the dangling dependencies or re-import the missing issues with `keel import`",
        )
    });

    let anti = graph.hierarchy_anti_patterns();
    if !anti.is_empty() {
        checks.push(CheckResult::warn(
            "hierarchy",
            format!(
                "{} children block on their own ancestors: {}",
                anti.len(),
                join_ids(anti.iter().map(|a| format!("{} -> {}", a.child, a.ancestor)))
            ),
            "replace those blocking edges with parent-child links",
        ));
    }

    let eligible = graph.closure_eligible();
    if !eligible.is_empty() {
        checks.push(CheckResult::warn(
            "epics",
            format!(
                "{} epics have every child closed: {}",
                eligible.len(),
                join_ids(eligible.iter().map(|e| &e.epic_id))
            ),
            "close them (see `keel epics --eligible`)",
        ));
    }
    checks
}

async fn check_tombstones(ctx: &DoctorContext<'_>) -> CheckResult {
    let policy = ctx.config.tombstone_policy();
    match tombstone::summarize(ctx.storage, &policy, Utc::now()).await {
        Ok(summary) if !summary.expired.is_empty() => CheckResult::warn(
            "tombstones",
            format!(
                "{} of {} tombstones are past the {}-day TTL",
                summary.expired.len(),
                summary.total,
                ctx.config.tombstones.ttl_days
            ),
            "keel prune",
        ),
        Ok(summary) if !summary.expiring_soon.is_empty() => CheckResult::warn(
            "tombstones",
            format!(
                "{} tombstones expire within {} days: {}",
                summary.expiring_soon.len(),
                ctx.config.tombstones.warn_days,
                join_ids(&summary.expiring_soon)
            ),
            "keel export before they expire so peers see the deletions",
        ),
        Ok(summary) => CheckResult::pass("tombstones", format!("{} tombstones retained", summary.total)),
        Err(e) => CheckResult::warn(
            "tombstones",
            format!("cannot read tombstones: {e}"),
            "keel import",
        ),
    }
}

fn check_legacy_manifest(keel_dir: &Path) -> CheckResult {
    let manifest = keel_dir.join(LEGACY_MANIFEST);
    let migrated = keel_dir.join(MIGRATED_MANIFEST);
    match (manifest.exists(), migrated.exists()) {
        (true, false) => CheckResult::warn(
            "deletions",
            format!("{} has not been migrated to tombstones", manifest.display()),
            "keel migrate-deletions",
        ),
        (true, true) => CheckResult::warn(
            "deletions",
            format!("{} reappeared after migration and is ignored", manifest.display()),
            format!("delete {}", manifest.display()),
        ),
        _ => CheckResult::pass("deletions", "no legacy deletion manifest"),
    }
}

async fn check_fingerprint_status(storage: &dyn IssueStorage, git: &dyn GitOracle) -> CheckResult {
    match check_fingerprint(storage, git).await {
        Ok(FingerprintStatus::Match) => CheckResult::pass("fingerprint", "store belongs to this repository"),
        Ok(FingerprintStatus::NoRemote) => {
            CheckResult::pass("fingerprint", "no origin remote; fingerprint not checked")
        }
        Ok(FingerprintStatus::Missing { current }) => CheckResult::warn(
            "fingerprint",
            format!("store has no repository fingerprint (would be {current})"),
            "keel check --record-fingerprint",
        ),
        Ok(FingerprintStatus::Mismatch { stored, current }) => CheckResult::fail(
            "fingerprint",
            format!("store was created for repository {stored}, this is {current}"),
            "delete the copied store and rebuild it with `keel import`, or run `keel check --record-fingerprint` if the remote moved",
        ),
        Err(e) => CheckResult::warn(
            "fingerprint",
            format!("cannot check fingerprint: {e}"),
            "make sure git is installed and the repository is readable",
        ),
    }
}

async fn check_git(git: &dyn GitOracle, export_file: &Path) -> CheckResult {
    match git_status(git, export_file).await {
        Ok(status) if !status.tracked => CheckResult::warn(
            "git",
            format!("{} is not tracked by git", export_file.display()),
            format!("git add {}", export_file.display()),
        ),
        Ok(status) if status.dirty || !status.uncommitted.is_empty() => CheckResult::warn(
            "git",
            format!("{} has uncommitted changes", export_file.display()),
            format!("git commit {}", export_file.display()),
        ),
        Ok(_) => CheckResult::pass("git", "export file committed"),
        Err(e) => CheckResult::warn(
            "git",
            format!("git unavailable: {e}"),
            "make sure git is installed and the workspace is a repository",
        ),
    }
}

async fn check_federation(ctx: &DoctorContext<'_>) -> Vec<CheckResult> {
    let coordinator = Coordinator::for_storage(ctx.storage, ctx.config.federation_settings());
    let status = coordinator.status().await;
    if !status.applicable {
        return vec![CheckResult::pass(
            "federation",
            "not applicable to this backend",
        )];
    }

    let mut checks = Vec::new();
    if status.mode_mismatch {
        checks.push(CheckResult::fail(
            "federation-mode",
            "peers are configured but no replication server is reachable",
            "start the replication server or remove the peers",
        ));
    }
    for peer in &status.peers {
        let name = &peer.remote.name;
        checks.push(match &peer.state {
            PeerState::Ok => CheckResult::pass("federation-peer", format!("{name}: in sync")),
            PeerState::OkStale { behind } => CheckResult::pass(
                "federation-peer",
                format!("{name}: {behind} commits to pull"),
            ),
            PeerState::Conflicted { count } => CheckResult::warn(
                "federation-peer",
                format!("{name}: {count} conflicting fields"),
                "keel federation resolve --strategy ours|theirs",
            ),
            PeerState::Unreachable { reason } => CheckResult::warn(
                "federation-peer",
                format!("{name}: unreachable ({reason})"),
                format!("check connectivity to {}", peer.remote.endpoint),
            ),
        });
    }
    for error in &status.errors {
        checks.push(CheckResult::warn(
            "federation",
            error.clone(),
            "retry with `keel federation status`",
        ));
    }
    if checks.is_empty() {
        checks.push(CheckResult::pass("federation", "no replication peers"));
    }
    checks
}
