//! Output formatting for CLI commands.
//!
//! Every printer takes an [`OutputMode`]: text for people, pretty JSON
//! (`--json`) for scripts. Text printers write to any `Write` so tests can
//! capture them.

pub mod color;

use crate::doctor::DoctorReport;
use crate::domain::Issue;
use crate::federation::{FederationReport, PeerState};
use crate::graph::{BlockedIssue, Cycle, EpicStatus};
use serde::Serialize;
use std::env;
use std::io::{self, Write};

pub use color::{error, info, success, warning};

use color::{bold, check_tag, colorize_id, colorize_priority, colorize_status, dimmed};

/// Output format mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable text format
    Text,
    /// JSON format for programmatic use
    Json,
}

/// Text styling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    /// Whether to use colors in output.
    pub use_colors: bool,
}

impl OutputConfig {
    /// Read `NO_COLOR` (any value disables colors) and `KEEL_COLOR`
    /// (`0` or `false` disables colors).
    pub fn from_env() -> Self {
        let use_colors = env::var("NO_COLOR").is_err()
            && env::var("KEEL_COLOR")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true);
        Self { use_colors }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { use_colors: true }
    }
}

/// Print a JSON-formatted result for any serializable value
pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(handle, "{json}")
}

/// Print `value` as JSON, or run `text` against stdout.
fn emit<T, F>(value: &T, mode: OutputMode, text: F) -> io::Result<()>
where
    T: Serialize + ?Sized,
    F: FnOnce(&mut dyn Write, &OutputConfig) -> io::Result<()>,
{
    match mode {
        OutputMode::Json => print_json(&value),
        OutputMode::Text => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            text(&mut handle, &OutputConfig::from_env())
        }
    }
}

/// Print a list of issues
pub fn print_issues(issues: &[Issue], mode: OutputMode) -> io::Result<()> {
    emit(issues, mode, |w, config| write_issues(w, issues, config))
}

/// Print blocked issues with their blockers
pub fn print_blocked(blocked: &[BlockedIssue], mode: OutputMode) -> io::Result<()> {
    emit(blocked, mode, |w, config| write_blocked(w, blocked, config))
}

/// Print dependency cycles
pub fn print_cycles(cycles: &[Cycle], mode: OutputMode) -> io::Result<()> {
    emit(cycles, mode, |w, config| write_cycles(w, cycles, config))
}

/// Print epic progress
pub fn print_epics(epics: &[EpicStatus], mode: OutputMode) -> io::Result<()> {
    emit(epics, mode, |w, config| write_epics(w, epics, config))
}

/// Print a doctor report
pub fn print_report(report: &DoctorReport, mode: OutputMode) -> io::Result<()> {
    emit(report, mode, |w, config| write_report(w, report, config))
}

/// Print federation status
pub fn print_federation(report: &FederationReport, mode: OutputMode) -> io::Result<()> {
    emit(report, mode, |w, config| write_federation(w, report, config))
}

// ============================================================================
// Text Formatting
// ============================================================================

fn write_issue_line(w: &mut dyn Write, issue: &Issue, config: &OutputConfig) -> io::Result<()> {
    writeln!(
        w,
        "{}  {}  {}  {}",
        colorize_id(issue.id.as_str(), config),
        colorize_priority(issue.priority, config),
        colorize_status(&issue.status, config),
        issue.title
    )
}

fn write_issues(w: &mut dyn Write, issues: &[Issue], config: &OutputConfig) -> io::Result<()> {
    if issues.is_empty() {
        return writeln!(w, "No issues found.");
    }
    writeln!(w, "Found {} issue(s):", issues.len())?;
    writeln!(w)?;
    for issue in issues {
        write_issue_line(w, issue, config)?;
    }
    Ok(())
}

fn write_blocked(
    w: &mut dyn Write,
    blocked: &[BlockedIssue],
    config: &OutputConfig,
) -> io::Result<()> {
    if blocked.is_empty() {
        return writeln!(w, "No blocked issues found.");
    }
    writeln!(w, "Found {} blocked issue(s):", blocked.len())?;
    writeln!(w)?;
    for entry in blocked {
        write_issue_line(w, &entry.issue, config)?;
        if entry.open_blockers.is_empty() {
            writeln!(w, "  {} marked blocked", dimmed("Status:", config))?;
        } else {
            let blockers: Vec<String> = entry
                .open_blockers
                .iter()
                .map(|id| colorize_id(id.as_str(), config))
                .collect();
            writeln!(w, "  {} {}", dimmed("Blocked by:", config), blockers.join(", "))?;
        }
    }
    Ok(())
}

fn write_cycles(w: &mut dyn Write, cycles: &[Cycle], config: &OutputConfig) -> io::Result<()> {
    if cycles.is_empty() {
        return writeln!(w, "{}", success("No dependency cycles.", config));
    }
    writeln!(w, "{}", error(&format!("Found {} cycle(s):", cycles.len()), config))?;
    for cycle in cycles {
        let mut path: Vec<String> = cycle
            .path
            .iter()
            .map(|id| colorize_id(id.as_str(), config))
            .collect();
        if let Some(first) = path.first().cloned() {
            path.push(first);
        }
        writeln!(w, "  {}", path.join(" -> "))?;
    }
    Ok(())
}

fn write_epics(w: &mut dyn Write, epics: &[EpicStatus], config: &OutputConfig) -> io::Result<()> {
    if epics.is_empty() {
        return writeln!(w, "No open epics.");
    }
    for epic in epics {
        let progress = format!("{}/{}", epic.closed_children, epic.total_children);
        let progress = if epic.eligible_for_close {
            success(&format!("{progress} ready to close"), config)
        } else {
            progress
        };
        writeln!(
            w,
            "{}  {}  {}",
            colorize_id(epic.epic_id.as_str(), config),
            progress,
            epic.title
        )?;
    }
    Ok(())
}

fn write_report(w: &mut dyn Write, report: &DoctorReport, config: &OutputConfig) -> io::Result<()> {
    writeln!(w, "{}", bold("Workspace check", config))?;
    writeln!(w)?;
    for check in &report.checks {
        writeln!(
            w,
            "{} {:<16} {}",
            check_tag(check.status, config),
            check.name,
            check.message
        )?;
        if let Some(fix) = &check.fix {
            writeln!(w, "       {} {}", dimmed("Fix:", config), fix)?;
        }
    }
    writeln!(w)?;
    writeln!(w, "Result: {}", check_tag(report.overall(), config))
}

fn write_federation(
    w: &mut dyn Write,
    report: &FederationReport,
    config: &OutputConfig,
) -> io::Result<()> {
    if !report.applicable {
        return writeln!(w, "Federation is not applicable to this storage backend.");
    }
    if report.mode_mismatch {
        writeln!(
            w,
            "{}",
            error("Peers are configured but no replication server is reachable.", config)
        )?;
    }
    if report.peers.is_empty() {
        writeln!(w, "No replication peers.")?;
    }
    for peer in &report.peers {
        let state = match &peer.state {
            PeerState::Ok => success("ok", config),
            PeerState::OkStale { behind } => warning(&format!("ok, {behind} behind"), config),
            PeerState::Conflicted { count } => error(&format!("{count} conflicts"), config),
            PeerState::Unreachable { reason } => error(&format!("unreachable: {reason}"), config),
        };
        writeln!(
            w,
            "{:<12} {}  {}",
            peer.remote.name,
            state,
            dimmed(&peer.remote.endpoint, config)
        )?;
    }
    if !report.excluded.is_empty() {
        writeln!(
            w,
            "{} {}",
            dimmed("Not peers:", config),
            report.excluded.join(", ")
        )?;
    }
    for conflict in &report.conflicts {
        writeln!(
            w,
            "  {} {} ({})",
            colorize_id(conflict.issue_id.as_str(), config),
            conflict.field,
            conflict.peer
        )?;
    }
    for message in &report.errors {
        writeln!(w, "{}", warning(message, config))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doctor::{CheckResult, CheckStatus};
    use crate::domain::IssueId;
    use crate::domain::test_support::issue;
    use crate::federation::{PeerReport, Remote};

    fn plain() -> OutputConfig {
        OutputConfig { use_colors: false }
    }

    fn render(f: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_issue_list() {
        let out = render(|w| write_issues(w, &[issue("kl-1")], &plain()));
        assert!(out.contains("Found 1 issue(s)"));
        assert!(out.contains("kl-1"));
        assert!(render(|w| write_issues(w, &[], &plain())).contains("No issues found."));
    }

    #[test]
    fn test_cycle_is_closed_in_text() {
        let cycle = Cycle {
            path: vec![IssueId::new("kl-1"), IssueId::new("kl-2")],
        };
        let out = render(|w| write_cycles(w, &[cycle], &plain()));
        assert!(out.contains("kl-1 -> kl-2 -> kl-1"));
    }

    #[test]
    fn test_report_shows_fix_lines() {
        let report = DoctorReport {
            checks: vec![CheckResult {
                name: "tombstones",
                status: CheckStatus::Warn,
                message: "2 expired".to_string(),
                fix: Some("keel prune".to_string()),
            }],
        };
        let out = render(|w| write_report(w, &report, &plain()));
        assert!(out.contains("[WARN] tombstones"));
        assert!(out.contains("Fix: keel prune"));
        assert!(out.contains("Result: [WARN]"));
    }

    #[test]
    fn test_federation_peers() {
        let report = FederationReport {
            applicable: true,
            peers: vec![PeerReport {
                remote: Remote {
                    name: "east".to_string(),
                    endpoint: "http://east:50051".to_string(),
                },
                sync: None,
                state: PeerState::OkStale { behind: 3 },
            }],
            excluded: vec!["origin".to_string()],
            ..FederationReport::default()
        };
        let out = render(|w| write_federation(w, &report, &plain()));
        assert!(out.contains("ok, 3 behind"));
        assert!(out.contains("Not peers: origin"));

        let out = render(|w| write_federation(w, &FederationReport::default(), &plain()));
        assert!(out.contains("not applicable"));
    }
}
