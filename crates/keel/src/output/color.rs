//! Color and styling helpers for CLI output.
//!
//! Semantic Color Theme:
//!   - Success/Pass:  green   (closed status, passing checks)
//!   - Warning:       yellow  (in_progress, P1, warnings, stale peers)
//!   - Error/Fail:    red     (blocked status, P0, failing checks)
//!   - Info/Reference: cyan   (issue IDs, peer names)
//!   - Muted:         dimmed  (field labels, tombstones, fixes)

use crate::doctor::CheckStatus;
use crate::domain::IssueStatus;
use colored::{ColoredString, Colorize};

use super::OutputConfig;

/// Style `text` with `style` unless colors are off.
fn paint(text: &str, config: &OutputConfig, style: impl FnOnce(&str) -> ColoredString) -> String {
    if config.use_colors {
        style(text).to_string()
    } else {
        text.to_string()
    }
}

/// Green.
pub fn success(text: &str, config: &OutputConfig) -> String {
    paint(text, config, |t| t.green())
}

/// Red.
pub fn error(text: &str, config: &OutputConfig) -> String {
    paint(text, config, |t| t.red())
}

/// Yellow.
pub fn warning(text: &str, config: &OutputConfig) -> String {
    paint(text, config, |t| t.yellow())
}

/// Cyan, for IDs and peer names.
pub fn info(text: &str, config: &OutputConfig) -> String {
    paint(text, config, |t| t.cyan())
}

pub(crate) fn colorize_status(status: &IssueStatus, config: &OutputConfig) -> String {
    let text = status.to_string();
    paint(&text, config, |t| match status {
        IssueStatus::Open => t.white(),
        IssueStatus::InProgress => t.yellow(),
        IssueStatus::Blocked => t.red(),
        IssueStatus::Closed => t.green(),
        IssueStatus::Tombstone => t.dimmed(),
        IssueStatus::Custom(_) => t.magenta(),
    })
}

/// `P0` is bold red, `P1` yellow, the rest plain.
pub(crate) fn colorize_priority(priority: u8, config: &OutputConfig) -> String {
    let text = format!("P{priority}");
    match priority {
        0 => paint(&text, config, |t| t.red().bold()),
        1 => warning(&text, config),
        _ => text,
    }
}

pub(crate) fn colorize_id(id: &str, config: &OutputConfig) -> String {
    info(id, config)
}

/// Fixed-width tag for a doctor check.
pub(crate) fn check_tag(status: CheckStatus, config: &OutputConfig) -> String {
    match status {
        CheckStatus::Pass => success("[PASS]", config),
        CheckStatus::Warn => warning("[WARN]", config),
        CheckStatus::Fail => error("[FAIL]", config),
    }
}

pub(crate) fn dimmed(text: &str, config: &OutputConfig) -> String {
    paint(text, config, |t| t.dimmed())
}

pub(crate) fn bold(text: &str, config: &OutputConfig) -> String {
    paint(text, config, |t| t.bold())
}
