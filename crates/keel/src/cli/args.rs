//! CLI argument structs for all commands.
//!
//! Each command has its own argument struct with clap derive attributes
//! for parsing and validation.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::types::{SortPolicyArg, StrategyArg};
use super::validators::{validate_days, validate_label, validate_prefix};
use crate::domain::{AssigneeFilter, IssueFilter, MAX_PRIORITY, MIN_PRIORITY};

/// Arguments for the `init` command
#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    /// Issue ID prefix (e.g., "proj" for "proj-a3f8")
    ///
    /// Must be 2-20 alphanumeric characters. This prefix is used for all
    /// issue IDs in this workspace.
    #[arg(short, long, value_parser = validate_prefix)]
    pub prefix: Option<String>,

    /// Suppress output messages
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the `check` command
#[derive(Parser, Debug, Clone, Default)]
pub struct CheckArgs {
    /// Skip the git checks (tracking, uncommitted changes, fingerprint)
    #[arg(long)]
    pub no_git: bool,

    /// Record the current repository fingerprint in the store
    #[arg(long)]
    pub record_fingerprint: bool,
}

/// Arguments for the `cycles` command
#[derive(Parser, Debug, Clone, Default)]
pub struct CyclesArgs {
    /// Longest cycle to search for, in edges (overrides graph.max_cycle_depth)
    #[arg(long)]
    pub max_depth: Option<usize>,
}

/// Filters shared by `ready` and `blocked`
#[derive(Parser, Debug, Clone, Default)]
pub struct WorkFilterArgs {
    /// Filter by assignee
    #[arg(short, long, conflicts_with = "unassigned")]
    pub assignee: Option<String>,

    /// Only unassigned issues
    #[arg(long)]
    pub unassigned: bool,

    /// Filter by priority
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(MIN_PRIORITY as i64..=MAX_PRIORITY as i64))]
    pub priority: Option<u8>,

    /// Filter by issue type (bug, task, gate, ...)
    #[arg(short = 't', long = "type")]
    pub issue_type: Option<String>,

    /// Require every one of these labels
    #[arg(short, long = "label", value_parser = validate_label)]
    pub labels: Vec<String>,

    /// Require at least one of these labels
    #[arg(long = "any-label", value_parser = validate_label)]
    pub any_labels: Vec<String>,
}

impl WorkFilterArgs {
    /// Domain filter for these arguments.
    pub fn to_filter(&self) -> IssueFilter {
        let assignee = if self.unassigned {
            Some(AssigneeFilter::Unassigned)
        } else {
            self.assignee.clone().map(AssigneeFilter::Is)
        };
        IssueFilter {
            priority: self.priority,
            issue_type: self.issue_type.clone().map(Into::into),
            assignee,
            labels_all: self.labels.clone(),
            labels_any: self.any_labels.clone(),
            ..IssueFilter::default()
        }
    }
}

/// Arguments for the `ready` command
#[derive(Parser, Debug, Clone)]
pub struct ReadyArgs {
    /// Issue filters
    #[command(flatten)]
    pub filter: WorkFilterArgs,

    /// Include pinned issues
    #[arg(long)]
    pub include_pinned: bool,

    /// Maximum number of issues to display
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,

    /// Sort policy
    #[arg(long, value_enum, default_value = "hybrid")]
    pub sort: SortPolicyArg,
}

/// Arguments for the `blocked` command
#[derive(Parser, Debug, Clone, Default)]
pub struct BlockedArgs {
    /// Issue filters
    #[command(flatten)]
    pub filter: WorkFilterArgs,
}

/// Arguments for the `epics` command
#[derive(Parser, Debug, Clone, Default)]
pub struct EpicsArgs {
    /// Only epics whose children are all closed
    #[arg(long)]
    pub eligible: bool,
}

/// Arguments for the `export` command
#[derive(Parser, Debug, Clone, Default)]
pub struct ExportArgs {
    /// Write here instead of the configured export file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the `import` command
#[derive(Parser, Debug, Clone, Default)]
pub struct ImportArgs {
    /// Read from here instead of the configured export file
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Rewrite foreign-prefixed IDs onto this workspace's prefix
    #[arg(long)]
    pub rename_prefix: bool,
}

/// Arguments for the `prune` command
#[derive(Parser, Debug, Clone, Default)]
pub struct PruneArgs {
    /// List what would be pruned without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Prune tombstones older than this many days (overrides tombstones.ttl_days)
    #[arg(long, value_parser = validate_days)]
    pub older_than: Option<i64>,
}

/// Arguments for the `federation` command
#[derive(Parser, Debug, Clone)]
pub struct FederationArgs {
    /// Federation subcommand
    #[command(subcommand)]
    pub action: FederationAction,
}

/// Federation actions
#[derive(Subcommand, Debug, Clone)]
pub enum FederationAction {
    /// Per-peer sync state, conflicts and mode mismatch
    Status,

    /// List replication peers
    Peers,

    /// List field-level conflicts
    Conflicts,

    /// Resolve every open conflict in bulk
    Resolve {
        /// Which side wins
        #[arg(short, long, value_enum)]
        strategy: StrategyArg,
    },
}
