//! CLI argument parsing and command dispatch.
//!
//! A thin clap front over the library: each subcommand opens the workspace,
//! calls one library operation and prints the result.
//!
//! # Commands
//!
//! - `init`: Initialize a new keel workspace
//! - `check`: Run every workspace health check
//! - `cycles`: List dependency cycles
//! - `ready` / `blocked`: Work that can or cannot start
//! - `epics`: Epic progress and closure eligibility
//! - `export` / `import`: Move records between the store and the JSONL export
//! - `prune` / `migrate-deletions`: Tombstone maintenance
//! - `federation`: Peer status and conflict resolution
//!
//! # Global Flags
//!
//! - `--json`: Output in JSON format (applies to all commands)
//!
//! # Example
//!
//! ```bash
//! keel check
//! keel ready --sort priority --label backend
//! keel prune --dry-run --older-than 14
//! keel federation resolve --strategy theirs
//! ```

mod args;
mod execute;
mod types;
mod validators;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::App;
use crate::output::OutputMode;
use crate::storage::BackendRegistry;

pub use args::{
    BlockedArgs, CheckArgs, CyclesArgs, EpicsArgs, ExportArgs, FederationAction, FederationArgs,
    ImportArgs, InitArgs, PruneArgs, ReadyArgs, WorkFilterArgs,
};
pub use types::{SortPolicyArg, StrategyArg};
pub use validators::{validate_days, validate_label, validate_prefix};

/// Keel - a local-first issue store
///
/// Issues live in a local store and are exported to `.keel/issues.jsonl` for
/// version control. `keel check` tells you when the two drift apart.
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output in JSON format for programmatic use
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Initialize a new keel workspace
    ///
    /// Creates `.keel/` with a configuration file, an empty export file and a
    /// `.gitignore` for local store files.
    Init(InitArgs),

    /// Check workspace health
    ///
    /// Compares the store with the export file, inspects the dependency graph,
    /// tombstones, git state and federation. Exits non-zero on failures.
    Check(CheckArgs),

    /// List dependency cycles
    Cycles(CyclesArgs),

    /// Show issues ready to work on
    ///
    /// Lists open issues with no open blockers.
    Ready(ReadyArgs),

    /// Show blocked issues
    ///
    /// Lists issues that are blocked by dependencies, along with their blockers.
    Blocked(BlockedArgs),

    /// Show epic progress
    Epics(EpicsArgs),

    /// Write the store to the JSONL export file
    Export(ExportArgs),

    /// Merge the JSONL export file into the store
    Import(ImportArgs),

    /// Permanently remove expired tombstones
    Prune(PruneArgs),

    /// Fold the legacy deletions manifest into tombstones
    MigrateDeletions,

    /// Replication peers and conflicts
    Federation(FederationArgs),
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }

    /// Parse CLI arguments from an iterator (for testing)
    pub fn try_parse_from<I, T>(iter: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(iter)
    }

    /// Execute the CLI command
    pub async fn execute(&self) -> Result<()> {
        let output_mode = if self.json {
            OutputMode::Json
        } else {
            OutputMode::Text
        };

        let Some(command) = &self.command else {
            println!("keel - local-first issue store");
            println!();
            println!("Run 'keel --help' for usage information.");
            return Ok(());
        };

        if let Commands::Init(args) = command {
            return execute::execute_init(args).await;
        }

        let registry = BackendRegistry::with_defaults();
        let mut app = App::open(&std::env::current_dir()?, &registry).await?;

        match command {
            Commands::Init(_) => Ok(()),
            Commands::Check(args) => execute::execute_check(&mut app, args, output_mode).await,
            Commands::Cycles(args) => execute::execute_cycles(&app, args, output_mode).await,
            Commands::Ready(args) => execute::execute_ready(&app, args, output_mode).await,
            Commands::Blocked(args) => execute::execute_blocked(&app, args, output_mode).await,
            Commands::Epics(args) => execute::execute_epics(&app, args, output_mode).await,
            Commands::Export(args) => execute::execute_export(&mut app, args, output_mode).await,
            Commands::Import(args) => execute::execute_import(&mut app, args, output_mode).await,
            Commands::Prune(args) => execute::execute_prune(&mut app, args, output_mode).await,
            Commands::MigrateDeletions => {
                execute::execute_migrate_deletions(&mut app, output_mode).await
            }
            Commands::Federation(args) => {
                execute::execute_federation(&app, args, output_mode).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_no_command() {
        let cli = Cli::try_parse_from(["keel"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.json);
    }

    #[test]
    fn test_global_json_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["keel", "check", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Some(Commands::Check(_))));
    }

    #[test]
    fn test_init_with_prefix() {
        let cli = Cli::try_parse_from(["keel", "init", "--prefix", "kl"]).unwrap();
        match cli.command {
            Some(Commands::Init(args)) => assert_eq!(args.prefix.as_deref(), Some("kl")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[rstest]
    #[case("a")]
    #[case("has-dash")]
    fn test_init_rejects_bad_prefix(#[case] prefix: &str) {
        assert!(Cli::try_parse_from(["keel", "init", "--prefix", prefix]).is_err());
    }

    #[test]
    fn test_check_flags() {
        let cli = Cli::try_parse_from(["keel", "check", "--no-git", "--record-fingerprint"]).unwrap();
        match cli.command {
            Some(Commands::Check(args)) => {
                assert!(args.no_git);
                assert!(args.record_fingerprint);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_ready_defaults() {
        let cli = Cli::try_parse_from(["keel", "ready"]).unwrap();
        match cli.command {
            Some(Commands::Ready(args)) => {
                assert_eq!(args.limit, 10);
                assert_eq!(args.sort, SortPolicyArg::Hybrid);
                assert!(!args.include_pinned);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_ready_filters() {
        let cli = Cli::try_parse_from([
            "keel", "ready", "--type", "gate", "--label", "infra", "--any-label", "ops",
            "--sort", "oldest", "-p", "1",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Ready(args)) => {
                assert_eq!(args.filter.issue_type.as_deref(), Some("gate"));
                assert_eq!(args.filter.labels, vec!["infra"]);
                assert_eq!(args.filter.any_labels, vec!["ops"]);
                assert_eq!(args.filter.priority, Some(1));
                assert_eq!(args.sort, SortPolicyArg::Oldest);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_priority_out_of_range() {
        assert!(Cli::try_parse_from(["keel", "blocked", "--priority", "5"]).is_err());
    }

    #[test]
    fn test_assignee_conflicts_with_unassigned() {
        assert!(
            Cli::try_parse_from(["keel", "ready", "--assignee", "sam", "--unassigned"]).is_err()
        );
    }

    #[test]
    fn test_prune_older_than() {
        let cli = Cli::try_parse_from(["keel", "prune", "--dry-run", "--older-than", "14"]).unwrap();
        match cli.command {
            Some(Commands::Prune(args)) => {
                assert!(args.dry_run);
                assert_eq!(args.older_than, Some(14));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["keel", "prune", "--older-than", "0"]).is_err());
    }

    #[test]
    fn test_import_rename_prefix() {
        let cli = Cli::try_parse_from(["keel", "import", "--rename-prefix"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Import(ImportArgs {
                rename_prefix: true,
                ..
            }))
        ));
    }

    #[test]
    fn test_migrate_deletions() {
        let cli = Cli::try_parse_from(["keel", "migrate-deletions"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::MigrateDeletions)));
    }

    #[rstest]
    #[case("ours", StrategyArg::Ours)]
    #[case("theirs", StrategyArg::Theirs)]
    fn test_federation_resolve(#[case] value: &str, #[case] expected: StrategyArg) {
        let cli =
            Cli::try_parse_from(["keel", "federation", "resolve", "--strategy", value]).unwrap();
        match cli.command {
            Some(Commands::Federation(FederationArgs {
                action: FederationAction::Resolve { strategy },
            })) => assert_eq!(strategy, expected),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_federation_requires_action() {
        assert!(Cli::try_parse_from(["keel", "federation"]).is_err());
        assert!(Cli::try_parse_from(["keel", "federation", "resolve"]).is_err());
    }
}
