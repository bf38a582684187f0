//! Command execution logic.
//!
//! This module contains the implementation of all CLI commands.

use anyhow::{Result, bail};
use chrono::Utc;

use super::args::{
    BlockedArgs, CheckArgs, CyclesArgs, EpicsArgs, ExportArgs, FederationAction, FederationArgs,
    ImportArgs, InitArgs, PruneArgs, ReadyArgs,
};
use crate::app::App;
use crate::consistency::{self, GitOracle};
use crate::doctor::{self, CheckStatus, DoctorContext};
use crate::federation::Coordinator;
use crate::output::{self, OutputConfig, OutputMode};
use crate::sync::{self, ImportOptions};
use crate::tombstone::{self, TombstonePolicy};

/// Execute the init command
pub async fn execute_init(args: &InitArgs) -> Result<()> {
    use crate::commands::init;

    let current_dir = std::env::current_dir()?;

    if !args.quiet {
        println!(
            "Initializing keel workspace{}...",
            args.prefix
                .as_ref()
                .map(|p| format!(" with prefix '{p}'"))
                .unwrap_or_default()
        );
    }

    let result = init::init(&current_dir, args.prefix.as_deref()).await?;

    if !args.quiet {
        println!("Initialized keel in {}", result.paths.keel_dir().display());
        println!("  Config: {}", result.config_file.display());
        println!("  Export: {}", result.export_file.display());
        println!("  Issue prefix: {}", result.prefix);
    }

    Ok(())
}

/// Execute the check command
pub async fn execute_check(app: &mut App, args: &CheckArgs, output_mode: OutputMode) -> Result<()> {
    let git = (!args.no_git).then(|| app.git());

    if args.record_fingerprint {
        let Some(git) = &git else {
            bail!("--record-fingerprint needs git; drop --no-git");
        };
        match consistency::record_fingerprint(app.storage_mut(), git).await? {
            Some(repo_id) => {
                app.save().await?;
                if output_mode == OutputMode::Text {
                    println!("Recorded repository fingerprint {repo_id}");
                }
            }
            None => eprintln!(
                "{}",
                output::warning("No origin remote; fingerprint not recorded", &OutputConfig::from_env())
            ),
        }
    }

    let ctx = DoctorContext {
        storage: app.storage(),
        config: app.config(),
        keel_dir: app.paths().keel_dir(),
        git: git.as_ref().map(|g| g as &dyn GitOracle),
    };
    let report = doctor::run(&ctx).await;
    output::print_report(&report, output_mode)?;

    if report.overall() == CheckStatus::Fail {
        bail!("workspace check failed");
    }
    Ok(())
}

/// Execute the cycles command
pub async fn execute_cycles(app: &App, args: &CyclesArgs, output_mode: OutputMode) -> Result<()> {
    let mut settings = app.config().graph_settings();
    if let Some(depth) = args.max_depth {
        settings.max_cycle_depth = depth;
    }
    let graph = app.storage().graph_snapshot(settings).await?;
    output::print_cycles(&graph.cycles(), output_mode)?;
    Ok(())
}

/// Execute the ready command
pub async fn execute_ready(app: &App, args: &ReadyArgs, output_mode: OutputMode) -> Result<()> {
    let mut filter = args.filter.to_filter();
    filter.include_pinned = args.include_pinned;
    filter.limit = Some(args.limit);

    let graph = app
        .storage()
        .graph_snapshot(app.config().graph_settings())
        .await?;
    let issues = graph.ready_work(&filter, args.sort.into());
    output::print_issues(&issues, output_mode)?;
    Ok(())
}

/// Execute the blocked command
pub async fn execute_blocked(app: &App, args: &BlockedArgs, output_mode: OutputMode) -> Result<()> {
    let graph = app
        .storage()
        .graph_snapshot(app.config().graph_settings())
        .await?;
    let blocked = graph.blocked_work(&args.filter.to_filter());
    output::print_blocked(&blocked, output_mode)?;
    Ok(())
}

/// Execute the epics command
pub async fn execute_epics(app: &App, args: &EpicsArgs, output_mode: OutputMode) -> Result<()> {
    let graph = app
        .storage()
        .graph_snapshot(app.config().graph_settings())
        .await?;
    let epics = if args.eligible {
        graph.closure_eligible()
    } else {
        graph.epic_closure_status()
    };
    output::print_epics(&epics, output_mode)?;
    Ok(())
}

/// Execute the export command
pub async fn execute_export(app: &mut App, args: &ExportArgs, output_mode: OutputMode) -> Result<()> {
    let path = args.output.clone().unwrap_or_else(|| app.export_file());
    let ttl = app.config().tombstone_policy().ttl;

    let report = sync::export(app.storage_mut(), &path, ttl).await?;
    app.save().await?;

    match output_mode {
        OutputMode::Json => output::print_json(&report)?,
        OutputMode::Text => {
            let config = OutputConfig::from_env();
            println!(
                "{}",
                output::success(
                    &format!("Exported {} issue(s) to {}", report.written, path.display()),
                    &config
                )
            );
            if report.skipped_ephemeral + report.skipped_expired > 0 {
                println!(
                    "  Skipped {} ephemeral, {} expired tombstone(s)",
                    report.skipped_ephemeral, report.skipped_expired
                );
            }
        }
    }
    Ok(())
}

/// Execute the import command
pub async fn execute_import(app: &mut App, args: &ImportArgs, output_mode: OutputMode) -> Result<()> {
    let path = args.input.clone().unwrap_or_else(|| app.export_file());
    let options = ImportOptions {
        rename_on_import: args.rename_prefix,
        prefix_variants: app.config().consistency.prefix_variants.clone(),
    };

    let report = sync::import(app.storage_mut(), &path, &options).await?;
    app.save().await?;

    match output_mode {
        OutputMode::Json => output::print_json(&report)?,
        OutputMode::Text => {
            let config = OutputConfig::from_env();
            println!(
                "{}",
                output::success(
                    &format!(
                        "Imported {}: {} created, {} updated, {} unchanged",
                        path.display(),
                        report.created,
                        report.updated,
                        report.unchanged
                    ),
                    &config
                )
            );
            if !report.renamed_prefixes.is_empty() {
                println!("  Renamed prefixes: {}", report.renamed_prefixes.join(", "));
            }
            if report.kept_tombstoned > 0 {
                println!("  Kept {} local tombstone(s)", report.kept_tombstoned);
            }
            if report.malformed_lines > 0 {
                println!(
                    "{}",
                    output::warning(
                        &format!("  Skipped {} malformed line(s)", report.malformed_lines),
                        &config
                    )
                );
            }
            for (id, reason) in &report.rejected {
                println!("{}", output::error(&format!("  Rejected {id}: {reason}"), &config));
            }
        }
    }
    Ok(())
}

/// Execute the prune command
pub async fn execute_prune(app: &mut App, args: &PruneArgs, output_mode: OutputMode) -> Result<()> {
    let configured = &app.config().tombstones;
    let policy = TombstonePolicy::from_days(
        args.older_than.unwrap_or(configured.ttl_days),
        configured.warn_days,
    );
    let now = Utc::now();

    if args.dry_run {
        let summary = tombstone::summarize(app.storage(), &policy, now).await?;
        match output_mode {
            OutputMode::Json => output::print_json(&summary)?,
            OutputMode::Text => {
                if summary.expired.is_empty() {
                    println!("No expired tombstones ({} total).", summary.total);
                } else {
                    println!("Would prune {} tombstone(s):", summary.expired.len());
                    for id in &summary.expired {
                        println!("  {id}");
                    }
                }
            }
        }
        return Ok(());
    }

    let export_file = app.export_file();
    let report = tombstone::prune(app.storage_mut(), Some(&export_file), policy.ttl, now).await?;
    app.save().await?;

    match output_mode {
        OutputMode::Json => output::print_json(&report)?,
        OutputMode::Text => {
            println!(
                "{}",
                output::success(
                    &format!("Pruned {} tombstone(s)", report.count()),
                    &OutputConfig::from_env()
                )
            );
            if report.export_lines_removed > 0 {
                println!(
                    "  Removed {} line(s) from {}",
                    report.export_lines_removed,
                    export_file.display()
                );
            }
        }
    }
    Ok(())
}

/// Execute the migrate-deletions command
pub async fn execute_migrate_deletions(app: &mut App, output_mode: OutputMode) -> Result<()> {
    let keel_dir = app.paths().keel_dir().to_path_buf();
    let report = tombstone::migrate_legacy_manifest(app.storage_mut(), &keel_dir).await?;

    match output_mode {
        OutputMode::Json => output::print_json(&report)?,
        OutputMode::Text => {
            if report.already_migrated {
                println!("Deletion manifest was already migrated.");
            } else if let Some(moved) = &report.migrated_to {
                println!(
                    "Migrated {} deletion(s) ({} stub(s)); manifest moved to {}",
                    report.count(),
                    report.stubs_created,
                    moved.display()
                );
            } else {
                println!("No deletion manifest found.");
            }
            if report.malformed_lines > 0 {
                println!("  Skipped {} malformed line(s)", report.malformed_lines);
            }
        }
    }
    Ok(())
}

/// Execute the federation command
pub async fn execute_federation(
    app: &App,
    args: &FederationArgs,
    output_mode: OutputMode,
) -> Result<()> {
    let coordinator = Coordinator::for_storage(app.storage(), app.config().federation_settings());

    match &args.action {
        FederationAction::Status => {
            output::print_federation(&coordinator.status().await, output_mode)?;
        }
        FederationAction::Peers => {
            let peers = coordinator.list_peers().await?;
            match output_mode {
                OutputMode::Json => output::print_json(&peers)?,
                OutputMode::Text if peers.is_empty() => println!("No replication peers."),
                OutputMode::Text => {
                    for peer in &peers {
                        println!("{:<12} {}", peer.name, peer.endpoint);
                    }
                }
            }
        }
        FederationAction::Conflicts => {
            let conflicts = coordinator.conflicts().await?;
            match output_mode {
                OutputMode::Json => output::print_json(&conflicts)?,
                OutputMode::Text if conflicts.is_empty() => println!("No conflicts."),
                OutputMode::Text => {
                    for conflict in &conflicts {
                        println!("{}  {}  ({})", conflict.issue_id, conflict.field, conflict.peer);
                    }
                }
            }
        }
        FederationAction::Resolve { strategy } => {
            let strategy = (*strategy).into();
            let resolved = coordinator.resolve(strategy).await?;
            match output_mode {
                OutputMode::Json => output::print_json(&serde_json::json!({
                    "strategy": strategy,
                    "resolved": resolved,
                }))?,
                OutputMode::Text => println!("Resolved {resolved} conflict(s)"),
            }
        }
    }
    Ok(())
}
