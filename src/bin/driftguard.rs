//! # Driftguard CLI - Safe upgrades for generated files
//!
//! A command-line interface over the Driftguard engine.
//!
//! ## Features
//! - Install a package of files into a project and record their hashes
//! - Update to a new version without clobbering local edits
//! - Show which tracked files drifted
//! - Create, list, restore, and prune backups
//!
//! ## Usage
//! ```bash
//! # First install from a package directory
//! driftguard install --from ./package --package-version 1.0.0
//!
//! # Preview and apply an update
//! driftguard update --from ./package-v2 --package-version 2.0.0 --dry-run
//! driftguard update --from ./package-v2 --package-version 2.0.0
//!
//! # Show drift
//! driftguard status
//!
//! # Roll back to the newest backup
//! driftguard restore --latest
//! ```

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use driftguard::utils::format_bytes;
use driftguard::{
    hash_file, ApplyOptions, ApplyReport, DirectorySource, DriftStatus, DriftguardError, Engine,
    EngineBuilder, UpdateAction,
};
use humantime::format_duration;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Driftguard CLI - install and upgrade generated files without losing local edits
#[derive(Parser)]
#[command(name = "driftguard")]
#[command(version)]
#[command(about = "Install and upgrade generated files without losing local edits")]
#[command(long_about = None)]
struct Cli {
    /// Project root (defaults to current directory)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Glob pattern for user content that is never overwritten (repeatable)
    #[arg(short, long = "user-content", global = true)]
    user_content: Vec<String>,

    /// Glob pattern for content the engine may manage (repeatable)
    #[arg(long = "core-content", global = true)]
    core_content: Vec<String>,

    /// Skip fsync on writes
    #[arg(long, global = true)]
    no_sync: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// First install of a package directory
    Install {
        /// Package directory to install from
        #[arg(long)]
        from: PathBuf,

        /// Package version
        #[arg(long = "package-version")]
        package_version: String,

        /// Overwrite existing files that differ from the package
        #[arg(long)]
        force: bool,
    },

    /// Update to a new package version
    #[command(alias = "up")]
    Update {
        /// Package directory to update from
        #[arg(long)]
        from: PathBuf,

        /// Package version
        #[arg(long = "package-version")]
        package_version: String,

        /// Overwrite modified, deleted, and untracked files too
        #[arg(long)]
        force: bool,

        /// Do not back up tracked files first
        #[arg(long)]
        no_backup: bool,

        /// Show the plan without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show drift of tracked files
    #[command(alias = "st")]
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print content hashes of files
    Hash {
        /// Files to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Back up tracked files now
    Backup {
        /// Reason recorded in the manifest
        #[arg(short, long, default_value = "manual")]
        reason: String,
    },

    /// List backups, newest first
    #[command(alias = "ls")]
    Backups {
        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Restore files and metadata from a backup
    Restore {
        /// Backup name (directory under the backups directory) or path
        backup: Option<String>,

        /// Restore the newest backup
        #[arg(long, conflicts_with = "backup")]
        latest: bool,
    },

    /// Delete old backups
    Prune {
        /// Number of backups to keep
        #[arg(short, long, default_value_t = 5)]
        keep: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        match e.downcast_ref::<DriftguardError>() {
            Some(err) => {
                eprintln!("{}: {}", "Error".red().bold(), err.user_message());
                if err.leaves_unknown_state() {
                    eprintln!("{}", "Inspect these files before running again:".yellow().bold());
                    for path in err.affected_paths() {
                        eprintln!("  {}", path.display().to_string().yellow());
                    }
                }
            }
            None => eprintln!("{}: {:#}", "Error".red().bold(), e),
        }
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let root = cli.path.clone().unwrap_or_else(|| PathBuf::from("."));

    if let Commands::Hash { files } = &cli.command {
        return cmd_hash(files);
    }

    let engine = EngineBuilder::new()
        .user_content_patterns(cli.user_content)
        .core_content_patterns(cli.core_content)
        .sync_writes(!cli.no_sync)
        .build(&root)?;

    match cli.command {
        Commands::Install { from, package_version, force } => {
            cmd_install(&engine, from, package_version, force)
        }
        Commands::Update { from, package_version, force, no_backup, dry_run } => {
            let options = ApplyOptions { force, backup: !no_backup, dry_run };
            cmd_update(&engine, from, package_version, &options)
        }
        Commands::Status { json } => cmd_status(&engine, json),
        Commands::Backup { reason } => cmd_backup(&engine, &reason),
        Commands::Backups { limit } => cmd_backups(&engine, limit),
        Commands::Restore { backup, latest } => cmd_restore(&engine, backup, latest),
        Commands::Prune { keep } => cmd_prune(&engine, keep),
        Commands::Hash { .. } => Ok(()),
    }
}

/// Package directory as a content source, skipping its own tool directory
fn package_source(engine: &Engine, from: PathBuf, version: String) -> anyhow::Result<DirectorySource> {
    if !from.is_dir() {
        bail!("package directory {:?} does not exist", from);
    }
    Ok(DirectorySource::new(from, version).exclude(engine.config().tool_dir.clone()))
}

fn cmd_install(engine: &Engine, from: PathBuf, version: String, force: bool) -> anyhow::Result<()> {
    let source = package_source(engine, from, version)?;
    let report = engine.install(&source, force)?;

    print_plan(&report);
    println!(
        "{} Installed version {} ({} files written in {})",
        "✓".green().bold(),
        report.plan.to_version.cyan(),
        report.written(),
        format_duration(Duration::from_millis(report.duration_ms))
    );
    Ok(())
}

fn cmd_update(
    engine: &Engine,
    from: PathBuf,
    version: String,
    options: &ApplyOptions,
) -> anyhow::Result<()> {
    let source = package_source(engine, from, version)?;
    let report = engine.apply_update(&source, options)?;

    print_plan(&report);
    if report.dry_run {
        println!(
            "{} Dry run: {} files would be written, {} skipped",
            "i".blue().bold(),
            report.written(),
            report.skipped()
        );
        return Ok(());
    }

    if let Some(backup) = &report.backup {
        println!("  Backup: {}", backup.manifest.timestamp.dimmed());
        for failure in &backup.failures {
            println!("  {} not backed up: {} ({})", "!".yellow(), failure.path, failure.error);
        }
    }
    let bytes = report.transaction.as_ref().map(|t| t.bytes_written).unwrap_or(0);
    println!(
        "{} Updated {} -> {} ({} files, {} written, {} skipped, {})",
        "✓".green().bold(),
        report.plan.from_version.as_deref().unwrap_or("?"),
        report.plan.to_version.cyan(),
        report.written(),
        format_bytes(bytes),
        report.skipped(),
        format_duration(Duration::from_millis(report.duration_ms))
    );
    Ok(())
}

fn print_plan(report: &ApplyReport) {
    for entry in &report.plan.entries {
        let line = match entry.action {
            UpdateAction::Create => format!("  {} {}", "+".green(), entry.path.green()),
            UpdateAction::Overwrite => format!("  {} {}", "~".yellow(), entry.path.yellow()),
            UpdateAction::Adopt => format!("  {} {} (already current)", "=".blue(), entry.path),
            UpdateAction::UpToDate => continue,
            UpdateAction::Skip { reason } => {
                format!("  {} {} ({})", "-".dimmed(), entry.path.dimmed(), reason.describe())
            }
        };
        println!("{}", line);
    }
}

fn cmd_status(engine: &Engine, json: bool) -> anyhow::Result<()> {
    let status = engine.status()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "Driftguard Status".bold().underline());
    println!("  Installed version: {}", status.installed_version.cyan());
    println!("  Installed at: {}", status.installed_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(applied) = status.last_update_applied {
        println!("  Last update: {}", applied.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("  Tracked files: {}", status.files.len());

    for (path, file_status) in &status.files {
        let line = match file_status {
            DriftStatus::Unchanged => continue,
            DriftStatus::Modified { .. } => format!("  {} {}", "modified:".yellow(), path),
            DriftStatus::UserDeleted => format!("  {} {}", "deleted:".red(), path),
            DriftStatus::HashError { reason } => {
                format!("  {} {} ({})", "unreadable:".red(), path, reason)
            }
            other => format!("  {}: {}", other.label(), path),
        };
        println!("{}", line);
    }
    for path in &status.untracked {
        println!("  {} {}", "untracked:".dimmed(), path.dimmed());
    }

    if status.is_clean() {
        println!("{} All tracked files unchanged", "✓".green().bold());
    }
    Ok(())
}

fn cmd_hash(files: &[PathBuf]) -> anyhow::Result<()> {
    for file in files {
        let hash = hash_file(file).with_context(|| format!("hashing {:?}", file))?;
        println!("{}  {}", hash, file.display());
    }
    Ok(())
}

fn cmd_backup(engine: &Engine, reason: &str) -> anyhow::Result<()> {
    let outcome = engine.backups().create_full_backup(reason)?;
    for failure in &outcome.failures {
        println!("  {} not backed up: {} ({})", "!".yellow(), failure.path, failure.error);
    }
    println!(
        "{} Created backup {} ({} files)",
        "✓".green().bold(),
        outcome.manifest.timestamp.cyan(),
        outcome.manifest.file_count
    );
    Ok(())
}

fn cmd_backups(engine: &Engine, limit: Option<usize>) -> anyhow::Result<()> {
    let backups = engine.backups().list_backups()?;
    if backups.is_empty() {
        println!("No backups found");
        return Ok(());
    }

    let now = Utc::now();
    for backup in backups.iter().take(limit.unwrap_or(usize::MAX)) {
        let age = (now - backup.manifest.created_at).to_std().unwrap_or_default();
        println!(
            "{}  v{}  {} files  {} ago  {}",
            backup.manifest.timestamp.cyan(),
            backup.manifest.version,
            backup.manifest.file_count,
            format_duration(Duration::from_secs(age.as_secs())),
            backup.manifest.reason.dimmed()
        );
    }
    Ok(())
}

fn cmd_restore(engine: &Engine, backup: Option<String>, latest: bool) -> anyhow::Result<()> {
    let backup_path = match (backup, latest) {
        (Some(name), _) => {
            let candidate = PathBuf::from(&name);
            if candidate.is_dir() {
                candidate
            } else {
                engine.config().backups_path().join(name)
            }
        }
        (None, true) => engine
            .backups()
            .list_backups()?
            .into_iter()
            .next()
            .map(|b| b.path)
            .ok_or_else(|| anyhow!("no backups to restore"))?,
        (None, false) => bail!("specify a backup name or --latest"),
    };

    let result = engine.backups().restore_from_backup(&backup_path)?;
    for failure in &result.failures {
        println!("  {} not restored: {} ({})", "!".yellow(), failure.path, failure.error);
    }
    println!(
        "{} Restored {} of {} files (version {})",
        if result.is_complete() { "✓".green().bold() } else { "!".yellow().bold() },
        result.restored,
        result.total,
        result.version.cyan()
    );
    result.ensure_complete()?;
    Ok(())
}

fn cmd_prune(engine: &Engine, keep: usize) -> anyhow::Result<()> {
    let removed = engine.backups().prune_backups(keep)?;
    println!(
        "{} Removed {} backups, kept {}",
        "✓".green().bold(),
        removed.len(),
        keep
    );
    Ok(())
}
