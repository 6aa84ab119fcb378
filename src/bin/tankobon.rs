//! # Tankobon CLI - Manga library backups
//!
//! A command-line interface for the Tankobon backup library.
//!
//! ## Features
//! - Create backups of a library with selectable groups
//! - Restore backups with per-group reporting
//! - Inspect, rename, delete and import backup files
//! - Run the automatic backup policy
//!
//! ## Usage
//! ```bash
//! # Back up everything except reading history
//! tankobon create --name "Before cleanup" --exclude history
//!
//! # List backups
//! tankobon list
//!
//! # Restore a backup by unique file name prefix
//! tankobon restore aidoku_2024-05
//!
//! # Show what a backup contains
//! tankobon inspect aidoku_2024-05-01_18-30-00.aib
//! ```
//!
//! The library is kept as a JSON file holding the store tables, settings,
//! installed sources and source lists.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tankobon::utils::{atomic_write, format_bytes};
use tankobon::{
    AutoBackupOutcome, BackupConfig, BackupError, BackupHandle, BackupManager, ExportOptions, GroupStatus,
    MemorySettings, MemorySourceRegistry, MemoryStore, RestoreOptions, SettingValue, SettingsProvider,
    SourceRegistry, StoreImage,
};
use tracing_subscriber::EnvFilter;

/// Tankobon CLI - Backup and restore manga libraries
#[derive(Parser)]
#[command(name = "tankobon")]
#[command(version)]
#[command(about = "Back up, inspect and restore manga reader libraries")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "tankobon.json")]
    config: PathBuf,

    /// Backups directory (overrides the configuration)
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Library file (overrides the configuration)
    #[arg(short, long, global = true)]
    library: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List backups
    #[command(alias = "ls")]
    List {
        /// Load each backup and show its name and contents
        #[arg(long)]
        detailed: bool,
    },

    /// Create a backup of the library
    Create {
        /// Display name
        #[arg(short, long)]
        name: Option<String>,

        /// Groups to leave out (library, history, chapters, tracking,
        /// sessions, updates, categories, settings, sources)
        #[arg(short, long, value_delimiter = ',')]
        exclude: Vec<String>,

        /// Include settings holding credentials
        #[arg(long)]
        sensitive: bool,
    },

    /// Restore a backup into the library
    #[command(alias = "rs")]
    Restore {
        /// Backup file name or unique prefix
        backup: String,

        /// Skip the library refresh after restoring
        #[arg(long)]
        no_refresh: bool,

        /// Do not apply settings and source lists
        #[arg(long)]
        no_preferences: bool,
    },

    /// Show the contents of a backup
    Inspect {
        /// Backup file name or unique prefix
        backup: String,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set or clear the display name of a backup
    Rename {
        /// Backup file name or unique prefix
        backup: String,

        /// New name, omitted to clear
        name: Option<String>,
    },

    /// Delete a backup
    #[command(alias = "rm")]
    Delete {
        /// Backup file name or unique prefix
        backup: String,
    },

    /// Copy an external backup file into the backups directory
    Import {
        /// File to import
        file: PathBuf,
    },

    /// Create an automatic backup if one is due
    Auto {
        /// Create one regardless of the schedule
        #[arg(long)]
        now: bool,
    },
}

/// Library persisted between runs
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LibraryFile {
    store: StoreImage,
    settings: BTreeMap<String, SettingValue>,
    installed_sources: Vec<String>,
    source_lists: Vec<String>,
}

/// Library collaborators loaded from a [`LibraryFile`]
struct Library {
    path: PathBuf,
    store: Arc<MemoryStore>,
    settings: Arc<MemorySettings>,
    sources: Arc<MemorySourceRegistry>,
}

impl Library {
    fn load(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let content = std::fs::read(path).with_context(|| format!("reading library {}", path.display()))?;
            serde_json::from_slice::<LibraryFile>(&content)
                .with_context(|| format!("parsing library {}", path.display()))?
        } else {
            LibraryFile::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            store: Arc::new(MemoryStore::from_image(file.store)),
            settings: Arc::new(MemorySettings::with_values(file.settings)),
            sources: Arc::new(MemorySourceRegistry::with_sources(file.installed_sources, file.source_lists)),
        })
    }

    fn save(&self) -> Result<()> {
        let file = LibraryFile {
            store: self.store.image(),
            settings: self.settings.export(),
            installed_sources: self.sources.installed_sources(),
            source_lists: self.sources.source_lists(),
        };
        let content = serde_json::to_vec_pretty(&file)?;
        atomic_write(&self.path, &content).with_context(|| format!("writing library {}", self.path.display()))?;
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("tankobon=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<BackupError>() {
            Some(backup_error) => eprintln!("{}: {}", "Error".red().bold(), backup_error.user_message()),
            None => eprintln!("{}: {:#}", "Error".red().bold(), e),
        }
        std::process::exit(1);
    }
}

/// Main command runner
async fn run(cli: Cli) -> Result<()> {
    let mut config = BackupConfig::load(&cli.config)
        .with_context(|| format!("loading configuration {}", cli.config.display()))?;
    if let Some(dir) = cli.dir {
        config.backups_dir = dir;
    }
    if let Some(library) = cli.library {
        config.library_path = library;
    }

    let library = Library::load(&config.library_path)?;
    let manager = BackupManager::builder()
        .config(config)
        .settings(library.settings.clone())
        .sources(library.sources.clone())
        .build(Arc::clone(&library.store))?;

    match cli.command {
        Commands::List { detailed } => cmd_list(&manager, detailed),
        Commands::Create { name, exclude, sensitive } => cmd_create(&manager, name, exclude, sensitive).await,
        Commands::Restore {
            backup,
            no_refresh,
            no_preferences,
        } => cmd_restore(&manager, &library, &backup, no_refresh, no_preferences).await,
        Commands::Inspect { backup, json } => cmd_inspect(&manager, &library, &backup, json),
        Commands::Rename { backup, name } => cmd_rename(&manager, &backup, name),
        Commands::Delete { backup } => cmd_delete(&manager, &backup),
        Commands::Import { file } => cmd_import(&manager, &file),
        Commands::Auto { now } => cmd_auto(&manager, now).await,
    }
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message.to_string());
    pb
}

fn modified_at(handle: &BackupHandle) -> String {
    DateTime::<Local>::from(handle.modified)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// List backups, most recent first
fn cmd_list(manager: &BackupManager<MemoryStore>, detailed: bool) -> Result<()> {
    let handles = manager.list()?;
    if handles.is_empty() {
        println!("{}", "No backups found.".yellow());
        return Ok(());
    }

    println!("{}", "Backups:".blue().bold());
    for handle in &handles {
        print!("  {} ", handle.file_name.yellow().bold());
        print!("{} ", modified_at(handle).dimmed());
        print!("{}", format_bytes(handle.size).dimmed());

        if detailed {
            match manager.catalog().load(handle) {
                Some(snapshot) => {
                    if let Some(name) = &snapshot.name {
                        print!(" {}", name.cyan());
                    }
                    if snapshot.is_automatic() {
                        print!(" {}", "[auto]".magenta());
                    }
                    println!();
                    println!("      {}", snapshot.summary().to_string().dimmed());
                }
                None => println!(" {}", "corrupted".red()),
            }
        } else {
            println!();
        }
    }
    Ok(())
}

/// Create a backup of the library
async fn cmd_create(
    manager: &BackupManager<MemoryStore>,
    name: Option<String>,
    exclude: Vec<String>,
    sensitive: bool,
) -> Result<()> {
    let mut options = ExportOptions {
        sensitive_settings: sensitive,
        ..Default::default()
    };
    for group in &exclude {
        options.exclude(group)?;
    }

    let start = Instant::now();
    let pb = spinner("Creating backup...");
    let result = manager.save_new_backup(&options, name.as_deref()).await;
    pb.finish_and_clear();
    let handle = result?;

    println!("{} Created backup {}", "✓".green().bold(), handle.file_name.yellow().bold());
    if let Some(name) = &name {
        println!("  Name: {}", name.cyan());
    }
    println!("  Size: {}", format_bytes(handle.size).cyan());
    println!("  Time: {}", format_duration(round_ms(start.elapsed())).to_string().cyan());
    Ok(())
}

/// Restore a backup into the library
async fn cmd_restore(
    manager: &BackupManager<MemoryStore>,
    library: &Library,
    backup: &str,
    no_refresh: bool,
    no_preferences: bool,
) -> Result<()> {
    let handle = manager.find(backup)?;
    println!("{} {}", "Restoring backup".blue().bold(), handle.file_name.yellow());

    let options = RestoreOptions {
        refresh_library: !no_refresh,
        restore_preferences: !no_preferences,
        ..Default::default()
    };
    let pb = spinner("Restoring library...");
    let result = manager.restore_file(&handle, options).await;
    pb.finish_and_clear();

    // Keep groups that committed before a failure
    library.save()?;
    let report = result?;

    println!("{} Restore complete", "✓".green().bold());
    for (group, status) in &report.groups {
        match status {
            GroupStatus::Restored { records } => {
                println!("  {}: {}", group.display_name(), records.to_string().cyan())
            }
            GroupStatus::Untouched => println!("  {}: {}", group.display_name(), "untouched".dimmed()),
        }
    }
    if report.library_entries_skipped > 0 {
        println!(
            "  Library entries without manga: {}",
            report.library_entries_skipped.to_string().yellow()
        );
    }
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(report.duration_ms)).to_string().cyan()
    );

    if !report.missing_sources.is_empty() {
        println!("\n{}", "Missing sources:".yellow().bold());
        for source in &report.missing_sources {
            println!("  - {}", source.yellow());
        }
    }
    if !report.warnings.is_empty() {
        println!("\n{}", "Warnings:".yellow().bold());
        for warning in &report.warnings {
            println!("  - {}", warning.yellow());
        }
    }
    Ok(())
}

/// Show the contents of a backup
fn cmd_inspect(manager: &BackupManager<MemoryStore>, library: &Library, backup: &str, json: bool) -> Result<()> {
    let handle = manager.find(backup)?;
    let snapshot = manager.catalog().read(&handle)?;

    if json {
        let bytes = manager.catalog().codec().encode_json(&snapshot)?;
        println!("{}", String::from_utf8_lossy(&bytes));
        return Ok(());
    }

    println!("{} {}", "Backup".blue().bold(), handle.file_name.yellow().bold());
    if let Some(name) = &snapshot.name {
        println!("  Name: {}", name.cyan());
    }
    println!(
        "  Date: {}",
        snapshot.date.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string().cyan()
    );
    if let Some(version) = &snapshot.version {
        println!("  Version: {}", version.dimmed());
    }
    if snapshot.is_automatic() {
        println!("  Created automatically");
    }
    println!("  Size: {}", format_bytes(handle.size).cyan());
    println!();
    for (label, count) in snapshot.summary().rows() {
        match count {
            Some(count) => println!("  {:<18} {}", label, count.to_string().cyan()),
            None => println!("  {:<18} {}", label, "absent".dimmed()),
        }
    }

    let missing = snapshot.missing_sources(&library.sources.installed_sources());
    if !missing.is_empty() {
        println!("\n{} {}", "Sources not installed:".yellow().bold(), missing.join(", ").yellow());
    }
    Ok(())
}

/// Set or clear the display name of a backup
fn cmd_rename(manager: &BackupManager<MemoryStore>, backup: &str, name: Option<String>) -> Result<()> {
    let handle = manager.find(backup)?;
    let name = name.unwrap_or_default();
    manager.rename(&handle, &name)?;
    if name.trim().is_empty() {
        println!("{} Cleared name of {}", "✓".green().bold(), handle.file_name.yellow());
    } else {
        println!("{} Renamed {} to {}", "✓".green().bold(), handle.file_name.yellow(), name.trim().cyan());
    }
    Ok(())
}

/// Delete a backup
fn cmd_delete(manager: &BackupManager<MemoryStore>, backup: &str) -> Result<()> {
    let handle = manager.find(backup)?;
    manager.delete(&handle)?;
    println!("{} Deleted {}", "✓".green().bold(), handle.file_name.yellow());
    Ok(())
}

/// Copy an external backup file into the backups directory
fn cmd_import(manager: &BackupManager<MemoryStore>, file: &Path) -> Result<()> {
    let handle = manager.import(file)?;
    println!("{} Imported {} as {}", "✓".green().bold(), file.display(), handle.file_name.yellow());
    Ok(())
}

/// Create an automatic backup if one is due
async fn cmd_auto(manager: &BackupManager<MemoryStore>, force: bool) -> Result<()> {
    let now = Utc::now();
    let outcome = if force {
        manager.run_automatic_backup(now).await?
    } else {
        manager.auto_backup_tick(now).await?
    };

    match outcome {
        AutoBackupOutcome::Disabled => {
            println!("{}", "Automatic backups are disabled.".yellow());
        }
        AutoBackupOutcome::NotDue { next } => match next {
            Some(next) => {
                let wait = (next - now).to_std().unwrap_or_default();
                println!("Next automatic backup in {}", format_duration(round_secs(wait)).to_string().cyan());
            }
            None => println!("No automatic backup due."),
        },
        AutoBackupOutcome::Created { handle, pruned } => {
            println!("{} Created automatic backup {}", "✓".green().bold(), handle.file_name.yellow().bold());
            for stale in &pruned {
                println!("  Pruned {}", stale.file_name.dimmed());
            }
        }
    }
    Ok(())
}

fn round_ms(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

fn round_secs(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs())
}
