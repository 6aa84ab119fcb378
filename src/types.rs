//! Core data types used throughout the Tankobon library
//!
//! This module contains the option, result and configuration structures
//! shared across components.
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Restore groups**: [`RestoreGroup`], [`GroupStatus`] - the units of work of a restore
//! - **Operations**: [`RestoreReport`] - results of a restore
//! - **Parameters**: [`ExportOptions`], [`RestoreOptions`] - operation parameters
//! - **Configuration**: [`BackupConfig`], [`AutoBackupConfig`] - persisted settings
//!
//! ## Examples
//!
//! ```rust
//! use tankobon::types::ExportOptions;
//!
//! // Export everything except reading history
//! let options = ExportOptions {
//!     history: false,
//!     ..Default::default()
//! };
//! assert!(options.library_entries);
//! ```

use crate::error::{BackupError, Result};
use crate::graph::CancellationToken;
use crate::refresh::RefreshSummary;
use crate::schedule::BackupInterval;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// One dependency-ordered unit of work of a restore
///
/// Every group maps to one entity kind of the snapshot. Groups are listed in
/// declaration order, the order used to pick the reported failure when more
/// than one group fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreGroup {
    /// Manga metadata records
    Manga,
    /// Category labels
    Categories,
    /// Library entries with their category links
    Library,
    /// Reading history
    History,
    /// Chapter records
    Chapters,
    /// Reading sessions
    Sessions,
    /// New chapter notifications
    Updates,
    /// Tracker links
    Track,
}

impl RestoreGroup {
    /// Every group in declaration order
    pub const ALL: [RestoreGroup; 8] = [
        RestoreGroup::Manga,
        RestoreGroup::Categories,
        RestoreGroup::Library,
        RestoreGroup::History,
        RestoreGroup::Chapters,
        RestoreGroup::Sessions,
        RestoreGroup::Updates,
        RestoreGroup::Track,
    ];

    /// Short machine name, as accepted by [`FromStr`]
    pub fn name(&self) -> &'static str {
        match self {
            RestoreGroup::Manga => "manga",
            RestoreGroup::Categories => "categories",
            RestoreGroup::Library => "library",
            RestoreGroup::History => "history",
            RestoreGroup::Chapters => "chapters",
            RestoreGroup::Sessions => "sessions",
            RestoreGroup::Updates => "updates",
            RestoreGroup::Track => "track",
        }
    }

    /// Human readable name shown to users
    pub fn display_name(&self) -> &'static str {
        match self {
            RestoreGroup::Manga => "Content",
            RestoreGroup::Categories => "Categories",
            RestoreGroup::Library => "Library",
            RestoreGroup::History => "History",
            RestoreGroup::Chapters => "Chapters",
            RestoreGroup::Sessions => "Reading Sessions",
            RestoreGroup::Updates => "Updates",
            RestoreGroup::Track => "Trackers",
        }
    }

    /// Groups that must finish before this group starts
    pub fn predecessors(&self) -> &'static [RestoreGroup] {
        match self {
            RestoreGroup::Manga | RestoreGroup::Categories => &[],
            RestoreGroup::Library | RestoreGroup::History | RestoreGroup::Track => {
                &[RestoreGroup::Manga, RestoreGroup::Categories]
            }
            RestoreGroup::Chapters => &[RestoreGroup::History, RestoreGroup::Library],
            RestoreGroup::Sessions => &[RestoreGroup::History],
            RestoreGroup::Updates => &[RestoreGroup::Chapters],
        }
    }
}

impl fmt::Display for RestoreGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RestoreGroup {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        RestoreGroup::ALL
            .into_iter()
            .find(|group| group.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| BackupError::InvalidConfiguration(format!("unknown restore group '{}'", s)))
    }
}

/// Outcome of one group within a successful restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStatus {
    /// The group was present and its rows were replaced
    Restored {
        /// Number of records written
        records: usize,
    },
    /// The group was absent from the snapshot, existing rows were kept
    Untouched,
}

/// Which parts of the library go into a new snapshot
///
/// Disabled groups are left absent from the snapshot, so restoring it later
/// keeps whatever the target library holds for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Library entries and their manga
    pub library_entries: bool,
    /// Reading history
    pub history: bool,
    /// Chapter lists
    pub chapters: bool,
    /// Tracker links
    pub tracking: bool,
    /// Reading sessions
    pub reading_sessions: bool,
    /// New chapter notifications
    pub updates: bool,
    /// Category labels and library entry category links
    pub categories: bool,
    /// Application settings
    pub settings: bool,
    /// Source list URLs
    pub source_lists: bool,
    /// Include settings holding credentials or tokens
    pub sensitive_settings: bool,
    /// Mark the snapshot as created by the scheduler
    pub automatic: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            library_entries: true,
            history: true,
            chapters: true,
            tracking: true,
            reading_sessions: true,
            updates: true,
            categories: true,
            settings: true,
            source_lists: true,
            sensitive_settings: false,
            automatic: false,
        }
    }
}

impl ExportOptions {
    /// Names accepted by [`ExportOptions::exclude`]
    pub const GROUP_NAMES: [&'static str; 9] = [
        "library",
        "history",
        "chapters",
        "tracking",
        "sessions",
        "updates",
        "categories",
        "settings",
        "sources",
    ];

    /// Disable one export group by name
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidConfiguration`] for an unknown name.
    pub fn exclude(&mut self, name: &str) -> Result<()> {
        let flag = match name.trim().to_ascii_lowercase().as_str() {
            "library" | "manga" => &mut self.library_entries,
            "history" => &mut self.history,
            "chapters" => &mut self.chapters,
            "tracking" | "track" | "trackers" => &mut self.tracking,
            "sessions" => &mut self.reading_sessions,
            "updates" => &mut self.updates,
            "categories" => &mut self.categories,
            "settings" => &mut self.settings,
            "sources" | "source-lists" => &mut self.source_lists,
            other => {
                return Err(BackupError::InvalidConfiguration(format!(
                    "unknown export group '{}', expected one of {}",
                    other,
                    Self::GROUP_NAMES.join(", ")
                )))
            }
        };
        *flag = false;
        Ok(())
    }
}

/// Options for restore operations
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Token checked before each group starts its transaction
    pub cancel: Option<CancellationToken>,
    /// Run the best-effort library refresh at the end of the restore
    pub refresh_library: bool,
    /// Apply settings and source lists from the snapshot
    pub restore_preferences: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            cancel: None,
            refresh_library: true,
            restore_preferences: true,
        }
    }
}

/// Result of a successful restore
///
/// Restores that fail return [`BackupError::Restore`] instead.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    /// Status of every group in declaration order
    pub groups: Vec<(RestoreGroup, GroupStatus)>,
    /// Source ids referenced by the snapshot that are not installed
    pub missing_sources: Vec<String>,
    /// Library entries dropped because their manga does not exist
    pub library_entries_skipped: usize,
    /// Reading sessions dropped as invalid or without history
    pub sessions_dropped: usize,
    /// Library refresh outcome, if one ran
    pub refresh: Option<RefreshSummary>,
    /// Time taken for the restore in milliseconds
    pub duration_ms: u64,
    /// Non-fatal problems encountered
    pub warnings: Vec<String>,
}

impl RestoreReport {
    /// Status of a single group
    pub fn status(&self, group: RestoreGroup) -> Option<&GroupStatus> {
        self.groups.iter().find(|(g, _)| *g == group).map(|(_, status)| status)
    }

    /// Total number of records written across all groups
    pub fn records_restored(&self) -> usize {
        self.groups
            .iter()
            .map(|(_, status)| match status {
                GroupStatus::Restored { records } => *records,
                GroupStatus::Untouched => 0,
            })
            .sum()
    }
}

/// Scheduler configuration for automatic backups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoBackupConfig {
    /// Whether automatic backups are created
    pub enabled: bool,
    /// Minimum time between two automatic backups
    pub interval: BackupInterval,
    /// Groups included in automatic backups
    pub options: ExportOptions,
}

impl Default for AutoBackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: BackupInterval::Daily,
            options: ExportOptions {
                automatic: true,
                ..ExportOptions::default()
            },
        }
    }
}

/// Configuration for a backup manager
///
/// Persisted as pretty JSON. Missing fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory holding the backup files
    pub backups_dir: PathBuf,
    /// Library database used by the command line tool
    pub library_path: PathBuf,
    /// Compress new backups with lz4
    pub compress: bool,
    /// Number of automatic backups kept before the oldest are pruned
    pub max_automatic_backups: usize,
    /// Automatic backup schedule
    pub auto_backup: AutoBackupConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backups_dir: PathBuf::from("backups"),
            library_path: PathBuf::from("library.json"),
            compress: false,
            max_automatic_backups: 4,
            auto_backup: AutoBackupConfig::default(),
        }
    }
}

impl BackupConfig {
    /// Load the configuration, returning defaults if the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_vec_pretty(self)?;
        crate::utils::atomic_write(path, &content)
    }

    /// Check the configuration for values that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.backups_dir.as_os_str().is_empty() {
            return Err(BackupError::InvalidConfiguration(
                "backups directory must not be empty".to_string(),
            ));
        }
        if self.max_automatic_backups == 0 {
            return Err(BackupError::InvalidConfiguration(
                "max_automatic_backups must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_group_names_round_trip() {
        for group in RestoreGroup::ALL {
            assert_eq!(group.name().parse::<RestoreGroup>().unwrap(), group);
        }
        assert!("volumes".parse::<RestoreGroup>().is_err());
    }

    #[test]
    fn test_predecessors_are_declared_earlier() {
        for (index, group) in RestoreGroup::ALL.iter().enumerate() {
            for pred in group.predecessors() {
                let pred_index = RestoreGroup::ALL.iter().position(|g| g == pred).unwrap();
                assert!(pred_index < index, "{} depends on later group {}", group, pred);
            }
        }
    }

    #[test]
    fn test_export_exclude() {
        let mut options = ExportOptions::default();
        options.exclude("history").unwrap();
        options.exclude("Sources").unwrap();
        assert!(!options.history);
        assert!(!options.source_lists);
        assert!(options.chapters);
        assert!(options.exclude("pages").is_err());
    }

    #[test]
    fn test_report_counts() {
        let report = RestoreReport {
            groups: vec![
                (RestoreGroup::Manga, GroupStatus::Restored { records: 3 }),
                (RestoreGroup::History, GroupStatus::Untouched),
                (RestoreGroup::Chapters, GroupStatus::Restored { records: 10 }),
            ],
            ..Default::default()
        };
        assert_eq!(report.records_restored(), 13);
        assert_eq!(report.status(RestoreGroup::History), Some(&GroupStatus::Untouched));
        assert_eq!(report.status(RestoreGroup::Track), None);
    }

    #[test]
    fn test_config_load_missing_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = BackupConfig::load(&temp_dir.path().join("config.json")).unwrap();
        assert_eq!(config, BackupConfig::default());
        assert_eq!(config.max_automatic_backups, 4);
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");
        let mut config = BackupConfig::default();
        config.compress = true;
        config.auto_backup.enabled = true;
        config.auto_backup.interval = BackupInterval::Weekly;
        config.save(&path).unwrap();

        assert_eq!(BackupConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_config_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{"compress": true}"#).unwrap();
        let config = BackupConfig::load(&path).unwrap();
        assert!(config.compress);
        assert_eq!(config.backups_dir, PathBuf::from("backups"));
    }

    #[test]
    fn test_config_rejects_zero_retention() {
        let config = BackupConfig {
            max_automatic_backups: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
