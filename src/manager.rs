//! Backup manager
//!
//! [`BackupManager`] is the main entry point of the library. It ties the
//! [`SnapshotBuilder`], the [`RestoreOrchestrator`], the [`BackupCatalog`]
//! and the automatic backup policy to one [`Services`] context.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use tankobon::{BackupManager, ExportOptions, MemoryStore, RestoreOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = BackupManager::builder()
//!     .backups_dir("./backups")
//!     .compress(true)
//!     .build(Arc::new(MemoryStore::new()))?;
//!
//! let handle = manager.save_new_backup(&ExportOptions::default(), Some("Before cleanup")).await?;
//! let report = manager.restore_file(&handle, RestoreOptions::default()).await?;
//! println!("Restored {} records", report.records_restored());
//! # Ok(())
//! # }
//! ```

use crate::builder::SnapshotBuilder;
use crate::catalog::{BackupCatalog, BackupHandle};
use crate::codec::SnapshotCodec;
use crate::error::Result;
use crate::events::{BackupEvent, EventBus};
use crate::model::Snapshot;
use crate::refresh::{LibraryRefresher, RefreshSummary};
use crate::restore::RestoreOrchestrator;
use crate::schedule;
use crate::services::{Services, SettingsProvider, SourceClient, SourceRegistry};
use crate::store::EntityStore;
use crate::types::{AutoBackupConfig, BackupConfig, ExportOptions, RestoreOptions, RestoreReport};
use chrono::{DateTime, Timelike, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

/// Result of an automatic backup tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoBackupOutcome {
    /// Automatic backups are turned off
    Disabled,
    /// The interval has not elapsed yet
    NotDue {
        /// When the next backup becomes due
        next: Option<DateTime<Utc>>,
    },
    /// A backup was written
    Created {
        /// The new backup
        handle: BackupHandle,
        /// Older automatic backups deleted to stay within the limit
        pruned: Vec<BackupHandle>,
    },
}

/// Backup, restore and catalog operations over one store
pub struct BackupManager<S> {
    services: Services<S>,
    catalog: BackupCatalog,
    config: BackupConfig,
}

impl<S> std::fmt::Debug for BackupManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("backups_dir", &self.catalog.dir())
            .field("config", &self.config)
            .field("services", &self.services)
            .finish()
    }
}

impl BackupManager<()> {
    /// Start configuring a manager
    pub fn builder() -> BackupManagerBuilder {
        BackupManagerBuilder::new()
    }
}

impl<S: EntityStore> BackupManager<S> {
    /// Create a manager from a service context and configuration
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackupError::InvalidConfiguration`] if `config` is
    /// invalid.
    pub fn new(services: Services<S>, config: BackupConfig) -> Result<Self> {
        config.validate()?;
        let catalog = BackupCatalog::new(config.backups_dir.clone(), services.events.clone())
            .with_codec(SnapshotCodec::new().with_compression(config.compress));
        Ok(Self {
            services,
            catalog,
            config,
        })
    }

    /// Service context
    pub fn services(&self) -> &Services<S> {
        &self.services
    }

    /// Backup catalog
    pub fn catalog(&self) -> &BackupCatalog {
        &self.catalog
    }

    /// Active configuration
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Subscribe to change signals
    pub fn subscribe(&self) -> broadcast::Receiver<BackupEvent> {
        self.services.events.subscribe()
    }

    /// Export the store without writing a file
    pub async fn create_backup(&self, options: &ExportOptions) -> Result<Snapshot> {
        SnapshotBuilder::new(self.services.clone()).build(options).await
    }

    /// Export the store into a new backup file
    #[instrument(skip(self, options))]
    pub async fn save_new_backup(&self, options: &ExportOptions, name: Option<&str>) -> Result<BackupHandle> {
        let snapshot = self.create_backup(options).await?;
        self.catalog.save(&snapshot, name)
    }

    /// Restore a decoded snapshot
    pub async fn restore(&self, snapshot: Snapshot, options: RestoreOptions) -> Result<RestoreReport> {
        RestoreOrchestrator::new(self.services.clone())
            .restore(snapshot, options)
            .await
    }

    /// Read a backup file and restore it
    ///
    /// Unreadable or corrupted files fail before the store is touched.
    #[instrument(skip(self, options), fields(file = %handle.file_name))]
    pub async fn restore_file(&self, handle: &BackupHandle, options: RestoreOptions) -> Result<RestoreReport> {
        let snapshot = self.catalog.read(handle)?;
        self.restore(snapshot, options).await
    }

    /// Refresh library manga against their sources
    pub async fn refresh_library(&self) -> Result<RefreshSummary> {
        LibraryRefresher::new(self.services.clone()).refresh().await
    }

    /// List backups, most recent first
    pub fn list(&self) -> Result<Vec<BackupHandle>> {
        self.catalog.list()
    }

    /// Find a backup by file name or unique prefix
    pub fn find(&self, query: &str) -> Result<BackupHandle> {
        self.catalog.find(query)
    }

    /// Change a backup's display name
    pub fn rename(&self, handle: &BackupHandle, name: &str) -> Result<BackupHandle> {
        self.catalog.rename(handle, name)
    }

    /// Delete a backup
    pub fn delete(&self, handle: &BackupHandle) -> Result<()> {
        self.catalog.delete(handle)
    }

    /// Import an external backup file
    pub fn import(&self, path: &Path) -> Result<BackupHandle> {
        self.catalog.import(path)
    }

    /// Date of the newest automatic backup
    pub fn last_automatic_backup(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .catalog
            .automatic_backups()?
            .into_iter()
            .map(|(date, _)| date)
            .max())
    }

    /// Create an automatic backup if one is due
    ///
    /// Called periodically by the host scheduler with the current time.
    #[instrument(skip(self))]
    pub async fn auto_backup_tick(&self, now: DateTime<Utc>) -> Result<AutoBackupOutcome> {
        let auto = &self.config.auto_backup;
        if !auto.enabled {
            debug!("Automatic backups disabled");
            return Ok(AutoBackupOutcome::Disabled);
        }

        let last = self.last_automatic_backup()?;
        if !schedule::is_due(last, auto.interval, now) {
            let next = schedule::next_due(last, auto.interval, now);
            debug!("Automatic backup not due, next at {:?}", next);
            return Ok(AutoBackupOutcome::NotDue { next });
        }
        self.run_automatic_backup(now).await
    }

    /// Create an automatic backup now and prune old ones
    pub async fn run_automatic_backup(&self, now: DateTime<Utc>) -> Result<AutoBackupOutcome> {
        let options = ExportOptions {
            automatic: true,
            ..self.config.auto_backup.options.clone()
        };
        let mut snapshot = self.create_backup(&options).await?;
        snapshot.date = now.with_nanosecond(0).unwrap_or(now);
        let handle = self.catalog.save(&snapshot, None)?;

        let mut pruned = Vec::new();
        let candidates = self.catalog.automatic_backups()?;
        for stale in schedule::select_for_pruning(candidates, self.config.max_automatic_backups) {
            match self.catalog.delete(&stale) {
                Ok(()) => pruned.push(stale),
                Err(e) => warn!("Failed to prune automatic backup {}: {}", stale.file_name, e),
            }
        }
        info!(
            "Created automatic backup {} (pruned {})",
            handle.file_name,
            pruned.len()
        );
        Ok(AutoBackupOutcome::Created { handle, pruned })
    }
}

/// Builder for [`BackupManager`]
pub struct BackupManagerBuilder {
    config: BackupConfig,
    settings: Option<Arc<dyn SettingsProvider>>,
    sources: Option<Arc<dyn SourceRegistry>>,
    source_client: Option<Arc<dyn SourceClient>>,
    events: Option<EventBus>,
}

impl Default for BackupManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupManagerBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: BackupConfig::default(),
            settings: None,
            sources: None,
            source_client: None,
            events: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: BackupConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the directory holding backups
    pub fn backups_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.backups_dir = dir.into();
        self
    }

    /// Compress new backups
    pub fn compress(mut self, compress: bool) -> Self {
        self.config.compress = compress;
        self
    }

    /// Number of automatic backups kept
    ///
    /// Values less than 1 are set to 1.
    pub fn max_automatic_backups(mut self, count: usize) -> Self {
        self.config.max_automatic_backups = count.max(1);
        self
    }

    /// Set the automatic backup schedule
    pub fn auto_backup(mut self, auto: AutoBackupConfig) -> Self {
        self.config.auto_backup = auto;
        self
    }

    /// Use a settings collaborator
    pub fn settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Use a source collaborator
    pub fn sources(mut self, sources: Arc<dyn SourceRegistry>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Use a network collaborator for library refreshes
    pub fn source_client(mut self, client: Arc<dyn SourceClient>) -> Self {
        self.source_client = Some(client);
        self
    }

    /// Publish to an existing event bus
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the manager over `store`
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackupError::InvalidConfiguration`] if the
    /// configuration is invalid.
    pub fn build<S: EntityStore>(self, store: Arc<S>) -> Result<BackupManager<S>> {
        let mut services = Services::new(store);
        if let Some(settings) = self.settings {
            services = services.with_settings(settings);
        }
        if let Some(sources) = self.sources {
            services = services.with_sources(sources);
        }
        if let Some(client) = self.source_client {
            services = services.with_source_client(client);
        }
        if let Some(events) = self.events {
            services = services.with_events(events);
        }
        BackupManager::new(services, self.config)
    }
}
