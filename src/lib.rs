//! # Tankobon - Manga library backups
//!
//! A backup, restore and library reconciliation engine for manga reader
//! libraries.
//!
//! ## Overview
//!
//! Tankobon exports a reader's library (manga, chapters, reading history,
//! library entries, categories, trackers, reading sessions and update
//! notifications) into a self-contained snapshot and applies snapshots back
//! onto a live store. It lets you:
//! - Export a selectable profile of the library into a [`Snapshot`]
//! - Store snapshots as compact binary backup files, with legacy JSON read support
//! - Restore a snapshot through a dependency-ordered task graph with
//!   per-group failure reporting
//! - Manage a directory of backups: list, rename, delete, import
//! - Schedule automatic backups and prune old ones
//! - Reconcile library manga with their sources after a restore
//!
//! ## Architecture
//!
//! - **Snapshot model**: plain records cross-referenced by natural keys
//!   (source id, manga id, chapter id), never by store row ids
//! - **Codec**: a versioned binary envelope with optional LZ4 compression;
//!   decoding falls back to the legacy JSON format
//! - **Entity store**: a transactional adapter trait the engine consumes;
//!   [`MemoryStore`] is the in-process implementation
//! - **Restore orchestrator**: one graph node per entity group, each group
//!   replaced in a single transaction once the groups it depends on committed
//! - **Catalog**: the on-disk collection of backup files
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tankobon::{BackupManager, ExportOptions, MemoryStore, RestoreOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = BackupManager::builder()
//!     .backups_dir("./backups")
//!     .build(Arc::new(MemoryStore::new()))?;
//!
//! // Write a backup of everything except reading history
//! let options = ExportOptions {
//!     history: false,
//!     ..Default::default()
//! };
//! let handle = manager.save_new_backup(&options, None).await?;
//!
//! // Restore it later
//! let report = manager.restore_file(&handle, RestoreOptions::default()).await?;
//! if !report.missing_sources.is_empty() {
//!     println!("Install these sources: {:?}", report.missing_sources);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Restore Semantics
//!
//! A group absent from a snapshot leaves the store's rows of that kind
//! untouched; a present group (even an empty one) replaces them. Library
//! entries whose manga does not exist are dropped, chapters are linked to
//! their manga and history regardless of the order rows appear in. When a
//! group fails, only the groups depending on it are skipped, and the caller
//! receives [`BackupError::Restore`] naming the first failing group.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, BackupError>`. Store adapters report
//! [`StoreError`], which converts into [`BackupError::Store`].
//!
//! ## Module Organization
//!
//! - [`model`]: Snapshot records and natural keys
//! - [`codec`]: Binary and JSON snapshot encoding
//! - [`store`]: Entity store adapter contract
//! - [`memory_store`]: In-process entity store
//! - [`restore`]: Restore orchestration
//! - [`builder`]: Snapshot export
//! - [`catalog`]: Backup file management
//! - [`manager`]: High level entry point
//! - [`refresh`]: Library refresh against sources
//! - [`schedule`]: Automatic backup policy
//! - [`graph`]: Async task graph with declared predecessors
//! - [`types`]: Options, reports and configuration
//! - [`error`]: Error types and handling

// Public API modules
pub mod builder;
pub mod catalog;
pub mod codec;
pub mod error;
pub mod events;
pub mod graph;
pub mod manager;
pub mod memory_store;
pub mod model;
pub mod refresh;
pub mod restore;
pub mod schedule;
pub mod services;
pub mod store;
pub mod types;
pub mod utils;
pub mod value;

// Re-export main types for convenience
pub use builder::SnapshotBuilder;
pub use catalog::{BackupCatalog, BackupHandle};
pub use codec::{Encoding, SnapshotCodec};
pub use error::{BackupError, GroupError, Result, StoreError};
pub use events::{BackupEvent, EventBus};
pub use graph::CancellationToken;
pub use manager::{AutoBackupOutcome, BackupManager, BackupManagerBuilder};
pub use memory_store::{MemoryStore, StoreImage};
pub use model::*;
pub use refresh::{LibraryRefresher, RefreshSummary};
pub use restore::RestoreOrchestrator;
pub use schedule::BackupInterval;
pub use services::{
    MemorySettings, MemorySourceRegistry, RemoteManga, Services, SettingsProvider, SourceClient, SourceRegistry,
};
pub use store::{EntityKind, EntityStore, StoreContext};
pub use types::*;
pub use value::SettingValue;

#[cfg(test)]
mod tests;
