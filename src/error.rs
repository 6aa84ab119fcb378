//! Error types for the Tankobon library
//!
//! This module defines all error types that can occur while creating,
//! storing, loading and restoring backups. Errors are split in three layers:
//!
//! - [`StoreError`]: failures reported by an entity store adapter
//! - [`GroupError`]: a restore group whose transaction failed to commit
//! - [`BackupError`]: the crate-wide error returned by every public operation

use crate::types::RestoreGroup;
use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Tankobon library
pub type Result<T> = std::result::Result<T, BackupError>;

/// Type alias for Results returned by entity store adapters
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Main error type for all Tankobon operations
#[derive(Debug, Error)]
pub enum BackupError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// Envelope compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Neither the binary nor the JSON decoder accepted the backup
    #[error("Corrupted backup: {0}")]
    Corrupted(String),

    /// The backup file could not be read from disk
    #[error("Unreadable backup {path:?}: {source}")]
    Unreadable {
        /// Path of the backup file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// One or more restore groups failed to commit
    #[error("Restore failed: {first}")]
    Restore {
        /// First failing group in declaration order
        first: GroupError,
        /// Every failing group
        failures: Vec<GroupError>,
    },

    /// The restore was cancelled before all groups were scheduled
    #[error("Restore cancelled")]
    Cancelled,

    /// Entity store adapter error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// No backup with this name exists in the catalog
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    /// More than one backup matches a name prefix
    #[error("Ambiguous backup name '{prefix}' matches {count} backups")]
    AmbiguousBackup {
        /// The requested prefix
        prefix: String,
        /// Number of matching backups
        count: usize,
    },

    /// The file cannot be imported into the catalog
    #[error("Unsupported backup file type: {path:?}")]
    UnsupportedFileType {
        /// Path to the rejected file
        path: PathBuf,
    },

    /// A backup name that cannot be used as a file name
    #[error("Invalid backup name: {0}")]
    InvalidName(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

// Implement conversions for bincode 2.0 error types
impl From<bincode::error::DecodeError> for BackupError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BackupError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BackupError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BackupError::Bincode(err.to_string())
    }
}

impl BackupError {
    /// Create a compression error with a custom message
    pub fn compression(msg: impl Into<String>) -> Self {
        BackupError::Compression(msg.into())
    }

    /// Create a corruption error with a custom message
    pub fn corrupted(msg: impl Into<String>) -> Self {
        BackupError::Corrupted(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        BackupError::Internal(msg.into())
    }

    /// Build a restore error from the collected group failures
    ///
    /// Returns `None` when `failures` is empty.
    pub fn from_failures(failures: Vec<GroupError>) -> Option<Self> {
        let first = failures.first()?.clone();
        Some(BackupError::Restore { first, failures })
    }

    /// The restore group that failed, if this is a restore error
    pub fn failed_group(&self) -> Option<RestoreGroup> {
        match self {
            BackupError::Restore { first, .. } => Some(first.group),
            _ => None,
        }
    }

    /// Check if this error indicates an unusable backup file
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            BackupError::Corrupted(_) | BackupError::Bincode(_) | BackupError::Compression(_)
        )
    }

    /// Check if retrying the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BackupError::Unreadable { .. } | BackupError::Store(StoreError::Busy) | BackupError::Cancelled
        )
    }

    /// Get a user-facing message
    ///
    /// Restore failures name the failing part of the library, corrupted
    /// files are reported without detail.
    pub fn user_message(&self) -> String {
        match self {
            BackupError::Restore { first, .. } => format!(
                "An error occurred while restoring {}. Part of your data may not have been restored.",
                first.group.display_name()
            ),
            BackupError::Corrupted(_) | BackupError::Bincode(_) | BackupError::Compression(_) => {
                "The backup file is corrupted.".to_string()
            }
            BackupError::Unreadable { path, .. } => {
                format!("The backup file {:?} could not be read.", path)
            }
            BackupError::Cancelled => {
                "The restore was cancelled. Groups that already finished were kept.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// A restore group whose store transaction failed
///
/// Cloneable so the same failure can be observed by every dependent node
/// of the restore graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} restore failed: {reason}", group.display_name())]
pub struct GroupError {
    /// The group that failed
    pub group: RestoreGroup,
    /// Description of the underlying store failure
    pub reason: String,
}

impl GroupError {
    /// Create a group error from any displayable cause
    pub fn new(group: RestoreGroup, reason: impl ToString) -> Self {
        Self {
            group,
            reason: reason.to_string(),
        }
    }
}

/// Errors reported by an entity store adapter
#[derive(Debug, Error)]
pub enum StoreError {
    /// The transaction could not be committed
    #[error("commit failed: {0}")]
    Commit(String),

    /// A record violated a store constraint
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// The store is temporarily unavailable
    #[error("store busy")]
    Busy,

    /// The background execution context failed
    #[error("background task failed: {0}")]
    Background(String),

    /// Store persistence failed
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store persistence format error
    #[error("store format error: {0}")]
    Format(#[from] serde_json::Error),
}
