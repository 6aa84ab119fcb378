//! On-disk backup collection
//!
//! A [`BackupCatalog`] owns one directory of snapshot files. Native backups
//! use the `.aib` extension; legacy `.json` backups are listed and loaded as
//! well. Hidden files and temporary files left by interrupted writes are
//! ignored.
//!
//! New backups are named after their snapshot date
//! (`aidoku_2024-05-01_18-30-00.aib`), with `_1`, `_2`, ... appended when the
//! name is taken. Every write goes through a temporary file and an atomic
//! rename. Each mutation publishes [`BackupEvent::BackupListChanged`].

use crate::codec::SnapshotCodec;
use crate::error::{BackupError, Result};
use crate::events::{BackupEvent, EventBus};
use crate::model::Snapshot;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, instrument, trace, warn};

/// Extension of native backups
pub const BACKUP_EXTENSION: &str = "aib";

/// Extension of legacy JSON backups
pub const LEGACY_EXTENSION: &str = "json";

/// Prefix of automatically named backup files
const FILE_PREFIX: &str = "aidoku_";

/// Date format of automatically named backup files
const FILE_DATE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Longest display name accepted
const MAX_NAME_LEN: usize = 255;

/// A backup file in the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupHandle {
    /// Full path of the file
    pub path: PathBuf,
    /// File name including extension
    pub file_name: String,
    /// Last modification time
    pub modified: SystemTime,
    /// File size in bytes
    pub size: u64,
}

impl BackupHandle {
    /// Like `from_path`, but a file removed since the directory was read is `None`
    fn from_listed_path(path: &Path) -> Result<Option<Self>> {
        match Self::from_path(path) {
            Ok(handle) => Ok(Some(handle)),
            Err(BackupError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!("{:?} vanished while listing", path);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn from_path(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| BackupError::internal(format!("backup path {:?} has no file name", path)))?;
        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            modified: metadata.modified()?,
            size: metadata.len(),
        })
    }

    /// File name without extension
    pub fn stem(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.file_name)
    }

    /// Whether this is a legacy JSON backup
    pub fn is_legacy(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == LEGACY_EXTENSION)
    }
}

/// Manages the snapshot files of one directory
#[derive(Debug, Clone)]
pub struct BackupCatalog {
    dir: PathBuf,
    codec: SnapshotCodec,
    events: EventBus,
}

impl BackupCatalog {
    /// Create a catalog over `dir`
    ///
    /// The directory is created on the first write.
    pub fn new(dir: impl Into<PathBuf>, events: EventBus) -> Self {
        Self {
            dir: dir.into(),
            codec: SnapshotCodec::new(),
            events,
        }
    }

    /// Use `codec` when writing backups
    pub fn with_codec(mut self, codec: SnapshotCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Directory holding the backups
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Codec used for reads and writes
    pub fn codec(&self) -> &SnapshotCodec {
        &self.codec
    }

    /// List backups, most recently modified first
    ///
    /// A missing directory is an empty catalog.
    pub fn list(&self) -> Result<Vec<BackupHandle>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut handles = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_file = match entry.file_type() {
                Ok(file_type) => file_type.is_file(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(e.into()),
            };
            if !is_file || !is_backup_file(&path) {
                trace!("Ignoring {:?}", path);
                continue;
            }
            if let Some(handle) = BackupHandle::from_listed_path(&path)? {
                handles.push(handle);
            }
        }
        handles.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.file_name.cmp(&a.file_name)));
        Ok(handles)
    }

    /// Read and decode a backup
    ///
    /// # Errors
    ///
    /// - [`BackupError::Unreadable`] if the file cannot be read
    /// - [`BackupError::Corrupted`] if no decoder accepts its content
    pub fn read(&self, handle: &BackupHandle) -> Result<Snapshot> {
        let bytes = fs::read(&handle.path).map_err(|source| BackupError::Unreadable {
            path: handle.path.clone(),
            source,
        })?;
        let (snapshot, encoding) = self.codec.decode_detailed(&bytes)?;
        debug!("Loaded {} ({:?})", handle.file_name, encoding);
        Ok(snapshot)
    }

    /// Read and decode a backup, returning `None` on any failure
    pub fn load(&self, handle: &BackupHandle) -> Option<Snapshot> {
        match self.read(handle) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Could not load backup {}: {}", handle.file_name, e);
                None
            }
        }
    }

    /// Write a new backup file
    ///
    /// `name` becomes the snapshot's display name. The file is named after
    /// the snapshot date.
    #[instrument(skip(self, snapshot))]
    pub fn save(&self, snapshot: &Snapshot, name: Option<&str>) -> Result<BackupHandle> {
        let mut snapshot = snapshot.clone();
        if let Some(name) = name {
            snapshot.name = Some(validate_name(name)?);
        }

        fs::create_dir_all(&self.dir)?;
        let stem = format!("{}{}", FILE_PREFIX, snapshot.date.format(FILE_DATE_FORMAT));
        let path = self.unique_path(&stem, BACKUP_EXTENSION);
        let bytes = self.codec.encode(&snapshot)?;
        crate::utils::atomic_write(&path, &bytes)?;

        let handle = BackupHandle::from_path(&path)?;
        info!("Saved backup {} ({})", handle.file_name, crate::utils::format_bytes(handle.size));
        self.events.publish(BackupEvent::BackupListChanged);
        Ok(handle)
    }

    /// Change the display name of a backup
    ///
    /// The file is rewritten with the new name in the encoding its extension
    /// names: JSON for legacy `.json` backups, the native encoding otherwise.
    /// An empty name clears it. The file name does not change.
    pub fn rename(&self, handle: &BackupHandle, name: &str) -> Result<BackupHandle> {
        let mut snapshot = self.read(handle)?;
        snapshot.name = if name.trim().is_empty() {
            None
        } else {
            Some(validate_name(name)?)
        };

        let bytes = if handle.is_legacy() {
            self.codec.encode_json(&snapshot)?
        } else {
            self.codec.encode(&snapshot)?
        };
        crate::utils::atomic_write(&handle.path, &bytes)?;
        debug!("Renamed {} to {:?}", handle.file_name, snapshot.name);
        self.events.publish(BackupEvent::BackupListChanged);
        BackupHandle::from_path(&handle.path)
    }

    /// Delete a backup file
    pub fn delete(&self, handle: &BackupHandle) -> Result<()> {
        fs::remove_file(&handle.path)?;
        info!("Deleted backup {}", handle.file_name);
        self.events.publish(BackupEvent::BackupListChanged);
        Ok(())
    }

    /// Copy an external backup file into the catalog
    ///
    /// Accepts `.aib`, `.json` and extensionless files; the content must
    /// decode. Extensionless files are stored as `.aib`.
    ///
    /// # Errors
    ///
    /// - [`BackupError::UnsupportedFileType`] for any other extension
    /// - [`BackupError::Unreadable`] if the file cannot be read
    /// - [`BackupError::Corrupted`] if the content is not a backup
    #[instrument(skip(self))]
    pub fn import(&self, source: &Path) -> Result<BackupHandle> {
        let extension = match source.extension() {
            None => BACKUP_EXTENSION,
            Some(ext) if ext == BACKUP_EXTENSION => BACKUP_EXTENSION,
            Some(ext) if ext == LEGACY_EXTENSION => LEGACY_EXTENSION,
            Some(_) => {
                return Err(BackupError::UnsupportedFileType {
                    path: source.to_path_buf(),
                })
            }
        };
        let stem = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty() && !stem.starts_with('.'))
            .ok_or_else(|| BackupError::UnsupportedFileType {
                path: source.to_path_buf(),
            })?;

        let bytes = fs::read(source).map_err(|e| BackupError::Unreadable {
            path: source.to_path_buf(),
            source: e,
        })?;
        self.codec.decode_detailed(&bytes)?;

        fs::create_dir_all(&self.dir)?;
        let path = self.unique_path(&stem, extension);
        crate::utils::atomic_write(&path, &bytes)?;

        let handle = BackupHandle::from_path(&path)?;
        info!("Imported {:?} as {}", source, handle.file_name);
        self.events.publish(BackupEvent::BackupListChanged);
        Ok(handle)
    }

    /// Find a backup by file name, stem or unique file name prefix
    pub fn find(&self, query: &str) -> Result<BackupHandle> {
        let handles = self.list()?;
        if let Some(handle) = handles
            .iter()
            .find(|h| h.file_name == query || h.stem() == query)
        {
            return Ok(handle.clone());
        }

        let mut matches: Vec<BackupHandle> = handles
            .into_iter()
            .filter(|h| h.file_name.starts_with(query))
            .collect();
        match matches.len() {
            0 => Err(BackupError::BackupNotFound(query.to_string())),
            1 => Ok(matches.remove(0)),
            count => Err(BackupError::AmbiguousBackup {
                prefix: query.to_string(),
                count,
            }),
        }
    }

    /// Automatic backups paired with their snapshot dates
    ///
    /// Files that fail to load are left out.
    pub fn automatic_backups(&self) -> Result<Vec<(DateTime<Utc>, BackupHandle)>> {
        Ok(self
            .list()?
            .into_iter()
            .filter_map(|handle| {
                let snapshot = self.load(&handle)?;
                snapshot.is_automatic().then_some((snapshot.date, handle))
            })
            .collect())
    }

    fn unique_path(&self, stem: &str, extension: &str) -> PathBuf {
        let mut path = self.dir.join(format!("{}.{}", stem, extension));
        let mut suffix = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}.{}", stem, suffix, extension));
            suffix += 1;
        }
        path
    }
}

fn is_backup_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    if name.starts_with('.') || name.ends_with(".tmp") {
        return false;
    }
    path.extension()
        .is_some_and(|ext| ext == BACKUP_EXTENSION || ext == LEGACY_EXTENSION)
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BackupError::InvalidName("name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(BackupError::InvalidName(format!(
            "name is longer than {} characters",
            MAX_NAME_LEN
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(BackupError::InvalidName("name contains control characters".to_string()));
    }
    Ok(name.to_string())
}
