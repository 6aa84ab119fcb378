//! Collaborators of the backup engine
//!
//! The engine holds no global state. Everything it talks to is injected
//! through a [`Services`] context:
//!
//! - the entity store (see [`crate::store`])
//! - a [`SettingsProvider`] exporting and applying application settings
//! - a [`SourceRegistry`] describing installed sources and source lists
//! - an optional [`SourceClient`] fetching fresh manga data for library
//!   refreshes
//! - the [`EventBus`] change signals are published to
//!
//! In-memory implementations of the settings and source collaborators are
//! provided for the command line tool and for tests.

use crate::error::{BackupError, Result};
use crate::events::EventBus;
use crate::model::{Chapter, Manga};
use crate::value::SettingValue;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Application settings storage
pub trait SettingsProvider: Send + Sync {
    /// Every stored setting
    fn export(&self) -> BTreeMap<String, SettingValue>;

    /// Store one setting
    fn apply(&self, key: &str, value: &SettingValue) -> Result<()>;
}

/// Installed sources and user-added source lists
pub trait SourceRegistry: Send + Sync {
    /// Ids of installed sources
    fn installed_sources(&self) -> Vec<String>;

    /// Urls of the configured source lists
    fn source_lists(&self) -> Vec<String>;

    /// Remove every source list
    fn clear_source_lists(&self) -> Result<()>;

    /// Add a source list
    fn add_source_list(&self, url: &str) -> Result<()>;
}

/// Fresh data for one manga, as returned by its source
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteManga {
    /// Current metadata
    pub manga: Manga,
    /// Current chapter list
    pub chapters: Vec<Chapter>,
}

/// Network access to sources
pub trait SourceClient: Send + Sync {
    /// Fetch current metadata and chapters for a manga
    fn fetch_update<'a>(&'a self, manga: &'a Manga) -> BoxFuture<'a, Result<RemoteManga>>;
}

/// Dependency context shared by every engine component
pub struct Services<S> {
    /// Entity store
    pub store: Arc<S>,
    /// Settings collaborator
    pub settings: Arc<dyn SettingsProvider>,
    /// Source collaborator
    pub sources: Arc<dyn SourceRegistry>,
    /// Network collaborator used by library refreshes
    pub source_client: Option<Arc<dyn SourceClient>>,
    /// Change signal hub
    pub events: EventBus,
    /// Single permit held while a library refresh runs
    pub(crate) refresh_gate: Arc<Semaphore>,
}

impl<S> Clone for Services<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            settings: Arc::clone(&self.settings),
            sources: Arc::clone(&self.sources),
            source_client: self.source_client.clone(),
            events: self.events.clone(),
            refresh_gate: Arc::clone(&self.refresh_gate),
        }
    }
}

impl<S> std::fmt::Debug for Services<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("source_client", &self.source_client.is_some())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl<S> Services<S> {
    /// Create a context with in-memory settings and sources
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            settings: Arc::new(MemorySettings::new()),
            sources: Arc::new(MemorySourceRegistry::new()),
            source_client: None,
            events: EventBus::new(),
            refresh_gate: Arc::new(Semaphore::new(1)),
        }
    }

    /// Replace the settings collaborator
    pub fn with_settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the source collaborator
    pub fn with_sources(mut self, sources: Arc<dyn SourceRegistry>) -> Self {
        self.sources = sources;
        self
    }

    /// Set the network collaborator
    pub fn with_source_client(mut self, client: Arc<dyn SourceClient>) -> Self {
        self.source_client = Some(client);
        self
    }

    /// Publish to an existing event bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }
}

/// Settings kept in memory
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<BTreeMap<String, SettingValue>>,
    read_only: RwLock<BTreeSet<String>>,
}

impl MemorySettings {
    /// Create an empty settings store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a settings store holding `values`
    pub fn with_values(values: BTreeMap<String, SettingValue>) -> Self {
        Self {
            values: RwLock::new(values),
            read_only: RwLock::new(BTreeSet::new()),
        }
    }

    /// Read one setting
    pub fn get(&self, key: &str) -> Option<SettingValue> {
        self.values.read().get(key).cloned()
    }

    /// Store one setting directly
    pub fn set(&self, key: impl Into<String>, value: impl Into<SettingValue>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// Make [`SettingsProvider::apply`] reject a key
    pub fn lock_key(&self, key: impl Into<String>) {
        self.read_only.write().insert(key.into());
    }
}

impl SettingsProvider for MemorySettings {
    fn export(&self) -> BTreeMap<String, SettingValue> {
        self.values.read().clone()
    }

    fn apply(&self, key: &str, value: &SettingValue) -> Result<()> {
        if self.read_only.read().contains(key) {
            return Err(BackupError::InvalidConfiguration(format!("setting '{}' is read-only", key)));
        }
        self.values.write().insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// Source registry kept in memory
#[derive(Debug, Default)]
pub struct MemorySourceRegistry {
    installed: RwLock<Vec<String>>,
    lists: RwLock<Vec<String>>,
}

impl MemorySourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with installed sources and source lists
    pub fn with_sources(installed: Vec<String>, lists: Vec<String>) -> Self {
        Self {
            installed: RwLock::new(installed),
            lists: RwLock::new(lists),
        }
    }

    /// Mark a source as installed
    pub fn install(&self, source_id: impl Into<String>) {
        let source_id = source_id.into();
        let mut installed = self.installed.write();
        if !installed.contains(&source_id) {
            installed.push(source_id);
        }
    }
}

impl SourceRegistry for MemorySourceRegistry {
    fn installed_sources(&self) -> Vec<String> {
        self.installed.read().clone()
    }

    fn source_lists(&self) -> Vec<String> {
        self.lists.read().clone()
    }

    fn clear_source_lists(&self) -> Result<()> {
        self.lists.write().clear();
        Ok(())
    }

    fn add_source_list(&self, url: &str) -> Result<()> {
        let mut lists = self.lists.write();
        if !lists.iter().any(|u| u == url) {
            lists.push(url.to_string());
        }
        Ok(())
    }
}
