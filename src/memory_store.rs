//! In-process entity store
//!
//! [`MemoryStore`] implements the [`EntityStore`] contract on ordered maps
//! guarded by a mutex. Each transaction works on a private copy of the
//! tables and swaps it in on commit, so a failed transaction leaves no trace
//! and readers never observe a half-applied group.
//!
//! Besides backing the command line tool, the store carries a few testing
//! aids:
//!
//! - a commit journal ([`TxRecord`]) recording which kinds every committed
//!   transaction cleared and wrote, in commit order
//! - fault injection: a transaction touching a faulted kind fails to commit
//! - [`MemoryStore::integrity_problems`] listing dangling references
//!
//! ## Persistence
//!
//! [`StoreImage`] is the serializable form of the tables. The command line
//! tool keeps it as JSON next to the backups directory.

use crate::error::{Result, StoreError, StoreResult};
use crate::model::{Chapter, ChapterKey, History, LibraryEntry, Manga, MangaKey, MangaUpdate, ReadingSession, TrackItem};
use crate::store::{ChapterLinks, EntityKind, EntityStore, RowId, StoreContext};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, trace, warn};

type TrackKey = (String, String, String);

#[derive(Debug, Clone)]
struct LibraryRow {
    entry: LibraryEntry,
    categories: Vec<String>,
}

#[derive(Debug, Clone)]
struct ChapterRow {
    chapter: Chapter,
    links: ChapterLinks,
}

#[derive(Debug, Clone)]
struct SessionRow {
    session: ReadingSession,
    linked: bool,
}

#[derive(Debug, Clone)]
struct UpdateRow {
    update: MangaUpdate,
    linked: bool,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    manga: BTreeMap<MangaKey, Manga>,
    categories: Vec<String>,
    library: BTreeMap<MangaKey, LibraryRow>,
    history: BTreeMap<ChapterKey, History>,
    chapters: BTreeMap<ChapterKey, ChapterRow>,
    sessions: BTreeMap<RowId, SessionRow>,
    updates: BTreeMap<ChapterKey, UpdateRow>,
    tracks: BTreeMap<TrackKey, TrackItem>,
    next_row: u64,
}

/// One committed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    /// Commit sequence number, starting at 1
    pub seq: u64,
    /// Kinds cleared by the transaction
    pub cleared: BTreeSet<EntityKind>,
    /// Kinds written by the transaction
    pub written: BTreeSet<EntityKind>,
}

impl TxRecord {
    /// Whether the transaction cleared or wrote `kind`
    pub fn touches(&self, kind: EntityKind) -> bool {
        self.cleared.contains(&kind) || self.written.contains(&kind)
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: Tables,
    journal: Vec<TxRecord>,
    seq: u64,
}

/// Thread-safe in-memory entity store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    faults: Mutex<HashMap<EntityKind, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the rows of an image
    pub fn from_image(image: StoreImage) -> Self {
        let store = Self::new();
        store.inner.lock().tables = image.into_tables();
        store
    }

    /// Serializable copy of every row
    pub fn image(&self) -> StoreImage {
        StoreImage::from_tables(&self.inner.lock().tables)
    }

    /// Load a store from a JSON image, or an empty store if the file is missing
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No library file at {:?}, starting empty", path);
            return Ok(Self::new());
        }
        let content = std::fs::read(path)?;
        let image: StoreImage = serde_json::from_slice(&content)?;
        Ok(Self::from_image(image))
    }

    /// Save the store as a JSON image
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(&self.image())?;
        crate::utils::atomic_write(path, &content)
    }

    /// Make every transaction touching `kind` fail to commit
    pub fn inject_fault(&self, kind: EntityKind, reason: impl Into<String>) {
        self.faults.lock().insert(kind, reason.into());
    }

    /// Remove an injected fault
    pub fn clear_fault(&self, kind: EntityKind) {
        self.faults.lock().remove(&kind);
    }

    /// Committed transactions in commit order
    pub fn journal(&self) -> Vec<TxRecord> {
        self.inner.lock().journal.clone()
    }

    /// Forget the commit journal
    pub fn clear_journal(&self) {
        self.inner.lock().journal.clear();
    }

    /// First committed transaction touching `kind`
    pub fn first_commit_touching(&self, kind: EntityKind) -> Option<TxRecord> {
        self.inner
            .lock()
            .journal
            .iter()
            .find(|record| record.touches(kind))
            .cloned()
    }

    /// Number of rows of `kind`
    pub fn count(&self, kind: EntityKind) -> usize {
        count_rows(&self.inner.lock().tables, kind)
    }

    /// Dangling references between rows
    ///
    /// Empty for a consistent store.
    pub fn integrity_problems(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let tables = &inner.tables;
        let mut problems = Vec::new();

        for key in tables.library.keys() {
            if !tables.manga.contains_key(key) {
                problems.push(format!("library entry {} has no manga", key));
            }
        }
        for (key, row) in &tables.library {
            for title in &row.categories {
                if !tables.categories.contains(title) {
                    problems.push(format!("library entry {} links missing category {}", key, title));
                }
            }
        }
        for (key, row) in &tables.chapters {
            if row.links.manga && !tables.manga.contains_key(&key.manga()) {
                problems.push(format!("chapter {} linked to missing manga", key));
            }
            if row.links.history && !tables.history.contains_key(key) {
                problems.push(format!("chapter {} linked to missing history", key));
            }
        }
        for row in tables.sessions.values() {
            if row.linked && !tables.history.contains_key(&row.session.history_key()) {
                problems.push(format!("session for {} linked to missing history", row.session.history_key()));
            }
        }
        for (key, row) in &tables.updates {
            if row.linked && !tables.chapters.contains_key(key) {
                problems.push(format!("update {} linked to missing chapter", key));
            }
        }
        problems
    }
}

impl EntityStore for MemoryStore {
    fn transaction<T, F>(&self, body: F) -> StoreResult<T>
    where
        F: FnOnce(&mut dyn StoreContext) -> StoreResult<T>,
    {
        let mut inner = self.inner.lock();
        let mut ctx = MemoryContext {
            tables: inner.tables.clone(),
            cleared: BTreeSet::new(),
            written: BTreeSet::new(),
        };

        let result = body(&mut ctx)?;

        let faults = self.faults.lock();
        if let Some((kind, reason)) = faults
            .iter()
            .find(|(kind, _)| ctx.cleared.contains(*kind) || ctx.written.contains(*kind))
        {
            warn!("Injected fault on {}: rolling back transaction", kind);
            return Err(StoreError::Commit(reason.clone()));
        }
        drop(faults);

        if ctx.cleared.is_empty() && ctx.written.is_empty() {
            trace!("Read-only transaction finished");
            return Ok(result);
        }

        inner.seq += 1;
        let record = TxRecord {
            seq: inner.seq,
            cleared: ctx.cleared,
            written: ctx.written,
        };
        trace!("Committed transaction {} ({:?} cleared, {:?} written)", record.seq, record.cleared, record.written);
        inner.tables = ctx.tables;
        inner.journal.push(record);
        Ok(result)
    }
}

struct MemoryContext {
    tables: Tables,
    cleared: BTreeSet<EntityKind>,
    written: BTreeSet<EntityKind>,
}

fn count_rows(tables: &Tables, kind: EntityKind) -> usize {
    match kind {
        EntityKind::Manga => tables.manga.len(),
        EntityKind::Category => tables.categories.len(),
        EntityKind::LibraryEntry => tables.library.len(),
        EntityKind::History => tables.history.len(),
        EntityKind::Chapter => tables.chapters.len(),
        EntityKind::ReadingSession => tables.sessions.len(),
        EntityKind::MangaUpdate => tables.updates.len(),
        EntityKind::TrackItem => tables.tracks.len(),
    }
}

fn library_entry(row: &LibraryRow) -> LibraryEntry {
    let mut entry = row.entry.clone();
    entry.categories = Some(row.categories.clone());
    entry
}

fn missing_chapter(key: &ChapterKey) -> StoreError {
    StoreError::Constraint(format!("chapter {} does not exist", key))
}

impl StoreContext for MemoryContext {
    fn clear(&mut self, kind: EntityKind) -> StoreResult<usize> {
        let removed = count_rows(&self.tables, kind);
        let tables = &mut self.tables;
        match kind {
            EntityKind::Manga => {
                tables.manga.clear();
                tables.library.clear();
                for row in tables.chapters.values_mut() {
                    row.links.manga = false;
                }
            }
            EntityKind::Category => {
                tables.categories.clear();
                for row in tables.library.values_mut() {
                    row.categories.clear();
                }
            }
            EntityKind::LibraryEntry => tables.library.clear(),
            EntityKind::History => {
                tables.history.clear();
                for row in tables.chapters.values_mut() {
                    row.links.history = false;
                }
                for row in tables.sessions.values_mut() {
                    row.linked = false;
                }
            }
            EntityKind::Chapter => {
                tables.chapters.clear();
                for row in tables.updates.values_mut() {
                    row.linked = false;
                }
            }
            EntityKind::ReadingSession => tables.sessions.clear(),
            EntityKind::MangaUpdate => tables.updates.clear(),
            EntityKind::TrackItem => tables.tracks.clear(),
        }
        self.cleared.insert(kind);
        Ok(removed)
    }

    fn count(&self, kind: EntityKind) -> StoreResult<usize> {
        Ok(count_rows(&self.tables, kind))
    }

    fn insert_manga(&mut self, manga: Manga) -> StoreResult<()> {
        self.tables.manga.insert(manga.key(), manga);
        self.written.insert(EntityKind::Manga);
        Ok(())
    }

    fn find_manga(&self, key: &MangaKey) -> StoreResult<Option<Manga>> {
        Ok(self.tables.manga.get(key).cloned())
    }

    fn all_manga(&self) -> StoreResult<Vec<Manga>> {
        Ok(self.tables.manga.values().cloned().collect())
    }

    fn create_category(&mut self, title: &str) -> StoreResult<()> {
        if !self.tables.categories.iter().any(|t| t == title) {
            self.tables.categories.push(title.to_string());
            self.written.insert(EntityKind::Category);
        }
        Ok(())
    }

    fn category_titles(&self) -> StoreResult<Vec<String>> {
        Ok(self.tables.categories.clone())
    }

    fn upsert_library_entry(&mut self, mut entry: LibraryEntry) -> StoreResult<()> {
        let key = entry.key();
        if !self.tables.manga.contains_key(&key) {
            return Err(StoreError::Constraint(format!("manga {} does not exist", key)));
        }
        entry.categories = None;
        match self.tables.library.get_mut(&key) {
            Some(row) => row.entry = entry,
            None => {
                self.tables.library.insert(
                    key,
                    LibraryRow {
                        entry,
                        categories: Vec::new(),
                    },
                );
            }
        }
        self.written.insert(EntityKind::LibraryEntry);
        Ok(())
    }

    fn attach_categories(&mut self, key: &MangaKey, titles: &[String]) -> StoreResult<usize> {
        let known = &self.tables.categories;
        let row = self
            .tables
            .library
            .get_mut(key)
            .ok_or_else(|| StoreError::Constraint(format!("library entry {} does not exist", key)))?;
        let mut linked = 0;
        for title in titles {
            if known.contains(title) && !row.categories.contains(title) {
                row.categories.push(title.clone());
                linked += 1;
            }
        }
        if linked > 0 {
            self.written.insert(EntityKind::LibraryEntry);
        }
        Ok(linked)
    }

    fn find_library_entry(&self, key: &MangaKey) -> StoreResult<Option<LibraryEntry>> {
        Ok(self.tables.library.get(key).map(library_entry))
    }

    fn library_entries(&self) -> StoreResult<Vec<LibraryEntry>> {
        Ok(self.tables.library.values().map(library_entry).collect())
    }

    fn insert_history(&mut self, history: History) -> StoreResult<()> {
        self.tables.history.insert(history.key(), history);
        self.written.insert(EntityKind::History);
        Ok(())
    }

    fn find_history(&self, key: &ChapterKey) -> StoreResult<Option<History>> {
        Ok(self.tables.history.get(key).cloned())
    }

    fn all_history(&self) -> StoreResult<Vec<History>> {
        Ok(self.tables.history.values().cloned().collect())
    }

    fn insert_chapter(&mut self, chapter: Chapter) -> StoreResult<()> {
        let key = chapter.key();
        match self.tables.chapters.get_mut(&key) {
            Some(row) => row.chapter = chapter,
            None => {
                self.tables.chapters.insert(
                    key,
                    ChapterRow {
                        chapter,
                        links: ChapterLinks::default(),
                    },
                );
            }
        }
        self.written.insert(EntityKind::Chapter);
        Ok(())
    }

    fn find_chapter(&self, key: &ChapterKey) -> StoreResult<Option<Chapter>> {
        Ok(self.tables.chapters.get(key).map(|row| row.chapter.clone()))
    }

    fn delete_chapter(&mut self, key: &ChapterKey) -> StoreResult<bool> {
        let existed = self.tables.chapters.remove(key).is_some();
        if existed {
            if let Some(update) = self.tables.updates.get_mut(key) {
                update.linked = false;
            }
            self.written.insert(EntityKind::Chapter);
        }
        Ok(existed)
    }

    fn all_chapters(&self) -> StoreResult<Vec<Chapter>> {
        Ok(self.tables.chapters.values().map(|row| row.chapter.clone()).collect())
    }

    fn chapters_for(&self, manga: &MangaKey) -> StoreResult<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = self
            .tables
            .chapters
            .iter()
            .filter(|(key, _)| key.source_id == manga.source_id && key.manga_id == manga.manga_id)
            .map(|(_, row)| row.chapter.clone())
            .collect();
        chapters.sort_by_key(|c| c.source_order);
        Ok(chapters)
    }

    fn link_chapter_to_manga(&mut self, key: &ChapterKey) -> StoreResult<bool> {
        let exists = self.tables.manga.contains_key(&key.manga());
        let row = self.tables.chapters.get_mut(key).ok_or_else(|| missing_chapter(key))?;
        row.links.manga = exists;
        self.written.insert(EntityKind::Chapter);
        Ok(exists)
    }

    fn link_chapter_to_history(&mut self, key: &ChapterKey) -> StoreResult<bool> {
        let exists = self.tables.history.contains_key(key);
        let row = self.tables.chapters.get_mut(key).ok_or_else(|| missing_chapter(key))?;
        row.links.history = exists;
        self.written.insert(EntityKind::Chapter);
        Ok(exists)
    }

    fn chapter_links(&self, key: &ChapterKey) -> StoreResult<Option<ChapterLinks>> {
        Ok(self.tables.chapters.get(key).map(|row| row.links))
    }

    fn insert_session(&mut self, session: ReadingSession) -> StoreResult<RowId> {
        self.tables.next_row += 1;
        let id = RowId(self.tables.next_row);
        self.tables.sessions.insert(id, SessionRow { session, linked: false });
        self.written.insert(EntityKind::ReadingSession);
        Ok(id)
    }

    fn link_session_to_history(&mut self, id: RowId) -> StoreResult<bool> {
        let history = &self.tables.history;
        let row = self
            .tables
            .sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::Constraint(format!("session {:?} does not exist", id)))?;
        row.linked = history.contains_key(&row.session.history_key());
        self.written.insert(EntityKind::ReadingSession);
        Ok(row.linked)
    }

    fn all_sessions(&self) -> StoreResult<Vec<ReadingSession>> {
        Ok(self.tables.sessions.values().map(|row| row.session.clone()).collect())
    }

    fn insert_update(&mut self, update: MangaUpdate) -> StoreResult<()> {
        let key = update.chapter_key();
        match self.tables.updates.get_mut(&key) {
            Some(row) => row.update = update,
            None => {
                self.tables.updates.insert(key, UpdateRow { update, linked: false });
            }
        }
        self.written.insert(EntityKind::MangaUpdate);
        Ok(())
    }

    fn link_update_to_chapter(&mut self, key: &ChapterKey) -> StoreResult<bool> {
        let exists = self.tables.chapters.contains_key(key);
        let row = self
            .tables
            .updates
            .get_mut(key)
            .ok_or_else(|| StoreError::Constraint(format!("update {} does not exist", key)))?;
        row.linked = exists;
        self.written.insert(EntityKind::MangaUpdate);
        Ok(exists)
    }

    fn all_updates(&self) -> StoreResult<Vec<MangaUpdate>> {
        Ok(self.tables.updates.values().map(|row| row.update.clone()).collect())
    }

    fn insert_track(&mut self, item: TrackItem) -> StoreResult<()> {
        self.tables.tracks.insert(item.key(), item);
        self.written.insert(EntityKind::TrackItem);
        Ok(())
    }

    fn all_tracks(&self) -> StoreResult<Vec<TrackItem>> {
        Ok(self.tables.tracks.values().cloned().collect())
    }
}

/// A stored chapter with its links
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChapter {
    /// The chapter record
    pub chapter: Chapter,
    /// Its relationship state
    #[serde(default)]
    pub links: ChapterLinks,
}

/// A stored reading session with its link state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Row id
    pub id: RowId,
    /// The session record
    pub session: ReadingSession,
    /// Linked to its history row
    #[serde(default)]
    pub linked: bool,
}

/// A stored update with its link state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUpdate {
    /// The update record
    pub update: MangaUpdate,
    /// Linked to its chapter
    #[serde(default)]
    pub linked: bool,
}

/// Serializable copy of a [`MemoryStore`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreImage {
    /// Manga rows
    pub manga: Vec<Manga>,
    /// Category titles in creation order
    pub categories: Vec<String>,
    /// Library entries with their linked categories
    pub library: Vec<LibraryEntry>,
    /// History rows
    pub history: Vec<History>,
    /// Chapter rows
    pub chapters: Vec<StoredChapter>,
    /// Session rows
    pub sessions: Vec<StoredSession>,
    /// Update rows
    pub updates: Vec<StoredUpdate>,
    /// Tracker links
    pub tracks: Vec<TrackItem>,
}

impl StoreImage {
    fn from_tables(tables: &Tables) -> Self {
        Self {
            manga: tables.manga.values().cloned().collect(),
            categories: tables.categories.clone(),
            library: tables.library.values().map(library_entry).collect(),
            history: tables.history.values().cloned().collect(),
            chapters: tables
                .chapters
                .values()
                .map(|row| StoredChapter {
                    chapter: row.chapter.clone(),
                    links: row.links,
                })
                .collect(),
            sessions: tables
                .sessions
                .iter()
                .map(|(id, row)| StoredSession {
                    id: *id,
                    session: row.session.clone(),
                    linked: row.linked,
                })
                .collect(),
            updates: tables
                .updates
                .values()
                .map(|row| StoredUpdate {
                    update: row.update.clone(),
                    linked: row.linked,
                })
                .collect(),
            tracks: tables.tracks.values().cloned().collect(),
        }
    }

    fn into_tables(self) -> Tables {
        let mut tables = Tables {
            manga: self.manga.into_iter().map(|m| (m.key(), m)).collect(),
            categories: self.categories,
            history: self.history.into_iter().map(|h| (h.key(), h)).collect(),
            tracks: self.tracks.into_iter().map(|t| (t.key(), t)).collect(),
            ..Tables::default()
        };
        for mut entry in self.library {
            let categories = entry.categories.take().unwrap_or_default();
            tables.library.insert(entry.key(), LibraryRow { entry, categories });
        }
        for stored in self.chapters {
            tables.chapters.insert(
                stored.chapter.key(),
                ChapterRow {
                    chapter: stored.chapter,
                    links: stored.links,
                },
            );
        }
        for stored in self.sessions {
            tables.next_row = tables.next_row.max(stored.id.0);
            tables.sessions.insert(
                stored.id,
                SessionRow {
                    session: stored.session,
                    linked: stored.linked,
                },
            );
        }
        for stored in self.updates {
            tables.updates.insert(
                stored.update.chapter_key(),
                UpdateRow {
                    update: stored.update,
                    linked: stored.linked,
                },
            );
        }
        tables
    }
}
