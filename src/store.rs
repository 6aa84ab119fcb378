//! Entity store adapter contract
//!
//! The backup engine never talks to a storage engine directly. It consumes
//! the [`EntityStore`] trait: a transactional, natural-key indexed store with
//! one set of primitives per entity kind. Any relational or object store can
//! back it; [`MemoryStore`](crate::memory_store::MemoryStore) is the
//! in-process implementation used by the command line tool and the tests.
//!
//! ## Transactions
//!
//! [`EntityStore::transaction`] runs a closure against a [`StoreContext`] and
//! commits its changes atomically when the closure returns `Ok`. An `Err`
//! discards every change made by the closure. [`perform_background`] runs a
//! transaction on tokio's blocking pool so async callers yield while it runs.
//!
//! ## Links
//!
//! Relationships are reconstructed from natural keys after insertion:
//!
//! - a chapter is linked to its manga and to the history row with the same key
//! - a reading session is linked to the history row with the same key
//! - an update is linked to the chapter with the same key
//! - a library entry always refers to an existing manga and carries links to
//!   category rows by title
//!
//! Clearing a kind removes or unlinks the rows that depend on it, the same
//! way a relational store with cascade rules would.

use crate::error::{StoreError, StoreResult};
use crate::model::{Chapter, ChapterKey, History, LibraryEntry, Manga, MangaKey, MangaUpdate, ReadingSession, TrackItem};
use crate::types::RestoreGroup;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kinds of rows held by an entity store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    /// Manga metadata
    Manga,
    /// Category labels
    Category,
    /// Library entries
    LibraryEntry,
    /// Reading history
    History,
    /// Chapters
    Chapter,
    /// Reading sessions
    ReadingSession,
    /// New chapter notifications
    MangaUpdate,
    /// Tracker links
    TrackItem,
}

impl EntityKind {
    /// Every kind
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Manga,
        EntityKind::Category,
        EntityKind::LibraryEntry,
        EntityKind::History,
        EntityKind::Chapter,
        EntityKind::ReadingSession,
        EntityKind::MangaUpdate,
        EntityKind::TrackItem,
    ];

    /// The kind of rows a restore group writes
    pub fn for_group(group: RestoreGroup) -> Self {
        match group {
            RestoreGroup::Manga => EntityKind::Manga,
            RestoreGroup::Categories => EntityKind::Category,
            RestoreGroup::Library => EntityKind::LibraryEntry,
            RestoreGroup::History => EntityKind::History,
            RestoreGroup::Chapters => EntityKind::Chapter,
            RestoreGroup::Sessions => EntityKind::ReadingSession,
            RestoreGroup::Updates => EntityKind::MangaUpdate,
            RestoreGroup::Track => EntityKind::TrackItem,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Store-internal identifier of a row without a natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub u64);

/// Relationship state of a stored chapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterLinks {
    /// Linked to its manga
    pub manga: bool,
    /// Linked to the history row with the same key
    pub history: bool,
}

/// Operations available inside a store transaction
///
/// All lookups are by natural key. Insert operations are upserts: inserting
/// a record whose key already exists replaces its attributes and keeps its
/// links.
pub trait StoreContext {
    /// Delete every row of `kind`, returning how many were removed
    ///
    /// Dependent rows are removed or unlinked: clearing manga removes library
    /// entries, clearing categories removes library category links, clearing
    /// history unlinks chapters and sessions, clearing chapters unlinks
    /// updates.
    fn clear(&mut self, kind: EntityKind) -> StoreResult<usize>;

    /// Number of rows of `kind`
    fn count(&self, kind: EntityKind) -> StoreResult<usize>;

    /// Insert or replace a manga
    fn insert_manga(&mut self, manga: Manga) -> StoreResult<()>;

    /// Look up a manga
    fn find_manga(&self, key: &MangaKey) -> StoreResult<Option<Manga>>;

    /// Every manga, ordered by key
    fn all_manga(&self) -> StoreResult<Vec<Manga>>;

    /// Create a category if no category with this title exists
    fn create_category(&mut self, title: &str) -> StoreResult<()>;

    /// Category titles in creation order
    fn category_titles(&self) -> StoreResult<Vec<String>>;

    /// Insert or replace a library entry
    ///
    /// The entry's `categories` field is ignored, category links are managed
    /// with [`StoreContext::attach_categories`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] when the manga does not exist.
    fn upsert_library_entry(&mut self, entry: LibraryEntry) -> StoreResult<()>;

    /// Link a library entry to the categories with the given titles
    ///
    /// Titles without a matching category are ignored. Returns the number of
    /// links made.
    fn attach_categories(&mut self, key: &MangaKey, titles: &[String]) -> StoreResult<usize>;

    /// Look up a library entry, with its linked category titles
    fn find_library_entry(&self, key: &MangaKey) -> StoreResult<Option<LibraryEntry>>;

    /// Every library entry with its linked category titles, ordered by key
    fn library_entries(&self) -> StoreResult<Vec<LibraryEntry>>;

    /// Insert or replace a history row
    fn insert_history(&mut self, history: History) -> StoreResult<()>;

    /// Look up a history row
    fn find_history(&self, key: &ChapterKey) -> StoreResult<Option<History>>;

    /// Every history row, ordered by key
    fn all_history(&self) -> StoreResult<Vec<History>>;

    /// Insert or replace a chapter
    fn insert_chapter(&mut self, chapter: Chapter) -> StoreResult<()>;

    /// Look up a chapter
    fn find_chapter(&self, key: &ChapterKey) -> StoreResult<Option<Chapter>>;

    /// Delete a chapter, returning whether it existed
    fn delete_chapter(&mut self, key: &ChapterKey) -> StoreResult<bool>;

    /// Every chapter, ordered by key
    fn all_chapters(&self) -> StoreResult<Vec<Chapter>>;

    /// Chapters of one manga, ordered by source order
    fn chapters_for(&self, manga: &MangaKey) -> StoreResult<Vec<Chapter>>;

    /// Link a chapter to its manga, returning whether the manga exists
    fn link_chapter_to_manga(&mut self, key: &ChapterKey) -> StoreResult<bool>;

    /// Link a chapter to its history row, returning whether one exists
    fn link_chapter_to_history(&mut self, key: &ChapterKey) -> StoreResult<bool>;

    /// Relationship state of a chapter
    fn chapter_links(&self, key: &ChapterKey) -> StoreResult<Option<ChapterLinks>>;

    /// Insert a reading session
    fn insert_session(&mut self, session: ReadingSession) -> StoreResult<RowId>;

    /// Link a session to its history row, returning whether one exists
    fn link_session_to_history(&mut self, id: RowId) -> StoreResult<bool>;

    /// Every reading session in insertion order
    fn all_sessions(&self) -> StoreResult<Vec<ReadingSession>>;

    /// Insert or replace an update
    fn insert_update(&mut self, update: MangaUpdate) -> StoreResult<()>;

    /// Link an update to its chapter, returning whether the chapter exists
    fn link_update_to_chapter(&mut self, key: &ChapterKey) -> StoreResult<bool>;

    /// Every update, ordered by key
    fn all_updates(&self) -> StoreResult<Vec<MangaUpdate>>;

    /// Insert or replace a tracker link
    fn insert_track(&mut self, item: TrackItem) -> StoreResult<()>;

    /// Every tracker link, ordered by key
    fn all_tracks(&self) -> StoreResult<Vec<TrackItem>>;
}

/// A transactional entity store
///
/// Implementations must be safe to share between the tasks of a restore.
/// Every transaction is atomic: either all of its changes become visible or
/// none do.
pub trait EntityStore: Send + Sync + 'static {
    /// Run `body` inside one atomic transaction
    ///
    /// Changes are committed when `body` returns `Ok` and discarded when it
    /// returns `Err`.
    fn transaction<T, F>(&self, body: F) -> StoreResult<T>
    where
        F: FnOnce(&mut dyn StoreContext) -> StoreResult<T>;
}

impl<S: EntityStore> EntityStore for Arc<S> {
    fn transaction<T, F>(&self, body: F) -> StoreResult<T>
    where
        F: FnOnce(&mut dyn StoreContext) -> StoreResult<T>,
    {
        (**self).transaction(body)
    }
}

/// Run a transaction on the blocking thread pool
///
/// The calling task is suspended until the transaction finishes. A panic
/// inside `body` is reported as [`StoreError::Background`] and leaves the
/// store unchanged.
pub async fn perform_background<S, T, F>(store: &Arc<S>, body: F) -> StoreResult<T>
where
    S: EntityStore,
    T: Send + 'static,
    F: FnOnce(&mut dyn StoreContext) -> StoreResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.transaction(body))
        .await
        .map_err(|e| StoreError::Background(e.to_string()))?
}
