//! Snapshot data model
//!
//! Plain records describing a reader library at one point in time. Every
//! record is identified by a natural composite key (source id + manga id,
//! plus chapter id for chapter-level records), never by a storage row id, so
//! a snapshot can be merged into a store whose row ids are unrelated to the
//! device that produced it.
//!
//! ## Records
//!
//! | Record | Key |
//! |--------|-----|
//! | [`Manga`] | `(source_id, id)` |
//! | [`Chapter`] | `(source_id, manga_id, id)` |
//! | [`History`] | `(source_id, manga_id, chapter_id)` |
//! | [`LibraryEntry`] | `(source_id, manga_id)` |
//! | [`TrackItem`] | `(tracker_id, source_id, manga_id)` |
//! | [`ReadingSession`] | none, must match a history key |
//! | [`MangaUpdate`] | `(source_id, manga_id, chapter_id)` |
//! | category | title |
//!
//! ## Encoding conventions
//!
//! - Dates are seconds since the Unix epoch in both envelopes.
//! - Chapter and volume numbers use `-1.0` for "none"
//!   ([`NO_NUMBER`]); text envelopes write `null` instead.
//! - History progress defaults to `-1`, distinguishing "never set" from
//!   "page 0".
//! - Field names are camelCase.
//!
//! Every group of a [`Snapshot`] is optional. An absent group means "do not
//! touch this entity kind on restore", which is different from an empty list.

use crate::utils::{epoch_seconds, number_sentinel, scanlator_list};
use crate::value::SettingValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub use crate::utils::number_sentinel::NO_NUMBER;

/// Natural key of a manga
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MangaKey {
    /// Source the manga comes from
    pub source_id: String,
    /// Manga id within the source
    pub manga_id: String,
}

impl MangaKey {
    /// Create a manga key
    pub fn new(source_id: impl Into<String>, manga_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            manga_id: manga_id.into(),
        }
    }

    /// Key of a chapter of this manga
    pub fn chapter(&self, chapter_id: impl Into<String>) -> ChapterKey {
        ChapterKey {
            source_id: self.source_id.clone(),
            manga_id: self.manga_id.clone(),
            chapter_id: chapter_id.into(),
        }
    }
}

impl fmt::Display for MangaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_id, self.manga_id)
    }
}

/// Natural key of a chapter-level record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChapterKey {
    /// Source the chapter comes from
    pub source_id: String,
    /// Manga the chapter belongs to
    pub manga_id: String,
    /// Chapter id within the manga
    pub chapter_id: String,
}

impl ChapterKey {
    /// Create a chapter key
    pub fn new(
        source_id: impl Into<String>,
        manga_id: impl Into<String>,
        chapter_id: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            manga_id: manga_id.into(),
            chapter_id: chapter_id.into(),
        }
    }

    /// Key of the manga this chapter belongs to
    pub fn manga(&self) -> MangaKey {
        MangaKey::new(self.source_id.clone(), self.manga_id.clone())
    }
}

impl fmt::Display for ChapterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source_id, self.manga_id, self.chapter_id)
    }
}

/// Defines a fieldless enum stored as an `i32`
///
/// Unknown values decode to the default variant so backups written by newer
/// versions still load.
macro_rules! int_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $value:literal
            ),+ $(,)?
        }
        default = $default:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "i32", into = "i32")]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant
            ),+
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl From<i32> for $name {
            fn from(value: i32) -> Self {
                match value {
                    $($value => $name::$variant,)+
                    _ => $name::$default,
                }
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                match value {
                    $($name::$variant => $value,)+
                }
            }
        }
    };
}

int_enum! {
    /// Publication status reported by the source
    pub enum PublishingStatus {
        /// Not reported
        Unknown = 0,
        /// Still publishing
        Ongoing = 1,
        /// Finished
        Completed = 2,
        /// Cancelled before completion
        Cancelled = 3,
        /// On hiatus
        Hiatus = 4,
        /// Announced but not published
        NotPublished = 5,
    }
    default = Unknown
}

int_enum! {
    /// Content rating of a manga
    pub enum ContentRating {
        /// Safe for all audiences
        Safe = 0,
        /// Suggestive content
        Suggestive = 1,
        /// Adult content
        Nsfw = 2,
    }
    default = Safe
}

int_enum! {
    /// Preferred reader mode for a manga
    pub enum Viewer {
        /// Use the application default
        Default = 0,
        /// Right to left paging
        RightToLeft = 1,
        /// Left to right paging
        LeftToRight = 2,
        /// Vertical paging
        Vertical = 3,
        /// Continuous vertical scroll
        Scroll = 4,
    }
    default = Default
}

int_enum! {
    /// Whether library refreshes fetch this manga
    pub enum UpdateStrategy {
        /// Refresh on every library update
        Always = 0,
        /// Never refresh automatically
        Never = 1,
    }
    default = Always
}

/// Bit flags for [`Manga::edited_keys`]
///
/// A set bit marks a field the user overrode manually. Library refreshes
/// leave those fields alone.
pub struct EditedFields;

impl EditedFields {
    /// Title was edited
    pub const TITLE: i32 = 1 << 0;
    /// Author was edited
    pub const AUTHOR: i32 = 1 << 1;
    /// Artist was edited
    pub const ARTIST: i32 = 1 << 2;
    /// Description was edited
    pub const DESCRIPTION: i32 = 1 << 3;
    /// Tags were edited
    pub const TAGS: i32 = 1 << 4;
    /// Cover was edited
    pub const COVER: i32 = 1 << 5;
    /// Url was edited
    pub const URL: i32 = 1 << 6;
    /// Status was edited
    pub const STATUS: i32 = 1 << 7;
    /// Content rating was edited
    pub const CONTENT_RATING: i32 = 1 << 8;
    /// Viewer was edited
    pub const VIEWER: i32 = 1 << 9;
}

/// Manga metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manga {
    /// Source the manga comes from
    pub source_id: String,
    /// Manga id within the source
    pub id: String,
    /// Display title
    #[serde(default)]
    pub title: Option<String>,
    /// Author names
    #[serde(default)]
    pub author: Option<String>,
    /// Artist names
    #[serde(default)]
    pub artist: Option<String>,
    /// Synopsis
    #[serde(default, alias = "desc")]
    pub description: Option<String>,
    /// Genre tags in source order
    #[serde(default)]
    pub tags: Vec<String>,
    /// Cover image reference
    #[serde(default)]
    pub cover: Option<String>,
    /// Canonical url of the manga page
    #[serde(default)]
    pub url: Option<String>,
    /// Publication status
    #[serde(default)]
    pub status: PublishingStatus,
    /// Content rating
    #[serde(default, alias = "nsfw")]
    pub content_rating: ContentRating,
    /// Reader mode
    #[serde(default)]
    pub viewer: Viewer,
    /// Refresh strategy
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
    /// Earliest time the next refresh may fetch this manga
    #[serde(default, with = "epoch_seconds::option")]
    pub next_update_time: Option<DateTime<Utc>>,
    /// Chapter list display flags
    #[serde(default)]
    pub chapter_flags: i32,
    /// Chapter language filter
    #[serde(default)]
    pub lang_filter: Option<String>,
    /// Chapter scanlator filter
    #[serde(default)]
    pub scanlator_filter: Vec<String>,
    /// Fields overridden by the user, see [`EditedFields`]
    #[serde(default)]
    pub edited_keys: i32,
}

impl Manga {
    /// Create a manga with only its key set
    pub fn new(source_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            id: id.into(),
            title: None,
            author: None,
            artist: None,
            description: None,
            tags: Vec::new(),
            cover: None,
            url: None,
            status: PublishingStatus::default(),
            content_rating: ContentRating::default(),
            viewer: Viewer::default(),
            update_strategy: UpdateStrategy::default(),
            next_update_time: None,
            chapter_flags: 0,
            lang_filter: None,
            scanlator_filter: Vec::new(),
            edited_keys: 0,
        }
    }

    /// Natural key of this manga
    pub fn key(&self) -> MangaKey {
        MangaKey::new(self.source_id.clone(), self.id.clone())
    }

    /// Check whether the user overrode a field
    pub fn is_edited(&self, field: i32) -> bool {
        self.edited_keys & field != 0
    }

    /// Merge freshly fetched metadata, keeping user-edited fields
    ///
    /// Local settings (viewer aside from edits, filters, flags, strategy)
    /// are never taken from `fresh`. Returns `true` if anything changed.
    pub fn merge_metadata(&mut self, fresh: &Manga) -> bool {
        let before = self.clone();

        if !self.is_edited(EditedFields::TITLE) && fresh.title.is_some() {
            self.title = fresh.title.clone();
        }
        if !self.is_edited(EditedFields::AUTHOR) && fresh.author.is_some() {
            self.author = fresh.author.clone();
        }
        if !self.is_edited(EditedFields::ARTIST) && fresh.artist.is_some() {
            self.artist = fresh.artist.clone();
        }
        if !self.is_edited(EditedFields::DESCRIPTION) && fresh.description.is_some() {
            self.description = fresh.description.clone();
        }
        if !self.is_edited(EditedFields::TAGS) && !fresh.tags.is_empty() {
            self.tags = fresh.tags.clone();
        }
        if !self.is_edited(EditedFields::COVER) && fresh.cover.is_some() {
            self.cover = fresh.cover.clone();
        }
        if !self.is_edited(EditedFields::URL) && fresh.url.is_some() {
            self.url = fresh.url.clone();
        }
        if !self.is_edited(EditedFields::STATUS) {
            self.status = fresh.status;
        }
        if !self.is_edited(EditedFields::CONTENT_RATING) {
            self.content_rating = fresh.content_rating;
        }
        if !self.is_edited(EditedFields::VIEWER) && fresh.viewer != Viewer::Default {
            self.viewer = fresh.viewer;
        }
        if fresh.next_update_time.is_some() {
            self.next_update_time = fresh.next_update_time;
        }

        *self != before
    }
}

/// A chapter of a manga
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    /// Source the chapter comes from
    pub source_id: String,
    /// Manga the chapter belongs to
    pub manga_id: String,
    /// Chapter id within the manga
    pub id: String,
    /// Chapter title
    #[serde(default)]
    pub title: Option<String>,
    /// Scanlation groups
    #[serde(default, alias = "scanlator", with = "scanlator_list")]
    pub scanlators: Vec<String>,
    /// Chapter url
    #[serde(default)]
    pub url: Option<String>,
    /// Language code
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Chapter number, [`NO_NUMBER`] when unknown
    #[serde(rename = "chapter", default = "number_sentinel::none", with = "number_sentinel")]
    pub chapter_num: f32,
    /// Volume number, [`NO_NUMBER`] when unknown
    #[serde(rename = "volume", default = "number_sentinel::none", with = "number_sentinel")]
    pub volume_num: f32,
    /// Upload date reported by the source
    #[serde(default, with = "epoch_seconds::option")]
    pub date_uploaded: Option<DateTime<Utc>>,
    /// Thumbnail reference
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Chapter requires payment or login
    #[serde(default)]
    pub locked: bool,
    /// Position in the source's chapter list
    #[serde(default)]
    pub source_order: i32,
}

fn default_lang() -> String {
    "en".to_string()
}

impl Chapter {
    /// Create a chapter with only its key set
    pub fn new(source_id: impl Into<String>, manga_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            manga_id: manga_id.into(),
            id: id.into(),
            title: None,
            scanlators: Vec::new(),
            url: None,
            lang: default_lang(),
            chapter_num: NO_NUMBER,
            volume_num: NO_NUMBER,
            date_uploaded: None,
            thumbnail: None,
            locked: false,
            source_order: 0,
        }
    }

    /// Natural key of this chapter
    pub fn key(&self) -> ChapterKey {
        ChapterKey::new(self.source_id.clone(), self.manga_id.clone(), self.id.clone())
    }

    /// Key of the manga this chapter belongs to
    pub fn manga_key(&self) -> MangaKey {
        MangaKey::new(self.source_id.clone(), self.manga_id.clone())
    }

    /// Chapter number, `None` for the sentinel
    pub fn chapter(&self) -> Option<f32> {
        (self.chapter_num >= 0.0).then_some(self.chapter_num)
    }

    /// Volume number, `None` for the sentinel
    pub fn volume(&self) -> Option<f32> {
        (self.volume_num >= 0.0).then_some(self.volume_num)
    }

    /// Scanlators joined with commas, the legacy representation
    pub fn scanlator_string(&self) -> Option<String> {
        (!self.scanlators.is_empty()).then(|| self.scanlators.join(", "))
    }
}

/// Reading progress of one chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    /// Source the chapter comes from
    pub source_id: String,
    /// Manga the chapter belongs to
    pub manga_id: String,
    /// Chapter this progress belongs to
    pub chapter_id: String,
    /// Last time the chapter was read
    #[serde(with = "epoch_seconds")]
    pub date_read: DateTime<Utc>,
    /// Current page, `-1` when never set
    #[serde(default = "no_progress")]
    pub progress: i32,
    /// Page count, if known
    #[serde(default)]
    pub total: Option<i32>,
    /// Chapter was read to the end
    #[serde(default)]
    pub completed: bool,
}

fn no_progress() -> i32 {
    -1
}

impl History {
    /// Create an unread history row for a chapter
    pub fn new(key: &ChapterKey, date_read: DateTime<Utc>) -> Self {
        Self {
            source_id: key.source_id.clone(),
            manga_id: key.manga_id.clone(),
            chapter_id: key.chapter_id.clone(),
            date_read,
            progress: no_progress(),
            total: None,
            completed: false,
        }
    }

    /// Natural key of this history row
    pub fn key(&self) -> ChapterKey {
        ChapterKey::new(self.source_id.clone(), self.manga_id.clone(), self.chapter_id.clone())
    }

    /// Current page, `None` when never set
    pub fn page(&self) -> Option<i32> {
        (self.progress >= 0).then_some(self.progress)
    }
}

/// A manga added to the library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    /// Source the manga comes from
    pub source_id: String,
    /// Manga id within the source
    pub manga_id: String,
    /// Last time the manga was opened
    #[serde(with = "epoch_seconds", alias = "lastRead")]
    pub last_opened: DateTime<Utc>,
    /// Last time new chapters were found
    #[serde(with = "epoch_seconds")]
    pub last_updated: DateTime<Utc>,
    /// When the manga was added
    #[serde(with = "epoch_seconds")]
    pub date_added: DateTime<Utc>,
    /// Category titles the entry belongs to
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

impl LibraryEntry {
    /// Create a library entry with all dates set to `date`
    pub fn new(key: &MangaKey, date: DateTime<Utc>) -> Self {
        Self {
            source_id: key.source_id.clone(),
            manga_id: key.manga_id.clone(),
            last_opened: date,
            last_updated: date,
            date_added: date,
            categories: None,
        }
    }

    /// Key of the manga this entry refers to
    pub fn key(&self) -> MangaKey {
        MangaKey::new(self.source_id.clone(), self.manga_id.clone())
    }

    /// Category titles, empty when none are set
    pub fn category_titles(&self) -> &[String] {
        self.categories.as_deref().unwrap_or(&[])
    }
}

/// Link between a manga and a tracker entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackItem {
    /// Remote id on the tracker
    pub id: String,
    /// Tracker the item belongs to
    pub tracker_id: String,
    /// Source of the tracked manga
    pub source_id: String,
    /// Tracked manga id
    pub manga_id: String,
    /// Title on the tracker
    #[serde(default)]
    pub title: Option<String>,
}

impl TrackItem {
    /// Key of the tracked manga
    pub fn manga_key(&self) -> MangaKey {
        MangaKey::new(self.source_id.clone(), self.manga_id.clone())
    }

    /// Natural key `(tracker_id, source_id, manga_id)`
    pub fn key(&self) -> (String, String, String) {
        (self.tracker_id.clone(), self.source_id.clone(), self.manga_id.clone())
    }
}

/// A continuous span of reading in one chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingSession {
    /// Source the chapter comes from
    pub source_id: String,
    /// Manga the chapter belongs to
    pub manga_id: String,
    /// Chapter that was read
    pub chapter_id: String,
    /// Session start
    #[serde(with = "epoch_seconds")]
    pub start_date: DateTime<Utc>,
    /// Session end
    #[serde(with = "epoch_seconds")]
    pub end_date: DateTime<Utc>,
    /// Pages turned during the session
    pub pages_read: i32,
}

impl ReadingSession {
    /// Key of the history row this session belongs to
    pub fn history_key(&self) -> ChapterKey {
        ChapterKey::new(self.source_id.clone(), self.manga_id.clone(), self.chapter_id.clone())
    }

    /// A session must end after it starts and cover at least one page
    pub fn is_valid(&self) -> bool {
        self.end_date > self.start_date && self.pages_read > 0
    }
}

/// A "new chapter available" notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MangaUpdate {
    /// Source the chapter comes from
    pub source_id: String,
    /// Manga the chapter belongs to
    pub manga_id: String,
    /// The new chapter
    pub chapter_id: String,
    /// When the chapter was found
    #[serde(with = "epoch_seconds")]
    pub date: DateTime<Utc>,
    /// The user has seen the notification
    #[serde(default)]
    pub viewed: bool,
}

impl MangaUpdate {
    /// Key of the chapter this update announces
    pub fn chapter_key(&self) -> ChapterKey {
        ChapterKey::new(self.source_id.clone(), self.manga_id.clone(), self.chapter_id.clone())
    }
}

/// A complete point-in-time export of a library
///
/// Every group is optional: `None` leaves the corresponding store rows alone
/// on restore, `Some(vec![])` clears them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Library entries
    #[serde(default)]
    pub library: Option<Vec<LibraryEntry>>,
    /// Reading history
    #[serde(default)]
    pub history: Option<Vec<History>>,
    /// Manga metadata
    #[serde(default)]
    pub manga: Option<Vec<Manga>>,
    /// Chapters
    #[serde(default)]
    pub chapters: Option<Vec<Chapter>>,
    /// Tracker links
    #[serde(default)]
    pub track_items: Option<Vec<TrackItem>>,
    /// Category titles
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    /// Reading sessions
    #[serde(default)]
    pub reading_sessions: Option<Vec<ReadingSession>>,
    /// New chapter notifications
    #[serde(default)]
    pub updates: Option<Vec<MangaUpdate>>,
    /// Installed source ids on the producing device
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    /// Source list urls
    #[serde(default)]
    pub source_lists: Option<Vec<String>>,
    /// Application settings
    #[serde(default)]
    pub settings: Option<BTreeMap<String, SettingValue>>,
    /// Creation date
    #[serde(with = "epoch_seconds")]
    pub date: DateTime<Utc>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Created by the backup scheduler
    #[serde(default)]
    pub automatic: Option<bool>,
    /// Version of the producing application
    #[serde(default)]
    pub version: Option<String>,
}

impl Snapshot {
    /// Create a snapshot with every group absent
    pub fn new(date: DateTime<Utc>) -> Self {
        Self {
            library: None,
            history: None,
            manga: None,
            chapters: None,
            track_items: None,
            categories: None,
            reading_sessions: None,
            updates: None,
            sources: None,
            source_lists: None,
            settings: None,
            date,
            name: None,
            automatic: None,
            version: None,
        }
    }

    /// Whether the scheduler created this snapshot
    pub fn is_automatic(&self) -> bool {
        self.automatic.unwrap_or(false)
    }

    /// Count records per group
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            manga: self.manga.as_ref().map(Vec::len),
            library: self.library.as_ref().map(Vec::len),
            categories: self.categories.as_ref().map(Vec::len),
            history: self.history.as_ref().map(Vec::len),
            chapters: self.chapters.as_ref().map(Vec::len),
            reading_sessions: self.reading_sessions.as_ref().map(Vec::len),
            updates: self.updates.as_ref().map(Vec::len),
            track_items: self.track_items.as_ref().map(Vec::len),
            settings: self.settings.as_ref().map(BTreeMap::len),
            sources: self.sources.as_ref().map(Vec::len),
            source_lists: self.source_lists.as_ref().map(Vec::len),
        }
    }

    /// Source ids referenced by this snapshot that are not installed
    ///
    /// Uses the recorded `sources` list, falling back to the sources of the
    /// manga in the snapshot for backups that did not record it. The result
    /// is sorted and free of duplicates.
    pub fn missing_sources<S: AsRef<str>>(&self, installed: &[S]) -> Vec<String> {
        let installed: BTreeSet<&str> = installed.iter().map(AsRef::as_ref).collect();
        let referenced: BTreeSet<&str> = match (&self.sources, &self.manga) {
            (Some(sources), _) => sources.iter().map(String::as_str).collect(),
            (None, Some(manga)) => manga.iter().map(|m| m.source_id.as_str()).collect(),
            (None, None) => BTreeSet::new(),
        };
        referenced
            .difference(&installed)
            .map(|s| s.to_string())
            .collect()
    }
}

/// Record counts of a snapshot, `None` for absent groups
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    /// Manga records
    pub manga: Option<usize>,
    /// Library entries
    pub library: Option<usize>,
    /// Categories
    pub categories: Option<usize>,
    /// History rows
    pub history: Option<usize>,
    /// Chapters
    pub chapters: Option<usize>,
    /// Reading sessions
    pub reading_sessions: Option<usize>,
    /// Updates
    pub updates: Option<usize>,
    /// Tracker links
    pub track_items: Option<usize>,
    /// Settings
    pub settings: Option<usize>,
    /// Installed sources
    pub sources: Option<usize>,
    /// Source lists
    pub source_lists: Option<usize>,
}

impl SnapshotSummary {
    /// Label and count for every group, in display order
    pub fn rows(&self) -> [(&'static str, Option<usize>); 11] {
        [
            ("Manga", self.manga),
            ("Library", self.library),
            ("Categories", self.categories),
            ("History", self.history),
            ("Chapters", self.chapters),
            ("Reading sessions", self.reading_sessions),
            ("Updates", self.updates),
            ("Trackers", self.track_items),
            ("Settings", self.settings),
            ("Sources", self.sources),
            ("Source lists", self.source_lists),
        ]
    }
}

impl fmt::Display for SnapshotSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .rows()
            .iter()
            .filter_map(|(label, count)| count.map(|n| format!("{} {}", n, label.to_lowercase())))
            .collect();
        if parts.is_empty() {
            f.write_str("empty")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}
