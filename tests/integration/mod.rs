//! Comprehensive integration tests for Tankobon
//!
//! Tests complete backup and restore scenarios against the in-memory store,
//! including legacy backups, repeated restores, catalog management and the
//! library refresh.

use ::tankobon::*;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

/// Fixed base date so encoded dates stay exact
pub fn base_date() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
}

/// Shape of a generated library
#[derive(Debug, Clone)]
pub struct LibraryConfig {
    pub manga: usize,
    pub chapters_per_manga: usize,
    pub categories: usize,
    pub read_ratio: f64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            manga: 20,
            chapters_per_manga: 8,
            categories: 3,
            read_ratio: 0.5,
        }
    }
}

/// Deterministic generator of library snapshots
pub struct LibraryGenerator {
    rng: StdRng,
}

impl LibraryGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate a snapshot with every group present
    pub fn snapshot(&mut self, config: &LibraryConfig) -> Snapshot {
        let date = base_date();
        let categories: Vec<String> = (0..config.categories).map(|i| format!("Category {}", i)).collect();

        let mut manga = Vec::new();
        let mut library = Vec::new();
        let mut chapters = Vec::new();
        let mut history = Vec::new();
        let mut sessions = Vec::new();
        let mut updates = Vec::new();
        let mut tracks = Vec::new();

        for m in 0..config.manga {
            let source = format!("source.{}", m % 3);
            let manga_id = format!("manga-{}", m);
            let key = MangaKey::new(source.clone(), manga_id.clone());

            let mut record = Manga::new(source.clone(), manga_id.clone());
            record.title = Some(format!("Title {}", m));
            record.tags = vec!["Action".to_string(), "Drama".to_string()];
            record.status = PublishingStatus::Ongoing;
            manga.push(record);

            let mut entry = LibraryEntry::new(&key, date + ChronoDuration::seconds(m as i64));
            if !categories.is_empty() && self.rng.random_bool(0.7) {
                let index = self.rng.random_range(0..categories.len());
                entry.categories = Some(vec![categories[index].clone()]);
            }
            library.push(entry);

            for c in 0..config.chapters_per_manga {
                let chapter_key = key.chapter(format!("ch-{}", c));
                let mut chapter = Chapter::new(source.clone(), manga_id.clone(), chapter_key.chapter_id.clone());
                chapter.chapter_num = c as f32 + 1.0;
                chapter.source_order = c as i32;
                chapter.scanlators = vec!["Team".to_string()];
                chapters.push(chapter);

                if self.rng.random_bool(config.read_ratio) {
                    let mut row = History::new(&chapter_key, date + ChronoDuration::minutes(c as i64));
                    row.progress = self.rng.random_range(0..30);
                    row.completed = self.rng.random_bool(0.5);
                    history.push(row);
                    sessions.push(ReadingSession {
                        source_id: source.clone(),
                        manga_id: manga_id.clone(),
                        chapter_id: chapter_key.chapter_id.clone(),
                        start_date: date,
                        end_date: date + ChronoDuration::minutes(5),
                        pages_read: self.rng.random_range(1..30),
                    });
                } else if c + 1 == config.chapters_per_manga {
                    updates.push(MangaUpdate {
                        source_id: source.clone(),
                        manga_id: manga_id.clone(),
                        chapter_id: chapter_key.chapter_id.clone(),
                        date,
                        viewed: false,
                    });
                }
            }

            if m % 4 == 0 {
                tracks.push(TrackItem {
                    id: format!("{}", 1000 + m),
                    tracker_id: "anilist".to_string(),
                    source_id: source,
                    manga_id,
                    title: Some(format!("Title {}", m)),
                });
            }
        }

        let mut snapshot = Snapshot::new(date);
        snapshot.manga = Some(manga);
        snapshot.library = Some(library);
        snapshot.categories = Some(categories);
        snapshot.chapters = Some(chapters);
        snapshot.history = Some(history);
        snapshot.reading_sessions = Some(sessions);
        snapshot.updates = Some(updates);
        snapshot.track_items = Some(tracks);
        snapshot.sources = Some(vec!["source.0".to_string(), "source.1".to_string(), "source.2".to_string()]);
        snapshot
    }
}

/// Test harness owning a store, its services and a backups directory
pub struct LibraryHarness {
    pub temp_dir: TempDir,
    pub services: Services<MemoryStore>,
    pub manager: BackupManager<MemoryStore>,
}

impl LibraryHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(MemorySourceRegistry::with_sources(
            vec!["source.0".to_string(), "source.1".to_string()],
            Vec::new(),
        ));
        let services = Services::new(store).with_sources(registry);
        let manager = BackupManager::new(
            services.clone(),
            BackupConfig {
                backups_dir: temp_dir.path().join("backups"),
                ..Default::default()
            },
        )
        .unwrap();
        Self {
            temp_dir,
            services,
            manager,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.services.store
    }

    pub async fn restore(&self, snapshot: Snapshot) -> RestoreReport {
        self.manager.restore(snapshot, RestoreOptions::default()).await.unwrap()
    }

    /// Export everything with a fixed date so exports compare equal
    pub async fn export(&self) -> Snapshot {
        let mut snapshot = self.manager.create_backup(&ExportOptions::default()).await.unwrap();
        snapshot.date = base_date();
        snapshot
    }
}

impl Default for LibraryHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn clean_restore_snapshot() -> Snapshot {
    let key = MangaKey::new("test", "m1");
    let mut entry = LibraryEntry::new(&key, base_date());
    entry.categories = Some(vec!["Reading".to_string()]);
    let mut history = History::new(&key.chapter("c1"), base_date());
    history.progress = 3;
    history.completed = false;

    let mut snapshot = Snapshot::new(base_date());
    snapshot.manga = Some(vec![Manga::new("test", "m1")]);
    snapshot.library = Some(vec![entry]);
    snapshot.categories = Some(vec!["Reading".to_string()]);
    snapshot.chapters = Some(vec![Chapter::new("test", "m1", "c1"), Chapter::new("test", "m1", "c2")]);
    snapshot.history = Some(vec![history]);
    snapshot
}

#[tokio::test]
async fn test_clean_restore_scenario() {
    let harness = LibraryHarness::new();
    let report = harness.restore(clean_restore_snapshot()).await;
    assert_eq!(report.library_entries_skipped, 0);

    let key = MangaKey::new("test", "m1");
    let (manga, entry, c1, c2, history) = harness
        .store()
        .transaction(|ctx| {
            Ok((
                ctx.find_manga(&key)?,
                ctx.find_library_entry(&key)?,
                ctx.chapter_links(&key.chapter("c1"))?,
                ctx.chapter_links(&key.chapter("c2"))?,
                ctx.find_history(&key.chapter("c1"))?,
            ))
        })
        .unwrap();

    assert!(manga.is_some());
    assert_eq!(entry.unwrap().categories, Some(vec!["Reading".to_string()]));
    let c1 = c1.unwrap();
    let c2 = c2.unwrap();
    assert!(c1.manga && c1.history);
    assert!(c2.manga && !c2.history);
    let history = history.unwrap();
    assert_eq!(history.progress, 3);
    assert!(!history.completed);
    assert!(harness.store().integrity_problems().is_empty());
}

#[tokio::test]
async fn test_legacy_json_with_missing_manga() {
    let harness = LibraryHarness::new();
    let json = r#"{
        "date": 1700000000,
        "manga": [{"sourceId": "test", "id": "present"}],
        "library": [{
            "sourceId": "test",
            "mangaId": "absent",
            "lastOpened": 1700000000,
            "lastUpdated": 1700000000,
            "dateAdded": 1700000000,
            "categories": []
        }]
    }"#;

    let snapshot = SnapshotCodec::new().decode(json.as_bytes()).expect("legacy backup decodes");
    let report = harness.restore(snapshot).await;

    assert_eq!(harness.store().count(EntityKind::LibraryEntry), 0);
    assert_eq!(report.library_entries_skipped, 1);
    assert_eq!(report.status(RestoreGroup::Library), Some(&GroupStatus::Restored { records: 0 }));
    assert!(harness.store().integrity_problems().is_empty());
}

#[tokio::test]
async fn test_restore_is_idempotent() {
    let harness = LibraryHarness::new();
    let snapshot = LibraryGenerator::new(7).snapshot(&LibraryConfig::default());

    harness.restore(snapshot.clone()).await;
    let first = harness.export().await;
    let counts: Vec<usize> = EntityKind::ALL.iter().map(|kind| harness.store().count(*kind)).collect();

    harness.restore(snapshot).await;
    let second = harness.export().await;

    assert_eq!(first, second);
    let recounted: Vec<usize> = EntityKind::ALL.iter().map(|kind| harness.store().count(*kind)).collect();
    assert_eq!(counts, recounted);
    assert!(harness.store().integrity_problems().is_empty());
}

#[tokio::test]
async fn test_export_restore_round_trip_through_file() {
    let source = LibraryHarness::new();
    let snapshot = LibraryGenerator::new(11).snapshot(&LibraryConfig {
        manga: 12,
        ..Default::default()
    });
    source.restore(snapshot).await;
    let handle = source
        .manager
        .save_new_backup(&ExportOptions::default(), Some("transfer"))
        .await
        .unwrap();

    // Move the file to another device
    let target = LibraryHarness::new();
    let imported = target.manager.import(&handle.path).unwrap();
    let report = target
        .manager
        .restore_file(&imported, RestoreOptions::default())
        .await
        .unwrap();

    info!("Restored {} records", report.records_restored());
    assert_eq!(source.export().await, target.export().await);
    assert_eq!(report.missing_sources, Vec::<String>::new());
}

#[tokio::test]
async fn test_partial_presence() {
    let harness = LibraryHarness::new();
    harness.restore(LibraryGenerator::new(3).snapshot(&LibraryConfig::default())).await;
    let history_before = harness.store().count(EntityKind::History);
    assert!(history_before > 0);

    // Only trackers and categories present
    let mut partial = Snapshot::new(base_date());
    partial.track_items = Some(Vec::new());
    partial.categories = Some(vec!["New".to_string()]);
    harness.restore(partial).await;

    assert_eq!(harness.store().count(EntityKind::History), history_before);
    assert_eq!(harness.store().count(EntityKind::TrackItem), 0);
    let entries = harness
        .store()
        .transaction(|ctx| ctx.library_entries())
        .unwrap();
    // Category links were cleared with the categories
    assert!(entries.iter().all(|entry| entry.category_titles().is_empty()));
}

#[tokio::test]
async fn test_missing_sources_reported() {
    let harness = LibraryHarness::new();
    let snapshot = LibraryGenerator::new(5).snapshot(&LibraryConfig::default());
    let report = harness.restore(snapshot).await;
    assert_eq!(report.missing_sources, vec!["source.2".to_string()]);
}

#[tokio::test]
async fn test_catalog_orders_by_modification_time() {
    let harness = LibraryHarness::new();
    let catalog = harness.manager.catalog();
    let older = catalog.save(&Snapshot::new(base_date()), Some("older")).unwrap();
    let newer = catalog
        .save(&Snapshot::new(base_date() + ChronoDuration::days(1)), Some("newer"))
        .unwrap();

    // Make the file written second look older on disk
    let now = filetime::FileTime::now();
    let old = filetime::FileTime::from_unix_time(now.unix_seconds() - 3600, 0);
    filetime::set_file_mtime(&newer.path, old).unwrap();
    filetime::set_file_mtime(&older.path, now).unwrap();

    let names: Vec<String> = catalog.list().unwrap().into_iter().map(|h| h.file_name).collect();
    assert_eq!(names, vec![older.file_name.clone(), newer.file_name.clone()]);
}

#[tokio::test]
async fn test_export_profile_leaves_groups_absent() {
    let harness = LibraryHarness::new();
    harness.restore(LibraryGenerator::new(9).snapshot(&LibraryConfig::default())).await;

    let mut options = ExportOptions::default();
    options.exclude("history").unwrap();
    options.exclude("sessions").unwrap();
    let partial = harness.manager.create_backup(&options).await.unwrap();
    assert!(partial.history.is_none());
    assert!(partial.reading_sessions.is_none());

    // Restoring the partial backup keeps existing history
    let history_before = harness.store().count(EntityKind::History);
    harness.restore(partial).await;
    assert_eq!(harness.store().count(EntityKind::History), history_before);
    assert!(harness.store().integrity_problems().is_empty());
}

struct StaticClient {
    chapters: HashMap<String, Vec<Chapter>>,
}

impl SourceClient for StaticClient {
    fn fetch_update<'a>(&'a self, manga: &'a Manga) -> BoxFuture<'a, Result<RemoteManga>> {
        async move {
            let chapters = self.chapters.get(&manga.id).cloned().unwrap_or_default();
            let mut fresh = manga.clone();
            fresh.title = Some(format!("{} (updated)", manga.title.clone().unwrap_or_default()));
            Ok(RemoteManga { manga: fresh, chapters })
        }
        .boxed()
    }
}

#[tokio::test]
async fn test_restore_runs_library_refresh() {
    let mut remote = HashMap::new();
    let mut chapters = vec![Chapter::new("test", "m1", "c1"), Chapter::new("test", "m1", "c2")];
    chapters.push(Chapter::new("test", "m1", "c3"));
    remote.insert("m1".to_string(), chapters);

    let registry = Arc::new(MemorySourceRegistry::with_sources(vec!["test".to_string()], Vec::new()));
    let services = Services::new(Arc::new(MemoryStore::new()))
        .with_sources(registry)
        .with_source_client(Arc::new(StaticClient { chapters: remote }));
    let mut events = services.events.subscribe();

    let report = RestoreOrchestrator::new(services.clone())
        .restore(clean_restore_snapshot(), RestoreOptions::default())
        .await
        .unwrap();

    let refresh = report.refresh.expect("refresh ran");
    assert_eq!(refresh.checked, 1);
    assert_eq!(refresh.new_chapters, 1);
    assert_eq!(services.store.count(EntityKind::Chapter), 3);
    assert_eq!(services.store.count(EntityKind::MangaUpdate), 1);
    assert_eq!(
        events::drain(&mut events),
        vec![
            BackupEvent::HistoryUpdated,
            BackupEvent::TrackersUpdated,
            BackupEvent::CategoriesUpdated,
            BackupEvent::LibraryUpdated,
        ]
    );

    // Opting out skips the refresh
    let report = RestoreOrchestrator::new(services)
        .restore(
            clean_restore_snapshot(),
            RestoreOptions {
                refresh_library: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(report.refresh.is_none());
}

#[test]
fn test_config_persistence() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config").join("tankobon.json");

    let mut config = BackupConfig::default();
    config.compress = true;
    config.auto_backup.enabled = true;
    config.auto_backup.interval = BackupInterval::Weekly;
    config.save(&path).unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"weekly\""));
    assert_eq!(BackupConfig::load(&path).unwrap(), config);
}

#[cfg(test)]
mod traced {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[tokio::test]
    async fn test_restore_logs_dropped_entries() {
        let harness = LibraryHarness::new();
        let mut snapshot = clean_restore_snapshot();
        snapshot.manga = Some(Vec::new());
        let report = harness.restore(snapshot).await;

        assert_eq!(report.library_entries_skipped, 1);
        assert!(logs_contain("1 library entries skipped"));
    }
}
