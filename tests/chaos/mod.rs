//! Chaos tests for Tankobon
//!
//! Exercises restores against stores that fail, panic or get cancelled
//! mid-flight, and decoding of damaged backup files.

use ::tankobon::*;
use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn date() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
}

/// A snapshot touching every group the restore graph declares
fn full_snapshot() -> Snapshot {
    let key = MangaKey::new("src", "m1");
    let chapter = key.chapter("c1");
    let mut entry = LibraryEntry::new(&key, date());
    entry.categories = Some(vec!["Reading".to_string()]);

    let mut snapshot = Snapshot::new(date());
    snapshot.manga = Some(vec![Manga::new("src", "m1")]);
    snapshot.categories = Some(vec!["Reading".to_string()]);
    snapshot.library = Some(vec![entry]);
    snapshot.history = Some(vec![History::new(&chapter, date())]);
    snapshot.chapters = Some(vec![Chapter::new("src", "m1", "c1")]);
    snapshot.reading_sessions = Some(vec![ReadingSession {
        source_id: "src".to_string(),
        manga_id: "m1".to_string(),
        chapter_id: "c1".to_string(),
        start_date: date(),
        end_date: date() + chrono::Duration::minutes(3),
        pages_read: 4,
    }]);
    snapshot.updates = Some(vec![MangaUpdate {
        source_id: "src".to_string(),
        manga_id: "m1".to_string(),
        chapter_id: "c1".to_string(),
        date: date(),
        viewed: true,
    }]);
    snapshot.track_items = Some(vec![TrackItem {
        id: "42".to_string(),
        tracker_id: "myanimelist".to_string(),
        source_id: "src".to_string(),
        manga_id: "m1".to_string(),
        title: None,
    }]);
    snapshot
}

/// Store wrapper that cancels a token once its first transaction committed
struct CancellingStore {
    inner: MemoryStore,
    token: CancellationToken,
    transactions: AtomicUsize,
}

impl EntityStore for CancellingStore {
    fn transaction<T, F>(&self, body: F) -> std::result::Result<T, StoreError>
    where
        F: FnOnce(&mut dyn StoreContext) -> std::result::Result<T, StoreError>,
    {
        let result = self.inner.transaction(body);
        if self.transactions.fetch_add(1, Ordering::SeqCst) == 0 {
            self.token.cancel();
        }
        result
    }
}

/// Store wrapper whose transactions always panic
struct PanickingStore;

impl EntityStore for PanickingStore {
    fn transaction<T, F>(&self, _body: F) -> std::result::Result<T, StoreError>
    where
        F: FnOnce(&mut dyn StoreContext) -> std::result::Result<T, StoreError>,
    {
        panic!("storage engine crashed");
    }
}

#[tokio::test]
async fn test_manga_failure_blocks_dependents() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.inject_fault(EntityKind::Manga, "disk full");
    let services = Services::new(Arc::clone(&store));

    let mut snapshot = full_snapshot();
    snapshot.track_items = None;
    let err = RestoreOrchestrator::new(services)
        .restore(snapshot, RestoreOptions::default())
        .await
        .unwrap_err();

    match err {
        BackupError::Restore { first, failures } => {
            assert_eq!(first.group, RestoreGroup::Manga);
            assert!(first.reason.contains("disk full"));
            assert_eq!(failures.len(), 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Only categories had no failing predecessor
    let journal = store.journal();
    assert_eq!(journal.len(), 1);
    assert!(journal[0].touches(EntityKind::Category));
    assert_eq!(store.count(EntityKind::Manga), 0);
    assert_eq!(store.count(EntityKind::Chapter), 0);
    assert!(store.integrity_problems().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_independent_groups_commit_past_a_failure() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.inject_fault(EntityKind::TrackItem, "tracker table locked");
    let services = Services::new(Arc::clone(&store));
    let mut events = services.events.subscribe();

    let err = RestoreOrchestrator::new(services)
        .restore(full_snapshot(), RestoreOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.failed_group(), Some(RestoreGroup::Track));
    assert!(err.user_message().contains(RestoreGroup::Track.display_name()));
    for kind in [
        EntityKind::Manga,
        EntityKind::Category,
        EntityKind::LibraryEntry,
        EntityKind::History,
        EntityKind::Chapter,
        EntityKind::ReadingSession,
        EntityKind::MangaUpdate,
    ] {
        assert_eq!(store.count(kind), 1, "{kind} not restored");
    }
    assert_eq!(store.count(EntityKind::TrackItem), 0);
    assert!(events::drain(&mut events).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_failed_group_keeps_previous_rows() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.transaction(|ctx| ctx.insert_history(History::new(&ChapterKey::new("old", "m", "c"), date())))?;
    store.inject_fault(EntityKind::History, "constraint violation");

    let mut snapshot = Snapshot::new(date());
    snapshot.history = Some(Vec::new());
    let result = RestoreOrchestrator::new(Services::new(Arc::clone(&store)))
        .restore(snapshot, RestoreOptions::default())
        .await;

    assert!(result.is_err());
    assert_eq!(store.count(EntityKind::History), 1);

    // Retrying after the fault is gone succeeds
    store.clear_fault(EntityKind::History);
    let mut snapshot = Snapshot::new(date());
    snapshot.history = Some(Vec::new());
    RestoreOrchestrator::new(Services::new(Arc::clone(&store)))
        .restore(snapshot, RestoreOptions::default())
        .await?;
    assert_eq!(store.count(EntityKind::History), 0);
    Ok(())
}

#[tokio::test]
async fn test_cancel_mid_restore() -> Result<()> {
    let token = CancellationToken::new();
    let store = Arc::new(CancellingStore {
        inner: MemoryStore::new(),
        token: token.clone(),
        transactions: AtomicUsize::new(0),
    });
    let services = Services::new(Arc::clone(&store));
    let mut events = services.events.subscribe();

    let err = RestoreOrchestrator::new(services)
        .restore(
            full_snapshot(),
            RestoreOptions {
                cancel: Some(token),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::Cancelled));
    assert!(store.inner.first_commit_touching(EntityKind::LibraryEntry).is_none());
    assert!(store.inner.first_commit_touching(EntityKind::Chapter).is_none());
    assert!(store.inner.first_commit_touching(EntityKind::MangaUpdate).is_none());
    assert!(store.inner.integrity_problems().is_empty());
    assert!(events::drain(&mut events).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_panicking_store_reported_as_failure() -> Result<()> {
    let services = Services::new(Arc::new(PanickingStore));

    let mut snapshot = Snapshot::new(date());
    snapshot.manga = Some(vec![Manga::new("src", "m1")]);
    snapshot.categories = Some(vec!["Reading".to_string()]);
    let err = RestoreOrchestrator::new(services)
        .restore(snapshot, RestoreOptions::default())
        .await
        .unwrap_err();

    match err {
        BackupError::Restore { first, failures } => {
            assert_eq!(first.group, RestoreGroup::Manga);
            let groups: Vec<RestoreGroup> = failures.iter().map(|f| f.group).collect();
            assert_eq!(groups, vec![RestoreGroup::Manga, RestoreGroup::Categories]);
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn test_damaged_files_never_panic() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let catalog = BackupCatalog::new(temp_dir.path(), EventBus::new());
    let handle = catalog.save(&full_snapshot(), Some("intact"))?;
    let bytes = fs::read(&handle.path)?;
    assert!(catalog.load(&handle).is_some());

    let codec = SnapshotCodec::new();
    for len in 0..bytes.len() {
        let _ = codec.decode(&bytes[..len]);
    }
    for index in 0..bytes.len() {
        for bit in [0x01u8, 0x80] {
            let mut damaged = bytes.clone();
            damaged[index] ^= bit;
            let _ = codec.decode(&damaged);
        }
    }

    // A truncated file on disk is reported, not decoded
    fs::write(&handle.path, &bytes[..bytes.len() / 2])?;
    assert!(catalog.load(&handle).is_none());
    assert!(catalog.read(&handle).unwrap_err().is_corruption());
    Ok(())
}

#[test]
fn test_damaged_compressed_payload() -> Result<()> {
    let codec = SnapshotCodec::compressed();
    let mut snapshot = full_snapshot();
    snapshot.manga = Some(
        (0..200)
            .map(|i| {
                let mut manga = Manga::new("src", format!("m{i}"));
                manga.description = Some("A long description that repeats. ".repeat(4));
                manga
            })
            .collect(),
    );
    let bytes = codec.encode(&snapshot)?;
    assert_eq!(codec.decode_detailed(&bytes)?.1, Encoding::Binary { compressed: true });

    for cut in [7, 10, bytes.len() / 3, bytes.len() - 1] {
        assert!(codec.decode(&bytes[..cut]).is_none());
    }
    let mut damaged = bytes.clone();
    // Claim an absurd decompressed size
    damaged[6..10].copy_from_slice(&u32::MAX.to_le_bytes());
    assert!(codec.decode(&damaged).is_none());
    Ok(())
}
