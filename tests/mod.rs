//! Main test module for Tankobon
//!
//! This module includes all test suites:
//! - Integration tests for complete backup and restore scenarios
//! - Chaos tests for store failures, cancellation and damaged files
//! - Property-based tests for codec and restore invariants

pub mod integration;
pub mod chaos;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::tankobon::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;
    use std::fs;

    fn services() -> Services<MemoryStore> {
        Services::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_empty_snapshot_touches_nothing() {
        let services = services();
        services
            .store
            .transaction(|ctx| ctx.insert_manga(Manga::new("src", "m1")))
            .unwrap();
        services.store.clear_journal();

        let snapshot = Snapshot::new(Utc::now());
        let report = RestoreOrchestrator::new(services.clone())
            .restore(snapshot, RestoreOptions::default())
            .await
            .unwrap();

        assert!(report
            .groups
            .iter()
            .all(|(_, status)| *status == GroupStatus::Untouched));
        assert_eq!(services.store.count(EntityKind::Manga), 1);
        assert!(services.store.journal().is_empty());
        assert!(report.missing_sources.is_empty());
    }

    #[tokio::test]
    async fn test_empty_list_clears_existing_rows() {
        let services = services();
        let date = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        services
            .store
            .transaction(|ctx| ctx.insert_history(History::new(&ChapterKey::new("src", "m1", "c1"), date)))
            .unwrap();

        let mut snapshot = Snapshot::new(date);
        snapshot.history = Some(Vec::new());
        let report = RestoreOrchestrator::new(services.clone())
            .restore(snapshot, RestoreOptions::default())
            .await
            .unwrap();

        assert_eq!(report.status(RestoreGroup::History), Some(&GroupStatus::Restored { records: 0 }));
        assert_eq!(services.store.count(EntityKind::History), 0);
    }

    #[test]
    fn test_legacy_json_field_forms() {
        let json = r#"{
            "date": 1700000000.5,
            "chapters": [{
                "sourceId": "src",
                "mangaId": "m1",
                "id": "c1",
                "scanlator": "Group A, Group B",
                "chapter": null,
                "volume": 2
            }],
            "library": [{
                "sourceId": "src",
                "mangaId": "m1",
                "lastRead": 1700000000,
                "lastUpdated": 1700000000,
                "dateAdded": 1699999000
            }],
            "settings": {"Reader.pagesToPreload": 3, "General.icloudSync": false}
        }"#;

        let (snapshot, encoding) = SnapshotCodec::new().decode_detailed(json.as_bytes()).unwrap();
        assert_eq!(encoding, Encoding::Json);
        assert!(snapshot.manga.is_none());
        assert_eq!(snapshot.date.timestamp_subsec_millis(), 500);

        let chapter = &snapshot.chapters.as_ref().unwrap()[0];
        assert_eq!(chapter.scanlators, vec!["Group A".to_string(), "Group B".to_string()]);
        assert_eq!(chapter.chapter(), None);
        assert_eq!(chapter.volume(), Some(2.0));
        assert_eq!(chapter.lang, "en");

        let settings = snapshot.settings.as_ref().unwrap();
        assert_eq!(settings["Reader.pagesToPreload"], SettingValue::Int(3));
        assert_eq!(settings["General.icloudSync"], SettingValue::Bool(false));
    }

    #[test]
    fn test_unicode_names_and_titles() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = BackupCatalog::new(temp_dir.path(), EventBus::new());

        let mut snapshot = Snapshot::new(Utc.timestamp_opt(1_700_000_000, 0).single().unwrap());
        let mut manga = Manga::new("ja.source", "漫画-1");
        manga.title = Some("ワンピース 🏴‍☠️".to_string());
        snapshot.manga = Some(vec![manga.clone()]);

        let handle = catalog.save(&snapshot, Some("バックアップ")).unwrap();
        let loaded = catalog.read(&handle).unwrap();
        assert_eq!(loaded.name.as_deref(), Some("バックアップ"));
        assert_eq!(loaded.manga, Some(vec![manga]));
    }

    #[test]
    fn test_garbage_files_never_panic() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = BackupCatalog::new(temp_dir.path(), EventBus::new());

        let inputs: Vec<&[u8]> = vec![b"", b"AIBK", b"AIBK\x02\x00", b"AIBK\x01\x07abc", b"{", b"[]", b"null", &[0xff; 64]];
        for (index, bytes) in inputs.into_iter().enumerate() {
            let path = temp_dir.path().join(format!("garbage_{}.aib", index));
            fs::write(&path, bytes).unwrap();
        }

        let handles = catalog.list().unwrap();
        assert_eq!(handles.len(), 8);
        for handle in &handles {
            assert!(catalog.load(handle).is_none(), "{} decoded", handle.file_name);
        }
    }

    #[tokio::test]
    async fn test_duplicate_keys_last_write_wins() {
        let services = services();
        let mut first = Manga::new("src", "m1");
        first.title = Some("First".to_string());
        let mut second = Manga::new("src", "m1");
        second.title = Some("Second".to_string());

        let mut snapshot = Snapshot::new(Utc::now());
        snapshot.manga = Some(vec![first, second]);
        let report = RestoreOrchestrator::new(services.clone())
            .restore(snapshot, RestoreOptions::default())
            .await
            .unwrap();

        assert_eq!(report.status(RestoreGroup::Manga), Some(&GroupStatus::Restored { records: 2 }));
        let stored = services
            .store
            .transaction(|ctx| ctx.find_manga(&MangaKey::new("src", "m1")))
            .unwrap()
            .unwrap();
        assert_eq!(stored.title.as_deref(), Some("Second"));
        assert_eq!(services.store.count(EntityKind::Manga), 1);
    }
}
