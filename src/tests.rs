//! Integration tests for Tankobon
//!
//! This module contains end-to-end tests running export, encoding and
//! restore through the public API.

#[cfg(test)]
mod integration_tests {
    use crate::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_basic_workflow() {
        let backups_dir = TempDir::new().unwrap();
        let date = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();

        // Populate a library
        let store = Arc::new(MemoryStore::new());
        store
            .transaction(|ctx| {
                let key = MangaKey::new("src", "m1");
                ctx.insert_manga(Manga::new("src", "m1"))?;
                ctx.create_category("Favorites")?;
                ctx.upsert_library_entry(LibraryEntry::new(&key, date))?;
                ctx.attach_categories(&key, &["Favorites".to_string()])?;
                ctx.insert_history(History::new(&key.chapter("c1"), date))?;
                ctx.insert_chapter(Chapter::new("src", "m1", "c1"))?;
                ctx.link_chapter_to_manga(&key.chapter("c1"))?;
                ctx.link_chapter_to_history(&key.chapter("c1"))?;
                Ok(())
            })
            .unwrap();

        let manager = BackupManager::builder()
            .backups_dir(backups_dir.path())
            .compress(true)
            .build(Arc::clone(&store))
            .unwrap();

        // Back up, then lose everything
        let handle = manager.save_new_backup(&ExportOptions::default(), None).await.unwrap();
        store
            .transaction(|ctx| {
                for kind in EntityKind::ALL {
                    ctx.clear(kind)?;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(store.count(EntityKind::Manga), 0);

        // Restore and compare
        let report = manager.restore_file(&handle, RestoreOptions::default()).await.unwrap();
        assert_eq!(report.status(RestoreGroup::Library), Some(&GroupStatus::Restored { records: 1 }));
        assert_eq!(store.count(EntityKind::LibraryEntry), 1);
        assert_eq!(store.count(EntityKind::Chapter), 1);
        assert!(store.integrity_problems().is_empty());

        let entry = store
            .transaction(|ctx| ctx.find_library_entry(&MangaKey::new("src", "m1")))
            .unwrap()
            .unwrap();
        assert_eq!(entry.categories, Some(vec!["Favorites".to_string()]));
    }
}
