//! Property-based testing for Tankobon
//!
//! Uses proptest to verify codec and restore invariants across randomly
//! generated libraries.

use ::tankobon::*;
use ::tankobon::store::ChapterLinks;
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Whole-second dates so both encodings reproduce them exactly
fn date_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (1_500_000_000i64..1_900_000_000).prop_map(|secs| Utc.timestamp_opt(secs, 0).single().unwrap())
}

fn id_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z0-9]{1,12}".prop_map(|s| s),
        "[a-z]{2,6}\\.[a-z]{2,8}".prop_map(|s| s),
        "[\\p{Han}\\p{Hiragana}]{1,4}".prop_map(|s| s),
    ]
}

/// Chapter and volume numbers: the sentinel or a half-step number
fn number_strategy() -> impl Strategy<Value = f32> {
    prop_oneof![Just(-1.0f32), (0u32..2000).prop_map(|n| n as f32 / 2.0)]
}

fn setting_strategy() -> impl Strategy<Value = SettingValue> {
    let leaf = prop_oneof![
        Just(SettingValue::Null),
        any::<bool>().prop_map(SettingValue::Bool),
        any::<i64>().prop_map(SettingValue::Int),
        (-1.0e6f64..1.0e6).prop_map(SettingValue::Double),
        "[ -~]{0,16}".prop_map(SettingValue::String),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(SettingValue::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(SettingValue::Object),
        ]
    })
}

/// Manga ids with chapters and the subset of chapters that were read
#[derive(Debug, Clone)]
struct GeneratedManga {
    id: String,
    chapters: Vec<(String, f32, bool)>,
    in_library: bool,
}

fn manga_strategy() -> impl Strategy<Value = GeneratedManga> {
    (
        id_strategy(),
        prop::collection::btree_map(id_strategy(), (number_strategy(), any::<bool>()), 0..8),
        any::<bool>(),
    )
        .prop_map(|(id, chapters, in_library)| GeneratedManga {
            id,
            chapters: chapters
                .into_iter()
                .map(|(chapter, (number, read))| (chapter, number, read))
                .collect(),
            in_library,
        })
}

fn snapshot_strategy() -> impl Strategy<Value = Snapshot> {
    (
        prop::collection::btree_map(id_strategy(), manga_strategy(), 0..8),
        prop::collection::btree_set("[A-Za-z ]{1,10}", 0..4),
        prop::collection::btree_map("[A-Z][a-z]{2,8}\\.[a-z]{2,10}", setting_strategy(), 0..6),
        date_strategy(),
        proptest::option::of("[a-z ]{1,20}"),
    )
        .prop_map(|(manga, categories, settings, date, name)| build_snapshot(manga, categories, settings, date, name))
}

fn build_snapshot(
    manga: BTreeMap<String, GeneratedManga>,
    categories: std::collections::BTreeSet<String>,
    settings: BTreeMap<String, SettingValue>,
    date: DateTime<Utc>,
    name: Option<String>,
) -> Snapshot {
    let categories: Vec<String> = categories.into_iter().collect();
    let mut snapshot = Snapshot::new(date);
    let mut records = Vec::new();
    let mut library = Vec::new();
    let mut chapters = Vec::new();
    let mut history = Vec::new();

    for (index, (_, generated)) in manga.into_iter().enumerate() {
        // One source per manga keeps keys unique
        let source = format!("source{}", index);
        let key = MangaKey::new(source.clone(), generated.id.clone());
        let mut record = Manga::new(source.clone(), generated.id.clone());
        record.title = Some(format!("Manga {}", generated.id));
        records.push(record);

        if generated.in_library {
            let mut entry = LibraryEntry::new(&key, date);
            if let Some(first) = categories.first() {
                entry.categories = Some(vec![first.clone()]);
            }
            library.push(entry);
        }
        for (chapter_id, number, read) in generated.chapters {
            let mut chapter = Chapter::new(source.clone(), generated.id.clone(), chapter_id.clone());
            chapter.chapter_num = number;
            chapter.volume_num = number;
            chapters.push(chapter);
            if read {
                let mut row = History::new(&key.chapter(chapter_id), date);
                row.progress = 1;
                history.push(row);
            }
        }
    }

    snapshot.manga = Some(records);
    snapshot.library = Some(library);
    snapshot.categories = Some(categories);
    snapshot.chapters = Some(chapters);
    snapshot.history = Some(history);
    snapshot.settings = Some(settings);
    snapshot.name = name;
    snapshot
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

async fn restore_into(store: &Arc<MemoryStore>, snapshot: Snapshot) -> RestoreReport {
    RestoreOrchestrator::new(Services::new(Arc::clone(store)))
        .restore(snapshot, RestoreOptions::default())
        .await
        .unwrap()
}

fn chapter_links(store: &MemoryStore) -> Vec<(ChapterKey, ChapterLinks)> {
    store
        .transaction(|ctx| {
            let mut links = Vec::new();
            for chapter in ctx.all_chapters()? {
                let key = chapter.key();
                if let Some(found) = ctx.chapter_links(&key)? {
                    links.push((key, found));
                }
            }
            Ok(links)
        })
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Binary encoding reproduces the snapshot, compressed or not
    #[test]
    fn binary_round_trip(snapshot in snapshot_strategy(), compress in any::<bool>()) {
        let codec = SnapshotCodec::new().with_compression(compress);
        let bytes = codec.encode(&snapshot).unwrap();
        let (decoded, encoding) = codec.decode_detailed(&bytes).unwrap();

        prop_assert!(matches!(encoding, Encoding::Binary { .. }), "expected Encoding::Binary");
        prop_assert_eq!(decoded, snapshot);
    }

    /// Legacy JSON reproduces the snapshot
    #[test]
    fn json_round_trip(snapshot in snapshot_strategy()) {
        let codec = SnapshotCodec::new();
        let bytes = codec.encode_json(&snapshot).unwrap();
        let (decoded, encoding) = codec.decode_detailed(&bytes).unwrap();

        prop_assert_eq!(encoding, Encoding::Json);
        prop_assert_eq!(decoded, snapshot);
    }

    /// Chapter links do not depend on the order rows appear in
    #[test]
    fn links_independent_of_row_order(snapshot in snapshot_strategy()) {
        let mut reversed = snapshot.clone();
        if let Some(chapters) = reversed.chapters.as_mut() {
            chapters.reverse();
        }
        if let Some(history) = reversed.history.as_mut() {
            history.reverse();
        }
        if let Some(manga) = reversed.manga.as_mut() {
            manga.reverse();
        }

        let rt = runtime();
        let forward_store = Arc::new(MemoryStore::new());
        let reversed_store = Arc::new(MemoryStore::new());
        rt.block_on(async {
            restore_into(&forward_store, snapshot).await;
            restore_into(&reversed_store, reversed).await;
        });

        prop_assert_eq!(chapter_links(&forward_store), chapter_links(&reversed_store));
        for (key, links) in chapter_links(&forward_store) {
            prop_assert!(links.manga, "{} not linked to its manga", key);
        }
        prop_assert!(forward_store.integrity_problems().is_empty());
    }

    /// Restoring the same snapshot twice leaves the same rows behind
    #[test]
    fn restore_idempotent(snapshot in snapshot_strategy()) {
        let rt = runtime();
        let store = Arc::new(MemoryStore::new());
        let (first, second) = rt.block_on(async {
            let first_report = restore_into(&store, snapshot.clone()).await;
            let first = store.image();
            let second_report = restore_into(&store, snapshot).await;
            prop_assert_eq!(first_report.groups, second_report.groups);
            Ok((first, store.image()))
        })?;

        prop_assert_eq!(first, second);
    }

    /// Every restored library entry refers to a restored manga
    #[test]
    fn library_entries_reference_manga(snapshot in snapshot_strategy(), drop_every in 1usize..4) {
        let mut snapshot = snapshot;
        if let Some(manga) = snapshot.manga.as_mut() {
            let kept: Vec<Manga> = manga
                .iter()
                .enumerate()
                .filter(|(i, _)| i % drop_every != 0)
                .map(|(_, m)| m.clone())
                .collect();
            *manga = kept;
        }
        let expected_entries = snapshot.library.as_ref().map_or(0, |library| {
            library
                .iter()
                .filter(|entry| {
                    snapshot
                        .manga
                        .as_ref()
                        .is_some_and(|manga| manga.iter().any(|m| m.key() == entry.key()))
                })
                .count()
        });

        let rt = runtime();
        let store = Arc::new(MemoryStore::new());
        let report = rt.block_on(restore_into(&store, snapshot.clone()));

        prop_assert_eq!(store.count(EntityKind::LibraryEntry), expected_entries);
        prop_assert_eq!(
            report.library_entries_skipped,
            snapshot.library.as_ref().map_or(0, Vec::len) - expected_entries
        );
        prop_assert!(store.integrity_problems().is_empty());
    }
}

#[cfg(test)]
mod schedule_properties {
    use super::*;
    use chrono::Duration;
    use tankobon::schedule::{is_due, select_for_pruning};

    proptest! {
        /// Pruning keeps the newest backups and removes the rest
        #[test]
        fn pruning_keeps_newest(offsets in prop::collection::btree_set(0i64..100_000, 0..20), keep in 1usize..6) {
            let base = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
            let backups: Vec<(DateTime<Utc>, i64)> = offsets
                .iter()
                .map(|offset| (base + Duration::seconds(*offset), *offset))
                .collect();

            let pruned = select_for_pruning(backups.clone(), keep);
            prop_assert_eq!(pruned.len(), backups.len().saturating_sub(keep));

            let newest_pruned = pruned.iter().max();
            let oldest_kept = offsets.iter().rev().take(keep).min();
            if let (Some(pruned), Some(kept)) = (newest_pruned, oldest_kept) {
                prop_assert!(pruned < kept);
            }
        }

        /// A backup is due exactly when a full interval has passed
        #[test]
        fn due_after_full_interval(elapsed in 0i64..2_000_000, index in 0usize..5) {
            let interval = BackupInterval::ALL[index];
            let last = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
            let now = last + Duration::seconds(elapsed);

            prop_assert_eq!(is_due(Some(last), interval, now), elapsed >= interval.seconds() as i64);
            prop_assert!(is_due(None, interval, now));
        }
    }
}
