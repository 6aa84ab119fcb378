//! Library refresh
//!
//! Fetches current metadata and chapter lists for every library manga and
//! reconciles them with the store. Used as the final best-effort step of a
//! restore and available on its own.
//!
//! ## Rules
//!
//! A manga is skipped when its update strategy is `Never`, when its
//! `next_update_time` lies in the future, or when its source is not
//! installed. The rest are fetched concurrently; each fetched manga is then
//! applied in its own transaction:
//!
//! 1. Metadata is merged, leaving fields the user edited alone.
//! 2. Chapters are diffed by id: existing chapters are updated in place,
//!    chapters the source no longer lists are deleted, new chapters are
//!    inserted and linked to their manga and history.
//! 3. New chapters of a manga that already had chapters get an update
//!    notification.
//! 4. The library entry's `last_updated` is bumped when chapters were added.
//!
//! ## Coalescing
//!
//! A single permit guards the refresh. A caller that finds a refresh already
//! running waits for it to finish and returns a coalesced summary instead of
//! starting a second pass.

use crate::error::{BackupError, Result, StoreResult};
use crate::events::BackupEvent;
use crate::model::{Manga, MangaKey, MangaUpdate, UpdateStrategy};
use crate::services::{RemoteManga, Services};
use crate::store::{perform_background, EntityStore, StoreContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, trace, warn};

/// Outcome of a library refresh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    /// Manga fetched from their sources
    pub checked: usize,
    /// Manga skipped by the refresh rules
    pub skipped: usize,
    /// Manga whose metadata changed
    pub metadata_updated: usize,
    /// Chapters added across all manga
    pub new_chapters: usize,
    /// Chapters removed across all manga
    pub removed_chapters: usize,
    /// Manga that could not be fetched or applied, with the reason
    pub failures: Vec<(String, String)>,
    /// Another refresh was running, this call joined it
    pub coalesced: bool,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

impl RefreshSummary {
    /// Whether the refresh changed the store
    pub fn has_changes(&self) -> bool {
        self.metadata_updated > 0 || self.new_chapters > 0 || self.removed_chapters > 0
    }
}

#[derive(Debug, Default)]
struct ApplyStats {
    metadata_changed: bool,
    new_chapters: usize,
    removed_chapters: usize,
}

/// Refreshes library manga against their sources
pub struct LibraryRefresher<S> {
    services: Services<S>,
}

impl<S: EntityStore> LibraryRefresher<S> {
    /// Create a refresher over a service context
    pub fn new(services: Services<S>) -> Self {
        Self { services }
    }

    /// Refresh the library and publish `LibraryUpdated` if anything changed
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        let summary = self.run().await?;
        if summary.has_changes() {
            self.services.events.publish(BackupEvent::LibraryUpdated);
        }
        Ok(summary)
    }

    /// Refresh the library without publishing events
    pub(crate) async fn run(&self) -> Result<RefreshSummary> {
        let gate = Arc::clone(&self.services.refresh_gate);
        let _permit = match gate.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                debug!("Library refresh already running, waiting for it");
                let _joined = gate
                    .acquire()
                    .await
                    .map_err(|e| BackupError::internal(format!("refresh gate closed: {}", e)))?;
                return Ok(RefreshSummary {
                    coalesced: true,
                    ..Default::default()
                });
            }
        };

        let Some(client) = self.services.source_client.clone() else {
            debug!("No source client configured, skipping library refresh");
            return Ok(RefreshSummary::default());
        };

        let start = Instant::now();
        let now = Utc::now();
        let library = perform_background(&self.services.store, read_library).await?;
        let installed: BTreeSet<String> = self.services.sources.installed_sources().into_iter().collect();

        let mut summary = RefreshSummary::default();
        let mut fetches = JoinSet::new();
        for (manga, had_chapters) in library {
            if let Some(reason) = skip_reason(&manga, &installed, now) {
                trace!("Skipping {}: {}", manga.key(), reason);
                summary.skipped += 1;
                continue;
            }
            let client = Arc::clone(&client);
            fetches.spawn(async move {
                let result = client.fetch_update(&manga).await;
                (manga, had_chapters, result)
            });
        }

        while let Some(joined) = fetches.join_next().await {
            let (manga, had_chapters, result) = match joined {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!("Refresh task failed: {}", e);
                    summary.failures.push(("<task>".to_string(), e.to_string()));
                    continue;
                }
            };
            summary.checked += 1;
            let key = manga.key();

            let remote = match result {
                Ok(remote) => remote,
                Err(e) => {
                    warn!("Failed to fetch {}: {}", key, e);
                    summary.failures.push((key.to_string(), e.to_string()));
                    continue;
                }
            };

            let applied = perform_background(&self.services.store, move |ctx| {
                apply_update(ctx, manga, remote, had_chapters, now)
            })
            .await;
            match applied {
                Ok(stats) => {
                    if stats.metadata_changed {
                        summary.metadata_updated += 1;
                    }
                    summary.new_chapters += stats.new_chapters;
                    summary.removed_chapters += stats.removed_chapters;
                }
                Err(e) => {
                    warn!("Failed to apply refresh of {}: {}", key, e);
                    summary.failures.push((key.to_string(), e.to_string()));
                }
            }
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Library refresh: {} checked, {} skipped, {} new chapters, {} failures in {}ms",
            summary.checked,
            summary.skipped,
            summary.new_chapters,
            summary.failures.len(),
            summary.duration_ms
        );
        Ok(summary)
    }
}

fn read_library(ctx: &mut dyn StoreContext) -> StoreResult<Vec<(Manga, bool)>> {
    let mut library = Vec::new();
    for entry in ctx.library_entries()? {
        let key = entry.key();
        if let Some(manga) = ctx.find_manga(&key)? {
            let had_chapters = !ctx.chapters_for(&key)?.is_empty();
            library.push((manga, had_chapters));
        }
    }
    Ok(library)
}

fn skip_reason(manga: &Manga, installed: &BTreeSet<String>, now: DateTime<Utc>) -> Option<&'static str> {
    if manga.update_strategy == UpdateStrategy::Never {
        return Some("update strategy is never");
    }
    if manga.next_update_time.is_some_and(|next| next > now) {
        return Some("next update time not reached");
    }
    if !installed.contains(&manga.source_id) {
        return Some("source not installed");
    }
    None
}

fn apply_update(
    ctx: &mut dyn StoreContext,
    local: Manga,
    remote: RemoteManga,
    had_chapters: bool,
    now: DateTime<Utc>,
) -> StoreResult<ApplyStats> {
    let key: MangaKey = local.key();
    let mut stats = ApplyStats::default();

    let mut merged = local;
    if merged.merge_metadata(&remote.manga) {
        ctx.insert_manga(merged)?;
        stats.metadata_changed = true;
    }

    let existing: BTreeMap<String, _> = ctx
        .chapters_for(&key)?
        .into_iter()
        .map(|chapter| (chapter.id.clone(), chapter))
        .collect();
    let remote_ids: BTreeSet<&str> = remote.chapters.iter().map(|c| c.id.as_str()).collect();

    for (id, chapter) in &existing {
        if !remote_ids.contains(id.as_str()) {
            ctx.delete_chapter(&chapter.key())?;
            stats.removed_chapters += 1;
        }
    }

    for mut chapter in remote.chapters {
        chapter.source_id = key.source_id.clone();
        chapter.manga_id = key.manga_id.clone();
        match existing.get(&chapter.id) {
            Some(current) if *current == chapter => {}
            Some(_) => ctx.insert_chapter(chapter)?,
            None => {
                let chapter_key = chapter.key();
                ctx.insert_chapter(chapter)?;
                ctx.link_chapter_to_manga(&chapter_key)?;
                ctx.link_chapter_to_history(&chapter_key)?;
                if had_chapters {
                    ctx.insert_update(MangaUpdate {
                        source_id: chapter_key.source_id.clone(),
                        manga_id: chapter_key.manga_id.clone(),
                        chapter_id: chapter_key.chapter_id.clone(),
                        date: now,
                        viewed: false,
                    })?;
                    ctx.link_update_to_chapter(&chapter_key)?;
                }
                stats.new_chapters += 1;
            }
        }
    }

    if stats.new_chapters > 0 {
        if let Some(mut entry) = ctx.find_library_entry(&key)? {
            entry.last_updated = now;
            ctx.upsert_library_entry(entry)?;
        }
    }
    Ok(stats)
}
