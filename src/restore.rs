//! Restore orchestration
//!
//! [`RestoreOrchestrator`] applies a [`Snapshot`] to an entity store. Each
//! entity kind of the snapshot is one [`RestoreGroup`]; the groups run as the
//! nodes of a [`TaskGraph`] whose edges come from
//! [`RestoreGroup::predecessors`]:
//!
//! ```text
//!   Manga ─────┬──> Library ──┐
//!              │              ├──> Chapters ──> Updates
//!   Categories ┼──> History ──┤
//!              │              └──> Sessions
//!              └──> Track
//! ```
//!
//! ## Group semantics
//!
//! A group whose field is absent from the snapshot is a no-op and leaves the
//! existing rows of its kind untouched. A present group clears every row of
//! its kind and inserts the snapshot rows inside a single store transaction,
//! so a failed group keeps its previous rows and nothing observes a
//! half-cleared table. Cross references are rebuilt from natural keys:
//!
//! - library entries attach to an existing manga and to categories by title,
//!   entries without a manga are dropped
//! - chapters link to their manga and to the history row with the same key
//! - reading sessions are kept only when valid and backed by history
//! - updates link to the chapter with the same key
//!
//! Clearing manga also removes library entries, so a snapshot carrying
//! manga but no library leaves the library empty.
//!
//! ## Failures
//!
//! A failed group skips only the groups that depend on it. Independent
//! branches still run to completion; every failure is collected and the
//! caller receives [`BackupError::Restore`] naming the first failing group
//! in declaration order. Groups that committed stay committed.
//!
//! ## Final barrier
//!
//! After every group succeeded the orchestrator publishes `HistoryUpdated`,
//! `TrackersUpdated` and `CategoriesUpdated`, runs the best-effort library
//! refresh and publishes `LibraryUpdated`. Settings and source lists are
//! applied concurrently with the graph and finish before the barrier.

use crate::error::{BackupError, GroupError, Result, StoreResult};
use crate::events::BackupEvent;
use crate::graph::{NodeOutcome, TaskGraph};
use crate::model::Snapshot;
use crate::refresh::LibraryRefresher;
use crate::services::Services;
use crate::store::{perform_background, EntityKind, EntityStore, StoreContext};
use crate::types::{GroupStatus, RestoreGroup, RestoreOptions, RestoreReport};
use crate::value::SettingValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

/// Rows written and rows dropped by one group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Applied {
    records: usize,
    dropped: usize,
}

/// `None` marks a group absent from the snapshot
type RestoreGraph = TaskGraph<RestoreGroup, Option<Applied>, GroupError>;

/// Applies snapshots to a store
pub struct RestoreOrchestrator<S> {
    services: Services<S>,
}

impl<S: EntityStore> RestoreOrchestrator<S> {
    /// Create an orchestrator over a service context
    pub fn new(services: Services<S>) -> Self {
        Self { services }
    }

    /// Restore a snapshot
    ///
    /// # Errors
    ///
    /// - [`BackupError::Restore`] if any group failed to commit
    /// - [`BackupError::Cancelled`] if the cancellation token fired before
    ///   every group started
    #[instrument(skip_all, fields(date = %snapshot.date))]
    pub async fn restore(&self, snapshot: Snapshot, options: RestoreOptions) -> Result<RestoreReport> {
        let start = Instant::now();
        let installed = self.services.sources.installed_sources();
        let missing_sources = snapshot.missing_sources(&installed);
        info!("Restoring snapshot: {}", snapshot.summary());

        let Snapshot {
            library,
            history,
            manga,
            chapters,
            track_items,
            categories,
            reading_sessions,
            updates,
            source_lists,
            settings,
            ..
        } = snapshot;

        let store = &self.services.store;
        let mut graph = RestoreGraph::new().with_cancellation(options.cancel.clone());

        add_group(&mut graph, store, RestoreGroup::Manga, manga, |ctx, rows| {
            let records = rows.len();
            for manga in rows {
                ctx.insert_manga(manga)?;
            }
            Ok(Applied { records, dropped: 0 })
        })?;

        add_group(&mut graph, store, RestoreGroup::Categories, categories, |ctx, rows| {
            let records = rows.len();
            for title in rows {
                ctx.create_category(&title)?;
            }
            Ok(Applied { records, dropped: 0 })
        })?;

        add_group(&mut graph, store, RestoreGroup::Library, library, |ctx, rows| {
            let mut applied = Applied::default();
            for entry in rows {
                let key = entry.key();
                if ctx.find_manga(&key)?.is_none() {
                    trace!("Dropping library entry {}: no such manga", key);
                    applied.dropped += 1;
                    continue;
                }
                let titles = entry.category_titles().to_vec();
                ctx.upsert_library_entry(entry)?;
                if !titles.is_empty() {
                    ctx.attach_categories(&key, &titles)?;
                }
                applied.records += 1;
            }
            Ok(applied)
        })?;

        add_group(&mut graph, store, RestoreGroup::History, history, |ctx, rows| {
            let records = rows.len();
            for row in rows {
                ctx.insert_history(row)?;
            }
            Ok(Applied { records, dropped: 0 })
        })?;

        add_group(&mut graph, store, RestoreGroup::Chapters, chapters, |ctx, rows| {
            let records = rows.len();
            for chapter in rows {
                let key = chapter.key();
                ctx.insert_chapter(chapter)?;
                ctx.link_chapter_to_manga(&key)?;
                ctx.link_chapter_to_history(&key)?;
            }
            Ok(Applied { records, dropped: 0 })
        })?;

        add_group(&mut graph, store, RestoreGroup::Sessions, reading_sessions, |ctx, rows| {
            let mut applied = Applied::default();
            for session in rows {
                if !session.is_valid() || ctx.find_history(&session.history_key())?.is_none() {
                    applied.dropped += 1;
                    continue;
                }
                let id = ctx.insert_session(session)?;
                ctx.link_session_to_history(id)?;
                applied.records += 1;
            }
            Ok(applied)
        })?;

        add_group(&mut graph, store, RestoreGroup::Updates, updates, |ctx, rows| {
            let records = rows.len();
            for update in rows {
                let key = update.chapter_key();
                ctx.insert_update(update)?;
                ctx.link_update_to_chapter(&key)?;
            }
            Ok(Applied { records, dropped: 0 })
        })?;

        add_group(&mut graph, store, RestoreGroup::Track, track_items, |ctx, rows| {
            let records = rows.len();
            for item in rows {
                ctx.insert_track(item)?;
            }
            Ok(Applied { records, dropped: 0 })
        })?;

        let restore_preferences = options.restore_preferences;
        let preferences = async move {
            if restore_preferences {
                self.apply_preferences(settings, source_lists)
            } else {
                Vec::new()
            }
        };
        let (outcome, mut warnings) = tokio::join!(graph.run(), preferences);

        let mut failures = Vec::new();
        for (group, node) in outcome.outcomes() {
            match node {
                NodeOutcome::Failed(error) => failures.push(error.clone()),
                NodeOutcome::Panicked(message) => {
                    failures.push(GroupError::new(*group, format!("panicked: {}", message)))
                }
                NodeOutcome::Skipped { blocked_by } => {
                    debug!("{} not restored: {} failed", group.display_name(), blocked_by.display_name())
                }
                NodeOutcome::Completed(_) | NodeOutcome::Cancelled => {}
            }
        }
        if let Some(error) = BackupError::from_failures(failures) {
            warn!("Restore failed: {}", error);
            return Err(error);
        }
        if outcome.was_cancelled() {
            info!("Restore cancelled");
            return Err(BackupError::Cancelled);
        }

        let events = &self.services.events;
        events.publish(BackupEvent::HistoryUpdated);
        events.publish(BackupEvent::TrackersUpdated);
        events.publish(BackupEvent::CategoriesUpdated);

        let refresh = if options.refresh_library && self.services.source_client.is_some() {
            match LibraryRefresher::new(self.services.clone()).run().await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warnings.push(format!("library refresh failed: {}", e));
                    None
                }
            }
        } else {
            None
        };
        events.publish(BackupEvent::LibraryUpdated);

        let mut report = RestoreReport {
            missing_sources,
            refresh,
            warnings,
            ..Default::default()
        };
        for group in RestoreGroup::ALL {
            let status = match outcome.value(&group) {
                Some(Some(applied)) => {
                    match group {
                        RestoreGroup::Library => report.library_entries_skipped = applied.dropped,
                        RestoreGroup::Sessions => report.sessions_dropped = applied.dropped,
                        _ => {}
                    }
                    GroupStatus::Restored {
                        records: applied.records,
                    }
                }
                _ => GroupStatus::Untouched,
            };
            report.groups.push((group, status));
        }
        report.duration_ms = start.elapsed().as_millis() as u64;

        if !report.missing_sources.is_empty() {
            warn!("Backup references sources that are not installed: {:?}", report.missing_sources);
        }
        info!(
            "Restored {} records in {}ms ({} library entries skipped, {} sessions dropped)",
            report.records_restored(),
            report.duration_ms,
            report.library_entries_skipped,
            report.sessions_dropped
        );
        Ok(report)
    }

    /// Apply settings and source lists, returning warnings for failures
    fn apply_preferences(
        &self,
        settings: Option<BTreeMap<String, SettingValue>>,
        source_lists: Option<Vec<String>>,
    ) -> Vec<String> {
        let mut warnings = Vec::new();

        for (key, value) in settings.unwrap_or_default() {
            if let Err(e) = self.services.settings.apply(&key, &value) {
                warn!("Failed to restore setting {}: {}", key, e);
                warnings.push(format!("setting '{}' not restored: {}", key, e));
            }
        }

        let Some(lists) = source_lists else {
            return warnings;
        };
        let registry = &self.services.sources;
        if let Err(e) = registry.clear_source_lists() {
            warnings.push(format!("source lists not restored: {}", e));
            return warnings;
        }
        for url in lists {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                warnings.push(format!("skipped source list with unsupported url '{}'", url));
                continue;
            }
            if let Err(e) = registry.add_source_list(&url) {
                warnings.push(format!("source list '{}' not restored: {}", url, e));
            }
        }
        self.services.events.publish(BackupEvent::SourceListChanged);
        warnings
    }
}

/// Declare the node of one group
///
/// The node replaces every row of the group's kind with `rows` inside one
/// transaction, or does nothing when `rows` is `None`.
fn add_group<S, T, F>(
    graph: &mut RestoreGraph,
    store: &Arc<S>,
    group: RestoreGroup,
    rows: Option<Vec<T>>,
    apply: F,
) -> Result<()>
where
    S: EntityStore,
    T: Send + 'static,
    F: FnOnce(&mut dyn StoreContext, Vec<T>) -> StoreResult<Applied> + Send + 'static,
{
    let store = Arc::clone(store);
    graph
        .add_node(group, group.predecessors(), move || async move {
            let Some(rows) = rows else {
                debug!("{} absent from snapshot, keeping existing rows", group.display_name());
                return Ok(None);
            };
            let kind = EntityKind::for_group(group);
            let applied = perform_background(&store, move |ctx| {
                let removed = ctx.clear(kind)?;
                trace!("Cleared {} {} rows", removed, kind);
                apply(ctx, rows)
            })
            .await
            .map_err(|e| GroupError::new(group, e))?;
            debug!("{} restored: {} records", group.display_name(), applied.records);
            Ok(Some(applied))
        })
        .map_err(|e| BackupError::internal(e.to_string()))
}
