//! Snapshot export
//!
//! [`SnapshotBuilder`] reads the live store and collaborators into a
//! [`Snapshot`]. Every store read happens inside one transaction so that
//! cross references between groups stay coherent while the store is being
//! written by other tasks.
//!
//! Groups disabled in [`ExportOptions`] are left absent rather than empty,
//! so restoring the snapshot later keeps the target's rows for them.

use crate::error::{Result, StoreResult};
use crate::model::Snapshot;
use crate::services::Services;
use crate::store::{perform_background, EntityStore, StoreContext};
use crate::types::ExportOptions;
use crate::value::SettingValue;
use chrono::{Timelike, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Settings key holding source lists, exported separately
pub const SOURCE_LISTS_KEY: &str = "Browse.sourceLists";

/// Substrings marking a setting as sensitive, matched case-insensitively
const SENSITIVE_MARKERS: [&str; 5] = ["login", "password", "token", "auth", "cookie"];

/// Check whether a setting key may hold credentials
pub fn is_sensitive_setting(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Builds snapshots from a store
pub struct SnapshotBuilder<S> {
    services: Services<S>,
}

impl<S: EntityStore> SnapshotBuilder<S> {
    /// Create a builder over a service context
    pub fn new(services: Services<S>) -> Self {
        Self { services }
    }

    /// Export the groups enabled in `options`
    #[instrument(skip(self))]
    pub async fn build(&self, options: &ExportOptions) -> Result<Snapshot> {
        let now = Utc::now();
        let date = now.with_nanosecond(0).unwrap_or(now);

        let read_options = options.clone();
        let mut snapshot = perform_background(&self.services.store, move |ctx| {
            read_store(ctx, &read_options, Snapshot::new(date))
        })
        .await?;

        snapshot.sources = Some(self.services.sources.installed_sources());
        if options.source_lists {
            snapshot.source_lists = Some(self.services.sources.source_lists());
        }
        if options.settings {
            snapshot.settings = Some(self.export_settings(options.sensitive_settings));
        }
        snapshot.automatic = options.automatic.then_some(true);
        snapshot.version = Some(env!("CARGO_PKG_VERSION").to_string());

        info!("Built snapshot: {}", snapshot.summary());
        Ok(snapshot)
    }

    fn export_settings(&self, include_sensitive: bool) -> BTreeMap<String, SettingValue> {
        let mut settings = self.services.settings.export();
        settings.retain(|key, _| {
            if key == SOURCE_LISTS_KEY {
                return false;
            }
            if !include_sensitive && is_sensitive_setting(key) {
                debug!("Leaving sensitive setting {} out of the backup", key);
                return false;
            }
            true
        });
        settings
    }
}

fn read_store(ctx: &mut dyn StoreContext, options: &ExportOptions, mut snapshot: Snapshot) -> StoreResult<Snapshot> {
    if options.library_entries {
        snapshot.manga = Some(ctx.all_manga()?);
        let mut entries = ctx.library_entries()?;
        if !options.categories {
            for entry in &mut entries {
                entry.categories = None;
            }
        }
        snapshot.library = Some(entries);
    }
    if options.categories {
        snapshot.categories = Some(ctx.category_titles()?);
    }
    if options.history {
        snapshot.history = Some(ctx.all_history()?);
    }
    if options.chapters {
        snapshot.chapters = Some(ctx.all_chapters()?);
    }
    if options.tracking {
        snapshot.track_items = Some(ctx.all_tracks()?);
    }
    if options.reading_sessions {
        snapshot.reading_sessions = Some(ctx.all_sessions()?);
    }
    if options.updates {
        snapshot.updates = Some(ctx.all_updates()?);
    }
    Ok(snapshot)
}
