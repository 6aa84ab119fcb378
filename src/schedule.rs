//! Automatic backup scheduling policy
//!
//! Pure decisions used by [`crate::manager::BackupManager::auto_backup_tick`]:
//! whether an automatic backup is due and which automatic backups to prune.
//! The scheduler driving the ticks lives outside the engine.

use crate::error::{BackupError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Minimum time between two automatic backups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupInterval {
    /// Every six hours
    #[serde(rename = "6hours")]
    SixHours,
    /// Every twelve hours
    #[serde(rename = "12hours")]
    TwelveHours,
    /// Once a day
    #[serde(rename = "daily")]
    Daily,
    /// Every other day
    #[serde(rename = "2days")]
    TwoDays,
    /// Once a week
    #[serde(rename = "weekly")]
    Weekly,
}

impl BackupInterval {
    /// Every interval, shortest first
    pub const ALL: [BackupInterval; 5] = [
        BackupInterval::SixHours,
        BackupInterval::TwelveHours,
        BackupInterval::Daily,
        BackupInterval::TwoDays,
        BackupInterval::Weekly,
    ];

    /// Interval length in seconds
    pub fn seconds(&self) -> u64 {
        match self {
            BackupInterval::SixHours => 6 * 60 * 60,
            BackupInterval::TwelveHours => 12 * 60 * 60,
            BackupInterval::Daily => 24 * 60 * 60,
            BackupInterval::TwoDays => 2 * 24 * 60 * 60,
            BackupInterval::Weekly => 7 * 24 * 60 * 60,
        }
    }

    /// Interval length
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.seconds())
    }

    /// Name as written in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            BackupInterval::SixHours => "6hours",
            BackupInterval::TwelveHours => "12hours",
            BackupInterval::Daily => "daily",
            BackupInterval::TwoDays => "2days",
            BackupInterval::Weekly => "weekly",
        }
    }
}

impl fmt::Display for BackupInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackupInterval {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        BackupInterval::ALL
            .into_iter()
            .find(|interval| interval.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                BackupError::InvalidConfiguration(format!(
                    "unknown backup interval '{}', expected 6hours, 12hours, daily, 2days or weekly",
                    s
                ))
            })
    }
}

/// Check whether an automatic backup is due
///
/// Due when there is no previous automatic backup or when `interval` has
/// fully elapsed since `last`. A `last` so far in the future that the
/// interval cannot be added to it is never due.
pub fn is_due(last: Option<DateTime<Utc>>, interval: BackupInterval, now: DateTime<Utc>) -> bool {
    match last {
        None => true,
        Some(last) => after_interval(last, interval).is_some_and(|next| next <= now),
    }
}

/// Time of the next automatic backup
///
/// `None` if one is due right away, or if the next time is past the range
/// of representable dates.
pub fn next_due(last: Option<DateTime<Utc>>, interval: BackupInterval, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let next = after_interval(last?, interval)?;
    (next > now).then_some(next)
}

fn after_interval(last: DateTime<Utc>, interval: BackupInterval) -> Option<DateTime<Utc>> {
    last.checked_add_signed(ChronoDuration::seconds(interval.seconds() as i64))
}

/// Select the automatic backups to delete so that at most `keep` remain
///
/// `backups` pairs each backup's snapshot date with a caller handle. The
/// oldest are selected first; the order of the input does not matter.
pub fn select_for_pruning<T>(mut backups: Vec<(DateTime<Utc>, T)>, keep: usize) -> Vec<T> {
    if backups.len() <= keep {
        return Vec::new();
    }
    backups.sort_by(|a, b| a.0.cmp(&b.0));
    let excess = backups.len() - keep;
    backups.into_iter().take(excess).map(|(_, handle)| handle).collect()
}
