//! Utility functions for Tankobon
//!
//! This module provides common helpers used throughout the library:
//!
//! ### File Operations
//! - Atomic file writing through a named temporary file
//! - Human-readable byte sizes
//!
//! ### Serde Helpers
//! - [`epoch_seconds`]: dates encoded as floating point seconds since the
//!   Unix epoch, the representation used by both backup envelopes
//! - [`number_sentinel`]: chapter and volume numbers where `-1` means "none"
//! - [`scanlator_list`]: scanlator names stored either as a comma-joined
//!   string (legacy JSON) or as a list
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use crate::utils::{atomic_write, format_bytes};
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! atomic_write(Path::new("backup.aib"), b"AIBK...")?;
//! assert_eq!(format_bytes(1536), "1.50 KB");
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use chrono::{DateTime, TimeZone, Utc};
use std::io::Write;
use std::path::Path;

/// Format bytes as human-readable string
///
/// Uses binary units (1024-based). Values below 1 KB are printed as whole
/// numbers, larger values with two decimals.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write
///
/// Writes `content` to a named temporary file in the target's directory,
/// flushes it to disk and persists it over `path`. Readers either see the
/// previous file or the complete new one.
///
/// # Errors
///
/// - [`BackupError::Io`](crate::error::BackupError::Io) if the temporary
///   file cannot be created, written or persisted
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::Builder::new()
        .prefix(".tankobon-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// Convert a date to floating point seconds since the Unix epoch
pub fn to_epoch_seconds(date: &DateTime<Utc>) -> f64 {
    date.timestamp() as f64 + f64::from(date.timestamp_subsec_nanos()) / 1e9
}

/// Convert floating point seconds since the Unix epoch to a date
///
/// Sub-second precision is rounded to the nearest nanosecond. Returns `None`
/// for values that are not finite or out of the representable range.
pub fn from_epoch_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let mut secs = whole as i64;
    let mut nanos = ((seconds - whole) * 1e9).round() as u32;
    if nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    Utc.timestamp_opt(secs, nanos).single()
}

/// Serde adapter for dates stored as seconds since the Unix epoch
///
/// Used with `#[serde(with = "crate::utils::epoch_seconds")]`. Integer and
/// floating point inputs are both accepted.
pub mod epoch_seconds {
    use super::{from_epoch_seconds, to_epoch_seconds};
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    /// Serialize a date as `f64` seconds
    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(to_epoch_seconds(date))
    }

    /// Deserialize a date from `f64` seconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        from_epoch_seconds(seconds)
            .ok_or_else(|| de::Error::custom(format!("date out of range: {}", seconds)))
    }

    /// Same encoding for optional dates
    pub mod option {
        use super::super::{from_epoch_seconds, to_epoch_seconds};
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

        /// Serialize an optional date as optional `f64` seconds
        pub fn serialize<S: Serializer>(
            date: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            date.as_ref().map(to_epoch_seconds).serialize(serializer)
        }

        /// Deserialize an optional date from optional `f64` seconds
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<f64>::deserialize(deserializer)? {
                Some(seconds) => from_epoch_seconds(seconds)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("date out of range: {}", seconds))),
                None => Ok(None),
            }
        }
    }
}

/// Serde adapter for chapter and volume numbers
///
/// The model keeps `-1.0` as the "no number" sentinel. Text formats write the
/// sentinel as `null` and read both `null` and a missing field back as
/// `-1.0`; binary formats store the raw `f32`.
pub mod number_sentinel {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Sentinel stored when a chapter or volume has no number
    pub const NO_NUMBER: f32 = -1.0;

    /// Default used for missing fields
    pub fn none() -> f32 {
        NO_NUMBER
    }

    /// Serialize a sentinel number
    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        if !serializer.is_human_readable() {
            return serializer.serialize_f32(*value);
        }
        if *value < 0.0 {
            serializer.serialize_none()
        } else {
            Some(*value).serialize(serializer)
        }
    }

    /// Deserialize a sentinel number
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        if !deserializer.is_human_readable() {
            return f32::deserialize(deserializer);
        }
        Ok(Option::<f32>::deserialize(deserializer)?
            .filter(|n| *n >= 0.0)
            .unwrap_or(NO_NUMBER))
    }
}

/// Serde adapter for chapter scanlators
///
/// Text formats write a list and accept a list, a comma-joined string or
/// `null`. Binary formats store the list directly.
pub mod scanlator_list {
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt;

    /// Serialize scanlators as a list
    pub fn serialize<S: Serializer>(value: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        value.serialize(serializer)
    }

    /// Deserialize scanlators from a list or a comma-joined string
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        if !deserializer.is_human_readable() {
            return Vec::<String>::deserialize(deserializer);
        }
        deserializer.deserialize_any(ScanlatorVisitor)
    }

    /// Split a legacy comma-joined scanlator string
    pub fn split(joined: &str) -> Vec<String> {
        joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    struct ScanlatorVisitor;

    impl<'de> Visitor<'de> for ScanlatorVisitor {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a scanlator list or a comma separated string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(split(v))
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
            deserializer.deserialize_any(ScanlatorVisitor)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut names = Vec::new();
            while let Some(name) = seq.next_element::<String>()? {
                names.push(name);
            }
            Ok(names)
        }
    }
}
