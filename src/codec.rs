//! Snapshot encoding and decoding
//!
//! Snapshots are written in a small binary envelope and read from either the
//! binary envelope or legacy JSON.
//!
//! ## Binary envelope
//!
//! ```text
//! +--------+---------+-------+-------------------------------+
//! | "AIBK" | version | flags | payload                       |
//! | 4 B    | 1 B     | 1 B   | bincode, lz4 when flags == 1  |
//! +--------+---------+-------+-------------------------------+
//! ```
//!
//! The payload is the snapshot encoded with bincode's standard
//! configuration. When compression is enabled and shrinks the payload it is
//! stored as LZ4 with a prepended little-endian size.
//!
//! The envelope is this crate's own format, not a binary property list.
//! Backups written by the iOS app itself (files starting with `bplist00`) are
//! not readable and decode as [`BackupError::Corrupted`]; convert them to
//! JSON first.
//!
//! ## Legacy JSON
//!
//! Older backups are plain JSON with dates as seconds since the Unix epoch.
//! Decoding tries the binary envelope first and falls back to JSON; the first
//! decoder that succeeds wins.
//!
//! ## Examples
//!
//! ```rust
//! use tankobon::codec::SnapshotCodec;
//! use tankobon::model::Snapshot;
//! use chrono::Utc;
//!
//! let codec = SnapshotCodec::new();
//! let snapshot = Snapshot::new(Utc::now());
//! let bytes = codec.encode(&snapshot)?;
//! assert!(codec.decode(&bytes).is_some());
//! assert!(codec.decode(b"not a backup").is_none());
//! # Ok::<(), tankobon::BackupError>(())
//! ```

use crate::error::{BackupError, Result};
use crate::model::Snapshot;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use tracing::{debug, trace};

/// Magic bytes opening every binary backup
pub const MAGIC: &[u8; 4] = b"AIBK";

/// Current binary envelope version
pub const FORMAT_VERSION: u8 = 1;

/// Envelope header length in bytes
const HEADER_LEN: usize = MAGIC.len() + 2;

/// Payload stored as plain bincode
const FLAG_RAW: u8 = 0;

/// Payload stored as size-prepended LZ4
const FLAG_LZ4: u8 = 1;

/// Largest decompressed payload accepted
const MAX_PAYLOAD_SIZE: usize = 512 * 1024 * 1024;

/// Payloads smaller than this are never compressed
const MIN_COMPRESS_SIZE: usize = 256;

/// Encoding a backup was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Binary envelope
    Binary {
        /// Payload was LZ4 compressed
        compressed: bool,
    },
    /// Legacy JSON
    Json,
}

/// Encoder and decoder for snapshot files
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotCodec {
    compress: bool,
}

impl SnapshotCodec {
    /// Create a codec writing uncompressed envelopes
    pub fn new() -> Self {
        Self { compress: false }
    }

    /// Create a codec that compresses payloads when it helps
    pub fn compressed() -> Self {
        Self { compress: true }
    }

    /// Set whether payloads are compressed
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Encode a snapshot into the binary envelope
    pub fn encode(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        let payload = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())?;

        let (flags, body) = if self.compress && payload.len() >= MIN_COMPRESS_SIZE {
            let compressed = compress_prepend_size(&payload);
            if compressed.len() < payload.len() {
                debug!(
                    "Compressed backup payload: {} -> {} bytes",
                    payload.len(),
                    compressed.len()
                );
                (FLAG_LZ4, compressed)
            } else {
                trace!("Compression not beneficial, storing raw payload");
                (FLAG_RAW, payload)
            }
        } else {
            (FLAG_RAW, payload)
        };

        let mut result = Vec::with_capacity(HEADER_LEN + body.len());
        result.extend_from_slice(MAGIC);
        result.push(FORMAT_VERSION);
        result.push(flags);
        result.extend_from_slice(&body);
        Ok(result)
    }

    /// Encode a snapshot as legacy JSON
    pub fn encode_json(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(snapshot)?)
    }

    /// Decode a snapshot, returning `None` if no decoder accepts the bytes
    pub fn decode(&self, bytes: &[u8]) -> Option<Snapshot> {
        self.decode_detailed(bytes).ok().map(|(snapshot, _)| snapshot)
    }

    /// Decode a snapshot and report which encoding it used
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Corrupted`] carrying both decoder failures when
    /// neither the binary nor the JSON decoder accepts the bytes.
    pub fn decode_detailed(&self, bytes: &[u8]) -> Result<(Snapshot, Encoding)> {
        let binary_err = match decode_binary(bytes) {
            Ok((snapshot, compressed)) => {
                trace!("Decoded binary backup ({} bytes)", bytes.len());
                return Ok((snapshot, Encoding::Binary { compressed }));
            }
            Err(e) => e,
        };

        match serde_json::from_slice::<Snapshot>(bytes) {
            Ok(snapshot) => {
                debug!("Decoded legacy JSON backup ({} bytes)", bytes.len());
                Ok((snapshot, Encoding::Json))
            }
            Err(json_err) => Err(BackupError::corrupted(format!(
                "binary: {}; json: {}",
                binary_err, json_err
            ))),
        }
    }
}

/// Check whether bytes start with the binary envelope header
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

fn decode_binary(bytes: &[u8]) -> Result<(Snapshot, bool)> {
    if bytes.len() < HEADER_LEN || !is_binary(bytes) {
        return Err(BackupError::corrupted("missing binary header"));
    }
    let version = bytes[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(BackupError::corrupted(format!("unsupported format version {}", version)));
    }

    let flags = bytes[MAGIC.len() + 1];
    let body = &bytes[HEADER_LEN..];
    let (payload, compressed) = match flags {
        FLAG_RAW => (std::borrow::Cow::Borrowed(body), false),
        FLAG_LZ4 => (std::borrow::Cow::Owned(decompress(body)?), true),
        other => return Err(BackupError::corrupted(format!("unknown envelope flags {}", other))),
    };

    let (snapshot, read): (Snapshot, usize) =
        bincode::serde::decode_from_slice(&payload, bincode::config::standard())?;
    if read != payload.len() {
        return Err(BackupError::corrupted(format!(
            "{} trailing bytes after payload",
            payload.len() - read
        )));
    }
    Ok((snapshot, compressed))
}

fn decompress(body: &[u8]) -> Result<Vec<u8>> {
    if body.len() < 4 {
        return Err(BackupError::compression("compressed payload too short"));
    }
    let size = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
    if size > MAX_PAYLOAD_SIZE {
        return Err(BackupError::compression(format!(
            "declared payload size {} exceeds limit",
            size
        )));
    }
    decompress_size_prepended(body)
        .map_err(|e| BackupError::compression(format!("LZ4 decompression failed: {}", e)))
}
