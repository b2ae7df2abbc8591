//! Item model and the on-disk snapshot layout.
//!
//! The snapshot is a single little-endian file: a 16-byte header, a packed
//! fixed-stride record array sorted by name, and a trailing UTF-8 string
//! pool. String fields in a record are `(offset, length)` pairs where the
//! offset is an absolute file offset into the pool region.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Magic tag at the start of every snapshot file.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"ERRT";

/// Snapshot format version this build reads and writes.
pub const SNAPSHOT_VERSION: i32 = 2;

/// Header layout: magic (4) | version i32 (4) | record count i64 (8).
pub const HEADER_LEN: usize = 16;

/// Fixed per-record byte width in the packed array.
pub const RECORD_LEN: usize = 48;

// Field offsets within a record.
pub const REC_SIZE: usize = 0;
pub const REC_MTIME: usize = 8;
pub const REC_FLAGS: usize = 16;
pub const REC_NAME_OFF: usize = 20;
pub const REC_NAME_LEN: usize = 24;
pub const REC_PATH_OFF: usize = 28;
pub const REC_PATH_LEN: usize = 32;
pub const REC_LOWER_OFF: usize = 36;
pub const REC_LOWER_LEN: usize = 40;

/// Record flag bit 0: entry is a directory.
pub const FLAG_DIR: u8 = 1 << 0;

/// Sort key for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    /// Final path component, byte-lexicographic.
    Name,
    /// Full path, byte-lexicographic.
    Path,
    /// Size in bytes, signed 64-bit.
    Size,
    /// Modification time; absent sorts as earliest.
    Date,
}

/// Sort key plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub ascending: bool,
}

impl SortSpec {
    pub fn ascending(key: SortKey) -> Self {
        Self { key, ascending: true }
    }

    pub fn descending(key: SortKey) -> Self {
        Self { key, ascending: false }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::ascending(SortKey::Name)
    }
}

/// A single filesystem entry as the engine sees it.
///
/// `path` is the identity, globally unique within the index, and must be
/// produced by the shared canonicalizer everywhere (crawler, watcher,
/// catalog) to avoid phantom duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    pub size: i64,
    /// Absent modification time sorts as "earliest" and is encoded as 0.0
    /// in the snapshot.
    pub modified: Option<SystemTime>,
}

impl Item {
    /// Sentinel returned when a stale or out-of-range entry is
    /// materialized. Never stored.
    pub fn placeholder() -> Self {
        Self {
            path: String::new(),
            name: String::new(),
            is_dir: false,
            size: 0,
            modified: None,
        }
    }

    /// Modification time as seconds since the Unix epoch, the snapshot's
    /// wire representation. Absent maps to 0.0.
    pub fn mtime_secs(&self) -> f64 {
        mtime_to_secs(self.modified)
    }
}

/// Encode an optional modification time as f64 epoch seconds (0.0 =
/// absent). Pre-epoch instants encode as negative seconds.
pub fn mtime_to_secs(mtime: Option<SystemTime>) -> f64 {
    match mtime {
        None => 0.0,
        Some(t) => match t.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs_f64(),
            Err(e) => -e.duration().as_secs_f64(),
        },
    }
}

/// Decode f64 epoch seconds back to an optional instant. 0.0 means absent.
pub fn secs_to_mtime(secs: f64) -> Option<SystemTime> {
    if secs == 0.0 || !secs.is_finite() {
        None
    } else if secs > 0.0 {
        Some(UNIX_EPOCH + Duration::from_secs_f64(secs))
    } else {
        UNIX_EPOCH.checked_sub(Duration::from_secs_f64(-secs))
    }
}

/// Compare two heap items under a sort key, ascending basis.
///
/// Must agree bit-for-bit with the packed-record comparators in
/// [`crate::index::scanner`]: byte-lexicographic with length tiebreak for
/// name/path, signed i64 for size, f64 for date.
pub fn item_key_cmp(a: &Item, b: &Item, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => a.name.as_bytes().cmp(b.name.as_bytes()),
        SortKey::Path => a.path.as_bytes().cmp(b.path.as_bytes()),
        SortKey::Size => a.size.cmp(&b.size),
        SortKey::Date => a
            .mtime_secs()
            .partial_cmp(&b.mtime_secs())
            .unwrap_or(Ordering::Equal),
    }
}
