//! Memory-mapped snapshot reader.
//!
//! [`BinaryIndex`] owns the read-only mapping for its lifetime; dropping it
//! unmaps. The mapped bytes are immutable at the OS level, which is what
//! makes the parallel scan and concurrent readers safe without locks.

use crate::error::EngineError;
use crate::index::scanner;
use crate::index::types::{
    secs_to_mtime, Item, SortKey, FLAG_DIR, HEADER_LEN, RECORD_LEN, REC_FLAGS, REC_MTIME,
    REC_NAME_LEN, REC_NAME_OFF, REC_PATH_LEN, REC_PATH_OFF, REC_SIZE, SNAPSHOT_MAGIC,
    SNAPSHOT_VERSION,
};
use memchr::memmem::Finder;
use memmap2::Mmap;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

/// Read-only view over one snapshot file.
#[derive(Debug)]
pub struct BinaryIndex {
    mmap: Mmap,
    count: usize,
}

impl BinaryIndex {
    /// Open and validate a snapshot file.
    ///
    /// Checks, in order: the `ERRT` magic, the version tag, and that the
    /// declared record count is non-negative and fits the file size. Any
    /// failure is [`EngineError::SnapshotCorrupt`]; a missing file is
    /// [`EngineError::SnapshotAbsent`].
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let corrupt = |reason: String| EngineError::SnapshotCorrupt {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                EngineError::SnapshotAbsent(path.to_path_buf())
            } else {
                corrupt(e.to_string())
            }
        })?;

        // SAFETY: the mapping is read-only and the file is replaced only by
        // atomic rename, never truncated or rewritten in place.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| corrupt(e.to_string()))?;

        if mmap.len() < HEADER_LEN {
            return Err(corrupt(format!("file too small: {} bytes", mmap.len())));
        }
        if mmap[0..4] != SNAPSHOT_MAGIC {
            return Err(corrupt("bad magic tag".to_string()));
        }
        let version = i32::from_le_bytes(mmap[4..8].try_into().unwrap());
        if version != SNAPSHOT_VERSION {
            return Err(corrupt(format!(
                "version {version}, expected {SNAPSHOT_VERSION}"
            )));
        }
        let count = i64::from_le_bytes(mmap[8..16].try_into().unwrap());
        if count < 0 {
            return Err(corrupt(format!("negative record count {count}")));
        }
        let count = count as usize;
        let needed = HEADER_LEN + count * RECORD_LEN;
        if mmap.len() < needed {
            return Err(corrupt(format!(
                "record count {count} needs {needed} bytes, file has {}",
                mmap.len()
            )));
        }

        Ok(Self { mmap, count })
    }

    pub fn item_count(&self) -> usize {
        self.count
    }

    #[inline]
    fn buf(&self) -> &[u8] {
        &self.mmap
    }

    /// Substring search across all records.
    ///
    /// The query is ASCII-lowercased once and split on whitespace; a record
    /// matches when its lowercased name contains every token. The record
    /// range is partitioned into contiguous chunks, one per worker, each
    /// scanned into its own buffer; concatenation in partition order keeps
    /// the returned indices globally ascending, i.e. in the snapshot's
    /// natural name order. An empty or all-whitespace query returns every
    /// index.
    pub fn search(&self, query: &str) -> Vec<i32> {
        if self.count == 0 {
            return Vec::new();
        }

        let lowered = query.to_ascii_lowercase();
        let tokens: Vec<&str> = lowered.split_ascii_whitespace().collect();
        if tokens.is_empty() {
            return (0..self.count as i32).collect();
        }

        let needles: Vec<Finder<'_>> = tokens.iter().map(|t| Finder::new(t.as_bytes())).collect();

        let workers = rayon::current_num_threads().max(1);
        let chunk = self.count.div_ceil(workers);
        let ranges: Vec<(usize, usize)> = (0..workers)
            .map(|w| (w * chunk, ((w + 1) * chunk).min(self.count)))
            .filter(|(s, e)| s < e)
            .collect();

        let parts: Vec<Vec<i32>> = ranges
            .into_par_iter()
            .map(|(start, end)| {
                scanner::scan(self.buf(), HEADER_LEN, RECORD_LEN, start, end, &needles)
            })
            .collect();

        let mut out = Vec::with_capacity(parts.iter().map(Vec::len).sum());
        for part in parts {
            out.extend(part);
        }
        out
    }

    /// Decode one packed record plus its string-pool bytes into a heap
    /// [`Item`]. Invalid UTF-8 is replaced; a stored mtime of 0.0 decodes
    /// as absent. Out-of-range indices (e.g. a stale entry vector from a
    /// replaced snapshot) yield the placeholder item instead of panicking.
    pub fn materialize(&self, index: i32) -> Item {
        if index < 0 || index as usize >= self.count {
            return Item::placeholder();
        }
        let buf = self.buf();
        let start = HEADER_LEN + index as usize * RECORD_LEN;
        let rec = &buf[start..start + RECORD_LEN];

        let read_u32 = |off: usize| u32::from_le_bytes(rec[off..off + 4].try_into().unwrap());
        let pool_str = |off_field: usize, len_field: usize| -> String {
            let off = read_u32(off_field) as usize;
            let len = read_u32(len_field) as usize;
            match buf.get(off..off + len) {
                Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                None => String::new(),
            }
        };

        let size = i64::from_le_bytes(rec[REC_SIZE..REC_SIZE + 8].try_into().unwrap());
        let mtime = f64::from_le_bytes(rec[REC_MTIME..REC_MTIME + 8].try_into().unwrap());

        Item {
            name: pool_str(REC_NAME_OFF, REC_NAME_LEN),
            path: pool_str(REC_PATH_OFF, REC_PATH_LEN),
            is_dir: rec[REC_FLAGS] & FLAG_DIR != 0,
            size,
            modified: secs_to_mtime(mtime),
        }
    }

    /// Index of the record whose path matches exactly, if any.
    pub fn find_path(&self, path: &str) -> Option<i32> {
        scanner::lookup_path(self.buf(), HEADER_LEN, RECORD_LEN, self.count, path.as_bytes())
    }

    /// In-place sort of an index vector by the named key.
    pub fn sort(&self, indices: &mut [i32], key: SortKey, ascending: bool) {
        scanner::sort_indices(indices, self.buf(), HEADER_LEN, RECORD_LEN, key, ascending);
    }

    /// Compare the record at `index` with a heap item, ascending basis.
    /// Byte-lexicographic for name/path so the snapshot and overlay
    /// orderings agree bit-for-bit during the merge.
    pub fn compare(&self, index: i32, item: &Item, key: SortKey) -> Ordering {
        scanner::compare_with_item(self.buf(), HEADER_LEN, RECORD_LEN, index, item, key)
    }
}
