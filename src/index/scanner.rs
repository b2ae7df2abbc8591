//! Byte-level primitives over the packed record buffer.
//!
//! Everything here operates on the raw mapped bytes plus `(item_base,
//! stride)` and holds no state, so the same code serves every worker of the
//! parallel scan. Offsets are trusted: an out-of-range offset is a
//! programming error and panics via slice indexing rather than returning an
//! error.

use crate::index::types::{
    Item, SortKey, REC_LOWER_LEN, REC_LOWER_OFF, REC_MTIME, REC_NAME_LEN, REC_NAME_OFF,
    REC_PATH_LEN, REC_PATH_OFF, REC_SIZE,
};
use memchr::memmem::Finder;
use std::cmp::Ordering;

#[inline]
fn record(buf: &[u8], item_base: usize, stride: usize, index: i32) -> &[u8] {
    let start = item_base + index as usize * stride;
    &buf[start..start + stride]
}

#[inline]
fn read_u32(rec: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(rec[off..off + 4].try_into().unwrap())
}

#[inline]
fn read_i64(rec: &[u8], off: usize) -> i64 {
    i64::from_le_bytes(rec[off..off + 8].try_into().unwrap())
}

#[inline]
fn read_f64(rec: &[u8], off: usize) -> f64 {
    f64::from_le_bytes(rec[off..off + 8].try_into().unwrap())
}

/// Resolve a record's `(offset, length)` string field against the file
/// buffer. Offsets are absolute file offsets into the string pool.
#[inline]
fn str_field<'a>(buf: &'a [u8], rec: &[u8], off_field: usize, len_field: usize) -> &'a [u8] {
    let off = read_u32(rec, off_field) as usize;
    let len = read_u32(rec, len_field) as usize;
    &buf[off..off + len]
}

/// Scan records `[start, end)` and return the indices whose lowercased name
/// contains every needle. Needles must already be lowercased by the caller.
/// Indices come back in record order; the only allocation is the output
/// buffer, pre-sized to the partition length.
pub fn scan(
    buf: &[u8],
    item_base: usize,
    stride: usize,
    start: usize,
    end: usize,
    needles: &[Finder<'_>],
) -> Vec<i32> {
    let mut out = Vec::with_capacity(end - start);

    'records: for i in start..end {
        let rec = record(buf, item_base, stride, i as i32);
        let lower = str_field(buf, rec, REC_LOWER_OFF, REC_LOWER_LEN);

        for needle in needles {
            if needle.find(lower).is_none() {
                continue 'records;
            }
        }

        out.push(i as i32);
    }

    out
}

/// Linear scan for the first record whose path bytes match exactly.
///
/// The record array is sorted by name, not path, so a binary search is not
/// possible; the comparison short-circuits on length first.
pub fn lookup_path(
    buf: &[u8],
    item_base: usize,
    stride: usize,
    count: usize,
    target: &[u8],
) -> Option<i32> {
    for i in 0..count {
        let rec = record(buf, item_base, stride, i as i32);
        if read_u32(rec, REC_PATH_LEN) as usize != target.len() {
            continue;
        }
        if str_field(buf, rec, REC_PATH_OFF, REC_PATH_LEN) == target {
            return Some(i as i32);
        }
    }
    None
}

/// Compare two records under a sort key, ascending basis.
///
/// Name/path are byte-lexicographic with length as the tiebreaker (shorter
/// is smaller, i.e. plain `&[u8]` ordering); size is signed 64-bit; date is
/// a 64-bit float. NaN is not expected in well-formed snapshots and
/// compares equal.
#[inline]
fn key_cmp(buf: &[u8], item_base: usize, stride: usize, a: i32, b: i32, key: SortKey) -> Ordering {
    let ra = record(buf, item_base, stride, a);
    let rb = record(buf, item_base, stride, b);
    match key {
        SortKey::Name => str_field(buf, ra, REC_NAME_OFF, REC_NAME_LEN)
            .cmp(str_field(buf, rb, REC_NAME_OFF, REC_NAME_LEN)),
        SortKey::Path => str_field(buf, ra, REC_PATH_OFF, REC_PATH_LEN)
            .cmp(str_field(buf, rb, REC_PATH_OFF, REC_PATH_LEN)),
        SortKey::Size => read_i64(ra, REC_SIZE).cmp(&read_i64(rb, REC_SIZE)),
        SortKey::Date => read_f64(ra, REC_MTIME)
            .partial_cmp(&read_f64(rb, REC_MTIME))
            .unwrap_or(Ordering::Equal),
    }
}

/// In-place unstable sort of an index vector by the named key. The result
/// is a total order; stability is not required.
pub fn sort_indices(
    indices: &mut [i32],
    buf: &[u8],
    item_base: usize,
    stride: usize,
    key: SortKey,
    ascending: bool,
) {
    indices.sort_unstable_by(|&a, &b| {
        let ord = key_cmp(buf, item_base, stride, a, b, key);
        if ascending {
            ord
        } else {
            ord.reverse()
        }
    });
}

/// Compare one packed record against a heap item, ascending basis. Used by
/// the snapshot/overlay merge so both sides order identically.
pub fn compare_with_item(
    buf: &[u8],
    item_base: usize,
    stride: usize,
    index: i32,
    item: &Item,
    key: SortKey,
) -> Ordering {
    let rec = record(buf, item_base, stride, index);
    match key {
        SortKey::Name => {
            str_field(buf, rec, REC_NAME_OFF, REC_NAME_LEN).cmp(item.name.as_bytes())
        }
        SortKey::Path => {
            str_field(buf, rec, REC_PATH_OFF, REC_PATH_LEN).cmp(item.path.as_bytes())
        }
        SortKey::Size => read_i64(rec, REC_SIZE).cmp(&item.size),
        SortKey::Date => read_f64(rec, REC_MTIME)
            .partial_cmp(&item.mtime_secs())
            .unwrap_or(Ordering::Equal),
    }
}
