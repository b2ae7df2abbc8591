//! Atomic snapshot serialization.
//!
//! The writer streams the header, the packed record array, and the string
//! pool through a buffered writer into a temporary file in the destination
//! directory, fsyncs, then renames over the destination. Readers observe
//! either the old snapshot or the new one, never a torn file.

use crate::error::EngineError;
use crate::index::types::{
    Item, FLAG_DIR, HEADER_LEN, RECORD_LEN, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
};
use log::debug;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Serialize a full item set to `dest` in the binary snapshot format.
///
/// Items are sorted by name (byte-lexicographic) first; that order is the
/// snapshot's natural order and what makes the parallel scan's concatenated
/// output come back name-sorted for free. Strings are not deduplicated:
/// the pool stays append-only and the scan path reads one contiguous range
/// per field, at the cost of a larger file.
pub fn write_snapshot(mut items: Vec<Item>, dest: &Path) -> Result<(), EngineError> {
    items.sort_unstable_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

    let count = items.len();
    let pool_base = HEADER_LEN + count * RECORD_LEN;

    let tmp_path = temp_sibling(dest);
    let file = File::create(&tmp_path)?;
    let mut out = BufWriter::with_capacity(65536, file);

    // Header.
    out.write_all(&SNAPSHOT_MAGIC)?;
    out.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
    out.write_all(&(count as i64).to_le_bytes())?;

    // Record array. String offsets are absolute file offsets, assigned by
    // walking a cursor over the pool layout: name, path, lowered name per
    // item, in item order. ASCII lowercasing is byte-preserving, so the
    // lowered copy has the same length as the name.
    let mut cursor = pool_base as u64;
    for item in &items {
        let name_len = item.name.len() as u64;
        let path_len = item.path.len() as u64;

        let name_off = cursor;
        let path_off = name_off + name_len;
        let lower_off = path_off + path_len;
        cursor = lower_off + name_len;
        if cursor > u32::MAX as u64 {
            return Err(EngineError::WriteFailed(io::Error::new(
                io::ErrorKind::InvalidData,
                "string pool exceeds the 4 GiB offset limit",
            )));
        }

        let mut rec = [0u8; RECORD_LEN];
        rec[0..8].copy_from_slice(&item.size.to_le_bytes());
        rec[8..16].copy_from_slice(&item.mtime_secs().to_le_bytes());
        rec[16] = if item.is_dir { FLAG_DIR } else { 0 };
        rec[20..24].copy_from_slice(&(name_off as u32).to_le_bytes());
        rec[24..28].copy_from_slice(&(name_len as u32).to_le_bytes());
        rec[28..32].copy_from_slice(&(path_off as u32).to_le_bytes());
        rec[32..36].copy_from_slice(&(path_len as u32).to_le_bytes());
        rec[36..40].copy_from_slice(&(lower_off as u32).to_le_bytes());
        rec[40..44].copy_from_slice(&(name_len as u32).to_le_bytes());
        out.write_all(&rec)?;
    }

    // String pool.
    for item in &items {
        out.write_all(item.name.as_bytes())?;
        out.write_all(item.path.as_bytes())?;
        out.write_all(item.name.to_ascii_lowercase().as_bytes())?;
    }

    out.flush()?;
    let file = out.into_inner().map_err(|e| EngineError::WriteFailed(e.into_error()))?;
    file.sync_all()?;
    fs::rename(&tmp_path, dest)?;

    debug!(
        "wrote snapshot: {} records, {} bytes, {}",
        count,
        cursor,
        dest.display()
    );
    Ok(())
}

/// Temp file next to the destination so the final rename stays on one
/// filesystem.
fn temp_sibling(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn item(name: &str, path: &str) -> Item {
        Item {
            path: path.to_string(),
            name: name.to_string(),
            is_dir: false,
            size: 42,
            modified: Some(UNIX_EPOCH + Duration::from_secs(1_600_000_000)),
        }
    }

    #[test]
    fn test_records_sorted_by_name_bytes() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("index.bin");
        write_snapshot(
            vec![item("zz", "/1"), item("Aa", "/2"), item("mm", "/3")],
            &dest,
        )
        .unwrap();

        let bytes = fs::read(&dest).unwrap();
        let count = i64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
        assert_eq!(count, 3);

        let name_at = |i: usize| -> Vec<u8> {
            let rec = &bytes[HEADER_LEN + i * RECORD_LEN..HEADER_LEN + (i + 1) * RECORD_LEN];
            let off = u32::from_le_bytes(rec[20..24].try_into().unwrap()) as usize;
            let len = u32::from_le_bytes(rec[24..28].try_into().unwrap()) as usize;
            bytes[off..off + len].to_vec()
        };
        // Byte order: 'A' < 'm' < 'z'.
        assert_eq!(name_at(0), b"Aa");
        assert_eq!(name_at(1), b"mm");
        assert_eq!(name_at(2), b"zz");
        for i in 0..count - 1 {
            assert!(name_at(i) <= name_at(i + 1));
        }
    }

    #[test]
    fn test_string_offsets_inside_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("index.bin");
        write_snapshot(vec![item("hello.txt", "/tmp/hello.txt")], &dest).unwrap();

        let bytes = fs::read(&dest).unwrap();
        let rec = &bytes[HEADER_LEN..HEADER_LEN + RECORD_LEN];
        for (off_field, len_field) in [(20, 24), (28, 32), (36, 40)] {
            let off = u32::from_le_bytes(rec[off_field..off_field + 4].try_into().unwrap()) as usize;
            let len = u32::from_le_bytes(rec[len_field..len_field + 4].try_into().unwrap()) as usize;
            assert!(off >= HEADER_LEN + RECORD_LEN);
            assert!(off + len <= bytes.len());
            assert!(std::str::from_utf8(&bytes[off..off + len]).is_ok());
        }
    }

    #[test]
    fn test_lowered_name_stored() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("index.bin");
        write_snapshot(vec![item("MixedCase.TXT", "/m")], &dest).unwrap();

        let bytes = fs::read(&dest).unwrap();
        let rec = &bytes[HEADER_LEN..HEADER_LEN + RECORD_LEN];
        let off = u32::from_le_bytes(rec[36..40].try_into().unwrap()) as usize;
        let len = u32::from_le_bytes(rec[40..44].try_into().unwrap()) as usize;
        assert_eq!(&bytes[off..off + len], b"mixedcase.txt");
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("index.bin");
        write_snapshot(vec![item("a", "/a")], &dest).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["index.bin".to_string()]);
    }

    #[test]
    fn test_overwrite_replaces_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("index.bin");
        write_snapshot(vec![item("one", "/one"), item("two", "/two")], &dest).unwrap();
        write_snapshot(vec![item("solo", "/solo")], &dest).unwrap();

        let bytes = fs::read(&dest).unwrap();
        let count = i64::from_le_bytes(bytes[8..16].try_into().unwrap());
        assert_eq!(count, 1);
    }
}
