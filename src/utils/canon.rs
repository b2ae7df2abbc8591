//! Shared path canonicalization.
//!
//! Path strings are primary keys across the catalog, the overlay, and the
//! snapshot. The crawler, the watcher, and every catalog write must
//! normalize through this one function or the same file shows up under two
//! spellings.

use std::fs;
use std::path::Path;

/// Canonicalize a path to its string key form.
///
/// Symlinks are resolved when the path exists. For a path that no longer
/// exists (the common case for deletion events) the parent is resolved
/// instead and the final component re-attached, so a removal maps to the
/// same key its earlier upsert used.
pub fn canonicalize_path(path: &Path) -> String {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved.to_string_lossy().into_owned();
    }

    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(parent) = fs::canonicalize(parent) {
            return parent.join(name).to_string_lossy().into_owned();
        }
    }

    path.to_string_lossy().into_owned()
}
