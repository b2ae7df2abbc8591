//! Catalog interface consumed by the engine core.
//!
//! The durable catalog is an external collaborator holding the
//! authoritative metadata; the core is agnostic to its storage technology
//! and talks to it only through [`Catalog`]. [`MemoryCatalog`] is the
//! reference implementation used by the standalone CLI and by tests.

use crate::index::types::Item;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Operations the engine core requires from the catalog store.
///
/// Implementations must support background-context writes concurrent with
/// read queries; the engine calls these from the crawler thread, the
/// watcher thread, and the rebuild path.
pub trait Catalog: Send + Sync {
    /// Bulk insert of crawled records.
    fn insert_batch(&self, items: Vec<Item>) -> Result<()>;

    /// Insert or replace a single record keyed by path.
    fn upsert(&self, item: Item) -> Result<()>;

    /// Delete the record with this exact path, if present.
    fn delete(&self, path: &str) -> Result<()>;

    /// Delete every record whose path starts with `prefix`.
    fn delete_prefix(&self, prefix: &str) -> Result<()>;

    /// Fetch records sorted by name (byte-lexicographic, path as the
    /// tiebreaker), optionally capped at `limit`.
    fn fetch_by_name(&self, limit: Option<usize>) -> Result<Vec<Item>>;

    /// Number of records currently stored.
    fn count(&self) -> Result<usize>;
}

/// Process-local catalog backed by a path-keyed map.
#[derive(Default)]
pub struct MemoryCatalog {
    entries: Mutex<BTreeMap<String, Item>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Item>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Catalog for MemoryCatalog {
    fn insert_batch(&self, items: Vec<Item>) -> Result<()> {
        let mut entries = self.lock();
        for item in items {
            entries.insert(item.path.clone(), item);
        }
        Ok(())
    }

    fn upsert(&self, item: Item) -> Result<()> {
        self.lock().insert(item.path.clone(), item);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.lock().remove(path);
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<()> {
        self.lock().retain(|path, _| !path.starts_with(prefix));
        Ok(())
    }

    fn fetch_by_name(&self, limit: Option<usize>) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self.lock().values().cloned().collect();
        items.sort_unstable_by(|a, b| {
            a.name
                .as_bytes()
                .cmp(b.name.as_bytes())
                .then_with(|| a.path.as_bytes().cmp(b.path.as_bytes()))
        });
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, path: &str) -> Item {
        Item {
            path: path.to_string(),
            name: name.to_string(),
            is_dir: false,
            size: 0,
            modified: None,
        }
    }

    #[test]
    fn test_upsert_replaces_by_path() {
        let cat = MemoryCatalog::new();
        cat.upsert(item("a.txt", "/a.txt")).unwrap();
        let mut updated = item("a.txt", "/a.txt");
        updated.size = 9;
        cat.upsert(updated).unwrap();

        assert_eq!(cat.count().unwrap(), 1);
        assert_eq!(cat.fetch_by_name(None).unwrap()[0].size, 9);
    }

    #[test]
    fn test_delete_prefix() {
        let cat = MemoryCatalog::new();
        cat.insert_batch(vec![
            item("a", "/keep/a"),
            item("b", "/drop/b"),
            item("c", "/drop/sub/c"),
        ])
        .unwrap();
        cat.delete_prefix("/drop").unwrap();

        let left = cat.fetch_by_name(None).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].path, "/keep/a");
    }

    #[test]
    fn test_fetch_sorted_by_name_with_limit() {
        let cat = MemoryCatalog::new();
        cat.insert_batch(vec![
            item("zz", "/1"),
            item("aa", "/2"),
            item("mm", "/3"),
        ])
        .unwrap();

        let all = cat.fetch_by_name(None).unwrap();
        let names: Vec<&str> = all.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["aa", "mm", "zz"]);

        let capped = cat.fetch_by_name(Some(2)).unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].name, "aa");
    }
}
