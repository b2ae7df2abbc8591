//! In-memory delta overlay shadowing the snapshot.
//!
//! Mutations that arrive between rebuilds live here: `mutations` holds
//! adds and updates keyed by path, `tombstones` holds deletions. The two
//! sets are disjoint at every observable moment. The overlay is a
//! performance layer, not a source of truth; the catalog re-observes every
//! mutation on the next rebuild.

use crate::index::reader::BinaryIndex;
use crate::index::types::Item;
use ahash::{AHashMap, AHashSet};

#[derive(Default)]
pub struct DeltaOverlay {
    mutations: AHashMap<String, Item>,
    tombstones: AHashSet<String>,
}

impl DeltaOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an add or update. Any tombstone for the path is cleared.
    pub fn put(&mut self, item: Item) {
        self.tombstones.remove(&item.path);
        self.mutations.insert(item.path.clone(), item);
    }

    /// Record a deletion. Any pending mutation for the path is cleared.
    pub fn remove(&mut self, path: &str) {
        self.mutations.remove(path);
        self.tombstones.insert(path.to_string());
    }

    /// Drop every mutation and tombstone under a path prefix. Used before
    /// the forced rebuild that serves `remove_prefix`, so stale adds under
    /// the vanished tree cannot outlive it.
    pub fn remove_matching_prefix(&mut self, prefix: &str) {
        self.mutations.retain(|path, _| !path.starts_with(prefix));
        self.tombstones.retain(|path| !path.starts_with(prefix));
    }

    pub fn contains_tomb(&self, path: &str) -> bool {
        self.tombstones.contains(path)
    }

    pub fn iter_mutations(&self) -> impl Iterator<Item = &Item> {
        self.mutations.values()
    }

    pub fn iter_tombstones(&self) -> impl Iterator<Item = &str> {
        self.tombstones.iter().map(String::as_str)
    }

    pub fn mutation_keys(&self) -> impl Iterator<Item = &str> {
        self.mutations.keys().map(String::as_str)
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.len()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty() && self.tombstones.is_empty()
    }

    pub fn clear(&mut self) {
        self.mutations.clear();
        self.tombstones.clear();
    }

    /// Garbage-collect entries the fresh snapshot already agrees with:
    /// mutations whose `(path, size, mtime)` match their snapshot record,
    /// and tombstones whose path no longer appears in the snapshot. Not
    /// required for correctness, only for keeping the overlay small.
    pub fn prune_synced(&mut self, index: &BinaryIndex) {
        self.mutations.retain(|path, item| match index.find_path(path) {
            Some(i) => {
                let rec = index.materialize(i);
                rec.size != item.size || rec.mtime_secs() != item.mtime_secs()
            }
            None => true,
        });
        self.tombstones.retain(|path| index.find_path(path).is_some());
    }
}
