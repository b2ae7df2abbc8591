//! The search engine orchestrator.
//!
//! A single-writer actor realized as a mutex-guarded state block: the
//! current [`BinaryIndex`] handle, the [`DeltaOverlay`], and the lifecycle
//! state change in one logical execution context, while queries copy the
//! small shared pieces under the lock and then run lock-free against the
//! immutable mapping. Debounced rebuilds run on a dedicated thread fed by a
//! channel.

pub mod overlay;

use crate::catalog::Catalog;
use crate::error::EngineError;
use crate::index::reader::BinaryIndex;
use crate::index::types::{item_key_cmp, Item, SortSpec};
use crate::index::writer::write_snapshot;
use ahash::AHashSet;
use log::{debug, info, warn};
use overlay::DeltaOverlay;
use std::cmp::Ordering;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

/// Default quiescence window before a debounced rebuild fires.
pub const DEFAULT_REBUILD_DEBOUNCE: Duration = Duration::from_secs(5);

/// Items fetched for the immediate fast path when no snapshot exists at
/// startup.
pub const FAST_PATH_LIMIT: usize = 1000;

/// Lifecycle states of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Loading,
    Ready,
    Rebuilding,
}

/// Change notifications published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Startup load began.
    IndexLoadStarted,
    /// Startup load finished; the engine answers queries.
    IndexLoadFinished,
    /// A mutation was applied or a rebuild swapped the snapshot.
    IndexUpdated,
}

/// Cancellation cookie for long-running crawl/rebuild operations.
///
/// Holders re-check validity at batch boundaries; a bumped token means a
/// newer operation superseded this one and no further state should be
/// committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

enum DebounceMsg {
    Touch,
}

struct EngineInner {
    index: Option<Arc<BinaryIndex>>,
    overlay: DeltaOverlay,
    state: EngineState,
}

/// Result window of one query: a virtual vector of 64-bit entries plus the
/// pre-truncation total.
///
/// Non-negative entries index into the snapshot captured at query time;
/// negative entries are the bitwise-NOT of a position in the per-query
/// overlay vector carried alongside. Materialization is on demand, so
/// million-row windows never allocate per-row up front.
pub struct SearchResults {
    entries: Vec<i64>,
    total: usize,
    index: Option<Arc<BinaryIndex>>,
    overlay_items: Vec<Item>,
}

impl SearchResults {
    pub fn entries(&self) -> &[i64] {
        &self.entries
    }

    /// Number of matches before the limit was applied.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode one entry into a heap [`Item`]. Entries from a stale result
    /// vector are bounds-checked and fall back to the placeholder item.
    pub fn materialize(&self, entry: i64) -> Item {
        if entry < 0 {
            let pos = !entry as usize;
            self.overlay_items
                .get(pos)
                .cloned()
                .unwrap_or_else(Item::placeholder)
        } else {
            match &self.index {
                Some(index) => index.materialize(entry as i32),
                None => Item::placeholder(),
            }
        }
    }

    pub fn iter_items(&self) -> impl Iterator<Item = Item> + '_ {
        self.entries.iter().map(move |&e| self.materialize(e))
    }
}

/// Top-level engine: owns the snapshot handle, the overlay, the generation
/// token, and the debounced rebuild task.
pub struct SearchEngine {
    inner: Mutex<EngineInner>,
    catalog: Arc<dyn Catalog>,
    snapshot_path: PathBuf,
    generation: AtomicU64,
    shutdown: AtomicBool,
    debounce_tx: Sender<DebounceMsg>,
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
    /// Serializes rebuilds so two writers never share the temp file; a
    /// superseded rebuild still cancels via its generation check.
    rebuild_serial: Mutex<()>,
}

impl SearchEngine {
    /// Create the engine and spawn its debounce thread. The engine starts
    /// `Uninitialized`; call [`SearchEngine::load`] to bring it up.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        snapshot_path: PathBuf,
        rebuild_debounce: Duration,
    ) -> Arc<Self> {
        let (debounce_tx, debounce_rx) = mpsc::channel();

        let engine = Arc::new(Self {
            inner: Mutex::new(EngineInner {
                index: None,
                overlay: DeltaOverlay::new(),
                state: EngineState::Uninitialized,
            }),
            catalog,
            snapshot_path,
            generation: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            debounce_tx,
            subscribers: Mutex::new(Vec::new()),
            rebuild_serial: Mutex::new(()),
        });

        let weak = Arc::downgrade(&engine);
        thread::spawn(move || debounce_loop(weak, debounce_rx, rebuild_debounce));

        engine
    }

    fn lock_inner(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> EngineState {
        self.lock_inner().state
    }

    pub fn snapshot_path(&self) -> &PathBuf {
        &self.snapshot_path
    }

    /// Records in the current snapshot (not counting overlay entries).
    pub fn item_count(&self) -> usize {
        self.lock_inner().index.as_ref().map_or(0, |i| i.item_count())
    }

    // ---- notifications ----

    /// Register for change notifications. Disconnected receivers are
    /// dropped on the next publish.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn publish(&self, event: EngineEvent) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tx| tx.send(event).is_ok());
    }

    // ---- generation / cancellation ----

    pub fn current_generation(&self) -> Generation {
        Generation(self.generation.load(AtomicOrdering::SeqCst))
    }

    pub fn generation_valid(&self, generation: Generation) -> bool {
        self.generation.load(AtomicOrdering::SeqCst) == generation.0
    }

    /// Bump the token and return the new value. A new long-running
    /// operation calls this first so earlier in-flight work is cancelled
    /// while its own is not.
    pub fn begin_operation(&self) -> Generation {
        Generation(self.generation.fetch_add(1, AtomicOrdering::SeqCst) + 1)
    }

    /// Cancel in-flight crawl/rebuild work without starting anything new.
    pub fn cancel_indexing(&self) {
        self.begin_operation();
    }

    /// Cooperative stop signal checked by the crawler alongside the
    /// generation token.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, AtomicOrdering::SeqCst);
        self.cancel_indexing();
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(AtomicOrdering::SeqCst)
    }

    // ---- startup ----

    /// Load the snapshot, or enter the rebuild path if it is absent or
    /// corrupt: a capped fast-path snapshot is served immediately and the
    /// full catalog is streamed into a fresh snapshot in the background.
    pub fn load(self: &Arc<Self>) -> Result<(), EngineError> {
        self.publish(EngineEvent::IndexLoadStarted);
        self.lock_inner().state = EngineState::Loading;

        match BinaryIndex::open(&self.snapshot_path) {
            Ok(index) => {
                info!("loaded snapshot: {} items", index.item_count());
                let mut inner = self.lock_inner();
                inner.index = Some(Arc::new(index));
                inner.state = EngineState::Ready;
                drop(inner);
                self.publish(EngineEvent::IndexLoadFinished);
                Ok(())
            }
            Err(err @ (EngineError::SnapshotAbsent(_) | EngineError::SnapshotCorrupt { .. })) => {
                info!("snapshot unavailable ({err}), entering rebuild path");

                let quick = self
                    .catalog
                    .fetch_by_name(Some(FAST_PATH_LIMIT))
                    .map_err(EngineError::Catalog)?;
                if !quick.is_empty() {
                    write_snapshot(quick, &self.snapshot_path)?;
                    let index = BinaryIndex::open(&self.snapshot_path)?;
                    debug!("fast path ready: {} items", index.item_count());
                    self.lock_inner().index = Some(Arc::new(index));
                }

                self.lock_inner().state = EngineState::Ready;
                self.publish(EngineEvent::IndexLoadFinished);

                // Stream the full catalog in the background; queries run
                // against the fast path meanwhile.
                let engine = Arc::clone(self);
                thread::spawn(move || {
                    if let Err(err) = engine.rebuild() {
                        warn!("startup rebuild failed: {err}");
                    }
                });
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    // ---- query path ----

    /// Run one query against the snapshot merged with the overlay.
    ///
    /// `limit == 0` means unlimited. The returned total is the match count
    /// before limiting; for the empty query that equals `snapshot_count +
    /// overlay_adds - overlay_hits_in_snapshot`.
    pub fn search(&self, query: &str, sort: SortSpec, limit: usize) -> SearchResults {
        let lowered = query.to_ascii_lowercase();
        let tokens: Vec<&str> = lowered.split_ascii_whitespace().collect();

        // Copy the small shared state under the lock, then drop it before
        // the parallel scan.
        let (index, mut overlay_items, shadowed_paths) = {
            let inner = self.lock_inner();
            let overlay_items: Vec<Item> = inner
                .overlay
                .iter_mutations()
                .filter(|item| name_matches_tokens(&item.name, &tokens))
                .cloned()
                .collect();
            // Paths whose snapshot records are shadowed: tombstones plus
            // every mutated path (the overlay copy supersedes the record).
            let shadowed: Vec<String> = inner
                .overlay
                .iter_tombstones()
                .chain(inner.overlay.mutation_keys())
                .map(str::to_string)
                .collect();
            (inner.index.clone(), overlay_items, shadowed)
        };

        // 1. Index scan: candidate indices ascending by snapshot order.
        let mut candidates = match &index {
            Some(index) => index.search(query),
            None => Vec::new(),
        };

        // 2. Filter shadowed records.
        if let Some(index) = &index {
            if !shadowed_paths.is_empty() && !candidates.is_empty() {
                let dead: AHashSet<i32> = shadowed_paths
                    .iter()
                    .filter_map(|path| index.find_path(path))
                    .collect();
                if !dead.is_empty() {
                    candidates.retain(|i| !dead.contains(i));
                }
            }
        }

        // 3. Sort candidates by the requested key.
        if let Some(index) = &index {
            index.sort(&mut candidates, sort.key, sort.ascending);
        }

        // 4. Sort the surviving overlay items with the equivalent
        // comparator.
        overlay_items.sort_unstable_by(|a, b| {
            let ord = item_key_cmp(a, b, sort.key);
            if sort.ascending {
                ord
            } else {
                ord.reverse()
            }
        });

        // 5. Two-pointer merge; ties emit the snapshot side first.
        let mut entries = Vec::with_capacity(candidates.len() + overlay_items.len());
        match &index {
            Some(index) => {
                let (mut i, mut j) = (0usize, 0usize);
                while i < candidates.len() && j < overlay_items.len() {
                    let ord = index.compare(candidates[i], &overlay_items[j], sort.key);
                    let ord = if sort.ascending { ord } else { ord.reverse() };
                    if ord == Ordering::Greater {
                        entries.push(!(j as i64));
                        j += 1;
                    } else {
                        entries.push(candidates[i] as i64);
                        i += 1;
                    }
                }
                entries.extend(candidates[i..].iter().map(|&c| c as i64));
                entries.extend((j..overlay_items.len()).map(|j| !(j as i64)));
            }
            None => {
                entries.extend((0..overlay_items.len()).map(|j| !(j as i64)));
            }
        }

        // 6/7. Virtual vector: truncate to the limit, report the full count.
        let total = entries.len();
        if limit > 0 {
            entries.truncate(limit);
        }

        SearchResults {
            entries,
            total,
            index,
            overlay_items,
        }
    }

    // ---- mutation path ----

    /// Apply an add/update to the overlay and schedule a debounced rebuild.
    pub fn put(&self, item: Item) {
        self.lock_inner().overlay.put(item);
        self.touch_rebuild();
        self.publish(EngineEvent::IndexUpdated);
    }

    /// Tombstone a path and schedule a debounced rebuild.
    pub fn remove(&self, path: &str) {
        self.lock_inner().overlay.remove(path);
        self.touch_rebuild();
        self.publish(EngineEvent::IndexUpdated);
    }

    /// Prefix removal is expensive under the name-sorted snapshot, so the
    /// engine answers it with an immediate full rebuild instead of prefix
    /// iteration. Overlay entries under the prefix are dropped first so
    /// they cannot outlive the vanished tree. The caller is expected to
    /// have prefix-deleted the catalog already.
    pub fn remove_prefix(&self, prefix: &str) -> Result<(), EngineError> {
        self.lock_inner().overlay.remove_matching_prefix(prefix);
        self.rebuild()
    }

    /// Drop all state, delete the on-disk snapshot, and return to
    /// `Uninitialized`.
    pub fn clear(&self) -> Result<(), EngineError> {
        self.cancel_indexing();
        {
            let mut inner = self.lock_inner();
            inner.index = None;
            inner.overlay.clear();
            inner.state = EngineState::Uninitialized;
        }
        match fs::remove_file(&self.snapshot_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(EngineError::WriteFailed(e)),
        }
        self.publish(EngineEvent::IndexUpdated);
        Ok(())
    }

    fn touch_rebuild(&self) {
        // A dead debounce thread only means the engine is shutting down.
        let _ = self.debounce_tx.send(DebounceMsg::Touch);
    }

    // ---- rebuild protocol ----

    /// Synchronous full rebuild: bump the generation, drain the catalog
    /// into a fresh snapshot, swap it in. The overlay is intentionally not
    /// cleared: mutations that raced the catalog drain stay visible
    /// (read-your-writes) and are pruned once a snapshot agrees with them.
    pub fn force_rebuild(&self) -> Result<(), EngineError> {
        self.rebuild()
    }

    fn rebuild(&self) -> Result<(), EngineError> {
        let generation = self.begin_operation();
        let _serial = self
            .rebuild_serial
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        // A rebuild that queued behind a newer one is already superseded.
        if !self.generation_valid(generation) {
            return Err(EngineError::Cancelled);
        }

        let previous_state = {
            let mut inner = self.lock_inner();
            let previous = inner.state;
            inner.state = EngineState::Rebuilding;
            previous
        };

        let result = self.rebuild_stages(generation);

        if result.is_err() {
            let mut inner = self.lock_inner();
            if inner.state == EngineState::Rebuilding {
                inner.state = previous_state;
            }
        }
        result
    }

    fn rebuild_stages(&self, generation: Generation) -> Result<(), EngineError> {
        let items = self
            .catalog
            .fetch_by_name(None)
            .map_err(EngineError::Catalog)?;
        if !self.generation_valid(generation) {
            return Err(EngineError::Cancelled);
        }

        let count = items.len();
        write_snapshot(items, &self.snapshot_path)?;
        if !self.generation_valid(generation) {
            return Err(EngineError::Cancelled);
        }

        let index = Arc::new(BinaryIndex::open(&self.snapshot_path)?);

        {
            let mut inner = self.lock_inner();
            // Final check under the lock so a cancelled rebuild can never
            // swap its snapshot in after a newer operation started.
            if !self.generation_valid(generation) {
                return Err(EngineError::Cancelled);
            }
            inner.overlay.prune_synced(&index);
            inner.index = Some(index);
            inner.state = EngineState::Ready;
        }

        debug!("rebuild complete: {count} items");
        self.publish(EngineEvent::IndexUpdated);
        Ok(())
    }
}

/// Debounce thread body: coalesce mutation touches and rebuild after the
/// quiescence window. Holding only a weak reference lets the engine drop
/// freely; the sender disconnecting ends the loop.
fn debounce_loop(
    engine: Weak<SearchEngine>,
    rx: Receiver<DebounceMsg>,
    window: Duration,
) {
    loop {
        match rx.recv() {
            Ok(DebounceMsg::Touch) => {}
            Err(_) => return,
        }

        // Extend the window while further mutations arrive.
        loop {
            match rx.recv_timeout(window) {
                Ok(DebounceMsg::Touch) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        let Some(engine) = engine.upgrade() else {
            return;
        };
        match engine.rebuild() {
            Ok(()) => {}
            Err(EngineError::Cancelled) => {}
            // WriteFailed and catalog errors: the previous snapshot stays
            // in service and the next mutation retries.
            Err(err) => warn!("debounced rebuild failed: {err}"),
        }
    }
}

/// Token-AND match on a lowercased name; the same semantics the snapshot
/// scan applies, so overlay and snapshot agree on what a query matches.
fn name_matches_tokens(name: &str, tokens: &[&str]) -> bool {
    if tokens.is_empty() {
        return true;
    }
    let lowered = name.to_ascii_lowercase();
    tokens
        .iter()
        .all(|t| memchr::memmem::find(lowered.as_bytes(), t.as_bytes()).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::index::types::SortKey;

    fn item(name: &str, path: &str, size: i64) -> Item {
        Item {
            path: path.to_string(),
            name: name.to_string(),
            is_dir: false,
            size,
            modified: None,
        }
    }

    fn engine_with(items: Vec<Item>) -> (tempfile::TempDir, Arc<SearchEngine>) {
        let dir = tempfile::TempDir::new().unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert_batch(items).unwrap();
        let engine = SearchEngine::new(
            catalog,
            dir.path().join("index.bin"),
            DEFAULT_REBUILD_DEBOUNCE,
        );
        engine.force_rebuild().unwrap();
        (dir, engine)
    }

    #[test]
    fn test_name_matches_tokens() {
        assert!(name_matches_tokens("Foobar.txt", &["foo", "bar"]));
        assert!(!name_matches_tokens("Foo.txt", &["foo", "bar"]));
        assert!(name_matches_tokens("anything", &[]));
    }

    #[test]
    fn test_generation_bump_invalidates() {
        let (_dir, engine) = engine_with(vec![]);
        let generation = engine.begin_operation();
        assert!(engine.generation_valid(generation));
        engine.cancel_indexing();
        assert!(!engine.generation_valid(generation));
    }

    #[test]
    fn test_search_no_index_serves_overlay() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = SearchEngine::new(
            Arc::new(MemoryCatalog::new()),
            dir.path().join("index.bin"),
            DEFAULT_REBUILD_DEBOUNCE,
        );
        engine.put(item("ghost.txt", "/ghost.txt", 3));

        let results = engine.search("ghost", SortSpec::default(), 0);
        assert_eq!(results.total(), 1);
        assert_eq!(results.materialize(results.entries()[0]).size, 3);
    }

    #[test]
    fn test_state_machine_clear() {
        let (_dir, engine) = engine_with(vec![item("a", "/a", 1)]);
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.item_count(), 1);

        engine.clear().unwrap();
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert_eq!(engine.item_count(), 0);
        assert!(!engine.snapshot_path().exists());
    }

    #[test]
    fn test_events_published_on_mutation() {
        let (_dir, engine) = engine_with(vec![]);
        let rx = engine.subscribe();
        engine.put(item("x", "/x", 1));
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::IndexUpdated);
    }

    #[test]
    fn test_merge_ties_emit_snapshot_first() {
        let (_dir, engine) = engine_with(vec![item("same", "/snap/same", 1)]);
        engine.put(item("same", "/over/same", 2));

        let results = engine.search("same", SortSpec::ascending(SortKey::Name), 0);
        assert_eq!(results.total(), 2);
        // Equal names: snapshot entry (non-negative) first.
        assert!(results.entries()[0] >= 0);
        assert!(results.entries()[1] < 0);
    }
}
