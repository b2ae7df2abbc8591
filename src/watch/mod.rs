//! Filesystem-event adapter.
//!
//! Translates raw notify events into catalog updates and overlay
//! mutations. Events are coalesced per path by the [`debouncer`]; each
//! flushed change is re-statted before being applied, so the filesystem is
//! the authority on what actually happened, not the event kind.

pub mod debouncer;

use crate::catalog::Catalog;
use crate::engine::SearchEngine;
use crate::index::types::Item;
use crate::utils::canonicalize_path;
use anyhow::{Context, Result};
use debouncer::{ChangeKind, EventDebouncer};
use log::{debug, warn};
use notify::event::RemoveKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Default coalescing window for raw events.
pub const DEFAULT_EVENT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Poll interval for the shutdown flag while the event channel is quiet.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Handle to a running watcher thread. Dropping it stops the watcher.
pub struct WatcherHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Signal the thread to stop and join it.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Watch `roots` recursively and apply every settled change to the catalog
/// and the engine overlay.
pub fn spawn_watcher(
    roots: &[PathBuf],
    catalog: Arc<dyn Catalog>,
    engine: Arc<SearchEngine>,
    window: Duration,
) -> Result<WatcherHandle> {
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();

    let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })
    .context("failed to create filesystem watcher")?;

    for root in roots {
        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let thread_shutdown = Arc::clone(&shutdown);

    let thread = std::thread::spawn(move || {
        // The watcher must live on this thread; dropping it unsubscribes.
        let _watcher = watcher;
        let mut debouncer = EventDebouncer::new(window);

        loop {
            if thread_shutdown.load(Ordering::SeqCst) {
                break;
            }

            match rx.recv_timeout(IDLE_TICK) {
                Ok(Ok(event)) => {
                    if let Some(kind) = map_event_kind(&event.kind) {
                        for path in event.paths {
                            debouncer.add(path, kind);
                        }
                    }
                }
                Ok(Err(err)) => warn!("watcher error: {err}"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if debouncer.is_ready() {
                for (path, kind) in debouncer.flush() {
                    apply_change(catalog.as_ref(), &engine, &path, kind);
                }
            }
        }
    });

    Ok(WatcherHandle {
        shutdown,
        thread: Some(thread),
    })
}

fn map_event_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(RemoveKind::Folder) => Some(ChangeKind::RemovedDir),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        // Access and other notifications carry no catalog-visible change.
        _ => None,
    }
}

/// Re-stat a settled path and route it: present paths upsert, vanished
/// files tombstone, vanished directories turn into a prefix removal.
fn apply_change(
    catalog: &dyn Catalog,
    engine: &Arc<SearchEngine>,
    path: &Path,
    kind: ChangeKind,
) {
    let canonical = canonicalize_path(path);

    match std::fs::symlink_metadata(path) {
        Ok(metadata) => {
            let item = item_from_metadata(canonical, path, &metadata);
            debug!("watch upsert: {}", item.path);
            if let Err(err) = catalog.upsert(item.clone()) {
                warn!("catalog upsert failed for {}: {err}", item.path);
            }
            engine.put(item);
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            if kind == ChangeKind::RemovedDir {
                debug!("watch remove prefix: {canonical}");
                if let Err(err) = catalog.delete_prefix(&canonical) {
                    warn!("catalog prefix delete failed for {canonical}: {err}");
                }
                if let Err(err) = engine.remove_prefix(&canonical) {
                    warn!("prefix rebuild failed for {canonical}: {err}");
                }
            } else {
                debug!("watch remove: {canonical}");
                if let Err(err) = catalog.delete(&canonical) {
                    warn!("catalog delete failed for {canonical}: {err}");
                }
                engine.remove(&canonical);
            }
        }
        Err(err) => warn!("stat failed for {canonical}: {err}"),
    }
}

fn item_from_metadata(canonical: String, path: &Path, metadata: &Metadata) -> Item {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| canonical.clone());
    Item {
        path: canonical,
        name,
        is_dir: metadata.is_dir(),
        size: metadata.len() as i64,
        modified: metadata.modified().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::engine::DEFAULT_REBUILD_DEBOUNCE;
    use crate::index::types::SortSpec;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<MemoryCatalog>, Arc<SearchEngine>) {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let engine = SearchEngine::new(
            catalog.clone(),
            dir.path().join("index.bin"),
            DEFAULT_REBUILD_DEBOUNCE,
        );
        (dir, catalog, engine)
    }

    #[test]
    fn test_apply_change_upserts_present_path() {
        let (dir, catalog, engine) = setup();
        let file = dir.path().join("new.txt");
        fs::write(&file, b"hello").unwrap();

        apply_change(catalog.as_ref(), &engine, &file, ChangeKind::Created);

        assert_eq!(catalog.count().unwrap(), 1);
        let results = engine.search("new.txt", SortSpec::default(), 0);
        assert_eq!(results.total(), 1);
        assert_eq!(results.materialize(results.entries()[0]).size, 5);
    }

    #[test]
    fn test_apply_change_removes_vanished_path() {
        let (dir, catalog, engine) = setup();
        let file = dir.path().join("gone.txt");
        fs::write(&file, b"x").unwrap();
        apply_change(catalog.as_ref(), &engine, &file, ChangeKind::Created);
        assert_eq!(catalog.count().unwrap(), 1);

        let canonical = canonicalize_path(&file);
        fs::remove_file(&file).unwrap();
        apply_change(catalog.as_ref(), &engine, &file, ChangeKind::Removed);

        assert_eq!(catalog.count().unwrap(), 0);
        let results = engine.search("", SortSpec::default(), 0);
        assert!(results.iter_items().all(|item| item.path != canonical));
    }

    #[test]
    fn test_apply_change_stat_decides_over_event_kind() {
        // A Created event for a path that no longer exists must tombstone,
        // not upsert: the re-stat is the authority.
        let (dir, catalog, engine) = setup();
        let file = dir.path().join("phantom.txt");

        apply_change(catalog.as_ref(), &engine, &file, ChangeKind::Created);

        assert_eq!(catalog.count().unwrap(), 0);
        assert_eq!(engine.search("phantom", SortSpec::default(), 0).total(), 0);
    }
}
