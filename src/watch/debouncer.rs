//! Coalescing debouncer for raw filesystem events.
//!
//! Editors and git operations fire bursts of events per path; the
//! debouncer keeps only the net effect per path within a time window and
//! releases one batch once the burst goes quiet.

use ahash::AHashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Net change observed for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// File or directory created.
    Created,
    /// Contents or metadata modified.
    Modified,
    /// File removed.
    Removed,
    /// Directory removed; maps to a prefix removal downstream.
    RemovedDir,
}

impl ChangeKind {
    fn is_removal(self) -> bool {
        matches!(self, ChangeKind::Removed | ChangeKind::RemovedDir)
    }
}

/// Fold a new event into the pending kind for the same path. `None` means
/// the path nets out to nothing (created then removed inside one window).
fn coalesce(pending: ChangeKind, incoming: ChangeKind) -> Option<ChangeKind> {
    match (pending, incoming) {
        (ChangeKind::Created, ChangeKind::Modified) => Some(ChangeKind::Created),
        (ChangeKind::Created, k) if k.is_removal() => None,
        (ChangeKind::Modified, k) if k.is_removal() => Some(k),
        // Removed then created again: the file was replaced.
        (k, ChangeKind::Created) if k.is_removal() => Some(ChangeKind::Modified),
        (k, ChangeKind::Modified) if k.is_removal() => Some(ChangeKind::Modified),
        (_, incoming) => Some(incoming),
    }
}

pub struct EventDebouncer {
    window: Duration,
    pending: AHashMap<PathBuf, ChangeKind>,
    last_event: Option<Instant>,
}

impl EventDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: AHashMap::new(),
            last_event: None,
        }
    }

    pub fn add(&mut self, path: PathBuf, kind: ChangeKind) {
        self.last_event = Some(Instant::now());
        match self.pending.remove(&path) {
            Some(existing) => {
                if let Some(folded) = coalesce(existing, kind) {
                    self.pending.insert(path, folded);
                }
            }
            None => {
                self.pending.insert(path, kind);
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// True once the window has elapsed since the last event.
    pub fn is_ready(&self) -> bool {
        self.has_pending()
            && self
                .last_event
                .is_some_and(|last| last.elapsed() >= self.window)
    }

    /// Drain all pending changes. Call after [`EventDebouncer::is_ready`].
    pub fn flush(&mut self) -> Vec<(PathBuf, ChangeKind)> {
        self.last_event = None;
        self.pending.drain().collect()
    }
}
