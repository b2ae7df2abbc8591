//! Error kinds raised by the engine core.
//!
//! Queries never fail: an empty snapshot and an empty overlay produce an
//! empty result. Errors are confined to the snapshot, rebuild, and crawl
//! paths.

use std::path::PathBuf;

/// Errors surfaced by the snapshot reader/writer, the crawler, and the
/// rebuild protocol.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The snapshot file does not exist. Recovery: enter the rebuild path.
    #[error("snapshot not found: {}", .0.display())]
    SnapshotAbsent(PathBuf),

    /// Magic, version, or size validation failed on open. Recovery: treat
    /// the snapshot as absent and rebuild.
    #[error("corrupt or incompatible snapshot {}: {reason}", .path.display())]
    SnapshotCorrupt { path: PathBuf, reason: String },

    /// Snapshot serialization failed. The previous snapshot stays in
    /// service; the rebuild is retried on the next debounce tick.
    #[error("failed to write snapshot: {0}")]
    WriteFailed(#[from] std::io::Error),

    /// Propagated from the external catalog. Not retried; aborts the
    /// current rebuild or crawl batch.
    #[error("catalog error: {0}")]
    Catalog(anyhow::Error),

    /// The generation token changed while the operation was in flight.
    /// Nothing was committed.
    #[error("operation cancelled by a newer generation")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, EngineError>;
