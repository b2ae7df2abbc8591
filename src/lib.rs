//! # findex - Interactive File-Search Engine
//!
//! findex answers substring queries over hundreds of thousands to millions
//! of filesystem entries with sub-hundred-millisecond latency on every
//! keystroke, by pairing an immutable memory-mapped binary index with a
//! live in-memory delta overlay.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`index`] - The packed snapshot format, its reader and writer, and the
//!   byte-level scan/sort primitives
//! - [`engine`] - The orchestrator: query merge, debounced rebuilds,
//!   lifecycle, change notifications
//! - [`catalog`] - The interface to the durable metadata store
//! - [`crawl`] - The recursive filesystem crawler
//! - [`watch`] - The filesystem-event adapter feeding live updates
//! - [`utils`] - Data directory, configuration, path canonicalization
//!
//! ## Quick Start
//!
//! ```ignore
//! use findex::catalog::MemoryCatalog;
//! use findex::engine::SearchEngine;
//! use findex::index::{SortKey, SortSpec};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let catalog = Arc::new(MemoryCatalog::new());
//! let engine = SearchEngine::new(catalog, "index.bin".into(), Duration::from_secs(5));
//! engine.load()?;
//!
//! let results = engine.search("report", SortSpec::ascending(SortKey::Name), 100);
//! for item in results.iter_items() {
//!     println!("{}", item.path);
//! }
//! ```
//!
//! ## How queries stay fast
//!
//! Every query runs a parallel substring scan over a packed, name-sorted
//! record array mapped straight from disk, then two-pointer-merges the
//! candidates with the overlay of mutations that arrived since the last
//! rebuild. Results are a virtual vector of 64-bit entries materialized on
//! demand, so million-row windows cost nothing until rendered.
//!
//! Matching is case-insensitive via a precomputed lowercased name copy in
//! the snapshot; the folding is locale-insensitive ASCII only, full Unicode
//! case folding is out of scope.

pub mod catalog;
pub mod crawl;
pub mod engine;
pub mod error;
pub mod index;
pub mod utils;
pub mod watch;

pub use engine::{EngineEvent, EngineState, SearchEngine, SearchResults};
pub use error::EngineError;
pub use index::{BinaryIndex, Item, SortKey, SortSpec};
