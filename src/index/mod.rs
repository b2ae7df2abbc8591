//! Snapshot format, reader, writer, and the byte-level scan primitives.

pub mod reader;
pub mod scanner;
pub mod types;
pub mod writer;

pub use reader::BinaryIndex;
pub use types::{Item, SortKey, SortSpec};
pub use writer::write_snapshot;
