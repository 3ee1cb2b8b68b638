//! # stratadb
//!
//! The on-disk core of an embedded LSM-tree key-value store: immutable
//! catalogues of sorted tables (Versions), the MANIFEST log that records
//! transitions between them, the compaction planner, per-level lookup, and
//! the N-way merging iterator.
//!
//! This crate deliberately stops at the catalogue boundary. The write-ahead
//! log, the MemTable, and the SSTable block format live elsewhere; the
//! engine consumes tables only through the [`cache::TableCache`] trait and
//! hands back iterators through [`iterator::InternalIterator`].
//!
//! ## Architecture
//!
//! ```text
//! Level 0:  [SST-9] [SST-8] [SST-7]        (overlapping keys, newest first)
//! Level 1:  [SST-4][SST-5][SST-6]          (non-overlapping, sorted)
//! Level 2:  [SST-1][SST-2][SST-3][SST-10]  (non-overlapping, sorted)
//! ...
//! ```
//!
//! A [`version::Version`] is an immutable snapshot of this geometry. Every
//! change (a flush adding an L0 file, a compaction replacing inputs with
//! outputs) is expressed as a [`version::VersionEdit`], appended to the
//! MANIFEST by [`version::VersionSet::log_and_apply`], and installed as a
//! fresh Version. Readers pin the Version they observed; files stay alive
//! as long as any pinned Version references them.

// Public modules
pub mod cache;
pub mod compaction;
pub mod error;
pub mod iterator;
pub mod options;
pub mod types;
pub mod util;
pub mod version;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{Options, ReadOptions, NUM_LEVELS};
pub use types::{InternalKey, LookupKey, LookupResult, ValueType};

pub use cache::TableCache;
pub use compaction::Compaction;
pub use iterator::{ConcatenatingIterator, InternalIterator, MergingIterator};
pub use util::comparator::{BytewiseComparator, Comparator, InternalKeyComparator};
pub use version::{FileMetadata, ReadStats, Version, VersionEdit, VersionSet};
