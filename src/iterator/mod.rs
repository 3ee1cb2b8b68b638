//! Iterator abstractions over sorted runs of internal keys.
//!
//! - [`InternalIterator`]: the cursor interface every sorted source
//!   (table, level, merged view) presents to the engine.
//! - [`MergingIterator`]: N-way heap-ordered merge, bidirectional.
//! - [`ConcatenatingIterator`]: two-level iterator over a sorted, disjoint
//!   file list, opening one table at a time.

mod concat;
mod merging;

pub use concat::ConcatenatingIterator;
pub use merging::MergingIterator;

use bytes::Bytes;

use crate::Result;

/// A cursor over a sorted run of (encoded internal key, value) entries.
///
/// After construction an iterator is not positioned; one of the seek
/// methods must be called first. `key`/`value` return `None` whenever
/// `valid()` is false.
pub trait InternalIterator {
    /// Check if the iterator is positioned on an entry.
    fn valid(&self) -> bool;

    /// Position at the first entry.
    fn seek_to_first(&mut self) -> Result<()>;

    /// Position at the last entry.
    fn seek_to_last(&mut self) -> Result<()>;

    /// Position at the first entry whose key is at or past `target`
    /// (an encoded internal key).
    fn seek(&mut self, target: &[u8]) -> Result<()>;

    /// Move to the next entry.
    fn next(&mut self) -> Result<()>;

    /// Move to the previous entry.
    fn prev(&mut self) -> Result<()>;

    /// Get the current encoded internal key.
    fn key(&self) -> Option<Bytes>;

    /// Get the current value.
    fn value(&self) -> Option<Bytes>;

    /// Release the iterator's resources.
    ///
    /// Composite iterators close every child exactly once, even when a
    /// close fails; the first error is reported after all children have
    /// been attempted.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
