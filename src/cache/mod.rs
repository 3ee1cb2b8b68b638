//! Table cache seam.
//!
//! The engine never reads table files itself; it goes through a
//! [`TableCache`] supplied by the embedding layer, which typically keeps an
//! LRU of open table readers with its own internal synchronization. Only
//! the iterator and point-lookup surface of a table is consumed here; the
//! block format behind it is not this crate's concern.

use crate::iterator::InternalIterator;
use crate::options::ReadOptions;
use crate::types::{LookupKey, LookupResult};
use crate::version::FileMetadata;
use crate::Result;

/// Access to open table readers, keyed by file number.
pub trait TableCache: Send + Sync {
    /// Create an iterator over the table described by `file`.
    fn new_iterator(
        &self,
        file: &FileMetadata,
        options: &ReadOptions,
    ) -> Result<Box<dyn InternalIterator>>;

    /// Probe the table for the newest entry matching `key`'s user key at
    /// or below its snapshot sequence.
    ///
    /// Returns `None` when the table holds no visible entry for the key;
    /// a tombstone is a positive answer ([`LookupResult::Deleted`]).
    fn get(
        &self,
        options: &ReadOptions,
        key: &LookupKey,
        file: &FileMetadata,
    ) -> Result<Option<LookupResult>>;

    /// Drop any cached reader for a deleted table file.
    fn evict(&self, file_number: u64);
}
