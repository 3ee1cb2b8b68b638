//! Shared test fixtures: an in-memory table cache and iterator standing in
//! for the real table layer, plus small constructors for keys and files.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::cache::TableCache;
use crate::iterator::InternalIterator;
use crate::options::{Options, ReadOptions, NUM_LEVELS};
use crate::types::{InternalKey, LookupKey, LookupResult, ValueType};
use crate::util::comparator::{Comparator, InternalKeyComparator};
use crate::version::{FileMetadata, Version, VersionSet};
use crate::{Error, Result};

/// A value-typed internal key.
pub(crate) fn ikey(user_key: &str, sequence: u64) -> InternalKey {
    InternalKey::new(
        Bytes::copy_from_slice(user_key.as_bytes()),
        sequence,
        ValueType::Value,
    )
}

/// A deletion-typed internal key.
pub(crate) fn dkey(user_key: &str, sequence: u64) -> InternalKey {
    InternalKey::new(
        Bytes::copy_from_slice(user_key.as_bytes()),
        sequence,
        ValueType::Deletion,
    )
}

/// The encoded form of a value-typed internal key.
pub(crate) fn encoded(user_key: &str, sequence: u64) -> Bytes {
    ikey(user_key, sequence).encode()
}

/// Shared file metadata.
pub(crate) fn file_meta(
    number: u64,
    file_size: u64,
    smallest: InternalKey,
    largest: InternalKey,
) -> Arc<FileMetadata> {
    Arc::new(FileMetadata::new(number, file_size, smallest, largest))
}

/// A VersionSet over a bytewise comparator and an empty in-memory cache.
pub(crate) fn new_version_set(db_path: &Path, options: Options) -> VersionSet {
    let icmp = Arc::new(InternalKeyComparator::bytewise());
    let cache = Arc::new(MemTableCache::new(Arc::clone(&icmp)));
    VersionSet::new(db_path, Arc::new(options), icmp, cache).unwrap()
}

/// A standalone Version holding the given files.
pub(crate) fn new_version_with_files(
    files: [Vec<Arc<FileMetadata>>; NUM_LEVELS],
) -> Arc<Version> {
    let icmp = Arc::new(InternalKeyComparator::bytewise());
    let cache = Arc::new(MemTableCache::new(Arc::clone(&icmp)));
    Arc::new(Version::with_files(files, icmp, cache))
}

/// Sorted in-memory stand-in for one table file.
type TableEntries = Arc<Vec<(Bytes, Bytes)>>;

/// In-memory [`TableCache`]: tables are sorted vectors registered by file
/// number.
pub(crate) struct MemTableCache {
    icmp: Arc<InternalKeyComparator>,
    tables: RwLock<HashMap<u64, TableEntries>>,
}

impl MemTableCache {
    pub(crate) fn new(icmp: Arc<InternalKeyComparator>) -> Self {
        Self {
            icmp,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Register the contents of a table file. Entries are sorted here, so
    /// callers may list them in any order.
    pub(crate) fn add_table(&self, number: u64, entries: Vec<(InternalKey, Bytes)>) {
        let mut encoded: Vec<(Bytes, Bytes)> = entries
            .into_iter()
            .map(|(key, value)| (key.encode(), value))
            .collect();
        let icmp = Arc::clone(&self.icmp);
        encoded.sort_by(|a, b| icmp.compare(&a.0, &b.0));
        self.tables.write().insert(number, Arc::new(encoded));
    }

    fn table(&self, number: u64) -> Result<TableEntries> {
        self.tables
            .read()
            .get(&number)
            .cloned()
            .ok_or_else(|| Error::internal(format!("no table registered for file {}", number)))
    }
}

impl TableCache for MemTableCache {
    fn new_iterator(
        &self,
        file: &FileMetadata,
        _options: &ReadOptions,
    ) -> Result<Box<dyn InternalIterator>> {
        let entries = self.table(file.number())?;
        Ok(Box::new(VecIterator::from_encoded(
            Arc::clone(&self.icmp),
            entries,
        )))
    }

    fn get(
        &self,
        _options: &ReadOptions,
        key: &LookupKey,
        file: &FileMetadata,
    ) -> Result<Option<LookupResult>> {
        let entries = self.table(file.number())?;
        let ucmp = self.icmp.user_comparator();

        // Entries are in internal-key order, so the first visible match
        // is the newest one at or below the snapshot sequence.
        for (encoded_key, value) in entries.iter() {
            let entry = InternalKey::decode(encoded_key)
                .ok_or_else(|| Error::corruption("bad key in test table"))?;
            if ucmp.compare(entry.user_key(), key.user_key()) == Ordering::Equal
                && entry.sequence() <= key.sequence()
            {
                return Ok(Some(match entry.value_type() {
                    ValueType::Value => LookupResult::Found(value.clone()),
                    ValueType::Deletion => LookupResult::Deleted,
                }));
            }
        }
        Ok(None)
    }

    fn evict(&self, file_number: u64) {
        self.tables.write().remove(&file_number);
    }
}

/// Iterator over a sorted vector of (encoded key, value) pairs.
pub(crate) struct VecIterator {
    icmp: Arc<InternalKeyComparator>,
    entries: TableEntries,
    /// Current position; `None` when unpositioned or exhausted.
    pos: Option<usize>,
}

impl VecIterator {
    pub(crate) fn new(
        icmp: Arc<InternalKeyComparator>,
        entries: Vec<(InternalKey, Bytes)>,
    ) -> Self {
        let mut encoded: Vec<(Bytes, Bytes)> = entries
            .into_iter()
            .map(|(key, value)| (key.encode(), value))
            .collect();
        encoded.sort_by(|a, b| icmp.compare(&a.0, &b.0));
        Self::from_encoded(icmp, Arc::new(encoded))
    }

    fn from_encoded(icmp: Arc<InternalKeyComparator>, entries: TableEntries) -> Self {
        Self {
            icmp,
            entries,
            pos: None,
        }
    }
}

impl InternalIterator for VecIterator {
    fn valid(&self) -> bool {
        self.pos.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.pos = if self.entries.is_empty() { None } else { Some(0) };
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.pos = self.entries.len().checked_sub(1);
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.pos = self
            .entries
            .iter()
            .position(|(key, _)| self.icmp.compare(key, target) != Ordering::Less);
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        self.pos = match self.pos {
            Some(pos) if pos + 1 < self.entries.len() => Some(pos + 1),
            _ => None,
        };
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        self.pos = match self.pos {
            Some(pos) if pos > 0 => Some(pos - 1),
            _ => None,
        };
        Ok(())
    }

    fn key(&self) -> Option<Bytes> {
        self.pos.map(|pos| self.entries[pos].0.clone())
    }

    fn value(&self) -> Option<Bytes> {
        self.pos.map(|pos| self.entries[pos].1.clone())
    }
}
