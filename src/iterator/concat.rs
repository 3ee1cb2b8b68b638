//! Two-level concatenating iterator for a sorted, disjoint file list.
//!
//! The outer level walks file metadata ordered by largest key; the inner
//! level is the table iterator for the file under the cursor, produced
//! lazily through the table cache. Because files at levels >= 1 are
//! disjoint and sorted, concatenation preserves key order with no heap
//! overhead.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use crate::cache::TableCache;
use crate::options::ReadOptions;
use crate::util::comparator::InternalKeyComparator;
use crate::version::FileMetadata;
use crate::Result;

use super::InternalIterator;

/// Iterator over the concatenation of a sorted, disjoint run of files.
///
/// At most one table iterator is open at a time; the previous one is
/// closed before the next is created.
pub struct ConcatenatingIterator {
    icmp: Arc<InternalKeyComparator>,
    files: Vec<Arc<FileMetadata>>,
    table_cache: Arc<dyn TableCache>,
    options: ReadOptions,
    /// Index of the open file; `files.len()` once exhausted forward.
    index: usize,
    data: Option<Box<dyn InternalIterator>>,
}

impl ConcatenatingIterator {
    /// Create an iterator over `files`, which must be sorted by smallest
    /// key and pairwise disjoint.
    pub fn new(
        icmp: Arc<InternalKeyComparator>,
        files: Vec<Arc<FileMetadata>>,
        table_cache: Arc<dyn TableCache>,
        options: ReadOptions,
    ) -> Self {
        let index = files.len();
        Self {
            icmp,
            files,
            table_cache,
            options,
            index,
            data: None,
        }
    }

    /// Index of the first file whose largest key is at or past `target`.
    fn find_file(&self, target: &[u8]) -> usize {
        let mut left = 0;
        let mut right = self.files.len();
        while left < right {
            let mid = (left + right) / 2;
            if self.icmp.compare_key_encoded(self.files[mid].largest(), target) == Ordering::Less {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        right
    }

    /// Open the table at `index`, closing the current one first.
    fn open_file(&mut self, index: usize) -> Result<()> {
        if let Some(mut data) = self.data.take() {
            data.close()?;
        }
        self.index = index;
        if index < self.files.len() {
            self.data = Some(
                self.table_cache
                    .new_iterator(&self.files[index], &self.options)?,
            );
        }
        Ok(())
    }

    /// Advance over exhausted tables until the cursor is valid again.
    fn skip_empty_data_forward(&mut self) -> Result<()> {
        while !self.data_valid() {
            if self.index + 1 >= self.files.len() {
                self.open_file(self.files.len())?;
                return Ok(());
            }
            let next = self.index + 1;
            self.open_file(next)?;
            if let Some(data) = self.data.as_mut() {
                data.seek_to_first()?;
            }
        }
        Ok(())
    }

    /// Step back over exhausted tables until the cursor is valid again.
    fn skip_empty_data_backward(&mut self) -> Result<()> {
        while !self.data_valid() {
            if self.index == 0 || self.files.is_empty() {
                self.open_file(self.files.len())?;
                return Ok(());
            }
            let prev = self.index - 1;
            self.open_file(prev)?;
            if let Some(data) = self.data.as_mut() {
                data.seek_to_last()?;
            }
        }
        Ok(())
    }

    fn data_valid(&self) -> bool {
        self.data.as_ref().map(|d| d.valid()).unwrap_or(false)
    }
}

impl InternalIterator for ConcatenatingIterator {
    fn valid(&self) -> bool {
        self.data_valid()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        if self.files.is_empty() {
            return Ok(());
        }
        self.open_file(0)?;
        if let Some(data) = self.data.as_mut() {
            data.seek_to_first()?;
        }
        self.skip_empty_data_forward()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        if self.files.is_empty() {
            return Ok(());
        }
        self.open_file(self.files.len() - 1)?;
        if let Some(data) = self.data.as_mut() {
            data.seek_to_last()?;
        }
        self.skip_empty_data_backward()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let index = self.find_file(target);
        if index >= self.files.len() {
            self.open_file(self.files.len())?;
            return Ok(());
        }
        self.open_file(index)?;
        if let Some(data) = self.data.as_mut() {
            data.seek(target)?;
        }
        self.skip_empty_data_forward()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(data) = self.data.as_mut() {
            data.next()?;
            self.skip_empty_data_forward()?;
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if let Some(data) = self.data.as_mut() {
            data.prev()?;
            self.skip_empty_data_backward()?;
        }
        Ok(())
    }

    fn key(&self) -> Option<Bytes> {
        self.data.as_ref().and_then(|d| d.key())
    }

    fn value(&self) -> Option<Bytes> {
        self.data.as_ref().and_then(|d| d.value())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut data) = self.data.take() {
            data.close()?;
        }
        self.index = self.files.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{encoded, file_meta, ikey, MemTableCache};
    use crate::types::InternalKey;

    /// Three disjoint files covering a..b, d..e, g..h.
    fn setup() -> ConcatenatingIterator {
        let icmp = Arc::new(InternalKeyComparator::bytewise());
        let cache = Arc::new(MemTableCache::new(Arc::clone(&icmp)));

        cache.add_table(
            1,
            vec![
                (ikey("a", 10), "va".into()),
                (ikey("b", 10), "vb".into()),
            ],
        );
        cache.add_table(
            2,
            vec![
                (ikey("d", 10), "vd".into()),
                (ikey("e", 10), "ve".into()),
            ],
        );
        cache.add_table(
            3,
            vec![
                (ikey("g", 10), "vg".into()),
                (ikey("h", 10), "vh".into()),
            ],
        );

        let files = vec![
            file_meta(1, 1024, ikey("a", 10), ikey("b", 10)),
            file_meta(2, 1024, ikey("d", 10), ikey("e", 10)),
            file_meta(3, 1024, ikey("g", 10), ikey("h", 10)),
        ];

        ConcatenatingIterator::new(icmp, files, cache, ReadOptions::default())
    }

    #[test]
    fn test_forward_scan_crosses_files() {
        let mut iter = setup();
        iter.seek_to_first().unwrap();

        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().unwrap());
            iter.next().unwrap();
        }

        let expected: Vec<_> = ["a", "b", "d", "e", "g", "h"]
            .iter()
            .map(|k| encoded(k, 10))
            .collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_backward_scan_crosses_files() {
        let mut iter = setup();
        iter.seek_to_last().unwrap();

        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().unwrap());
            iter.prev().unwrap();
        }

        let expected: Vec<_> = ["h", "g", "e", "d", "b", "a"]
            .iter()
            .map(|k| encoded(k, 10))
            .collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_seek_within_and_between_files() {
        let mut iter = setup();

        // Inside the second file.
        iter.seek(&encoded("e", InternalKey::MAX_SEQUENCE)).unwrap();
        assert_eq!(iter.key().unwrap(), encoded("e", 10));

        // In the gap between files: lands on the next file's first key.
        iter.seek(&encoded("c", InternalKey::MAX_SEQUENCE)).unwrap();
        assert_eq!(iter.key().unwrap(), encoded("d", 10));

        // Past the last file.
        iter.seek(&encoded("x", InternalKey::MAX_SEQUENCE)).unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn test_empty_file_list() {
        let icmp = Arc::new(InternalKeyComparator::bytewise());
        let cache = Arc::new(MemTableCache::new(Arc::clone(&icmp)));
        let mut iter =
            ConcatenatingIterator::new(icmp, Vec::new(), cache, ReadOptions::default());

        iter.seek_to_first().unwrap();
        assert!(!iter.valid());
        iter.seek_to_last().unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn test_prev_across_file_boundary_after_seek() {
        let mut iter = setup();

        iter.seek(&encoded("d", InternalKey::MAX_SEQUENCE)).unwrap();
        assert_eq!(iter.key().unwrap(), encoded("d", 10));

        iter.prev().unwrap();
        assert_eq!(iter.key().unwrap(), encoded("b", 10));
    }
}
