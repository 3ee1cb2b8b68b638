//! One level of the tree: an ordered run of files with per-level lookup
//! and iterator construction.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::cache::TableCache;
use crate::iterator::{ConcatenatingIterator, InternalIterator, MergingIterator};
use crate::options::ReadOptions;
use crate::types::{InternalKey, LookupKey, LookupResult, ValueType};
use crate::util::comparator::{Comparator, InternalKeyComparator};
use crate::Result;

use super::FileMetadata;

/// Seek accounting for one read.
///
/// `seek_file` is the file that gets charged when a read had to probe more
/// than one table before finding (or missing) its key.
#[derive(Debug, Clone, Default)]
pub struct ReadStats {
    /// The file to charge for this read.
    pub seek_file: Option<Arc<FileMetadata>>,
    /// The level `seek_file` lives on.
    pub seek_file_level: usize,
}

impl ReadStats {
    /// Clear the stats.
    pub fn clear(&mut self) {
        self.seek_file = None;
        self.seek_file_level = 0;
    }
}

/// One level of the LSM tree.
///
/// Level 0 files may overlap one another and are probed newest-first.
/// Files at levels >= 1 are sorted by smallest key and pairwise disjoint,
/// which admits binary search and heap-free concatenating iteration.
pub struct Level {
    level: usize,
    files: Vec<Arc<FileMetadata>>,
    icmp: Arc<InternalKeyComparator>,
    table_cache: Arc<dyn TableCache>,
}

impl std::fmt::Debug for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Level")
            .field("level", &self.level)
            .field("files", &self.files)
            .finish()
    }
}

impl Level {
    /// Create a level over the given files.
    pub(crate) fn new(
        level: usize,
        files: Vec<Arc<FileMetadata>>,
        icmp: Arc<InternalKeyComparator>,
        table_cache: Arc<dyn TableCache>,
    ) -> Self {
        Self {
            level,
            files,
            icmp,
            table_cache,
        }
    }

    /// The level number.
    pub fn level_number(&self) -> usize {
        self.level
    }

    /// Files at this level, in storage order.
    pub fn files(&self) -> &[Arc<FileMetadata>] {
        &self.files
    }

    /// Number of files at this level.
    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    /// Total bytes stored at this level.
    pub fn total_file_size(&self) -> u64 {
        self.files.iter().map(|f| f.file_size()).sum()
    }

    /// Build an iterator over the whole level.
    ///
    /// Level 0 needs a merge because its files overlap; higher levels
    /// concatenate their disjoint files in order.
    pub fn iterator(&self, options: &ReadOptions) -> Result<Box<dyn InternalIterator>> {
        if self.level == 0 {
            let mut children: Vec<Box<dyn InternalIterator>> = Vec::with_capacity(self.files.len());
            for file in &self.files {
                children.push(self.table_cache.new_iterator(file, options)?);
            }
            Ok(Box::new(MergingIterator::new(
                Arc::clone(&self.icmp),
                children,
            )))
        } else {
            Ok(Box::new(ConcatenatingIterator::new(
                Arc::clone(&self.icmp),
                self.files.clone(),
                Arc::clone(&self.table_cache),
                options.clone(),
            )))
        }
    }

    /// Look up a key at this level.
    ///
    /// `last_read` tracks the most recent probe across the whole read;
    /// once a second probe happens anywhere, the first probed file is
    /// charged into `stats` as the seek-compaction candidate.
    pub fn get(
        &self,
        options: &ReadOptions,
        key: &LookupKey,
        stats: &mut ReadStats,
        last_read: &mut ReadStats,
    ) -> Result<Option<LookupResult>> {
        if self.files.is_empty() {
            return Ok(None);
        }

        let internal_key = key.internal_key();
        let candidates = self.files_for_key(key.user_key(), &internal_key);

        for file in candidates {
            if last_read.seek_file.is_some() && stats.seek_file.is_none() {
                // More than one probe for this read: charge the first file.
                stats.seek_file = last_read.seek_file.clone();
                stats.seek_file_level = last_read.seek_file_level;
            }

            last_read.seek_file = Some(Arc::clone(&file));
            last_read.seek_file_level = self.level;

            if let Some(result) = self.table_cache.get(options, key, &file)? {
                return Ok(Some(result));
            }
        }

        Ok(None)
    }

    /// The files that may contain `user_key`, in probe order.
    pub fn files_for_key(
        &self,
        user_key: &[u8],
        internal_key: &InternalKey,
    ) -> Vec<Arc<FileMetadata>> {
        let ucmp = self.icmp.user_comparator();

        if self.level == 0 {
            // L0 files overlap; collect every file whose range brackets
            // the key and probe newest-first.
            let mut candidates: Vec<Arc<FileMetadata>> = self
                .files
                .iter()
                .filter(|f| {
                    ucmp.compare(user_key, f.smallest().user_key()) != Ordering::Less
                        && ucmp.compare(user_key, f.largest().user_key()) != Ordering::Greater
                })
                .cloned()
                .collect();
            candidates.sort_by(|a, b| b.number().cmp(&a.number()));
            candidates
        } else {
            // Binary search for the earliest file whose largest >= key.
            let index = self.find_file(internal_key);
            if index >= self.files.len() {
                return Vec::new();
            }

            let file = &self.files[index];
            if ucmp.compare(user_key, file.smallest().user_key()) == Ordering::Less {
                return Vec::new();
            }

            vec![Arc::clone(file)]
        }
    }

    /// Index of the earliest file whose largest key is at or past `target`.
    ///
    /// May return `files.len()` when every file ends before the target.
    pub fn find_file(&self, target: &InternalKey) -> usize {
        let mut left = 0;
        let mut right = self.files.len();

        while left < right {
            let mid = (left + right) / 2;
            if self.icmp.compare_keys(self.files[mid].largest(), target) == Ordering::Less {
                // Everything at or before mid ends before the target.
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        right
    }

    /// Whether any file overlaps the user-key range.
    ///
    /// `None` bounds are unbounded: a `None` smallest means negative
    /// infinity, a `None` largest positive infinity. `disjoint` callers
    /// (levels >= 1) get a binary search; overlapping levels scan.
    pub fn some_file_overlaps_range(
        &self,
        disjoint: bool,
        smallest_user_key: Option<&[u8]>,
        largest_user_key: Option<&[u8]>,
    ) -> bool {
        let ucmp = self.icmp.user_comparator();

        if !disjoint {
            for file in &self.files {
                if after_file(ucmp.as_ref(), smallest_user_key, file)
                    || before_file(ucmp.as_ref(), largest_user_key, file)
                {
                    // No overlap
                } else {
                    return true;
                }
            }
            return false;
        }

        let mut index = 0;
        if let Some(smallest) = smallest_user_key {
            let smallest_internal = InternalKey::new(
                bytes::Bytes::copy_from_slice(smallest),
                InternalKey::MAX_SEQUENCE,
                ValueType::Value,
            );
            index = self.find_file(&smallest_internal);
        }

        if index >= self.files.len() {
            // Beginning of range is after all files.
            return false;
        }

        !before_file(ucmp.as_ref(), largest_user_key, &self.files[index])
    }

    /// All files whose user-key range touches `[begin, end]`.
    ///
    /// `None` bounds are unbounded. At level 0 a matching file may widen
    /// the range (files overlap); when it strictly widens, the scan
    /// restarts so the closure over the whole range is returned.
    pub fn overlapping_inputs(
        &self,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetadata>> {
        let ucmp = self.icmp.user_comparator();
        let mut user_begin = begin.map(|k| k.user_key().to_vec());
        let mut user_end = end.map(|k| k.user_key().to_vec());

        let mut inputs: Vec<Arc<FileMetadata>> = Vec::new();
        let mut i = 0;
        while i < self.files.len() {
            let file = Arc::clone(&self.files[i]);
            i += 1;

            let file_start = file.smallest().user_key().to_vec();
            let file_limit = file.largest().user_key().to_vec();

            if user_begin
                .as_deref()
                .map_or(false, |b| ucmp.compare(&file_limit, b) == Ordering::Less)
            {
                // Completely before the range; skip it
            } else if user_end
                .as_deref()
                .map_or(false, |e| ucmp.compare(&file_start, e) == Ordering::Greater)
            {
                // Completely after the range; skip it
            } else {
                inputs.push(file);
                if self.level == 0 {
                    // L0 files overlap each other. If this file strictly
                    // widens the range, restart with the wider bounds.
                    if user_begin
                        .as_deref()
                        .map_or(false, |b| ucmp.compare(&file_start, b) == Ordering::Less)
                    {
                        user_begin = Some(file_start.clone());
                        inputs.clear();
                        i = 0;
                    } else if user_end
                        .as_deref()
                        .map_or(false, |e| ucmp.compare(&file_limit, e) == Ordering::Greater)
                    {
                        user_end = Some(file_limit.clone());
                        inputs.clear();
                        i = 0;
                    }
                }
            }
        }
        inputs
    }
}

fn before_file(ucmp: &dyn Comparator, user_key: Option<&[u8]>, file: &FileMetadata) -> bool {
    // A None user key is past every key and is therefore never before a file.
    match user_key {
        Some(key) => ucmp.compare(key, file.smallest().user_key()) == Ordering::Less,
        None => false,
    }
}

fn after_file(ucmp: &dyn Comparator, user_key: Option<&[u8]>, file: &FileMetadata) -> bool {
    // A None user key is before every key and is therefore never after a file.
    match user_key {
        Some(key) => ucmp.compare(key, file.largest().user_key()) == Ordering::Greater,
        None => false,
    }
}
