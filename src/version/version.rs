//! Version - immutable snapshot of the level geometry.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::cache::TableCache;
use crate::iterator::{InternalIterator, MergingIterator};
use crate::options::{ReadOptions, NUM_LEVELS};
use crate::types::{InternalKey, LookupKey, LookupResult};
use crate::util::comparator::InternalKeyComparator;
use crate::Result;

use super::{FileMetadata, Level, ReadStats};

/// An immutable snapshot of every level at a point in time.
///
/// Published Versions never change their file lists; readers and
/// iterators hold an `Arc` to the Version they observed and the files it
/// references stay alive for as long as the Arc does. The only mutable
/// state is the seek-compaction target, which read traffic feeds.
pub struct Version {
    /// One entry per level, 0 through NUM_LEVELS-1.
    levels: Vec<Level>,

    /// Compaction score for this version, precomputed at publication.
    /// >= 1.0 means compaction is needed.
    compaction_score: f64,

    /// Level that should be compacted next.
    compaction_level: usize,

    /// Seek-triggered compaction target: the first file to exhaust its
    /// seek budget, with its level.
    file_to_compact: RwLock<Option<(Arc<FileMetadata>, usize)>>,

    icmp: Arc<InternalKeyComparator>,
    table_cache: Arc<dyn TableCache>,
}

impl std::fmt::Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Version")
            .field("levels", &self.levels)
            .field("compaction_score", &self.compaction_score)
            .field("compaction_level", &self.compaction_level)
            .field("file_to_compact", &self.file_to_compact)
            .finish()
    }
}

impl Version {
    /// Create an empty version.
    pub fn new(icmp: Arc<InternalKeyComparator>, table_cache: Arc<dyn TableCache>) -> Self {
        Self::with_files(Default::default(), icmp, table_cache)
    }

    /// Create a version holding the given files.
    pub(crate) fn with_files(
        files: [Vec<Arc<FileMetadata>>; NUM_LEVELS],
        icmp: Arc<InternalKeyComparator>,
        table_cache: Arc<dyn TableCache>,
    ) -> Self {
        let levels = files
            .into_iter()
            .enumerate()
            .map(|(level, level_files)| {
                Level::new(
                    level,
                    level_files,
                    Arc::clone(&icmp),
                    Arc::clone(&table_cache),
                )
            })
            .collect();

        Self {
            levels,
            compaction_score: 0.0,
            compaction_level: 0,
            file_to_compact: RwLock::new(None),
            icmp,
            table_cache,
        }
    }

    /// Access a level.
    pub fn level(&self, level: usize) -> &Level {
        &self.levels[level]
    }

    /// Files at a specific level, in storage order.
    pub fn files(&self, level: usize) -> &[Arc<FileMetadata>] {
        self.levels[level].files()
    }

    /// Number of files at a level.
    pub fn num_files(&self, level: usize) -> usize {
        self.levels[level].num_files()
    }

    /// Total number of files across all levels.
    pub fn total_files(&self) -> usize {
        self.levels.iter().map(|l| l.num_files()).sum()
    }

    /// Total bytes stored at a level.
    pub fn level_size(&self, level: usize) -> u64 {
        self.levels[level].total_file_size()
    }

    /// Get the compaction score.
    pub fn compaction_score(&self) -> f64 {
        self.compaction_score
    }

    /// Get the level that should be compacted next.
    pub fn compaction_level(&self) -> usize {
        self.compaction_level
    }

    /// Record the precomputed compaction target.
    pub(crate) fn set_compaction_info(&mut self, score: f64, level: usize) {
        self.compaction_score = score;
        self.compaction_level = level;
    }

    /// The seek-compaction target, if read traffic has produced one.
    pub fn file_to_compact(&self) -> Option<(Arc<FileMetadata>, usize)> {
        self.file_to_compact.read().clone()
    }

    /// Whether this version wants a compaction, for either trigger.
    pub fn needs_compaction(&self) -> bool {
        self.compaction_score >= 1.0 || self.file_to_compact.read().is_some()
    }

    /// Look up a user key at a snapshot.
    ///
    /// Levels are searched top-down; the first level with an answer wins.
    /// A tombstone answer maps to `None` and stops the descent. Seek
    /// charges accumulated along the way are applied before returning.
    pub fn get(&self, options: &ReadOptions, key: &LookupKey) -> Result<Option<Bytes>> {
        let mut stats = ReadStats::default();
        let mut last_read = ReadStats::default();

        let mut outcome = None;
        for level in &self.levels {
            if let Some(result) = level.get(options, key, &mut stats, &mut last_read)? {
                outcome = Some(result);
                break;
            }
        }

        self.update_stats(&stats);

        Ok(match outcome {
            Some(LookupResult::Found(value)) => Some(value),
            Some(LookupResult::Deleted) | None => None,
        })
    }

    /// Apply the seek charge from one read.
    ///
    /// Returns true when the charged file just exhausted its budget and
    /// became this version's seek-compaction target.
    pub fn update_stats(&self, stats: &ReadStats) -> bool {
        if let Some(file) = &stats.seek_file {
            if file.charge_seek() {
                let mut slot = self.file_to_compact.write();
                if slot.is_none() {
                    *slot = Some((Arc::clone(file), stats.seek_file_level));
                    return true;
                }
            }
        }
        false
    }

    /// Whether any file at `level` overlaps the user-key range.
    /// `None` bounds are unbounded.
    pub fn overlap_in_level(
        &self,
        level: usize,
        smallest_user_key: Option<&[u8]>,
        largest_user_key: Option<&[u8]>,
    ) -> bool {
        self.levels[level].some_file_overlaps_range(level > 0, smallest_user_key, largest_user_key)
    }

    /// All files at `level` touching `[begin, end]` (user-key overlap,
    /// with the L0 closure semantics).
    pub fn overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetadata>> {
        self.levels[level].overlapping_inputs(begin, end)
    }

    /// Iterator over the whole version: every L0 file individually plus
    /// one concatenating iterator per non-empty higher level, merged.
    pub fn iterator(&self, options: &ReadOptions) -> Result<MergingIterator> {
        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();

        for file in self.levels[0].files() {
            children.push(self.table_cache.new_iterator(file, options)?);
        }
        for level in &self.levels[1..] {
            if level.num_files() > 0 {
                children.push(level.iterator(options)?);
            }
        }

        Ok(MergingIterator::new(Arc::clone(&self.icmp), children))
    }

    /// Check the sorted-and-disjoint invariant at a level.
    ///
    /// Panics on violation; levels >= 1 must never hold overlapping files
    /// in a published version.
    pub fn assert_no_overlapping_files(&self, level: usize) {
        if level == 0 {
            return;
        }
        let files = self.levels[level].files();
        for pair in files.windows(2) {
            assert!(
                self.icmp
                    .compare_keys(pair[0].largest(), pair[1].smallest())
                    == std::cmp::Ordering::Less,
                "files {} and {} overlap in level {}",
                pair[0].number(),
                pair[1].number(),
                level
            );
        }
    }
}
