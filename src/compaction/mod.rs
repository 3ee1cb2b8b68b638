//! Compaction planning primitives.
//!
//! The planner itself lives on [`crate::version::VersionSet`]
//! (`pick_compaction`, `compact_range`); this module holds the
//! [`Compaction`] description it produces and the boundary-file protocol
//! that keeps reads correct while inputs move between levels.
//!
//! # Boundary files
//!
//! Two files b1=(l1, u1) and b2=(l2, u2) in the same level may share a
//! user key across their boundary: user_key(u1) == user_key(l2), with u1
//! the newer entry. Compacting b1 without b2 would leave b2's stale record
//! as the first match for that user key at this level, shadowing the
//! freshly compacted newer record below. `add_boundary_inputs` closes the
//! input set over this relation.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::options::NUM_LEVELS;
use crate::types::InternalKey;
use crate::util::comparator::InternalKeyComparator;
use crate::version::{FileMetadata, Version, VersionEdit};

/// Sum of the sizes of a run of files.
pub fn total_file_size(files: &[Arc<FileMetadata>]) -> u64 {
    files.iter().map(|f| f.file_size()).sum()
}

/// Smallest and largest internal keys over a run of files.
///
/// Returns `None` for an empty run.
pub fn key_range(
    icmp: &InternalKeyComparator,
    files: &[Arc<FileMetadata>],
) -> Option<(InternalKey, InternalKey)> {
    let first = files.first()?;
    let mut smallest = first.smallest().clone();
    let mut largest = first.largest().clone();

    for file in &files[1..] {
        if icmp.compare_keys(file.smallest(), &smallest) == Ordering::Less {
            smallest = file.smallest().clone();
        }
        if icmp.compare_keys(file.largest(), &largest) == Ordering::Greater {
            largest = file.largest().clone();
        }
    }
    Some((smallest, largest))
}

/// Smallest and largest internal keys over two runs of files.
pub fn key_range2(
    icmp: &InternalKeyComparator,
    a: &[Arc<FileMetadata>],
    b: &[Arc<FileMetadata>],
) -> Option<(InternalKey, InternalKey)> {
    match (key_range(icmp, a), key_range(icmp, b)) {
        (Some((asm, alg)), Some((bsm, blg))) => {
            let smallest = if icmp.compare_keys(&bsm, &asm) == Ordering::Less {
                bsm
            } else {
                asm
            };
            let largest = if icmp.compare_keys(&blg, &alg) == Ordering::Greater {
                blg
            } else {
                alg
            };
            Some((smallest, largest))
        }
        (Some(range), None) | (None, Some(range)) => Some(range),
        (None, None) => None,
    }
}

/// The largest key across a run of files, or `None` if the run is empty.
pub fn find_largest_key(
    icmp: &InternalKeyComparator,
    files: &[Arc<FileMetadata>],
) -> Option<InternalKey> {
    let mut largest = files.first()?.largest().clone();
    for file in &files[1..] {
        if icmp.compare_keys(file.largest(), &largest) == Ordering::Greater {
            largest = file.largest().clone();
        }
    }
    Some(largest)
}

/// The minimum file b2=(l2, u2) in `level_files` for which l2 > `largest_key`
/// and user_key(l2) == user_key(`largest_key`).
fn find_smallest_boundary_file(
    icmp: &InternalKeyComparator,
    level_files: &[Arc<FileMetadata>],
    largest_key: &InternalKey,
) -> Option<Arc<FileMetadata>> {
    let ucmp = icmp.user_comparator();
    let mut smallest_boundary_file: Option<&Arc<FileMetadata>> = None;

    for file in level_files {
        if icmp.compare_keys(file.smallest(), largest_key) == Ordering::Greater
            && ucmp.compare(file.smallest().user_key(), largest_key.user_key()) == Ordering::Equal
        {
            let is_smaller = match smallest_boundary_file {
                None => true,
                Some(current) => {
                    icmp.compare_keys(file.smallest(), current.smallest()) == Ordering::Less
                }
            };
            if is_smaller {
                smallest_boundary_file = Some(file);
            }
        }
    }

    smallest_boundary_file.cloned()
}

/// Extend `compaction_files` with every boundary file reachable from its
/// largest key.
///
/// Repeats until no file in `level_files` starts on the same user key the
/// input set currently ends on. Idempotent: a second run finds nothing new.
pub fn add_boundary_inputs(
    icmp: &InternalKeyComparator,
    level_files: &[Arc<FileMetadata>],
    compaction_files: &mut Vec<Arc<FileMetadata>>,
) {
    let Some(mut largest_key) = find_largest_key(icmp, compaction_files) else {
        return;
    };

    while let Some(boundary) = find_smallest_boundary_file(icmp, level_files, &largest_key) {
        largest_key = boundary.largest().clone();
        compaction_files.push(boundary);
    }
}

/// A planned compaction: inputs from `level` and `level + 1`, plus the
/// grandparent overlap used to bound output file placement.
#[derive(Debug)]
pub struct Compaction {
    level: usize,
    max_output_file_size: u64,
    max_grandparent_overlap_bytes: u64,
    /// The version the inputs were picked from, pinned so the files stay
    /// alive while the job runs.
    input_version: Arc<Version>,
    /// The edit this compaction will commit: input deletions, output
    /// additions, and the advanced compaction pointer.
    edit: VersionEdit,
    /// inputs[0] are the level-N files, inputs[1] the level-N+1 files.
    inputs: [Vec<Arc<FileMetadata>>; 2],
    /// Files at level + 2 overlapping the compaction's range.
    grandparents: Vec<Arc<FileMetadata>>,

    // State for should_stop_before
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,

    // State for is_base_level_for_key: per-level scan positions over the
    // input version's files, valid because keys are visited in order.
    level_ptrs: [usize; NUM_LEVELS],

    icmp: Arc<InternalKeyComparator>,
}

impl Compaction {
    pub(crate) fn new(
        input_version: Arc<Version>,
        level: usize,
        max_output_file_size: u64,
        max_grandparent_overlap_bytes: u64,
        inputs: [Vec<Arc<FileMetadata>>; 2],
        grandparents: Vec<Arc<FileMetadata>>,
        icmp: Arc<InternalKeyComparator>,
    ) -> Self {
        Self {
            level,
            max_output_file_size,
            max_grandparent_overlap_bytes,
            input_version,
            edit: VersionEdit::new(),
            inputs,
            grandparents,
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: [0; NUM_LEVELS],
            icmp,
        }
    }

    /// The level being compacted; outputs land on `level() + 1`.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Maximum size for files produced by this compaction.
    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    /// Input files from `level() + which`.
    pub fn input(&self, which: usize) -> &[Arc<FileMetadata>] {
        &self.inputs[which]
    }

    /// Number of input files from `level() + which`.
    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    /// The version the inputs belong to.
    pub fn input_version(&self) -> &Arc<Version> {
        &self.input_version
    }

    /// Grandparent files overlapping this compaction.
    pub fn grandparents(&self) -> &[Arc<FileMetadata>] {
        &self.grandparents
    }

    /// The edit to commit when the job finishes.
    pub fn edit(&self) -> &VersionEdit {
        &self.edit
    }

    /// Mutable access to the pending edit.
    pub fn edit_mut(&mut self) -> &mut VersionEdit {
        &mut self.edit
    }

    /// Total bytes across both input lists.
    pub fn total_input_size(&self) -> u64 {
        total_file_size(&self.inputs[0]) + total_file_size(&self.inputs[1])
    }

    /// Whether this compaction can move its single input file to the next
    /// level untouched: nothing to merge with and little enough
    /// grandparent overlap that a future compaction there stays cheap.
    pub fn is_trivial_move(&self) -> bool {
        self.num_input_files(0) == 1
            && self.num_input_files(1) == 0
            && total_file_size(&self.grandparents) <= self.max_grandparent_overlap_bytes
    }

    /// Record the deletion of every input file in the pending edit.
    pub fn add_input_deletions(&mut self) {
        for which in 0..2 {
            for file in &self.inputs[which] {
                self.edit.delete_file(self.level + which, file.number());
            }
        }
    }

    /// Whether `user_key` cannot exist in any level below the compaction's
    /// output level. When true, a tombstone for the key may be dropped.
    ///
    /// Must be fed keys in increasing order; it advances cursors over the
    /// deeper levels instead of binary searching each call.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let ucmp = self.icmp.user_comparator();
        for level in (self.level + 2)..NUM_LEVELS {
            let files = self.input_version.files(level);
            while self.level_ptrs[level] < files.len() {
                let file = &files[self.level_ptrs[level]];
                if ucmp.compare(user_key, file.largest().user_key()) != Ordering::Greater {
                    if ucmp.compare(user_key, file.smallest().user_key()) != Ordering::Less {
                        return false;
                    }
                    break;
                }
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// Whether the current output file should be closed before writing
    /// `internal_key`, to cap how much grandparent data any single output
    /// file will overlap.
    pub fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        while self.grandparent_index < self.grandparents.len()
            && self.icmp.compare_key_encoded(
                self.grandparents[self.grandparent_index].largest(),
                internal_key,
            ) == Ordering::Less
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size();
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > self.max_grandparent_overlap_bytes {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }
}
