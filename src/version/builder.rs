//! Builder - applies a sequence of VersionEdits to a base Version.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::options::NUM_LEVELS;
use crate::{Error, Result};

use super::{FileMetadata, Version, VersionEdit, VersionSet};

/// Per-level accumulation of a builder.
#[derive(Default)]
struct LevelState {
    added_files: Vec<Arc<FileMetadata>>,
    deleted_files: HashSet<u64>,
}

/// Applies edits against a base Version without materializing the
/// intermediate Versions.
///
/// The builder retains its base Version (via `Arc`) for its whole
/// lifetime, so the files it references cannot disappear while edits are
/// being accumulated.
pub struct Builder<'a> {
    vset: &'a VersionSet,
    base: Arc<Version>,
    levels: Vec<LevelState>,
}

impl<'a> Builder<'a> {
    /// Create a builder rooted at `base`.
    pub fn new(vset: &'a VersionSet, base: Arc<Version>) -> Self {
        Self {
            vset,
            base,
            levels: (0..NUM_LEVELS).map(|_| LevelState::default()).collect(),
        }
    }

    /// Apply one edit to the accumulated state.
    pub fn apply(&mut self, edit: &VersionEdit) {
        // Compaction pointers flow straight into the owning VersionSet.
        for (level, key) in &edit.compact_pointers {
            self.vset.set_compact_pointer(*level, key.clone());
        }

        for &(level, file_number) in &edit.deleted_files {
            self.levels[level].deleted_files.insert(file_number);
        }

        for (level, file) in &edit.new_files {
            // A new-file entry cancels a deletion of the same file earlier
            // in this batch. The seek budget was assigned at admission by
            // FileMetadata::new.
            self.levels[*level].deleted_files.remove(&file.number());
            self.levels[*level].added_files.push(Arc::new(file.clone()));
        }
    }

    /// Produce the resulting Version.
    ///
    /// Files per level are merged in (smallest, number) order, dropping
    /// deleted ones. Levels above 0 must come out strictly sorted and
    /// disjoint; finding an overlap means a concurrent flush made this
    /// compaction's inputs stale, which surfaces as a retryable
    /// [`Error::CompactionObsolete`].
    pub fn save_to(self) -> Result<Version> {
        let icmp = Arc::clone(self.vset.internal_key_comparator());
        let mut files: [Vec<Arc<FileMetadata>>; NUM_LEVELS] = Default::default();

        for (level, state) in self.levels.iter().enumerate() {
            let mut merged: Vec<Arc<FileMetadata>> = self.base.files(level).to_vec();
            merged.extend(state.added_files.iter().cloned());
            merged.sort_by(|a, b| {
                icmp.compare_keys(a.smallest(), b.smallest())
                    .then_with(|| a.number().cmp(&b.number()))
            });

            for file in merged {
                if state.deleted_files.contains(&file.number()) {
                    continue;
                }
                if level > 0 {
                    if let Some(last) = files[level].last() {
                        if icmp.compare_keys(last.largest(), file.smallest()) != Ordering::Less {
                            return Err(Error::compaction_obsolete(format!(
                                "overlapping files {} and {} in level {}",
                                last.number(),
                                file.number(),
                                level
                            )));
                        }
                    }
                }
                files[level].push(file);
            }
        }

        Ok(Version::with_files(files, icmp, self.vset.table_cache()))
    }
}
