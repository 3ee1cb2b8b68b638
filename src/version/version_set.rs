//! VersionSet - owns the current Version, the MANIFEST, and the
//! compaction planner.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::cache::TableCache;
use crate::compaction::{
    add_boundary_inputs, key_range, key_range2, total_file_size, Compaction,
};
use crate::iterator::{ConcatenatingIterator, InternalIterator, MergingIterator};
use crate::options::{Options, ReadOptions, NUM_LEVELS};
use crate::types::InternalKey;
use crate::util::comparator::InternalKeyComparator;
use crate::util::filename::{
    delete_file, file_size, manifest_file_path, parse_manifest_file_name, read_current_file,
    set_current_file,
};
use crate::{Error, Result};

use super::{Builder, FileMetadata, LogReader, LogWriter, Version, VersionEdit};

/// Manages the catalogue lifecycle for one database.
///
/// Tracks the current [`Version`], allocates file numbers, appends
/// [`VersionEdit`]s to the MANIFEST, and plans compactions. One
/// VersionSet exists per open database; Version transitions are
/// serialized by the caller's mutex, which [`VersionSet::log_and_apply`]
/// releases only around the MANIFEST append itself.
pub struct VersionSet {
    /// Database directory path.
    db_path: PathBuf,
    options: Arc<Options>,
    icmp: Arc<InternalKeyComparator>,
    table_cache: Arc<dyn TableCache>,

    /// Current version (atomically swappable; readers pin with an Arc).
    current: ArcSwap<Version>,
    /// Every version still referenced by a snapshot or iterator, weakly.
    active_versions: Mutex<Vec<Weak<Version>>>,

    /// Next file number to allocate. 1 is reserved for the first manifest.
    next_file_number: AtomicU64,
    /// File number of the live (or next) MANIFEST.
    manifest_file_number: AtomicU64,
    /// Last used sequence number.
    last_sequence: AtomicU64,
    /// Current WAL file number.
    log_number: AtomicU64,
    /// Previous WAL file number (recovery bridging).
    prev_log_number: AtomicU64,

    /// MANIFEST writer, created lazily by the first commit.
    descriptor_log: Mutex<Option<LogWriter>>,
    /// Round-robin compaction cursor per level.
    compact_pointers: RwLock<[Option<InternalKey>; NUM_LEVELS]>,
}

impl VersionSet {
    /// Create a VersionSet for the database at `db_path`.
    ///
    /// A fresh directory (no CURRENT file) is initialized with an empty
    /// MANIFEST so that a subsequent [`recover`](Self::recover) always
    /// has a descriptor to replay.
    pub fn new(
        db_path: &Path,
        options: Arc<Options>,
        icmp: Arc<InternalKeyComparator>,
        table_cache: Arc<dyn TableCache>,
    ) -> Result<Self> {
        let empty = Arc::new(Version::new(Arc::clone(&icmp), Arc::clone(&table_cache)));

        let vset = Self {
            db_path: db_path.to_path_buf(),
            options,
            icmp,
            table_cache,
            current: ArcSwap::new(Arc::clone(&empty)),
            active_versions: Mutex::new(vec![Arc::downgrade(&empty)]),
            next_file_number: AtomicU64::new(2),
            manifest_file_number: AtomicU64::new(1),
            last_sequence: AtomicU64::new(0),
            log_number: AtomicU64::new(0),
            prev_log_number: AtomicU64::new(0),
            descriptor_log: Mutex::new(None),
            compact_pointers: RwLock::new(Default::default()),
        };

        vset.initialize_if_needed()?;
        Ok(vset)
    }

    /// Seed a fresh database directory with an initial MANIFEST + CURRENT.
    fn initialize_if_needed(&self) -> Result<()> {
        if crate::util::filename::current_file_path(&self.db_path).exists() {
            return Ok(());
        }

        let mut edit = VersionEdit::new();
        edit.set_comparator(self.icmp.user_comparator().name());
        edit.set_log_number(self.prev_log_number());
        edit.set_next_file_number(self.next_file_number());
        edit.set_last_sequence(self.last_sequence());

        let manifest_number = self.manifest_file_number();
        let path = manifest_file_path(&self.db_path, manifest_number);
        let mut log = LogWriter::create(&path, manifest_number)?;

        let written = self
            .write_snapshot(&mut log)
            .and_then(|()| log.add_record(&edit.encode(), false));
        if let Err(e) = written {
            drop(log);
            let _ = delete_file(&path);
            return Err(e);
        }

        log.close()?;
        set_current_file(&self.db_path, manifest_number)?;
        Ok(())
    }

    /// Get the database path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Get the internal key comparator.
    pub fn internal_key_comparator(&self) -> &Arc<InternalKeyComparator> {
        &self.icmp
    }

    /// Get the table cache handle.
    pub(crate) fn table_cache(&self) -> Arc<dyn TableCache> {
        Arc::clone(&self.table_cache)
    }

    /// Get the current version, pinned.
    pub fn current(&self) -> Arc<Version> {
        self.current.load_full()
    }

    /// Allocate a new file number.
    pub fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Peek at the next file number without allocating.
    pub fn next_file_number(&self) -> u64 {
        self.next_file_number.load(Ordering::SeqCst)
    }

    /// Bump the allocator past an externally observed file number.
    pub fn mark_file_number_used(&self, number: u64) {
        let mut current = self.next_file_number.load(Ordering::SeqCst);
        while current <= number {
            match self.next_file_number.compare_exchange(
                current,
                number + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Get the file number of the live MANIFEST.
    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number.load(Ordering::SeqCst)
    }

    /// Get the last sequence number.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::SeqCst)
    }

    /// Set the last sequence number. Sequences never move backwards.
    pub fn set_last_sequence(&self, seq: u64) -> Result<()> {
        let current = self.last_sequence();
        if seq < current {
            return Err(Error::invalid_argument(format!(
                "last sequence cannot decrease ({} -> {})",
                current, seq
            )));
        }
        self.last_sequence.store(seq, Ordering::SeqCst);
        Ok(())
    }

    /// Get the current WAL number.
    pub fn log_number(&self) -> u64 {
        self.log_number.load(Ordering::SeqCst)
    }

    /// Get the previous WAL number.
    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number.load(Ordering::SeqCst)
    }

    /// Get the compaction cursor for a level.
    pub fn compact_pointer(&self, level: usize) -> Option<InternalKey> {
        self.compact_pointers.read()[level].clone()
    }

    /// Set the compaction cursor for a level.
    pub fn set_compact_pointer(&self, level: usize, key: InternalKey) {
        self.compact_pointers.write()[level] = Some(key);
    }

    /// Number of files at a level of the current version.
    pub fn num_files_at_level(&self, level: usize) -> usize {
        self.current().num_files(level)
    }

    /// Bytes stored at a level of the current version.
    pub fn num_bytes_at_level(&self, level: usize) -> u64 {
        self.current().level_size(level)
    }

    /// Whether the current version wants a compaction.
    pub fn needs_compaction(&self) -> bool {
        self.current().needs_compaction()
    }

    /// File numbers referenced by any live version: the GC retain set.
    pub fn live_files(&self) -> HashSet<u64> {
        let mut live = HashSet::new();
        let mut active = self.active_versions.lock();
        active.retain(|weak| weak.strong_count() > 0);
        for weak in active.iter() {
            if let Some(version) = weak.upgrade() {
                for level in 0..NUM_LEVELS {
                    for file in version.files(level) {
                        live.insert(file.number());
                    }
                }
            }
        }
        live
    }

    /// Number of versions still alive (current plus pinned snapshots).
    pub fn live_version_count(&self) -> usize {
        let mut active = self.active_versions.lock();
        active.retain(|weak| weak.strong_count() > 0);
        active.len()
    }

    /// One-line per-level file count summary.
    pub fn level_summary(&self) -> String {
        let current = self.current();
        let counts: Vec<String> = (0..NUM_LEVELS)
            .map(|level| current.num_files(level).to_string())
            .collect();
        format!("files[ {} ]", counts.join(" "))
    }

    /// Recover the catalogue by replaying the MANIFEST named by CURRENT.
    ///
    /// Returns true when the caller should rewrite the MANIFEST (the old
    /// one was not reused).
    pub fn recover(&self) -> Result<bool> {
        let current_name = read_current_file(&self.db_path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NotFound("CURRENT file missing".into())
            } else {
                Error::from(e)
            }
        })?;
        let manifest_number = parse_manifest_file_name(&current_name)
            .ok_or_else(|| Error::corruption("invalid manifest name in CURRENT"))?;
        let manifest_path = manifest_file_path(&self.db_path, manifest_number);

        let mut log_number = None;
        let mut prev_log_number = None;
        let mut next_file_number = None;
        let mut last_sequence = None;

        let mut builder = Builder::new(self, self.current());

        let mut reader = LogReader::new(&manifest_path)?;
        while let Some(record) = reader.read_record()? {
            let edit = VersionEdit::decode(&record)?;

            if let Some(name) = &edit.comparator {
                let expected = self.icmp.user_comparator().name();
                if name != expected {
                    return Err(Error::corruption(format!(
                        "comparator mismatch: database uses {}, supplied {}",
                        name, expected
                    )));
                }
            }

            builder.apply(&edit);

            log_number = edit.log_number.or(log_number);
            prev_log_number = edit.prev_log_number.or(prev_log_number);
            next_file_number = edit.next_file_number.or(next_file_number);
            last_sequence = edit.last_sequence.or(last_sequence);
        }

        let next_file_number = next_file_number
            .ok_or_else(|| Error::corruption("descriptor missing next-file-number entry"))?;
        let log_number =
            log_number.ok_or_else(|| Error::corruption("descriptor missing log-number entry"))?;
        let last_sequence = last_sequence
            .ok_or_else(|| Error::corruption("descriptor missing last-sequence entry"))?;
        let prev_log_number = prev_log_number.unwrap_or(0);

        self.mark_file_number_used(prev_log_number);
        self.mark_file_number_used(log_number);

        let mut version = builder.save_to()?;
        self.finalize_version(&mut version);
        self.append_version(Arc::new(version));

        self.manifest_file_number
            .store(next_file_number, Ordering::SeqCst);
        self.next_file_number
            .store(next_file_number + 1, Ordering::SeqCst);
        self.last_sequence.store(last_sequence, Ordering::SeqCst);
        self.log_number.store(log_number, Ordering::SeqCst);
        self.prev_log_number.store(prev_log_number, Ordering::SeqCst);

        Ok(!self.reuse_manifest(&manifest_path, manifest_number))
    }

    /// Try to keep appending to the recovered MANIFEST instead of
    /// rewriting it.
    fn reuse_manifest(&self, manifest_path: &Path, manifest_number: u64) -> bool {
        if !self.options.reuse_manifest {
            return false;
        }
        // A manifest that has grown past one target file is rewritten so
        // recovery stays proportional to the live file count.
        match file_size(manifest_path) {
            Ok(len) if len < self.options.target_file_size() => {}
            _ => return false,
        }

        let mut descriptor = self.descriptor_log.lock();
        debug_assert!(descriptor.is_none());
        match LogWriter::open_for_append(manifest_path, manifest_number) {
            Ok(writer) => {
                tracing::info!(manifest = %manifest_path.display(), "reusing MANIFEST");
                *descriptor = Some(writer);
                self.manifest_file_number
                    .store(manifest_number, Ordering::SeqCst);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not reuse MANIFEST");
                false
            }
        }
    }

    /// Commit `edit`: append it to the MANIFEST and install the resulting
    /// Version as current.
    ///
    /// The caller holds the database mutex whose guard is passed in; it
    /// is released for the duration of the MANIFEST append and fsync and
    /// re-acquired before any in-memory state changes. Readers may load
    /// `current` during the write. Callers serialize commits externally;
    /// no second edit may be in flight.
    ///
    /// On failure the current Version is untouched and a MANIFEST created
    /// by this call is deleted.
    pub fn log_and_apply<T>(
        &self,
        edit: &mut VersionEdit,
        guard: &mut MutexGuard<'_, T>,
    ) -> Result<()> {
        match edit.log_number {
            Some(n) => {
                if n < self.log_number() || n >= self.next_file_number() {
                    return Err(Error::invalid_argument(format!(
                        "edit log number {} out of range",
                        n
                    )));
                }
            }
            None => edit.set_log_number(self.log_number()),
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number());
        }
        edit.set_next_file_number(self.next_file_number());
        edit.set_last_sequence(self.last_sequence());

        let mut version = {
            let mut builder = Builder::new(self, self.current());
            builder.apply(edit);
            builder.save_to()?
        };
        self.finalize_version(&mut version);
        let version = Arc::new(version);

        let manifest_number = self.manifest_file_number();
        let mut descriptor = self.descriptor_log.lock();
        let mut created_new_manifest = false;

        let write_result = (|| -> Result<()> {
            if descriptor.is_none() {
                // First commit since open: start the manifest with a
                // snapshot of the pre-edit state.
                edit.set_next_file_number(self.next_file_number());
                let path = manifest_file_path(&self.db_path, manifest_number);
                *descriptor = Some(LogWriter::create(&path, manifest_number)?);
                created_new_manifest = true;
                if let Some(writer) = descriptor.as_mut() {
                    self.write_snapshot(writer)?;
                }
            }

            let record = edit.encode();
            let db_path = self.db_path.clone();

            // The one suspension point in the commit path: drop the
            // caller's mutex while the record hits disk.
            MutexGuard::unlocked(guard, || -> Result<()> {
                if let Some(writer) = descriptor.as_mut() {
                    writer.add_record(&record, true)?;
                }
                if created_new_manifest {
                    set_current_file(&db_path, manifest_number)?;
                }
                Ok(())
            })
        })();

        if let Err(e) = write_result {
            tracing::error!(error = %e, "MANIFEST write failed");
            if created_new_manifest {
                *descriptor = None;
                let _ = delete_file(&manifest_file_path(&self.db_path, manifest_number));
            }
            return Err(e);
        }
        drop(descriptor);

        self.append_version(version);
        if let Some(n) = edit.log_number {
            self.log_number.store(n, Ordering::SeqCst);
        }
        if let Some(n) = edit.prev_log_number {
            self.prev_log_number.store(n, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Write a snapshot of the current state as one edit record:
    /// comparator name, compaction cursors, and every live file.
    fn write_snapshot(&self, log: &mut LogWriter) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator(self.icmp.user_comparator().name());

        {
            let pointers = self.compact_pointers.read();
            for (level, pointer) in pointers.iter().enumerate() {
                if let Some(key) = pointer {
                    edit.set_compact_pointer(level, key.clone());
                }
            }
        }

        let current = self.current();
        for level in 0..NUM_LEVELS {
            for file in current.files(level) {
                edit.add_file(level, (**file).clone());
            }
        }

        log.add_record(&edit.encode(), false)
    }

    /// Install `version` as current and register it in the active set.
    ///
    /// The previous current is released here; it stays alive only while
    /// outside holders (snapshots, iterators) retain it.
    fn append_version(&self, version: Arc<Version>) {
        let mut active = self.active_versions.lock();
        active.retain(|weak| weak.strong_count() > 0);
        active.push(Arc::downgrade(&version));
        drop(active);

        self.current.store(version);
    }

    /// Precompute the best compaction target for a new version.
    ///
    /// L0 is scored by file count (its files are all merged on every
    /// read); deeper levels by the ratio of their byte size to the level
    /// budget.
    fn finalize_version(&self, version: &mut Version) {
        let mut best_level = 0;
        let mut best_score = -1.0f64;

        for level in 0..NUM_LEVELS - 1 {
            let score = if level == 0 {
                version.num_files(0) as f64 / self.options.l0_compaction_trigger as f64
            } else {
                version.level_size(level) as f64 / self.options.max_bytes_for_level(level)
            };

            if score > best_score {
                best_level = level;
                best_score = score;
            }
        }

        version.set_compaction_info(best_score, best_level);
    }

    /// Pick the next compaction, if any is due.
    ///
    /// Size pressure dominates seek pressure: a level over its byte (or
    /// file-count) budget compacts before a file that merely burned its
    /// seek allowance.
    pub fn pick_compaction(&self) -> Option<Compaction> {
        let current = self.current();

        let size_compaction = current.compaction_score() >= 1.0;
        let seek_compaction = current.file_to_compact().is_some();

        let (level, level_inputs) = if size_compaction {
            let level = current.compaction_level();
            debug_assert!(level + 1 < NUM_LEVELS);

            // Start with the first file past the cursor for this level,
            // wrapping to the start of the key space when none is.
            let pointer = self.compact_pointer(level);
            let mut inputs = Vec::new();
            for file in current.files(level) {
                let past_pointer = match &pointer {
                    None => true,
                    Some(p) => self.icmp.compare_keys(file.largest(), p) == CmpOrdering::Greater,
                };
                if past_pointer {
                    inputs.push(Arc::clone(file));
                    break;
                }
            }
            if inputs.is_empty() {
                inputs.push(Arc::clone(current.files(level).first()?));
            }
            (level, inputs)
        } else if seek_compaction {
            let (file, level) = current.file_to_compact()?;
            (level, vec![file])
        } else {
            return None;
        };

        // L0 files overlap each other, so the seed file is replaced by
        // the closure of all L0 files overlapping its range.
        let level_inputs = if level == 0 {
            let (smallest, largest) = key_range(&self.icmp, &level_inputs)?;
            let closure = current.overlapping_inputs(0, Some(&smallest), Some(&largest));
            debug_assert!(!closure.is_empty());
            closure
        } else {
            level_inputs
        };

        self.setup_other_inputs(current, level, level_inputs)
    }

    /// Plan a compaction of everything overlapping `[begin, end]` at
    /// `level`. Returns `Ok(None)` when the range is empty there.
    pub fn compact_range(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Result<Option<Compaction>> {
        if level + 1 >= NUM_LEVELS {
            return Err(Error::invalid_argument(format!(
                "level {} out of range for compaction",
                level
            )));
        }

        let current = self.current();
        let level_inputs = current.overlapping_inputs(level, begin, end);
        if level_inputs.is_empty() {
            return Ok(None);
        }

        Ok(self.setup_other_inputs(current, level, level_inputs))
    }

    /// Complete a compaction plan around the chosen level-N inputs:
    /// boundary closure, level-N+1 overlap, the input-growth heuristic,
    /// grandparent collection, and the cursor advance.
    fn setup_other_inputs(
        &self,
        current: Arc<Version>,
        level: usize,
        mut level_inputs: Vec<Arc<FileMetadata>>,
    ) -> Option<Compaction> {
        let icmp = &self.icmp;

        add_boundary_inputs(icmp, current.files(level), &mut level_inputs);
        let (smallest, mut largest) = key_range(icmp, &level_inputs)?;

        let mut level_up_inputs =
            current.overlapping_inputs(level + 1, Some(&smallest), Some(&largest));
        add_boundary_inputs(icmp, current.files(level + 1), &mut level_up_inputs);

        let (mut all_start, mut all_limit) = key_range2(icmp, &level_inputs, &level_up_inputs)?;

        // Growth heuristic: widen the level-N input set to everything
        // under the combined range, provided that does not change the
        // level-N+1 pick and the total stays within budget.
        if !level_up_inputs.is_empty() {
            let mut expanded0 =
                current.overlapping_inputs(level, Some(&all_start), Some(&all_limit));
            add_boundary_inputs(icmp, current.files(level), &mut expanded0);

            let level_input_size = total_file_size(&level_inputs);
            let level_up_input_size = total_file_size(&level_up_inputs);
            let expanded0_size = total_file_size(&expanded0);

            if expanded0.len() > level_inputs.len()
                && level_up_input_size + expanded0_size
                    < self.options.expanded_compaction_byte_size_limit()
            {
                if let Some((new_start, new_limit)) = key_range(icmp, &expanded0) {
                    let mut expanded1 =
                        current.overlapping_inputs(level + 1, Some(&new_start), Some(&new_limit));
                    add_boundary_inputs(icmp, current.files(level + 1), &mut expanded1);

                    if expanded1.len() == level_up_inputs.len() {
                        tracing::debug!(
                            level,
                            from_files = level_inputs.len(),
                            from_up_files = level_up_inputs.len(),
                            from_bytes = level_input_size + level_up_input_size,
                            to_files = expanded0.len(),
                            to_bytes = expanded0_size + level_up_input_size,
                            "expanding compaction inputs"
                        );
                        largest = new_limit;
                        level_inputs = expanded0;
                        level_up_inputs = expanded1;

                        let range = key_range2(icmp, &level_inputs, &level_up_inputs)?;
                        all_start = range.0;
                        all_limit = range.1;
                    }
                }
            }
        }

        let grandparents = if level + 2 < NUM_LEVELS {
            current.overlapping_inputs(level + 2, Some(&all_start), Some(&all_limit))
        } else {
            Vec::new()
        };

        let mut compaction = Compaction::new(
            current,
            level,
            self.options.target_file_size(),
            self.options.max_grandparent_overlap_bytes(),
            [level_inputs, level_up_inputs],
            grandparents,
            Arc::clone(icmp),
        );

        // Advance the cursor immediately rather than with the committed
        // edit: if this compaction fails, the next pick tries a
        // different key range.
        self.set_compact_pointer(level, largest.clone());
        compaction.edit_mut().set_compact_pointer(level, largest);

        Some(compaction)
    }

    /// Build the merged read view over a compaction's inputs.
    ///
    /// L0 inputs must be merged (they overlap); other levels concatenate.
    pub fn make_input_iterator(&self, compaction: &Compaction) -> Result<MergingIterator> {
        let options = ReadOptions {
            verify_checksums: self.options.paranoid_checks,
            // A compaction reads each input once; caching those blocks
            // would only evict hot read traffic.
            fill_cache: false,
        };

        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
        for which in 0..2 {
            let files = compaction.input(which);
            if files.is_empty() {
                continue;
            }
            if compaction.level() + which == 0 {
                let mut l0_children: Vec<Box<dyn InternalIterator>> =
                    Vec::with_capacity(files.len());
                for file in files {
                    l0_children.push(self.table_cache.new_iterator(file, &options)?);
                }
                children.push(Box::new(MergingIterator::new(
                    Arc::clone(&self.icmp),
                    l0_children,
                )));
            } else {
                children.push(Box::new(ConcatenatingIterator::new(
                    Arc::clone(&self.icmp),
                    files.to_vec(),
                    Arc::clone(&self.table_cache),
                    options.clone(),
                )));
            }
        }

        Ok(MergingIterator::new(Arc::clone(&self.icmp), children))
    }
}

impl Drop for VersionSet {
    fn drop(&mut self) {
        let current = self.current.load_full();
        let pinned = self
            .active_versions
            .get_mut()
            .iter()
            .filter_map(|weak| weak.upgrade())
            .filter(|version| !Arc::ptr_eq(version, &current))
            .count();
        if pinned > 0 {
            tracing::warn!(
                pinned_versions = pinned,
                "version set closed with live snapshots; possible resource leak"
            );
        }
    }
}
