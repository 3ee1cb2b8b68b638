//! End-to-end tests driving the catalogue through its public API: flush
//! edits, reads, compaction planning, the merged input view, and recovery.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tempfile::tempdir;

use stratadb::{
    Comparator, InternalIterator, InternalKey, InternalKeyComparator, LookupKey, LookupResult,
    Options, ReadOptions, Result, TableCache, ValueType, VersionEdit, VersionSet,
};
use stratadb::version::FileMetadata;

/// In-memory table layer: each "file" is a sorted vector of entries.
struct MemTables {
    icmp: Arc<InternalKeyComparator>,
    tables: RwLock<HashMap<u64, Arc<Vec<(Bytes, Bytes)>>>>,
}

impl MemTables {
    fn new(icmp: Arc<InternalKeyComparator>) -> Self {
        Self {
            icmp,
            tables: RwLock::new(HashMap::new()),
        }
    }

    fn add_table(&self, number: u64, mut entries: Vec<(InternalKey, Bytes)>) {
        entries.sort_by(|a, b| self.icmp.compare_keys(&a.0, &b.0));
        let encoded = entries
            .into_iter()
            .map(|(key, value)| (key.encode(), value))
            .collect();
        self.tables.write().insert(number, Arc::new(encoded));
    }
}

struct MemTableIterator {
    icmp: Arc<InternalKeyComparator>,
    entries: Arc<Vec<(Bytes, Bytes)>>,
    pos: Option<usize>,
}

impl InternalIterator for MemTableIterator {
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

impl TableCache for MemTables {
    fn new_iterator(
        &self,
        file: &FileMetadata,
        _options: &ReadOptions,
    ) -> Result<Box<dyn InternalIterator>> {
        let entries = self.tables.read().get(&file.number()).cloned().unwrap();
        Ok(Box::new(MemTableIterator {
            icmp: Arc::clone(&self.icmp),
            entries,
            pos: None,
        }))
    }

    fn get(
        &self,
        _options: &ReadOptions,
        key: &LookupKey,
        file: &FileMetadata,
    ) -> Result<Option<LookupResult>> {
        let entries = self.tables.read().get(&file.number()).cloned().unwrap();
        let ucmp = self.icmp.user_comparator();
        for (encoded, value) in entries.iter() {
            let entry = InternalKey::decode(encoded).unwrap();
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

struct Harness {
    tables: Arc<MemTables>,
    vset: VersionSet,
    mutex: Mutex<()>,
}

impl Harness {
    fn open(db_path: &std::path::Path, options: Options) -> Self {
        let icmp = Arc::new(InternalKeyComparator::bytewise());
        let tables = Arc::new(MemTables::new(Arc::clone(&icmp)));
        let vset = VersionSet::new(
            db_path,
            Arc::new(options),
            icmp,
            Arc::clone(&tables) as Arc<dyn TableCache>,
        )
        .unwrap();
        Self {
            tables,
            vset,
            mutex: Mutex::new(()),
        }
    }

    /// Simulate a memtable flush: write a "table" and commit an edit
    /// adding it at level 0.
    fn flush(&self, entries: Vec<(InternalKey, Bytes)>) -> u64 {
        let number = self.vset.new_file_number();
        let smallest = entries
            .iter()
            .map(|(k, _)| k.clone())
            .min_by(|a, b| {
                self.vset.internal_key_comparator().compare_keys(a, b)
            })
            .unwrap();
        let largest = entries
            .iter()
            .map(|(k, _)| k.clone())
            .max_by(|a, b| {
                self.vset.internal_key_comparator().compare_keys(a, b)
            })
            .unwrap();
        let max_seq = entries.iter().map(|(k, _)| k.sequence()).max().unwrap();

        self.tables.add_table(number, entries.clone());

        if max_seq > self.vset.last_sequence() {
            self.vset.set_last_sequence(max_seq).unwrap();
        }

        let mut edit = VersionEdit::new();
        edit.add_file_info(0, number, 1024, smallest, largest);

        let mut guard = self.mutex.lock();
        self.vset.log_and_apply(&mut edit, &mut guard).unwrap();
        number
    }

    fn get(&self, key: &str, sequence: u64) -> Option<Bytes> {
        self.vset
            .current()
            .get(
                &ReadOptions::default(),
                &LookupKey::new(Bytes::copy_from_slice(key.as_bytes()), sequence),
            )
            .unwrap()
    }
}

fn value_key(user: &str, seq: u64) -> InternalKey {
    InternalKey::for_value(Bytes::copy_from_slice(user.as_bytes()), seq)
}

fn deletion_key(user: &str, seq: u64) -> InternalKey {
    InternalKey::for_deletion(Bytes::copy_from_slice(user.as_bytes()), seq)
}

#[test]
fn flush_read_and_shadowing() {
    let dir = tempdir().unwrap();
    let db = Harness::open(dir.path(), Options::default());

    db.flush(vec![
        (value_key("apple", 1), Bytes::from("red")),
        (value_key("banana", 2), Bytes::from("yellow")),
    ]);
    db.flush(vec![
        (value_key("apple", 3), Bytes::from("green")),
        (deletion_key("banana", 4), Bytes::new()),
    ]);

    // Latest state: apple overwritten, banana deleted.
    assert_eq!(db.get("apple", 100), Some(Bytes::from("green")));
    assert_eq!(db.get("banana", 100), None);

    // Historical snapshots still see the old state.
    assert_eq!(db.get("apple", 2), Some(Bytes::from("red")));
    assert_eq!(db.get("banana", 2), Some(Bytes::from("yellow")));
    assert_eq!(db.get("cherry", 100), None);
}

#[test]
fn snapshot_versions_are_stable() {
    let dir = tempdir().unwrap();
    let db = Harness::open(dir.path(), Options::default());

    db.flush(vec![(value_key("k", 1), Bytes::from("v1"))]);
    let snapshot = db.vset.current();

    db.flush(vec![(value_key("k", 2), Bytes::from("v2"))]);

    // The pinned version still reads the old state while current moved on.
    let options = ReadOptions::default();
    let key = LookupKey::new(Bytes::from("k"), 100);
    assert_eq!(
        snapshot.get(&options, &key).unwrap(),
        Some(Bytes::from("v1"))
    );
    assert_eq!(db.get("k", 100), Some(Bytes::from("v2")));
    assert_eq!(snapshot.total_files(), 1);
}

#[test]
fn compaction_cycle_through_manifest_and_recovery() {
    let dir = tempdir().unwrap();
    let db = Harness::open(dir.path(), Options::default());

    // Four overlapping L0 flushes trip the size trigger (4 / 4 = 1.0).
    for i in 0..4u64 {
        let seq = i * 10 + 1;
        db.flush(vec![
            (value_key("a", seq), Bytes::from(format!("a{}", i))),
            (value_key("z", seq + 1), Bytes::from(format!("z{}", i))),
        ]);
    }
    assert!(db.vset.needs_compaction());

    let mut compaction = db.vset.pick_compaction().unwrap();
    assert_eq!(compaction.level(), 0);
    assert_eq!(compaction.num_input_files(0), 4);

    // Run the merge the way a compaction job would: newest entry per
    // user key survives.
    let mut iter = db.vset.make_input_iterator(&compaction).unwrap();
    iter.seek_to_first().unwrap();
    let mut output = Vec::new();
    let mut last_user_key: Option<Vec<u8>> = None;
    while iter.valid() {
        let encoded = iter.key().unwrap();
        let key = InternalKey::decode(&encoded).unwrap();
        if last_user_key.as_deref() != Some(key.user_key()) {
            last_user_key = Some(key.user_key().to_vec());
            output.push((key, iter.value().unwrap()));
        }
        iter.next().unwrap();
    }
    iter.close().unwrap();

    assert_eq!(output.len(), 2);
    assert_eq!(output[0].1, Bytes::from("a3"));
    assert_eq!(output[1].1, Bytes::from("z3"));

    // Install the output as a new L1 file and delete the inputs.
    let output_number = db.vset.new_file_number();
    let smallest = output.first().unwrap().0.clone();
    let largest = output.last().unwrap().0.clone();
    db.tables.add_table(output_number, output);

    compaction.add_input_deletions();
    compaction
        .edit_mut()
        .add_file_info(1, output_number, 2048, smallest, largest);

    {
        let mut guard = db.mutex.lock();
        let mut edit = compaction.edit().clone();
        db.vset.log_and_apply(&mut edit, &mut guard).unwrap();
    }

    assert_eq!(db.vset.num_files_at_level(0), 0);
    assert_eq!(db.vset.num_files_at_level(1), 1);
    assert_eq!(db.get("a", 100), Some(Bytes::from("a3")));
    assert_eq!(db.get("z", 100), Some(Bytes::from("z3")));

    // Reopen: the manifest replays to the same geometry.
    let tables = Arc::clone(&db.tables);
    drop(db);

    let icmp = Arc::new(InternalKeyComparator::bytewise());
    let vset = VersionSet::new(
        dir.path(),
        Arc::new(Options::default()),
        icmp,
        tables as Arc<dyn TableCache>,
    )
    .unwrap();
    let save_manifest = vset.recover().unwrap();
    assert!(save_manifest);

    assert_eq!(vset.num_files_at_level(0), 0);
    assert_eq!(vset.num_files_at_level(1), 1);
    assert_eq!(vset.current().files(1)[0].number(), output_number);

    let value = vset
        .current()
        .get(
            &ReadOptions::default(),
            &LookupKey::new(Bytes::from("a"), 100),
        )
        .unwrap();
    assert_eq!(value, Some(Bytes::from("a3")));
}

#[test]
fn full_scan_is_sorted_and_deduplicated_by_layer() {
    let dir = tempdir().unwrap();
    let db = Harness::open(dir.path(), Options::default());

    db.flush(vec![
        (value_key("a", 1), Bytes::from("1")),
        (value_key("c", 2), Bytes::from("2")),
    ]);
    db.flush(vec![
        (value_key("b", 3), Bytes::from("3")),
        (value_key("c", 4), Bytes::from("4")),
    ]);

    let current = db.vset.current();
    let mut iter = current.iterator(&ReadOptions::default()).unwrap();
    iter.seek_to_first().unwrap();

    let mut seen = Vec::new();
    while iter.valid() {
        let key = InternalKey::decode(&iter.key().unwrap()).unwrap();
        seen.push((
            String::from_utf8(key.user_key().to_vec()).unwrap(),
            key.sequence(),
        ));
        iter.next().unwrap();
    }
    iter.close().unwrap();

    // Both versions of "c" appear, newest first, in user-key order.
    assert_eq!(
        seen,
        vec![
            ("a".to_string(), 1),
            ("b".to_string(), 3),
            ("c".to_string(), 4),
            ("c".to_string(), 2),
        ]
    );
}

#[test]
fn manual_compaction_over_a_range() {
    let dir = tempdir().unwrap();
    let db = Harness::open(dir.path(), Options::default());

    db.flush(vec![
        (value_key("d", 1), Bytes::from("x")),
        (value_key("f", 2), Bytes::from("y")),
    ]);

    let begin = value_key("a", u64::MAX >> 8);
    let end = value_key("m", 0);
    let compaction = db.vset.compact_range(0, Some(&begin), Some(&end)).unwrap();

    let compaction = compaction.expect("range covers the flushed file");
    assert_eq!(compaction.level(), 0);
    assert_eq!(compaction.num_input_files(0), 1);

    // A disjoint range finds nothing.
    let begin = value_key("p", 100);
    let end = value_key("q", 100);
    assert!(db
        .vset
        .compact_range(0, Some(&begin), Some(&end))
        .unwrap()
        .is_none());
}
