//! N-way merging iterator over sorted children.
//!
//! A binary heap holds one entry per child currently positioned on a
//! record, ordered by the internal-key comparator: ascending while moving
//! forward, descending while moving backward. The head of the heap is the
//! merged cursor position. Changing direction reseats every other child
//! around the current key and rebuilds the heap.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use bytes::Bytes;

use crate::util::comparator::{Comparator, InternalKeyComparator};
use crate::Result;

use super::InternalIterator;

/// Traversal direction of the merged cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// One child's current entry, ordered for the heap.
struct HeapEntry {
    key: Bytes,
    value: Bytes,
    index: usize,
    icmp: Arc<InternalKeyComparator>,
    reverse: bool,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops its maximum. Forward traversal wants the
        // smallest key on top, so the ordering is inverted; reverse
        // traversal wants the largest. Ties between children holding the
        // same key are broken by child position, so duplicates surface
        // once per child in a stable order.
        let ord = self
            .icmp
            .compare(&self.key, &other.key)
            .then_with(|| self.index.cmp(&other.index));
        if self.reverse {
            ord
        } else {
            ord.reverse()
        }
    }
}

/// Merging iterator combining N sorted children into one sorted view.
///
/// Entries with equal keys are surfaced once per child; collapsing
/// versions of the same user key is the concern of a higher layer.
pub struct MergingIterator {
    icmp: Arc<InternalKeyComparator>,
    children: Vec<Box<dyn InternalIterator>>,
    heap: BinaryHeap<HeapEntry>,
    current: Option<HeapEntry>,
    direction: Direction,
    closed: bool,
}

impl MergingIterator {
    /// Create a merging iterator over the given children.
    pub fn new(icmp: Arc<InternalKeyComparator>, children: Vec<Box<dyn InternalIterator>>) -> Self {
        Self {
            icmp,
            children,
            heap: BinaryHeap::new(),
            current: None,
            direction: Direction::Forward,
            closed: false,
        }
    }

    /// Number of children in the merge.
    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// Snapshot the entry a child is currently positioned on.
    fn entry(&self, index: usize) -> Option<HeapEntry> {
        let child = &self.children[index];
        if !child.valid() {
            return None;
        }
        Some(HeapEntry {
            key: child.key()?,
            value: child.value()?,
            index,
            icmp: Arc::clone(&self.icmp),
            reverse: self.direction == Direction::Reverse,
        })
    }

    /// Rebuild the heap from every valid child and pop the new head.
    fn rebuild(&mut self) {
        self.heap.clear();
        for index in 0..self.children.len() {
            if let Some(entry) = self.entry(index) {
                self.heap.push(entry);
            }
        }
        self.current = self.heap.pop();
    }
}

impl InternalIterator for MergingIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_first()?;
        }
        self.direction = Direction::Forward;
        self.rebuild();
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_last()?;
        }
        self.direction = Direction::Reverse;
        self.rebuild();
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        for child in &mut self.children {
            child.seek(target)?;
        }
        self.direction = Direction::Forward;
        self.rebuild();
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        let Some(current) = self.current.take() else {
            return Ok(());
        };

        if self.direction == Direction::Reverse {
            // Direction switch: every other child sits somewhere at or
            // before the current key. Reseat each just past it.
            for index in 0..self.children.len() {
                if index == current.index {
                    continue;
                }
                let child = &mut self.children[index];
                child.seek(&current.key)?;
                if let Some(key) = child.key() {
                    if self.icmp.compare(&key, &current.key) == Ordering::Equal {
                        child.next()?;
                    }
                }
            }
            self.direction = Direction::Forward;
            self.children[current.index].next()?;
            self.rebuild();
            return Ok(());
        }

        self.children[current.index].next()?;
        if let Some(entry) = self.entry(current.index) {
            self.heap.push(entry);
        }
        self.current = self.heap.pop();
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let Some(current) = self.current.take() else {
            return Ok(());
        };

        if self.direction == Direction::Forward {
            // Direction switch: every other child sits somewhere past the
            // current key. Reseat each just before it.
            for index in 0..self.children.len() {
                if index == current.index {
                    continue;
                }
                let child = &mut self.children[index];
                child.seek(&current.key)?;
                if child.valid() {
                    // Child is at the first entry >= current key.
                    child.prev()?;
                } else {
                    // Every entry in this child is before the current key.
                    child.seek_to_last()?;
                }
            }
            self.direction = Direction::Reverse;
            self.children[current.index].prev()?;
            self.rebuild();
            return Ok(());
        }

        self.children[current.index].prev()?;
        if let Some(entry) = self.entry(current.index) {
            self.heap.push(entry);
        }
        self.current = self.heap.pop();
        Ok(())
    }

    fn key(&self) -> Option<Bytes> {
        self.current.as_ref().map(|e| e.key.clone())
    }

    fn value(&self) -> Option<Bytes> {
        self.current.as_ref().map(|e| e.value.clone())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.current = None;
        self.heap.clear();

        let mut first_err = None;
        for child in &mut self.children {
            if let Err(e) = child.close() {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{encoded, ikey, VecIterator};
    use crate::types::InternalKey;

    fn icmp() -> Arc<InternalKeyComparator> {
        Arc::new(InternalKeyComparator::bytewise())
    }

    fn vec_child(
        icmp: &Arc<InternalKeyComparator>,
        entries: &[(&str, u64)],
    ) -> Box<dyn InternalIterator> {
        let entries: Vec<(InternalKey, Bytes)> = entries
            .iter()
            .map(|(k, seq)| {
                (
                    ikey(k, *seq),
                    Bytes::from(format!("value_{}_{}", k, seq)),
                )
            })
            .collect();
        Box::new(VecIterator::new(Arc::clone(icmp), entries))
    }

    fn drain_forward(iter: &mut MergingIterator) -> Vec<Bytes> {
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().unwrap());
            iter.next().unwrap();
        }
        keys
    }

    #[test]
    fn test_merge_two_children_forward() {
        let icmp = icmp();
        let children = vec![
            vec_child(&icmp, &[("a", 1), ("c", 1), ("e", 1)]),
            vec_child(&icmp, &[("b", 1), ("d", 1), ("f", 1)]),
        ];
        let mut iter = MergingIterator::new(Arc::clone(&icmp), children);

        iter.seek_to_first().unwrap();
        let keys = drain_forward(&mut iter);

        let expected: Vec<Bytes> = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .map(|k| encoded(k, 1))
            .collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_merge_reverse_traversal() {
        let icmp = icmp();
        let children = vec![
            vec_child(&icmp, &[("a", 1), ("c", 1)]),
            vec_child(&icmp, &[("b", 1), ("d", 1)]),
        ];
        let mut iter = MergingIterator::new(Arc::clone(&icmp), children);

        iter.seek_to_last().unwrap();
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().unwrap());
            iter.prev().unwrap();
        }

        let expected: Vec<Bytes> = ["d", "c", "b", "a"].iter().map(|k| encoded(k, 1)).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_forward_then_back_returns_to_origin() {
        let icmp = icmp();
        let children = vec![
            vec_child(&icmp, &[("a", 1), ("d", 1), ("g", 1)]),
            vec_child(&icmp, &[("b", 1), ("e", 1)]),
            vec_child(&icmp, &[("c", 1), ("f", 1)]),
        ];
        let mut iter = MergingIterator::new(Arc::clone(&icmp), children);

        iter.seek_to_first().unwrap();
        let origin = iter.key().unwrap();

        // Walk forward three entries, then back three.
        for _ in 0..3 {
            iter.next().unwrap();
        }
        assert_eq!(iter.key().unwrap(), encoded("d", 1));
        for _ in 0..3 {
            iter.prev().unwrap();
        }

        assert!(iter.valid());
        assert_eq!(iter.key().unwrap(), origin);
    }

    #[test]
    fn test_direction_switch_mid_stream() {
        let icmp = icmp();
        let children = vec![
            vec_child(&icmp, &[("a", 1), ("c", 1), ("e", 1)]),
            vec_child(&icmp, &[("b", 1), ("d", 1)]),
        ];
        let mut iter = MergingIterator::new(Arc::clone(&icmp), children);

        iter.seek_to_first().unwrap();
        iter.next().unwrap();
        iter.next().unwrap();
        assert_eq!(iter.key().unwrap(), encoded("c", 1));

        // Reverse one step, then forward again.
        iter.prev().unwrap();
        assert_eq!(iter.key().unwrap(), encoded("b", 1));
        iter.next().unwrap();
        assert_eq!(iter.key().unwrap(), encoded("c", 1));
        iter.next().unwrap();
        assert_eq!(iter.key().unwrap(), encoded("d", 1));
    }

    #[test]
    fn test_seek_lands_on_first_key_at_or_past_target() {
        let icmp = icmp();
        let children = vec![
            vec_child(&icmp, &[("a", 5), ("m", 5)]),
            vec_child(&icmp, &[("f", 5), ("z", 5)]),
        ];
        let mut iter = MergingIterator::new(Arc::clone(&icmp), children);

        iter.seek(&encoded("c", InternalKey::MAX_SEQUENCE)).unwrap();
        assert_eq!(iter.key().unwrap(), encoded("f", 5));

        iter.seek(&encoded("z", InternalKey::MAX_SEQUENCE)).unwrap();
        assert_eq!(iter.key().unwrap(), encoded("z", 5));

        iter.seek(&encoded("zz", InternalKey::MAX_SEQUENCE)).unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn test_same_user_key_ordered_by_sequence() {
        let icmp = icmp();
        // Same user key spread across children: newer sequences first.
        let children = vec![
            vec_child(&icmp, &[("k", 10)]),
            vec_child(&icmp, &[("k", 30)]),
            vec_child(&icmp, &[("k", 20)]),
        ];
        let mut iter = MergingIterator::new(Arc::clone(&icmp), children);

        iter.seek_to_first().unwrap();
        let keys = drain_forward(&mut iter);

        let expected: Vec<Bytes> = [30u64, 20, 10].iter().map(|s| encoded("k", *s)).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_duplicate_keys_surface_once_per_child() {
        let icmp = icmp();
        let children = vec![
            vec_child(&icmp, &[("a", 1), ("b", 1)]),
            vec_child(&icmp, &[("b", 1), ("c", 1)]),
        ];
        let mut iter = MergingIterator::new(Arc::clone(&icmp), children);

        iter.seek_to_first().unwrap();
        let keys = drain_forward(&mut iter);

        // a, b (child 0), b (child 1), c
        assert_eq!(keys.len(), 4);
        assert_eq!(keys[1], encoded("b", 1));
        assert_eq!(keys[2], encoded("b", 1));
    }

    #[test]
    fn test_empty_children() {
        let icmp = icmp();
        let children = vec![vec_child(&icmp, &[]), vec_child(&icmp, &[("a", 1)])];
        let mut iter = MergingIterator::new(Arc::clone(&icmp), children);

        iter.seek_to_first().unwrap();
        assert!(iter.valid());
        assert_eq!(iter.key().unwrap(), encoded("a", 1));

        iter.next().unwrap();
        assert!(!iter.valid());

        let mut empty = MergingIterator::new(Arc::clone(&icmp), vec![]);
        empty.seek_to_first().unwrap();
        assert!(!empty.valid());
    }

    #[test]
    fn test_close_is_idempotent() {
        let icmp = icmp();
        let children = vec![vec_child(&icmp, &[("a", 1)])];
        let mut iter = MergingIterator::new(Arc::clone(&icmp), children);

        iter.seek_to_first().unwrap();
        iter.close().unwrap();
        assert!(!iter.valid());
        iter.close().unwrap();
    }
}
