//! VersionEdit - the delta between two Versions, as recorded in the
//! MANIFEST.

use std::collections::{BTreeMap, BTreeSet};

use bytes::{Bytes, BytesMut};

use crate::options::NUM_LEVELS;
use crate::types::InternalKey;
use crate::util::coding::{
    decode_length_prefixed, decode_varint32, decode_varint64, encode_length_prefixed,
    encode_varint32, encode_varint64,
};
use crate::{Error, Result};

use super::{EditTag, FileMetadata};

/// A VersionEdit describes the changes between two Versions.
///
/// It records:
/// - New files to add and files to delete, per level
/// - Log/sequence/file-number watermarks
/// - Compaction pointers
///
/// The encoding is a sequence of tagged fields (see [`EditTag`]); decoding
/// an unknown tag is a corruption error. Two edits are equal when they
/// describe the same change, regardless of the order fields were set in.
#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    /// Comparator name (recorded by the first edit of a database).
    pub comparator: Option<String>,
    /// Log file number.
    pub log_number: Option<u64>,
    /// Previous log number (deprecated).
    pub prev_log_number: Option<u64>,
    /// Next file number to allocate.
    pub next_file_number: Option<u64>,
    /// Last sequence number used.
    pub last_sequence: Option<u64>,
    /// Compaction pointers by level.
    pub compact_pointers: BTreeMap<usize, InternalKey>,
    /// Files to delete: (level, file_number).
    pub deleted_files: BTreeSet<(usize, u64)>,
    /// New files to add: (level, FileMetadata).
    pub new_files: Vec<(usize, FileMetadata)>,
}

impl VersionEdit {
    /// Create a new empty edit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the comparator name.
    pub fn set_comparator(&mut self, name: impl Into<String>) {
        self.comparator = Some(name.into());
    }

    /// Set the log number.
    pub fn set_log_number(&mut self, num: u64) {
        self.log_number = Some(num);
    }

    /// Set the previous log number.
    pub fn set_prev_log_number(&mut self, num: u64) {
        self.prev_log_number = Some(num);
    }

    /// Set the next file number.
    pub fn set_next_file_number(&mut self, num: u64) {
        self.next_file_number = Some(num);
    }

    /// Set the last sequence number.
    pub fn set_last_sequence(&mut self, seq: u64) {
        self.last_sequence = Some(seq);
    }

    /// Set a compaction pointer.
    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.insert(level, key);
    }

    /// Record a file to delete.
    pub fn delete_file(&mut self, level: usize, file_number: u64) {
        self.deleted_files.insert((level, file_number));
    }

    /// Record a new file.
    pub fn add_file(&mut self, level: usize, file: FileMetadata) {
        self.new_files.push((level, file));
    }

    /// Record a new file with explicit attributes.
    pub fn add_file_info(
        &mut self,
        level: usize,
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) {
        self.new_files
            .push((level, FileMetadata::new(number, file_size, smallest, largest)));
    }

    /// Check if the edit records no changes.
    pub fn is_empty(&self) -> bool {
        self.comparator.is_none()
            && self.log_number.is_none()
            && self.prev_log_number.is_none()
            && self.next_file_number.is_none()
            && self.last_sequence.is_none()
            && self.compact_pointers.is_empty()
            && self.deleted_files.is_empty()
            && self.new_files.is_empty()
    }

    /// Encode the edit to its MANIFEST record form.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);

        if let Some(ref name) = self.comparator {
            encode_varint32(&mut buf, EditTag::Comparator.to_u32());
            encode_length_prefixed(&mut buf, name.as_bytes());
        }

        if let Some(num) = self.log_number {
            encode_varint32(&mut buf, EditTag::LogNumber.to_u32());
            encode_varint64(&mut buf, num);
        }

        if let Some(num) = self.prev_log_number {
            encode_varint32(&mut buf, EditTag::PrevLogNumber.to_u32());
            encode_varint64(&mut buf, num);
        }

        if let Some(num) = self.next_file_number {
            encode_varint32(&mut buf, EditTag::NextFileNumber.to_u32());
            encode_varint64(&mut buf, num);
        }

        if let Some(seq) = self.last_sequence {
            encode_varint32(&mut buf, EditTag::LastSequence.to_u32());
            encode_varint64(&mut buf, seq);
        }

        for (&level, key) in &self.compact_pointers {
            encode_varint32(&mut buf, EditTag::CompactPointer.to_u32());
            encode_varint32(&mut buf, level as u32);
            encode_length_prefixed(&mut buf, &key.encode());
        }

        for &(level, file_number) in &self.deleted_files {
            encode_varint32(&mut buf, EditTag::DeletedFile.to_u32());
            encode_varint32(&mut buf, level as u32);
            encode_varint64(&mut buf, file_number);
        }

        for (level, file) in &self.new_files {
            encode_varint32(&mut buf, EditTag::NewFile.to_u32());
            encode_varint32(&mut buf, *level as u32);
            encode_varint64(&mut buf, file.number());
            encode_varint64(&mut buf, file.file_size());
            encode_length_prefixed(&mut buf, &file.smallest().encode());
            encode_length_prefixed(&mut buf, &file.largest().encode());
        }

        buf.freeze()
    }

    /// Decode an edit from a MANIFEST record.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut cursor = data;

        while !cursor.is_empty() {
            let tag_value = decode_varint32(&mut cursor)
                .ok_or_else(|| Error::corruption("truncated edit tag"))?;
            let tag = EditTag::from_u32(tag_value)
                .ok_or_else(|| Error::corruption(format!("unknown edit tag: {}", tag_value)))?;

            match tag {
                EditTag::Comparator => {
                    let name = decode_length_prefixed(&mut cursor)
                        .ok_or_else(|| Error::corruption("truncated comparator name"))?;
                    edit.comparator = Some(
                        String::from_utf8(name.to_vec())
                            .map_err(|_| Error::corruption("invalid comparator name"))?,
                    );
                }
                EditTag::LogNumber => {
                    edit.log_number = Some(decode_number(&mut cursor, "log number")?);
                }
                EditTag::PrevLogNumber => {
                    edit.prev_log_number = Some(decode_number(&mut cursor, "prev log number")?);
                }
                EditTag::NextFileNumber => {
                    edit.next_file_number = Some(decode_number(&mut cursor, "next file number")?);
                }
                EditTag::LastSequence => {
                    edit.last_sequence = Some(decode_number(&mut cursor, "last sequence")?);
                }
                EditTag::CompactPointer => {
                    let level = decode_level(&mut cursor)?;
                    let key = decode_internal_key(&mut cursor, "compact pointer key")?;
                    edit.compact_pointers.insert(level, key);
                }
                EditTag::DeletedFile => {
                    let level = decode_level(&mut cursor)?;
                    let file_number = decode_number(&mut cursor, "deleted file number")?;
                    edit.deleted_files.insert((level, file_number));
                }
                EditTag::NewFile => {
                    let level = decode_level(&mut cursor)?;
                    let number = decode_number(&mut cursor, "new file number")?;
                    let file_size = decode_number(&mut cursor, "new file size")?;
                    let smallest = decode_internal_key(&mut cursor, "smallest key")?;
                    let largest = decode_internal_key(&mut cursor, "largest key")?;
                    edit.new_files
                        .push((level, FileMetadata::new(number, file_size, smallest, largest)));
                }
            }
        }

        Ok(edit)
    }
}

fn decode_number(cursor: &mut &[u8], what: &str) -> Result<u64> {
    decode_varint64(cursor).ok_or_else(|| Error::corruption(format!("truncated {}", what)))
}

fn decode_level(cursor: &mut &[u8]) -> Result<usize> {
    let level =
        decode_varint32(cursor).ok_or_else(|| Error::corruption("truncated level"))? as usize;
    if level >= NUM_LEVELS {
        return Err(Error::corruption(format!("level {} out of range", level)));
    }
    Ok(level)
}

fn decode_internal_key(cursor: &mut &[u8], what: &str) -> Result<InternalKey> {
    let bytes = decode_length_prefixed(cursor)
        .ok_or_else(|| Error::corruption(format!("truncated {}", what)))?;
    InternalKey::decode(&bytes).ok_or_else(|| Error::corruption(format!("invalid {}", what)))
}

impl PartialEq for VersionEdit {
    fn eq(&self, other: &Self) -> bool {
        fn file_key(entry: &(usize, FileMetadata)) -> (usize, u64) {
            (entry.0, entry.1.number())
        }
        fn sorted_files(files: &[(usize, FileMetadata)]) -> Vec<&(usize, FileMetadata)> {
            let mut sorted: Vec<_> = files.iter().collect();
            sorted.sort_by_key(|entry| file_key(entry));
            sorted
        }

        let files_equal = self.new_files.len() == other.new_files.len()
            && sorted_files(&self.new_files)
                .iter()
                .zip(sorted_files(&other.new_files))
                .all(|(a, b)| {
                    a.0 == b.0
                        && a.1.number() == b.1.number()
                        && a.1.file_size() == b.1.file_size()
                        && a.1.smallest() == b.1.smallest()
                        && a.1.largest() == b.1.largest()
                });

        self.comparator == other.comparator
            && self.log_number == other.log_number
            && self.prev_log_number == other.prev_log_number
            && self.next_file_number == other.next_file_number
            && self.last_sequence == other.last_sequence
            && self.compact_pointers == other.compact_pointers
            && self.deleted_files == other.deleted_files
            && files_equal
    }
}

impl Eq for VersionEdit {}
