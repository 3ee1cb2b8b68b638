//! MANIFEST log format: framed, checksummed records in 32KB blocks.
//!
//! Each record is one encoded VersionEdit, split into fragments that never
//! straddle a block boundary. A fragment carries a 7-byte header:
//! masked CRC32 (4) | length (2) | type (1).

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::util::crc::{crc32, mask_crc, unmask_crc};
use crate::{Error, Result};

/// Block size for the manifest log (32KB).
const BLOCK_SIZE: usize = 32 * 1024;

/// Header size: CRC (4) + Length (2) + Type (1) = 7 bytes.
const HEADER_SIZE: usize = 7;

/// Record types for log fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    /// Zero is reserved for the padding of pre-allocated files.
    Zero = 0,
    /// Complete record in a single fragment.
    Full = 1,
    /// First fragment of a record.
    First = 2,
    /// Middle fragment(s) of a record.
    Middle = 3,
    /// Last fragment of a record.
    Last = 4,
}

impl RecordType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Appender for the MANIFEST log.
pub struct LogWriter {
    writer: BufWriter<File>,
    /// Current position within the current block.
    block_offset: usize,
    /// File number of this manifest.
    file_number: u64,
    path: PathBuf,
}

impl LogWriter {
    /// Create a fresh log file, truncating anything in the way.
    pub fn create(path: &Path, file_number: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            writer: BufWriter::with_capacity(BLOCK_SIZE * 4, file),
            block_offset: 0,
            file_number,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing log file for appending (MANIFEST reuse).
    pub fn open_for_append(path: &Path, file_number: u64) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let file_size = file.metadata()?.len() as usize;
        let block_offset = file_size % BLOCK_SIZE;

        Ok(Self {
            writer: BufWriter::with_capacity(BLOCK_SIZE * 4, file),
            block_offset,
            file_number,
            path: path.to_path_buf(),
        })
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, fragmenting across blocks as needed.
    ///
    /// When `sync` is set, the data is fsync'd before returning; the
    /// record is durable once this call succeeds.
    pub fn add_record(&mut self, data: &[u8], sync: bool) -> Result<()> {
        let mut left = data.len();
        let mut ptr = 0;
        let mut begin = true;

        // A zero-length record still emits one header.
        while begin || left > 0 {
            let leftover = BLOCK_SIZE - self.block_offset;

            if leftover < HEADER_SIZE {
                // Not enough room for a header; pad out the block.
                if leftover > 0 {
                    self.writer.write_all(&vec![0u8; leftover])?;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = std::cmp::min(left, avail);
            let end = left == fragment_length;

            let record_type = if begin && end {
                RecordType::Full
            } else if begin {
                RecordType::First
            } else if end {
                RecordType::Last
            } else {
                RecordType::Middle
            };

            self.emit_physical_record(record_type, &data[ptr..ptr + fragment_length])?;

            ptr += fragment_length;
            left -= fragment_length;
            begin = false;
        }

        if sync {
            self.sync()?;
        } else {
            self.writer.flush()?;
        }

        Ok(())
    }

    /// Write a single fragment (header + payload).
    fn emit_physical_record(&mut self, record_type: RecordType, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= 0xFFFF);
        debug_assert!(self.block_offset + HEADER_SIZE + data.len() <= BLOCK_SIZE);

        let mut header = [0u8; HEADER_SIZE];

        // CRC covers the type byte and the payload, and is stored masked.
        let mut crc_data = Vec::with_capacity(1 + data.len());
        crc_data.push(record_type.to_byte());
        crc_data.extend_from_slice(data);
        let crc = mask_crc(crc32(&crc_data));

        header[0..4].copy_from_slice(&crc.to_le_bytes());
        header[4..6].copy_from_slice(&(data.len() as u16).to_le_bytes());
        header[6] = record_type.to_byte();

        self.writer.write_all(&header)?;
        self.writer.write_all(data)?;

        self.block_offset += HEADER_SIZE + data.len();
        Ok(())
    }

    /// Force buffered records to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Flush and sync, consuming the writer.
    pub fn close(mut self) -> Result<()> {
        self.sync()
    }
}

/// Reader that replays the MANIFEST log record by record.
pub struct LogReader {
    reader: BufReader<File>,
    buffer: Vec<u8>,
    buffer_offset: usize,
    buffer_size: usize,
    eof: bool,
    /// When set, a torn or corrupt tail is an error instead of a silent
    /// end-of-log. Recovery runs with this enabled.
    checksum_errors_are_fatal: bool,
}

impl LogReader {
    /// Open a log file for reading from the start.
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::open(path)?;

        Ok(Self {
            reader: BufReader::with_capacity(BLOCK_SIZE * 4, file),
            buffer: vec![0u8; BLOCK_SIZE],
            buffer_offset: 0,
            buffer_size: 0,
            eof: false,
            checksum_errors_are_fatal: true,
        })
    }

    /// Set whether checksum errors should be fatal.
    pub fn set_checksum_errors_fatal(&mut self, fatal: bool) {
        self.checksum_errors_are_fatal = fatal;
    }

    /// Read the next complete record.
    ///
    /// Returns `None` at the end of the log.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut scratch = Vec::new();
        let mut in_fragmented_record = false;

        loop {
            match self.read_physical_record()? {
                Some((record_type, data)) => match record_type {
                    RecordType::Full => {
                        if in_fragmented_record {
                            scratch.clear();
                        }
                        return Ok(Some(data));
                    }
                    RecordType::First => {
                        if in_fragmented_record {
                            scratch.clear();
                        }
                        scratch.extend_from_slice(&data);
                        in_fragmented_record = true;
                    }
                    RecordType::Middle => {
                        if !in_fragmented_record {
                            if self.checksum_errors_are_fatal {
                                return Err(Error::corruption(
                                    "unexpected middle record fragment",
                                ));
                            }
                            continue;
                        }
                        scratch.extend_from_slice(&data);
                    }
                    RecordType::Last => {
                        if !in_fragmented_record {
                            if self.checksum_errors_are_fatal {
                                return Err(Error::corruption("unexpected last record fragment"));
                            }
                            continue;
                        }
                        scratch.extend_from_slice(&data);
                        return Ok(Some(scratch));
                    }
                    RecordType::Zero => {
                        continue;
                    }
                },
                None => {
                    if in_fragmented_record {
                        scratch.clear();
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Read a single fragment from the current position.
    fn read_physical_record(&mut self) -> Result<Option<(RecordType, Vec<u8>)>> {
        loop {
            if self.buffer_offset + HEADER_SIZE > self.buffer_size {
                if !self.read_block()? {
                    return Ok(None);
                }
                continue;
            }

            let header = &self.buffer[self.buffer_offset..self.buffer_offset + HEADER_SIZE];

            let crc_expected = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let length = u16::from_le_bytes([header[4], header[5]]) as usize;
            let record_type_byte = header[6];

            // Block padding reads as type Zero with length 0; skip to the
            // next block rather than parsing zero-filled headers forever.
            if record_type_byte == RecordType::Zero.to_byte() && length == 0 {
                self.buffer_offset = self.buffer_size;
                continue;
            }

            let record_type = match RecordType::from_byte(record_type_byte) {
                Some(rt) => rt,
                None => {
                    if self.checksum_errors_are_fatal {
                        return Err(Error::corruption("invalid record type"));
                    }
                    self.buffer_offset = self.buffer_size;
                    continue;
                }
            };

            if self.buffer_offset + HEADER_SIZE + length > self.buffer_size {
                if self.eof {
                    // A record torn by a crash mid-write.
                    return Ok(None);
                }
                if self.checksum_errors_are_fatal {
                    return Err(Error::corruption("record extends beyond block"));
                }
                self.buffer_offset = self.buffer_size;
                continue;
            }

            let data_start = self.buffer_offset + HEADER_SIZE;
            let data_end = data_start + length;
            let data = &self.buffer[data_start..data_end];

            let mut crc_data = Vec::with_capacity(1 + length);
            crc_data.push(record_type_byte);
            crc_data.extend_from_slice(data);

            if crc32(&crc_data) != unmask_crc(crc_expected) {
                if self.checksum_errors_are_fatal {
                    return Err(Error::corruption("record checksum mismatch"));
                }
                self.buffer_offset = self.buffer_size;
                continue;
            }

            self.buffer_offset = data_end;

            return Ok(Some((record_type, data.to_vec())));
        }
    }

    /// Read the next block into the buffer.
    fn read_block(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        self.buffer_offset = 0;
        let mut bytes_read = 0;
        while bytes_read < BLOCK_SIZE {
            let n = self.reader.read(&mut self.buffer[bytes_read..])?;
            if n == 0 {
                self.eof = true;
                break;
            }
            bytes_read += n;
        }

        self.buffer_size = bytes_read;
        Ok(bytes_read > 0)
    }
}
