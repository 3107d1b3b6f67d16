//! The fixed-size block: unit of disk I/O for the sequence set.
//!
//! On-disk layout of a block slot (repeats every `block_size` bytes):
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Record count (u32)                          │
//! │ Successor block number (i32, -1 = none)     │
//! │ Predecessor block number (i32, -1 = none)   │
//! │ Type tag (1B: 'A' active / 'V' avail / 'H') │
//! ├─────────────────────────────────────────────┤
//! │ Entry 0: [len(2B)][encoded record]          │
//! │ Entry 1: ...                                │
//! ├─────────────────────────────────────────────┤
//! │ Padding to block_size (zero; blank in avail)│
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Entries sit in insertion order — only the chain of blocks is globally
//! key-ordered, not the record area within one block.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};
use crate::record::ZipRecord;

/// Serialized size of the block header: count + two links + type tag.
pub const BLOCK_HEADER_SIZE: usize = 4 + 4 + 4 + 1;

/// Fill byte for the content area of avail blocks. Not zero, so freed
/// blocks stand out in a raw hex dump.
pub const AVAIL_FILL: u8 = b' ';

/// What role a block slot currently plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// Holds live records and participates in the logical chain.
    Active,
    /// Freed slot awaiting reuse, linked only into the avail list.
    Avail,
    /// Slot 0, occupied by the file header.
    Header,
}

impl BlockType {
    fn as_u8(self) -> u8 {
        match self {
            BlockType::Active => b'A',
            BlockType::Avail => b'V',
            BlockType::Header => b'H',
        }
    }

    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            b'A' => Ok(BlockType::Active),
            b'V' => Ok(BlockType::Avail),
            b'H' => Ok(BlockType::Header),
            _ => Err(Error::Corruption(format!("invalid block type tag: {byte:#04x}"))),
        }
    }
}

/// Encode an optional block link as the on-disk signed form.
pub(crate) fn encode_link(link: Option<u32>) -> i32 {
    match link {
        Some(n) => n as i32,
        None => -1,
    }
}

/// Decode the on-disk signed link form. Anything below -1 is corruption.
pub(crate) fn decode_link(raw: i32) -> Result<Option<u32>> {
    match raw {
        -1 => Ok(None),
        n if n >= 0 => Ok(Some(n as u32)),
        n => Err(Error::Corruption(format!("invalid block link: {n}"))),
    }
}

/// A transient in-memory block buffer.
///
/// The file manager reads one into scope, mutates it, writes it back;
/// no block outlives a single operation.
#[derive(Debug, Clone)]
pub struct Block {
    block_size: usize,
    /// Packed record area: repeated [len(u16)][bytes] entries.
    data: Vec<u8>,
    record_count: u32,
    successor: Option<u32>,
    predecessor: Option<u32>,
    block_type: BlockType,
    /// Highest primary key currently in the block. Derived, never
    /// persisted — recomputed on every read. Empty when no records.
    highest_key: String,
}

impl Block {
    /// Create an empty Active block for the given slot size.
    pub fn new(block_size: usize) -> Self {
        Block {
            block_size,
            data: Vec::new(),
            record_count: 0,
            successor: None,
            predecessor: None,
            block_type: BlockType::Active,
            highest_key: String::new(),
        }
    }

    /// Reset to an empty Active block: no records, no links.
    pub fn clear(&mut self) {
        self.data.clear();
        self.record_count = 0;
        self.successor = None;
        self.predecessor = None;
        self.block_type = BlockType::Active;
        self.highest_key.clear();
    }

    /// Convert this block into an avail-list member.
    ///
    /// Drops all content, chains onto the avail list through the
    /// successor link only; the predecessor link is unused.
    pub fn make_avail(&mut self, next_avail: Option<u32>) {
        self.clear();
        self.block_type = BlockType::Avail;
        self.successor = next_avail;
    }

    /// Try to append a record. Returns `false` without changing anything
    /// if the length-prefixed entry would push the slot past `block_size`.
    pub fn try_add(&mut self, record: &ZipRecord) -> bool {
        let encoded = record.encode();
        if BLOCK_HEADER_SIZE + self.data.len() + 2 + encoded.len() > self.block_size {
            return false;
        }

        self.data.extend_from_slice(&(encoded.len() as u16).to_le_bytes());
        self.data.extend_from_slice(&encoded);
        self.record_count += 1;

        if record.key() > self.highest_key.as_str() {
            self.highest_key = record.key().to_string();
        }
        true
    }

    /// Read the slot at `block_number` and reconstruct the block.
    ///
    /// Recomputes the highest key by decoding every contained record — an
    /// O(records-in-block) scan, fine because blocks are small and read
    /// one at a time. Short reads and record areas that overrun the slot
    /// surface as errors.
    pub fn read_from<R: Read + Seek>(
        storage: &mut R,
        block_number: u32,
        block_size: usize,
    ) -> Result<Self> {
        storage.seek(SeekFrom::Start(block_number as u64 * block_size as u64))?;
        let mut buf = vec![0u8; block_size];
        storage.read_exact(&mut buf)?;

        let record_count = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let successor = decode_link(i32::from_le_bytes(buf[4..8].try_into().unwrap()))?;
        let predecessor = decode_link(i32::from_le_bytes(buf[8..12].try_into().unwrap()))?;
        let block_type = BlockType::from_u8(buf[12])?;

        let mut block = Block {
            block_size,
            data: Vec::new(),
            record_count,
            successor,
            predecessor,
            block_type,
            highest_key: String::new(),
        };

        // Walk the record area to find its packed extent and the highest key.
        let mut pos = BLOCK_HEADER_SIZE;
        for i in 0..record_count {
            if pos + 2 > block_size {
                return Err(Error::Corruption(format!(
                    "block {block_number}: record {i} length prefix overruns slot"
                )));
            }
            let len = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap()) as usize;
            pos += 2;
            if pos + len > block_size {
                return Err(Error::Corruption(format!(
                    "block {block_number}: record {i} data overruns slot"
                )));
            }
            let record = ZipRecord::decode(&buf[pos..pos + len]).map_err(|e| {
                Error::Corruption(format!("block {block_number}: undecodable record {i}: {e}"))
            })?;
            if record.key() > block.highest_key.as_str() {
                block.highest_key = record.key().to_string();
            }
            pos += len;
        }
        block.data = buf[BLOCK_HEADER_SIZE..pos].to_vec();

        Ok(block)
    }

    /// Write the full `block_size`-byte slot at `block_number`.
    ///
    /// Always writes the whole slot, unused tail included, so every block
    /// occupies a constant-size region regardless of fill level.
    pub fn write_to<W: Write + Seek>(&self, storage: &mut W, block_number: u32) -> Result<()> {
        let mut buf = vec![0u8; self.block_size];
        buf[0..4].copy_from_slice(&self.record_count.to_le_bytes());
        buf[4..8].copy_from_slice(&encode_link(self.successor).to_le_bytes());
        buf[8..12].copy_from_slice(&encode_link(self.predecessor).to_le_bytes());
        buf[12] = self.block_type.as_u8();

        if self.block_type == BlockType::Avail {
            for b in &mut buf[BLOCK_HEADER_SIZE..] {
                *b = AVAIL_FILL;
            }
        } else {
            buf[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + self.data.len()]
                .copy_from_slice(&self.data);
        }

        storage.seek(SeekFrom::Start(block_number as u64 * self.block_size as u64))?;
        storage.write_all(&buf)?;
        Ok(())
    }

    /// Decode every contained record in storage order.
    pub fn records(&self) -> Result<Vec<ZipRecord>> {
        let mut records = Vec::with_capacity(self.record_count as usize);
        let mut pos = 0usize;
        while pos < self.data.len() {
            let len = u16::from_le_bytes(self.data[pos..pos + 2].try_into().unwrap()) as usize;
            pos += 2;
            records.push(ZipRecord::decode(&self.data[pos..pos + len])?);
            pos += len;
        }
        Ok(records)
    }

    /// Bytes of packed record data (length prefixes included), excluding
    /// the block header. The byte-occupancy figure underflow checks use.
    pub fn payload_bytes(&self) -> usize {
        self.data.len()
    }

    /// Total serialized bytes currently used in the slot.
    pub fn used_bytes(&self) -> usize {
        BLOCK_HEADER_SIZE + self.data.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    pub fn successor(&self) -> Option<u32> {
        self.successor
    }

    pub fn predecessor(&self) -> Option<u32> {
        self.predecessor
    }

    pub fn set_successor(&mut self, link: Option<u32>) {
        self.successor = link;
    }

    pub fn set_predecessor(&mut self, link: Option<u32>) {
        self.predecessor = link;
    }

    /// Highest primary key in the block; empty if the block has none.
    pub fn highest_key(&self) -> &str {
        &self.highest_key
    }
}
