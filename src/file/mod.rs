//! The file manager: owns the open handle and the file header, and
//! orchestrates every structural operation on the sequence set.

pub mod header;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use log::{debug, info, warn};

use crate::block::{Block, BlockType, BLOCK_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::record::ZipRecord;

pub use header::{FileHeader, DEFAULT_BLOCK_SIZE, DEFAULT_MIN_CAPACITY_PCT};

/// Counters from a bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Records accepted into the file.
    pub loaded: u32,
    /// Malformed source records skipped during ingestion.
    pub skipped: u32,
}

/// Diagnostic summary of one block slot, as produced by the dump walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub block_number: u32,
    pub block_type: BlockType,
    pub record_count: u32,
    pub predecessor: Option<u32>,
    pub successor: Option<u32>,
    pub highest_key: String,
}

/// An open blocked-sequence-set file.
///
/// Exclusively owns the handle and the single in-memory copy of the file
/// header. Single-threaded by design: one in-process caller drives it at a
/// time, and every structural mutation persists the header synchronously
/// before returning. There is no journal — a failure between two block
/// writes of a split/merge leaves the file partially updated.
#[derive(Debug)]
pub struct BssFile {
    file: File,
    header: FileHeader,
}

impl BssFile {
    /// Create a new file at `path` and bulk-load `records` into it,
    /// using the default 512-byte block size.
    pub fn create<P, I>(path: P, records: I) -> Result<Self>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = ZipRecord>,
    {
        Self::create_with_block_size(path, DEFAULT_BLOCK_SIZE, records)
    }

    /// Create a new file with an explicit block size.
    ///
    /// Drains and sorts the source by primary key, then packs records
    /// greedily: fill the current block until one doesn't fit, finalize
    /// its links, start the next. Zero input records produce a valid
    /// empty file (no chain head). A record too large for an empty block
    /// is a hard error.
    pub fn create_with_block_size<P, I>(path: P, block_size: u32, records: I) -> Result<Self>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = ZipRecord>,
    {
        if (block_size as usize) < FileHeader::SIZE
            || (block_size as usize) <= BLOCK_HEADER_SIZE + 2
        {
            return Err(Error::Corruption(format!(
                "block size {block_size} too small to hold any record"
            )));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        // Reserve slot 0 in full so block offsets are stable from the start.
        file.write_all(&vec![0u8; block_size as usize])?;

        let mut header = FileHeader::new(block_size, DEFAULT_MIN_CAPACITY_PCT);
        header.write_to(&mut file)?;

        let mut sorted: Vec<ZipRecord> = records.into_iter().collect();
        sorted.sort_by(|a, b| a.zip.cmp(&b.zip));

        let bs = block_size as usize;
        let mut current: u32 = 1;
        let mut prev: Option<u32> = None;
        let mut block = Block::new(bs);

        for rec in &sorted {
            if block.try_add(rec) {
                continue;
            }
            if block.is_empty() {
                return Err(record_too_large(rec, bs));
            }

            block.set_predecessor(prev);
            block.set_successor(Some(current + 1));
            block.write_to(&mut file, current)?;
            if prev.is_none() {
                header.list_head = Some(current);
            }
            prev = Some(current);
            current += 1;

            block.clear();
            if !block.try_add(rec) {
                return Err(record_too_large(rec, bs));
            }
        }

        if !block.is_empty() {
            block.set_predecessor(prev);
            block.set_successor(None);
            block.write_to(&mut file, current)?;
            if prev.is_none() {
                header.list_head = Some(current);
            }
            header.block_count = current + 1;
        } else {
            // Zero input records: only slot 0 exists.
            header.block_count = current;
        }

        header.record_count = sorted.len() as u32;
        header.write_to(&mut file)?;
        file.sync_all()?;

        info!(
            "created file: {} records in {} blocks (block size {})",
            header.record_count,
            header.block_count - 1,
            block_size
        );
        Ok(BssFile { file, header })
    }

    /// Create a new file from a length-prefixed flat (.dat) file,
    /// reporting how many source records loaded and how many were
    /// skipped as undecodable.
    pub fn create_from_dat<P, Q>(path: P, dat_path: Q) -> Result<(Self, LoadStats)>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let (records, skipped) = crate::ingest::read_dat(dat_path)?;
        let loaded = records.len() as u32;
        let file = Self::create(path, records)?;
        Ok((file, LoadStats { loaded, skipped }))
    }

    /// Open an existing file, reading and validating its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let header = FileHeader::read_from(&mut file)?;
        debug!(
            "opened file: block size {}, {} records, {} blocks, head {:?}",
            header.block_size, header.record_count, header.block_count, header.list_head
        );
        Ok(BssFile { file, header })
    }

    /// The in-memory copy of the file header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn block_size(&self) -> usize {
        self.header.block_size as usize
    }

    /// Read the block at `block_number`. The caller is responsible for
    /// the slot being a real block (slot 0 holds the file header).
    pub fn read_block(&mut self, block_number: u32) -> Result<Block> {
        let block_size = self.block_size();
        Block::read_from(&mut self.file, block_number, block_size)
    }

    /// Write `block` at `block_number`.
    pub fn write_block(&mut self, block_number: u32, block: &Block) -> Result<()> {
        block.write_to(&mut self.file, block_number)
    }

    /// Flush all pending writes to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Sequentially walk the chain for the block a key belongs in: the
    /// first block whose highest key is >= `key`, or the last block when
    /// the key exceeds every existing key.
    ///
    /// Mutation paths always re-derive position with this walk instead of
    /// consulting the sparse index, so they see the latest links. Errors
    /// with `NotFound` on an empty file; self-links and link cycles are
    /// corruption.
    pub fn find_insertion_block(&mut self, key: &str) -> Result<u32> {
        let mut rbn = self.header.list_head.ok_or(Error::NotFound)?;
        let mut visited: u32 = 0;

        loop {
            let block = self.read_block(rbn)?;
            let next = block.successor();
            if next == Some(rbn) {
                return Err(Error::Corruption(format!("block {rbn} links to itself")));
            }
            match next {
                None => return Ok(rbn),
                Some(_) if key <= block.highest_key() => return Ok(rbn),
                Some(n) => rbn = n,
            }
            visited += 1;
            if visited > self.header.block_count {
                return Err(Error::Corruption("link cycle in sequence set".into()));
            }
        }
    }

    /// Insert one record, splitting the target block on overflow.
    pub fn insert(&mut self, record: &ZipRecord) -> Result<()> {
        let target = self.find_insertion_block(record.key())?;
        let mut block = self.read_block(target)?;

        if block.try_add(record) {
            self.write_block(target, &block)?;
            self.header.record_count += 1;
            self.header.write_to(&mut self.file)?;
            debug!("inserted {} into block {target}", record.key());
            return Ok(());
        }

        self.split_block(target, record)
    }

    /// Delete the record with `key`, merging or redistributing with a
    /// neighbor if the owning block falls below minimum occupancy.
    ///
    /// Underflow is judged by byte occupancy: the block's packed payload
    /// must keep at least `min_capacity_pct` percent of the usable area.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        let target = self.find_insertion_block(key)?;
        let block = self.read_block(target)?;

        let mut records = block.records()?;
        let pos = records
            .iter()
            .position(|r| r.key() == key)
            .ok_or(Error::NotFound)?;
        records.remove(pos);

        let mut shrunk = Block::new(self.block_size());
        for rec in &records {
            // A subset of what already fit must fit again.
            if !shrunk.try_add(rec) {
                return Err(Error::Corruption(format!(
                    "block {target}: surviving records no longer fit"
                )));
            }
        }
        shrunk.set_predecessor(block.predecessor());
        shrunk.set_successor(block.successor());

        if shrunk.payload_bytes() >= self.min_payload_bytes() {
            self.write_block(target, &shrunk)?;
            self.header.record_count -= 1;
            self.header.write_to(&mut self.file)?;
            debug!("deleted {key} from block {target} (no underflow)");
            return Ok(());
        }

        // Underflow. Prefer the successor as the partner, else the
        // predecessor; a lone block just shrinks in place.
        let adjacent = match shrunk.successor().or(shrunk.predecessor()) {
            Some(n) => n,
            None => {
                self.write_block(target, &shrunk)?;
                self.header.record_count -= 1;
                self.header.write_to(&mut self.file)?;
                debug!("deleted {key} from the only block {target}, left under minimum");
                return Ok(());
            }
        };
        let adjacent_block = self.read_block(adjacent)?;

        // Chain order decides who absorbs: the earlier block survives.
        let (left, left_block, right, right_block) = if shrunk.successor() == Some(adjacent) {
            (target, shrunk, adjacent, adjacent_block)
        } else {
            (adjacent, adjacent_block, target, shrunk)
        };

        let combined = BLOCK_HEADER_SIZE + left_block.payload_bytes() + right_block.payload_bytes();
        if combined <= self.block_size() {
            self.merge_blocks(left, &left_block, right, &right_block)?;
        } else {
            self.redistribute_blocks(left, &left_block, right, &right_block)?;
        }

        self.header.record_count -= 1;
        self.header.write_to(&mut self.file)?;
        debug!("deleted {key} from block {target} (underflow handled)");
        Ok(())
    }

    /// Split a full block to admit one more record.
    ///
    /// Unpacks the block, adds the record, sorts, and splits at the
    /// midpoint: the lower half stays in place (so a chain head keeps its
    /// block number), the upper half moves to a freshly acquired slot
    /// spliced in as the successor.
    fn split_block(&mut self, full_rbn: u32, record: &ZipRecord) -> Result<()> {
        let full = self.read_block(full_rbn)?;
        let mut records = full.records()?;
        records.push(record.clone());
        records.sort_by(|a, b| a.zip.cmp(&b.zip));

        let mid = records.len() / 2;
        let bs = self.block_size();

        let mut lower = Block::new(bs);
        for rec in &records[..mid] {
            if !lower.try_add(rec) {
                return Err(record_too_large(rec, bs));
            }
        }
        let mut upper = Block::new(bs);
        for rec in &records[mid..] {
            if !upper.try_add(rec) {
                return Err(record_too_large(rec, bs));
            }
        }

        let new_rbn = self.get_avail_block()?;

        lower.set_predecessor(full.predecessor());
        lower.set_successor(Some(new_rbn));
        upper.set_predecessor(Some(full_rbn));
        upper.set_successor(full.successor());

        self.write_block(full_rbn, &lower)?;
        self.write_block(new_rbn, &upper)?;

        // The old successor (if any) must point back at the new block.
        if let Some(next) = upper.successor() {
            let mut next_block = self.read_block(next)?;
            next_block.set_predecessor(Some(new_rbn));
            self.write_block(next, &next_block)?;
        }
        // The old predecessor already points at full_rbn, which still
        // holds the lower half — the chain head never moves on a split.

        self.header.record_count += 1;
        self.header.write_to(&mut self.file)?;

        info!(
            "split block {full_rbn}: {} records stay (highest {}), {} move to block {new_rbn} (highest {})",
            lower.record_count(),
            lower.highest_key(),
            upper.record_count(),
            upper.highest_key()
        );
        Ok(())
    }

    /// Merge two chain-adjacent blocks into the left one and free the right.
    fn merge_blocks(
        &mut self,
        left: u32,
        left_block: &Block,
        right: u32,
        right_block: &Block,
    ) -> Result<()> {
        let mut records = left_block.records()?;
        records.extend(right_block.records()?);
        records.sort_by(|a, b| a.zip.cmp(&b.zip));

        let mut merged = Block::new(self.block_size());
        for rec in &records {
            if !merged.try_add(rec) {
                return Err(Error::Corruption(format!(
                    "merge of blocks {left} and {right} overflowed; sizing check lied"
                )));
            }
        }
        merged.set_predecessor(left_block.predecessor());
        merged.set_successor(right_block.successor());

        self.write_block(left, &merged)?;

        if let Some(next) = merged.successor() {
            let mut next_block = self.read_block(next)?;
            next_block.set_predecessor(Some(left));
            self.write_block(next, &next_block)?;
        }

        self.add_to_avail_list(right)?;

        info!(
            "merged blocks {left} and {right} into {left}: {} records (highest {})",
            merged.record_count(),
            merged.highest_key()
        );
        Ok(())
    }

    /// Rebalance two chain-adjacent blocks without changing topology:
    /// combined records split evenly, lower half left, upper half right.
    fn redistribute_blocks(
        &mut self,
        left: u32,
        left_block: &Block,
        right: u32,
        right_block: &Block,
    ) -> Result<()> {
        let mut records = left_block.records()?;
        records.extend(right_block.records()?);
        records.sort_by(|a, b| a.zip.cmp(&b.zip));

        let mid = records.len() / 2;
        let bs = self.block_size();

        let mut new_left = Block::new(bs);
        for rec in &records[..mid] {
            if !new_left.try_add(rec) {
                return Err(record_too_large(rec, bs));
            }
        }
        let mut new_right = Block::new(bs);
        for rec in &records[mid..] {
            if !new_right.try_add(rec) {
                return Err(record_too_large(rec, bs));
            }
        }

        new_left.set_predecessor(left_block.predecessor());
        new_left.set_successor(left_block.successor());
        new_right.set_predecessor(right_block.predecessor());
        new_right.set_successor(right_block.successor());

        self.write_block(left, &new_left)?;
        self.write_block(right, &new_right)?;

        info!(
            "redistributed blocks {left} and {right}: {} / {} records",
            new_left.record_count(),
            new_right.record_count()
        );
        Ok(())
    }

    /// Acquire a block slot: pop the avail list head if one exists, else
    /// allocate a fresh slot past the high-water mark. Persists the
    /// header either way.
    fn get_avail_block(&mut self) -> Result<u32> {
        if let Some(rbn) = self.header.avail_head {
            let avail = self.read_block(rbn)?;
            if avail.block_type() != BlockType::Avail {
                return Err(Error::Corruption(format!(
                    "avail list head {rbn} is not an avail block"
                )));
            }
            self.header.avail_head = avail.successor();
            self.header.write_to(&mut self.file)?;
            info!("reusing block {rbn} from the avail list");
            return Ok(rbn);
        }

        let new_rbn = self.header.block_count;
        self.header.block_count += 1;
        self.header.write_to(&mut self.file)?;
        debug!("allocated fresh block {new_rbn}");
        Ok(new_rbn)
    }

    /// Push a block onto the avail free-list. Its content area is blanked
    /// and it chains through the successor link only.
    fn add_to_avail_list(&mut self, rbn: u32) -> Result<()> {
        let mut block = Block::new(self.block_size());
        block.make_avail(self.header.avail_head);
        self.write_block(rbn, &block)?;
        self.header.avail_head = Some(rbn);
        self.header.write_to(&mut self.file)?;
        info!("block {rbn} added to the avail list");
        Ok(())
    }

    /// Minimum packed payload (bytes) an active block must keep.
    ///
    /// A heuristic threshold over actual byte occupancy, not a record
    /// count over an assumed average record size.
    fn min_payload_bytes(&self) -> usize {
        let usable = self.block_size() - BLOCK_HEADER_SIZE;
        usable * self.header.min_capacity_pct as usize / 100
    }

    /// Summaries of every allocated slot in physical order. Slot 0 is the
    /// file header and reported as such.
    pub fn dump_physical(&mut self) -> Result<Vec<BlockSummary>> {
        let mut out = Vec::with_capacity(self.header.block_count as usize);
        out.push(BlockSummary {
            block_number: 0,
            block_type: BlockType::Header,
            record_count: 0,
            predecessor: None,
            successor: None,
            highest_key: String::new(),
        });
        for rbn in 1..self.header.block_count {
            let block = self.read_block(rbn)?;
            out.push(summarize(rbn, &block));
        }
        Ok(out)
    }

    /// Summaries of the active chain in logical (key) order.
    pub fn dump_logical(&mut self) -> Result<Vec<BlockSummary>> {
        let mut out = Vec::new();
        let mut rbn = match self.header.list_head {
            Some(n) => n,
            None => return Ok(out),
        };
        let mut visited: u32 = 0;

        loop {
            let block = self.read_block(rbn)?;
            out.push(summarize(rbn, &block));
            match block.successor() {
                None => break,
                Some(n) if n == rbn => {
                    warn!("block {rbn} links to itself, stopping logical dump");
                    return Err(Error::Corruption(format!("block {rbn} links to itself")));
                }
                Some(n) => rbn = n,
            }
            visited += 1;
            if visited > self.header.block_count {
                return Err(Error::Corruption("link cycle in sequence set".into()));
            }
        }
        Ok(out)
    }
}

fn summarize(block_number: u32, block: &Block) -> BlockSummary {
    BlockSummary {
        block_number,
        block_type: block.block_type(),
        record_count: block.record_count(),
        predecessor: block.predecessor(),
        successor: block.successor(),
        highest_key: block.highest_key().to_string(),
    }
}

fn record_too_large(record: &ZipRecord, block_size: usize) -> Error {
    Error::Corruption(format!(
        "record {} ({} bytes encoded) cannot fit a {block_size}-byte block",
        record.key(),
        record.encoded_len()
    ))
}
