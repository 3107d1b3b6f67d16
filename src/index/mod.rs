//! The sparse index: highest key in block → block number.
//!
//! Built by one full walk of the logical chain, so it is a cache over the
//! file, never a source of truth — discard and rebuild at will.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use log::warn;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::file::BssFile;

/// Ordered map from each active block's highest key to its block number.
///
/// Staleness hazard: structural mutations (a split, merge, or
/// redistribute) invalidate entries for the affected blocks, and nothing
/// updates this index incrementally. Rebuild with [`SparseIndex::build`]
/// after a batch of mutations before relying on lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseIndex {
    entries: BTreeMap<String, u32>,
}

impl SparseIndex {
    pub fn new() -> Self {
        SparseIndex::default()
    }

    /// Rebuild from the file by walking the chain from head to tail.
    ///
    /// A block whose successor points at itself is corruption: the walk
    /// warns and stops with what it has rather than looping. An iteration
    /// cap additionally guards against longer link cycles.
    pub fn build(&mut self, file: &mut BssFile) -> Result<()> {
        self.entries.clear();

        let mut rbn = match file.header().list_head {
            Some(n) => n,
            None => return Ok(()),
        };
        let cap = file.header().block_count;
        let mut visited: u32 = 0;

        loop {
            let block = file.read_block(rbn)?;
            if block.highest_key().is_empty() {
                warn!("block {rbn} holds no records, skipping index entry");
            } else {
                self.entries.insert(block.highest_key().to_string(), rbn);
            }

            match block.successor() {
                None => break,
                Some(n) if n == rbn => {
                    warn!("block {rbn} links to itself, aborting index build");
                    break;
                }
                Some(n) => rbn = n,
            }
            visited += 1;
            if visited > cap {
                warn!("index build stopped after {visited} blocks, link cycle suspected");
                break;
            }
        }
        Ok(())
    }

    /// Lower-bound lookup: the block whose highest key is the smallest
    /// one >= `key`. A key above every indexed key falls back to the
    /// highest block, matching the file's overflow-into-last convention.
    /// `NotFound` only when the index is empty.
    pub fn find_block(&self, key: &str) -> Result<u32> {
        if let Some((_, &rbn)) = self
            .entries
            .range::<str, _>((std::ops::Bound::Included(key), std::ops::Bound::Unbounded))
            .next()
        {
            return Ok(rbn);
        }
        match self.entries.iter().next_back() {
            Some((_, &rbn)) => Ok(rbn),
            None => Err(Error::NotFound),
        }
    }

    /// Persist to a side file.
    ///
    /// Format: entry count (u32), then per entry
    /// `[key_len(2B)][key][block_number(i32)]` in ascending key order.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (key, &rbn) in &self.entries {
            buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(&(rbn as i32).to_le_bytes());
        }

        let mut file = File::create(path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }

    /// Load a previously saved index. Round-trips exactly with [`save`].
    ///
    /// [`save`]: SparseIndex::save
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;

        if data.len() < 4 {
            return Err(Error::Corruption("index file too short".into()));
        }
        let count = u32::from_le_bytes(data[0..4].try_into().unwrap());

        let mut entries = BTreeMap::new();
        let mut pos = 4usize;
        for i in 0..count {
            if pos + 2 > data.len() {
                return Err(Error::Corruption(format!("index entry {i} truncated")));
            }
            let key_len = u16::from_le_bytes(data[pos..pos + 2].try_into().unwrap()) as usize;
            pos += 2;
            if pos + key_len + 4 > data.len() {
                return Err(Error::Corruption(format!("index entry {i} truncated")));
            }
            let key = String::from_utf8(data[pos..pos + key_len].to_vec())
                .map_err(|_| Error::Corruption(format!("index entry {i} key not UTF-8")))?;
            pos += key_len;
            let raw = i32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
            pos += 4;
            if raw < 0 {
                return Err(Error::Corruption(format!(
                    "index entry {i} has negative block number {raw}"
                )));
            }
            entries.insert(key, raw as u32);
        }

        Ok(SparseIndex { entries })
    }

    /// All entries in ascending key order, for diagnostics.
    pub fn entries(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
