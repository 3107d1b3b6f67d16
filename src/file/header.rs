//! The file-level header occupying slot 0.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::block::{decode_link, encode_link};
use crate::error::{Error, Result};

/// Magic number identifying a blocked-sequence-set file.
pub const BSS_MAGIC: u64 = 0x4253535F46494C45; // "BSS_FILE"

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Default block slot size in bytes.
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Default minimum block occupancy, percent of the usable record area.
pub const DEFAULT_MIN_CAPACITY_PCT: u32 = 50;

/// The master header for the whole file.
///
/// Serialized at offset 0 inside slot 0 (padded to one block), and written
/// back after every structural mutation so the file stays self-describing
/// between operations.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Magic (8B)                           │
/// │ Version (4B)                         │
/// │ Header size (4B)                     │
/// │ Block size (4B)                      │
/// │ Min capacity percent (4B)            │
/// │ Record count (4B)                    │
/// │ Block count (4B)                     │
/// │ List head block number (i32)         │
/// │ Avail head block number (i32)        │
/// │ CRC32 of all preceding bytes (4B)    │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub block_size: u32,
    pub min_capacity_pct: u32,
    /// Total logical records across all active blocks.
    pub record_count: u32,
    /// Total allocated slots, header slot included (active + avail).
    pub block_count: u32,
    /// First block of the logical chain; `None` for an empty file.
    pub list_head: Option<u32>,
    /// Head of the avail free-list; `None` when no freed slots exist.
    pub avail_head: Option<u32>,
}

impl FileHeader {
    /// Serialized size in bytes (fixed).
    pub const SIZE: usize = 8 + 4 * 6 + 4 * 2 + 4; // 44 bytes

    /// Fresh header for a new file: slot 0 reserved, chain and avail empty.
    pub fn new(block_size: u32, min_capacity_pct: u32) -> Self {
        FileHeader {
            block_size,
            min_capacity_pct,
            record_count: 0,
            block_count: 1,
            list_head: None,
            avail_head: None,
        }
    }

    /// Encode to bytes, CRC appended last.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&BSS_MAGIC.to_le_bytes());
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&(Self::SIZE as u32).to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.min_capacity_pct.to_le_bytes());
        buf.extend_from_slice(&self.record_count.to_le_bytes());
        buf.extend_from_slice(&self.block_count.to_le_bytes());
        buf.extend_from_slice(&encode_link(self.list_head).to_le_bytes());
        buf.extend_from_slice(&encode_link(self.avail_head).to_le_bytes());

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode from bytes, verifying magic and CRC.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("file header too short".into()));
        }

        let stored_crc = u32::from_le_bytes(data[Self::SIZE - 4..Self::SIZE].try_into().unwrap());
        let computed_crc = crc32fast::hash(&data[..Self::SIZE - 4]);
        if stored_crc != computed_crc {
            return Err(Error::Corruption("file header CRC mismatch".into()));
        }

        let magic = u64::from_le_bytes(data[0..8].try_into().unwrap());
        if magic != BSS_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {BSS_MAGIC:#x}, got {magic:#x}"
            )));
        }

        let version = u32::from_le_bytes(data[8..12].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(Error::Corruption(format!("unsupported version: {version}")));
        }

        let header_size = u32::from_le_bytes(data[12..16].try_into().unwrap());
        if header_size != Self::SIZE as u32 {
            return Err(Error::Corruption(format!(
                "unexpected header size: {header_size}"
            )));
        }

        let block_size = u32::from_le_bytes(data[16..20].try_into().unwrap());
        let min_capacity_pct = u32::from_le_bytes(data[20..24].try_into().unwrap());
        let record_count = u32::from_le_bytes(data[24..28].try_into().unwrap());
        let block_count = u32::from_le_bytes(data[28..32].try_into().unwrap());
        let list_head = decode_link(i32::from_le_bytes(data[32..36].try_into().unwrap()))?;
        let avail_head = decode_link(i32::from_le_bytes(data[36..40].try_into().unwrap()))?;

        if (block_size as usize) < Self::SIZE {
            return Err(Error::Corruption(format!(
                "block size {block_size} cannot hold the file header"
            )));
        }
        if min_capacity_pct > 100 {
            return Err(Error::Corruption(format!(
                "minimum capacity {min_capacity_pct}% out of range"
            )));
        }
        if block_count == 0 {
            return Err(Error::Corruption("block count must reserve slot 0".into()));
        }

        Ok(FileHeader {
            block_size,
            min_capacity_pct,
            record_count,
            block_count,
            list_head,
            avail_head,
        })
    }

    /// Write the header at offset 0.
    pub fn write_to<W: Write + Seek>(&self, storage: &mut W) -> Result<()> {
        storage.seek(SeekFrom::Start(0))?;
        storage.write_all(&self.encode())?;
        Ok(())
    }

    /// Read and validate the header from offset 0.
    pub fn read_from<R: Read + Seek>(storage: &mut R) -> Result<Self> {
        storage.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; Self::SIZE];
        storage.read_exact(&mut buf)?;
        Self::decode(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut header = FileHeader::new(512, 50);
        header.record_count = 1234;
        header.block_count = 17;
        header.list_head = Some(1);
        header.avail_head = Some(9);

        let encoded = header.encode();
        assert_eq!(encoded.len(), FileHeader::SIZE);
        assert_eq!(FileHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn header_crc_detects_flipped_byte() {
        let mut encoded = FileHeader::new(512, 50).encode();
        encoded[24] ^= 0xFF; // corrupt record count
        assert!(FileHeader::decode(&encoded).is_err());
    }

    #[test]
    fn header_bad_magic() {
        let mut encoded = FileHeader::new(512, 50).encode();
        encoded[0] = 0x00;
        // Fix the CRC so the magic check itself fires.
        let crc = crc32fast::hash(&encoded[..FileHeader::SIZE - 4]);
        encoded[FileHeader::SIZE - 4..].copy_from_slice(&crc.to_le_bytes());
        let err = FileHeader::decode(&encoded).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn header_rejects_undersized_block() {
        let mut header = FileHeader::new(512, 50);
        header.block_size = 16;
        let mut encoded = header.encode();
        let crc = crc32fast::hash(&encoded[..FileHeader::SIZE - 4]);
        encoded[FileHeader::SIZE - 4..].copy_from_slice(&crc.to_le_bytes());
        assert!(FileHeader::decode(&encoded).is_err());
    }

    #[test]
    fn header_too_short() {
        assert!(FileHeader::decode(&[0u8; 10]).is_err());
    }
}
