// Block slot tests: capacity discipline, disk round-trips, avail fill.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};

use bss_engine::block::{Block, BlockType, AVAIL_FILL, BLOCK_HEADER_SIZE};
use bss_engine::record::ZipRecord;
use tempfile::tempdir;

fn rec(zip: &str) -> ZipRecord {
    ZipRecord::new(zip, "Town", "MN", "County", 45.0, -93.0)
}

// Each test record encodes to "NNNNN,Town,MN,County,45,-93" = 27 bytes,
// 29 with the length prefix.
const ENTRY_SIZE: usize = 29;

#[test]
fn fill_until_reject_then_read_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blocks.bin");
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)
        .unwrap();

    let block_size = 256;
    let mut block = Block::new(block_size);
    let mut accepted = Vec::new();
    for i in 0.. {
        let r = rec(&format!("{:05}", 10000 + i));
        if !block.try_add(&r) {
            break;
        }
        accepted.push(r);
    }

    // The serialized size never exceeds the slot.
    assert!(block.used_bytes() <= block_size);
    assert_eq!(
        accepted.len(),
        (block_size - BLOCK_HEADER_SIZE) / ENTRY_SIZE,
        "should accept exactly as many records as fit"
    );

    block.set_successor(Some(2));
    block.set_predecessor(None);
    block.write_to(&mut file, 1).unwrap();

    let read_back = Block::read_from(&mut file, 1, block_size).unwrap();
    assert_eq!(read_back.records().unwrap(), accepted);
    assert_eq!(read_back.record_count() as usize, accepted.len());
    assert_eq!(read_back.successor(), Some(2));
    assert_eq!(read_back.predecessor(), None);
    assert_eq!(read_back.block_type(), BlockType::Active);
    assert_eq!(
        read_back.highest_key(),
        accepted.last().unwrap().key(),
        "highest key recomputed on read"
    );
}

#[test]
fn whole_slot_written_regardless_of_fill() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blocks.bin");
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)
        .unwrap();

    let block_size = 128;
    let mut block = Block::new(block_size);
    assert!(block.try_add(&rec("10001")));
    block.write_to(&mut file, 3).unwrap();

    // Slots 0..=2 were never written but the file must span them.
    let len = file.metadata().unwrap().len();
    assert_eq!(len, 4 * block_size as u64);
}

#[test]
fn avail_block_content_is_blank_filled() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blocks.bin");
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)
        .unwrap();

    let block_size = 96;
    let mut block = Block::new(block_size);
    block.try_add(&rec("10001"));
    block.make_avail(Some(5));
    block.write_to(&mut file, 1).unwrap();

    file.seek(SeekFrom::Start(block_size as u64)).unwrap();
    let mut raw = vec![0u8; block_size];
    file.read_exact(&mut raw).unwrap();
    assert!(
        raw[BLOCK_HEADER_SIZE..].iter().all(|&b| b == AVAIL_FILL),
        "avail content area must be blank, not zero"
    );

    let read_back = Block::read_from(&mut file, 1, block_size).unwrap();
    assert_eq!(read_back.block_type(), BlockType::Avail);
    assert_eq!(read_back.record_count(), 0);
    assert_eq!(read_back.successor(), Some(5));
}

#[test]
fn short_read_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blocks.bin");
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)
        .unwrap();

    let mut block = Block::new(64);
    block.write_to(&mut file, 0).unwrap();

    // Slot 1 does not exist.
    assert!(Block::read_from(&mut file, 1, 64).is_err());
}

#[test]
fn corrupt_record_count_is_detected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blocks.bin");
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)
        .unwrap();

    let block_size = 64;
    let mut block = Block::new(block_size);
    assert!(block.try_add(&rec("10001")));
    block.write_to(&mut file, 0).unwrap();

    // Claim far more records than the area holds.
    use std::io::Write;
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(&100u32.to_le_bytes()).unwrap();

    let err = Block::read_from(&mut file, 0, block_size).unwrap_err();
    assert!(err.to_string().contains("Corruption"));
}

#[test]
fn clear_resets_everything() {
    let mut block = Block::new(256);
    block.try_add(&rec("10001"));
    block.set_successor(Some(4));
    block.set_predecessor(Some(2));
    block.clear();

    assert_eq!(block.record_count(), 0);
    assert_eq!(block.successor(), None);
    assert_eq!(block.predecessor(), None);
    assert_eq!(block.block_type(), BlockType::Active);
    assert_eq!(block.highest_key(), "");
    assert_eq!(block.payload_bytes(), 0);
}
