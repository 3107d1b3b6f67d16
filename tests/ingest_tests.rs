// Ingestion tests: CSV tolerances, flat-file round-trips, end-to-end load.

use std::io::Cursor;

use bss_engine::file::BssFile;
use bss_engine::ingest::{read_csv_records, read_dat, write_dat};
use bss_engine::record::ZipRecord;
use tempfile::tempdir;

fn rec(zip: &str) -> ZipRecord {
    ZipRecord::new(zip, "Town", "MN", "County", 45.0, -93.0)
}

#[test]
fn csv_stream_skips_header_and_malformed_lines() {
    let csv = "\
Zip Code,Place Name,State,County,Lat,Long
56301,Saint Cloud,MN,Stearns,45.541,-94.1819

56303,\"Saint Cloud\",MN,Stearns,45.5725,-94.1983
oops,not,enough
56379,Sauk Rapids,MN,Benton,45.5947,not-a-number
56387,Waite Park,MN,Stearns,45.552,-94.2242
";
    let (records, skipped) = read_csv_records(Cursor::new(csv)).unwrap();

    let zips: Vec<&str> = records.iter().map(|r| r.zip.as_str()).collect();
    assert_eq!(zips, vec!["56301", "56303", "56387"]);
    // Header, short line, bad coordinate.
    assert_eq!(skipped, 3);
}

#[test]
fn csv_fields_are_truncated_to_schema_bounds() {
    let csv = "563011234,A Place,MINN,County,45.0,-93.0\n";
    let (records, skipped) = read_csv_records(Cursor::new(csv)).unwrap();
    assert_eq!(skipped, 0);
    assert_eq!(records[0].zip, "56301");
    assert_eq!(records[0].state, "MI");
}

#[test]
fn dat_roundtrip_preserves_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("zips.dat");

    let records: Vec<ZipRecord> = (0..50).map(|i| rec(&format!("{:05}", 10000 + i))).collect();
    write_dat(&path, &records).unwrap();

    let (read_back, skipped) = read_dat(&path).unwrap();
    assert_eq!(read_back, records);
    assert_eq!(skipped, 0);
}

#[test]
fn dat_with_bad_magic_is_corruption() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("zips.dat");
    std::fs::write(&path, b"WHAT\x01\x00\x00\x00\x00\x00\x00\x00").unwrap();

    assert!(matches!(
        read_dat(&path),
        Err(bss_engine::Error::Corruption(_))
    ));
}

#[test]
fn truncated_dat_is_corruption() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("zips.dat");

    let records: Vec<ZipRecord> = (0..5).map(|i| rec(&format!("{:05}", 10000 + i))).collect();
    write_dat(&path, &records).unwrap();

    let data = std::fs::read(&path).unwrap();
    std::fs::write(&path, &data[..data.len() - 10]).unwrap();
    assert!(matches!(
        read_dat(&path),
        Err(bss_engine::Error::Corruption(_))
    ));
}

#[test]
fn create_from_dat_loads_the_whole_pipeline() {
    let dir = tempdir().unwrap();
    let dat_path = dir.path().join("zips.dat");
    let bss_path = dir.path().join("zips.bss");

    // Unsorted on purpose; the bulk load sorts.
    let records = vec![rec("30000"), rec("10000"), rec("20000"), rec("15000")];
    write_dat(&dat_path, &records).unwrap();

    let (mut file, stats) = BssFile::create_from_dat(&bss_path, &dat_path).unwrap();
    assert_eq!(stats.loaded, 4);
    assert_eq!(stats.skipped, 0);
    assert_eq!(file.header().record_count, 4);

    let chain = file.dump_logical().unwrap();
    let mut keys = Vec::new();
    for summary in chain {
        let block = file.read_block(summary.block_number).unwrap();
        keys.extend(block.records().unwrap().iter().map(|r| r.zip.clone()));
    }
    assert_eq!(keys, vec!["10000", "15000", "20000", "30000"]);
}
