//! Ingestion: CSV parsing and the length-prefixed flat-file sidecar.
//!
//! This is the collaborator that feeds bulk loads: it turns a tabular
//! source into a sequence of valid records, silently skipping malformed
//! lines and reporting how many were dropped. Order does not matter —
//! the file manager sorts before packing.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use log::warn;

use crate::error::{Error, Result};
use crate::record::{ZipRecord, LAT_LON_LEN};

/// Magic bytes identifying the length-prefixed flat record file.
const DAT_MAGIC: [u8; 4] = *b"ZDAT";

/// Flat-file format version.
const DAT_VERSION: u32 = 1;

/// How many skipped-line warnings to emit before going quiet.
const SKIP_WARN_LIMIT: u32 = 3;

/// Parse one CSV line into a record, tolerating real-world mess:
/// surrounding quotes, stray whitespace, a header row, and an optional
/// leading record-length column. Returns `None` for anything that is not
/// a data row.
pub fn parse_csv_line(line: &str) -> Option<ZipRecord> {
    let mut fields: Vec<String> = line
        .split(',')
        .map(|f| {
            let t = f.trim();
            let t = t
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(t);
            t.trim().to_string()
        })
        .collect();

    if fields.len() < 6 {
        return None;
    }

    // A 7-column row may carry a leading all-digit record-length field;
    // shift past it. Extra trailing columns are dropped.
    let start = if fields.len() >= 7 {
        let first = &fields[0];
        if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) {
            1
        } else if first.to_ascii_uppercase().contains("RECORD") {
            return None; // "RecordLength,..." header row
        } else {
            0
        }
    } else {
        0
    };
    if fields.len() < start + 6 {
        return None;
    }
    fields.truncate(start + 6);

    let zip = &fields[start];
    let upper_zip = zip.to_ascii_uppercase();
    if upper_zip.contains("ZIP") || upper_zip.contains("POSTAL") {
        return None; // header row
    }

    let lat: f64 = clamp_chars(&fields[start + 4], LAT_LON_LEN).parse().ok()?;
    let lon: f64 = clamp_chars(&fields[start + 5], LAT_LON_LEN).parse().ok()?;

    Some(ZipRecord::new(
        zip,
        &fields[start + 1],
        &fields[start + 2],
        &fields[start + 3],
        lat,
        lon,
    ))
}

fn clamp_chars(s: &str, max_len: usize) -> &str {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Read all parseable records from a CSV stream.
/// Returns the records plus the count of non-empty lines skipped.
pub fn read_csv_records<R: BufRead>(reader: R) -> Result<(Vec<ZipRecord>, u32)> {
    let mut records = Vec::new();
    let mut skipped: u32 = 0;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_csv_line(&line) {
            Some(rec) => records.push(rec),
            None => {
                skipped += 1;
                if skipped <= SKIP_WARN_LIMIT {
                    warn!("skipping CSV line {}: not a valid data row", line_no + 1);
                }
            }
        }
    }
    Ok((records, skipped))
}

/// Read a CSV file from disk. See [`read_csv_records`].
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<(Vec<ZipRecord>, u32)> {
    read_csv_records(BufReader::new(File::open(path)?))
}

/// Write records to the length-prefixed flat format:
/// `[magic(4B)][version(4B)][count(4B)]` then per record
/// `[len(4B)][comma-encoded bytes]`.
pub fn write_dat<P: AsRef<Path>>(path: P, records: &[ZipRecord]) -> Result<()> {
    let mut file = File::create(path)?;

    file.write_all(&DAT_MAGIC)?;
    file.write_all(&DAT_VERSION.to_le_bytes())?;
    file.write_all(&(records.len() as u32).to_le_bytes())?;

    for rec in records {
        let encoded = rec.encode();
        file.write_all(&(encoded.len() as u32).to_le_bytes())?;
        file.write_all(&encoded)?;
    }
    file.sync_all()?;
    Ok(())
}

/// Read a flat file back. Undecodable records are skipped and counted;
/// truncated length prefixes or data are corruption.
pub fn read_dat<P: AsRef<Path>>(path: P) -> Result<(Vec<ZipRecord>, u32)> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != DAT_MAGIC {
        return Err(Error::Corruption("bad flat file magic".into()));
    }
    let mut word = [0u8; 4];
    reader.read_exact(&mut word)?;
    let version = u32::from_le_bytes(word);
    if version != DAT_VERSION {
        return Err(Error::Corruption(format!(
            "unsupported flat file version: {version}"
        )));
    }
    reader.read_exact(&mut word)?;
    let count = u32::from_le_bytes(word);

    let mut records = Vec::with_capacity(count as usize);
    let mut skipped: u32 = 0;

    for i in 0..count {
        if reader.read_exact(&mut word).is_err() {
            return Err(Error::Corruption(format!(
                "flat file truncated at record {i} of {count}"
            )));
        }
        let len = u32::from_le_bytes(word) as usize;
        let mut data = vec![0u8; len];
        if reader.read_exact(&mut data).is_err() {
            return Err(Error::Corruption(format!(
                "flat file truncated inside record {i} of {count}"
            )));
        }
        match ZipRecord::decode(&data) {
            Ok(rec) => records.push(rec),
            Err(e) => {
                skipped += 1;
                if skipped <= SKIP_WARN_LIMIT {
                    warn!("skipping undecodable flat record {i}: {e}");
                }
            }
        }
    }

    Ok((records, skipped))
}
