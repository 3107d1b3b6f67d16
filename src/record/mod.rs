//! The fixed ZIP-code record schema and its delimited byte codec.

use crate::error::{DecodeError, Result};

/// Field width bounds enforced at construction / ingestion time.
pub const ZIP_CODE_LEN: usize = 5;
pub const PLACE_NAME_LEN: usize = 50;
pub const STATE_LEN: usize = 2;
pub const COUNTY_LEN: usize = 50;
/// Max characters of a latitude/longitude field before numeric parse.
pub const LAT_LON_LEN: usize = 10;

/// Number of delimited fields in the encoded form.
const FIELD_COUNT: usize = 6;

/// The delimiter separating encoded fields. Field values must not
/// contain it; ingestion strips it by construction.
const DELIMITER: char = ',';

/// One logical record: a ZIP code (the primary key) plus place data.
///
/// The ZIP code is a fixed-width string whose lexicographic order defines
/// the total order of the file. Records are immutable once built; they are
/// constructed from decoded bytes or from ingestion and consumed by a block.
#[derive(Debug, Clone, PartialEq)]
pub struct ZipRecord {
    pub zip: String,
    pub place: String,
    pub state: String,
    pub county: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl ZipRecord {
    /// Build a record, truncating each text field to its schema bound.
    pub fn new(
        zip: &str,
        place: &str,
        state: &str,
        county: &str,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        ZipRecord {
            zip: truncate(zip, ZIP_CODE_LEN),
            place: truncate(place, PLACE_NAME_LEN),
            state: truncate(state, STATE_LEN),
            county: truncate(county, COUNTY_LEN),
            latitude,
            longitude,
        }
    }

    /// The primary key.
    pub fn key(&self) -> &str {
        &self.zip
    }

    /// Serialize to the comma-delimited text form stored inside blocks.
    ///
    /// Floats use the default decimal rendering, which parses back to the
    /// identical value, so `decode(encode(r)) == r` holds for any record
    /// whose fields are within bounds and delimiter-free.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{},{},{},{},{},{}",
            self.zip, self.place, self.state, self.county, self.latitude, self.longitude
        )
        .into_bytes()
    }

    /// Size of this record when serialized (without the length prefix).
    pub fn encoded_len(&self) -> usize {
        self.encode().len()
    }

    /// Deserialize from the delimited text form.
    ///
    /// Checked, never panics: short field counts and unparseable
    /// latitude/longitude come back as [`DecodeError`]s.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(data);
        let fields: Vec<&str> = text.split(DELIMITER).collect();
        if fields.len() < FIELD_COUNT {
            return Err(DecodeError::FieldCountMismatch {
                expected: FIELD_COUNT,
                got: fields.len(),
            }
            .into());
        }

        let latitude = parse_float(fields[4])?;
        let longitude = parse_float(fields[5])?;

        Ok(ZipRecord {
            zip: fields[0].to_string(),
            place: fields[1].to_string(),
            state: fields[2].to_string(),
            county: fields[3].to_string(),
            latitude,
            longitude,
        })
    }
}

fn parse_float(s: &str) -> Result<f64> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| DecodeError::MalformedNumeric(s.to_string()).into())
}

fn truncate(s: &str, max_len: usize) -> String {
    let trimmed = s.trim();
    match trimmed.char_indices().nth(max_len) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn sample() -> ZipRecord {
        ZipRecord::new("56301", "Saint Cloud", "MN", "Stearns", 45.541, -94.1819)
    }

    #[test]
    fn roundtrip() {
        let rec = sample();
        let encoded = rec.encode();
        let decoded = ZipRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn encoded_len_matches_encoding() {
        let rec = sample();
        assert_eq!(rec.encoded_len(), rec.encode().len());
    }

    #[test]
    fn decode_rejects_short_field_count() {
        let err = ZipRecord::decode(b"56301,Saint Cloud,MN").unwrap_err();
        match err {
            Error::Decode(DecodeError::FieldCountMismatch { expected: 6, got: 3 }) => {}
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decode_rejects_malformed_numeric() {
        let err = ZipRecord::decode(b"56301,Saint Cloud,MN,Stearns,north,west").unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::MalformedNumeric(_))
        ));
    }

    #[test]
    fn new_truncates_to_field_bounds() {
        let rec = ZipRecord::new(
            "123456789",
            "A Very Long Place Name That Goes Well Past Fifty Characters Total",
            "MINN",
            "County",
            1.0,
            2.0,
        );
        assert_eq!(rec.zip, "12345");
        assert_eq!(rec.place.chars().count(), PLACE_NAME_LEN);
        assert_eq!(rec.state, "MI");
    }

    #[test]
    fn negative_coordinates_survive_roundtrip() {
        let rec = ZipRecord::new("00501", "Holtsville", "NY", "Suffolk", -40.8154, -73.0451);
        assert_eq!(ZipRecord::decode(&rec.encode()).unwrap(), rec);
    }
}
