use std::fmt;
use std::io;

/// Why a record's encoded bytes failed to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer delimited fields than the schema requires.
    FieldCountMismatch { expected: usize, got: usize },
    /// Latitude or longitude did not parse as a real number.
    MalformedNumeric(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::FieldCountMismatch { expected, got } => {
                write!(f, "expected {expected} fields, got {got}")
            }
            DecodeError::MalformedNumeric(s) => write!(f, "malformed numeric field: {s:?}"),
        }
    }
}

/// Unified error type for the engine.
#[derive(Debug)]
pub enum Error {
    /// IO error from disk operations.
    Io(io::Error),
    /// Structural invariant violated on read (bad magic, CRC mismatch,
    /// record area overrunning the block, self-referential link, etc).
    Corruption(String),
    /// Key not found.
    NotFound,
    /// Malformed record bytes on a single-record decode path.
    Decode(DecodeError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Corruption(msg) => write!(f, "Corruption: {msg}"),
            Error::NotFound => write!(f, "Not found"),
            Error::Decode(e) => write!(f, "Decode error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
